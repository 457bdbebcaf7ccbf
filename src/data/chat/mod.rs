use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::user::{User, UserResponse};
use crate::resp::problem::{problems, Problem};
use crate::util::check_len;

pub mod db;

/// Order independent key of a conversation between two users.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

/// A conversation between two users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub first_person: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub second_person: Uuid,
    pub pair: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl Thread {
    pub fn new(first_person: Uuid, second_person: Uuid) -> Thread {
        Thread {
            id: Uuid::new_v4(),
            first_person,
            second_person,
            pair: pair_key(first_person, second_person),
            timestamp: Utc::now(),
        }
    }

    pub fn has_participant(&self, user: Uuid) -> bool {
        self.first_person == user || self.second_person == user
    }

    /// The participant that isn't `user`.
    pub fn other(&self, user: Uuid) -> Uuid {
        if self.first_person == user {
            self.second_person
        } else {
            self.first_person
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub thread: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub user: Uuid,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub date: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(thread: Uuid, user: Uuid, message: impl ToString) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            thread,
            user,
            message: message.to_string(),
            is_read: false,
            date: Utc::now(),
        }
    }
}

pub const MAX_MESSAGE_LENGTH: usize = 500;

/// A chat frame received from a client socket.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IncomingMessage {
    #[serde(default)]
    pub message: String,
    pub send_by: Uuid,
    pub send_to: Uuid,
    pub thread_id: Uuid,
}

impl IncomingMessage {
    /// Blank messages are dropped without a reply.
    pub fn is_blank(&self) -> bool {
        self.message.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), Problem> {
        check_len(&self.message, 1, MAX_MESSAGE_LENGTH)
            .map_err(|e| problems::bad_field("message", e))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SenderData {
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: String,
}

impl From<&User> for SenderData {
    fn from(user: &User) -> Self {
        SenderData {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            profile_picture: user.picture_url(),
        }
    }
}

/// A chat frame delivered to both participants' sockets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OutgoingMessage {
    pub message: String,
    pub send_by: Uuid,
    pub thread_id: Uuid,
    pub user_data: SenderData,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SocketError {
    pub error: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SearchData {
    pub users: Option<String>,
}

impl SearchData {
    pub fn query(&self) -> Option<&str> {
        self.users
            .as_deref()
            .map(str::trim)
            .filter(|it| !it.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: Uuid,
    pub thread: Uuid,
    pub user: Uuid,
    pub message: String,
    pub is_read: bool,
    pub date: DateTime<Utc>,
}

impl From<&ChatMessage> for MessageResponse {
    fn from(message: &ChatMessage) -> Self {
        MessageResponse {
            id: message.id,
            thread: message.thread,
            user: message.user,
            message: message.message.clone(),
            is_read: message.is_read,
            date: message.date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadResponse {
    pub id: Uuid,
    pub first_person: Uuid,
    pub second_person: Uuid,
    pub timestamp: DateTime<Utc>,
    /// The participant other than the caller.
    pub other: Option<UserResponse>,
    pub unread: usize,
    pub messages: Vec<MessageResponse>,
}

impl ThreadResponse {
    pub fn new(
        thread: &Thread,
        viewer: Uuid,
        other: Option<UserResponse>,
        messages: &[ChatMessage],
    ) -> ThreadResponse {
        ThreadResponse {
            id: thread.id,
            first_person: thread.first_person,
            second_person: thread.second_person,
            timestamp: thread.timestamp,
            other,
            unread: messages
                .iter()
                .filter(|it| it.user != viewer && !it.is_read)
                .count(),
            messages: messages.iter().map(MessageResponse::from).collect(),
        }
    }
}
