use chrono::{DateTime, Utc};
use rocket::fs::TempFile;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::assignment::AssignmentResponse;
use crate::data::storage::StoredFile;
use crate::resp::problem::{problems, Problem};
use crate::util::check_len;

pub mod db;

/// A section of a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub course: Uuid,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created: DateTime<Utc>,
}

/// Material attached to a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseFile {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub topic: Uuid,
    pub name: String,
    pub file: StoredFile,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub uploaded: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TopicData {
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl TopicData {
    pub fn validate(&self) -> Result<(), Problem> {
        check_len(&self.title, 1, 64).map_err(|e| problems::bad_field("title", e))?;
        check_len(&self.content, 0, 4096).map_err(|e| problems::bad_field("content", e))?;
        Ok(())
    }

    pub fn into_topic(self, course: Uuid) -> Topic {
        Topic {
            id: Uuid::new_v4(),
            course,
            title: self.title.trim().to_string(),
            content: self.content,
            created: Utc::now(),
        }
    }

    pub fn apply(self, topic: &mut Topic) {
        topic.title = self.title.trim().to_string();
        topic.content = self.content;
    }
}

#[derive(FromForm)]
pub struct CourseFileUpload<'r> {
    pub name: String,
    pub file: TempFile<'r>,
}

impl std::fmt::Debug for CourseFileUpload<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CourseFileUpload:{}", self.name)
    }
}

impl CourseFileUpload<'_> {
    pub fn validate(&self) -> Result<(), Problem> {
        check_len(&self.name, 1, 128).map_err(|e| problems::bad_field("name", e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopicResponse {
    pub id: Uuid,
    pub course: Uuid,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
}

impl From<&Topic> for TopicResponse {
    fn from(topic: &Topic) -> Self {
        TopicResponse {
            id: topic.id,
            course: topic.course,
            title: topic.title.clone(),
            content: topic.content.clone(),
            created: topic.created,
        }
    }
}

impl From<Topic> for TopicResponse {
    fn from(topic: Topic) -> Self {
        TopicResponse::from(&topic)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseFileResponse {
    pub id: Uuid,
    pub topic: Uuid,
    pub name: String,
    /// Name the file was uploaded with.
    pub filename: String,
    pub uploaded: DateTime<Utc>,
}

impl From<&CourseFile> for CourseFileResponse {
    fn from(file: &CourseFile) -> Self {
        CourseFileResponse {
            id: file.id,
            topic: file.topic,
            name: file.name.clone(),
            filename: file.file.name.clone(),
            uploaded: file.uploaded,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopicDetailResponse {
    #[serde(flatten)]
    pub topic: TopicResponse,
    pub files: Vec<CourseFileResponse>,
    pub assignments: Vec<AssignmentResponse>,
}
