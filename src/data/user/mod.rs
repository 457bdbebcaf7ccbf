use chrono::{DateTime, Utc};
use crypto::bcrypt::bcrypt;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::storage::{StoredFile, DEFAULT_PICTURE_URL};
use crate::role::Role;
use crate::security::Security;

pub mod activation;
pub mod db;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PasswordHash([u8; 24]);

impl PasswordHash {
    pub fn new(password: impl AsRef<str>, security: &Security) -> PasswordHash {
        let mut pw_hash: [u8; 24] = [0; 24];

        let mut sha = Sha256::new();
        sha2::Digest::update(&mut sha, password.as_ref().as_bytes());

        bcrypt(
            security.password_cost,
            &security.salt,
            sha.finalize().as_slice(),
            &mut pw_hash,
        );

        PasswordHash(pw_hash)
    }

    pub fn matches(&self, password: impl AsRef<str>, security: &Security) -> bool {
        *self == PasswordHash::new(password, security)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub pw_hash: PasswordHash,
    pub user_role: Role,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub picture: Option<StoredFile>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub joined: DateTime<Utc>,
}

impl User {
    pub fn new(
        email: impl ToString,
        username: impl ToString,
        password: impl AsRef<str>,
        security: &Security,
    ) -> User {
        let pw_hash = PasswordHash::new(password, security);

        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, username.to_string().as_bytes());
        tracing::info!("Creating a new user with UUID: {}", id);

        User {
            id,
            email: email.to_string(),
            username: username.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            pw_hash,
            user_role: Role::Student,
            active: true,
            picture: None,
            joined: Utc::now(),
        }
    }

    pub fn picture_url(&self) -> String {
        self.picture
            .as_ref()
            .map(StoredFile::media_url)
            .unwrap_or_else(|| DEFAULT_PICTURE_URL.to_string())
    }

    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        match full.trim() {
            "" => self.username.clone(),
            name => name.to_string(),
        }
    }
}

/// Publicly visible user information.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: String,
    pub user_role: Role,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            profile_picture: user.picture_url(),
            user_role: user.user_role,
        }
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse::from(&user)
    }
}

/// User information only shown to the user themselves.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub email: String,
    pub active: bool,
    pub joined: DateTime<Utc>,
}

impl From<&User> for ProfileResponse {
    fn from(user: &User) -> Self {
        ProfileResponse {
            user: UserResponse::from(user),
            email: user.email.clone(),
            active: user.active,
            joined: user.joined,
        }
    }
}
