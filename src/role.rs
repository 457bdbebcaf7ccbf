use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum Role {
    None,
    Student,
    Teacher,
    Admin,
}

impl From<Role> for u8 {
    fn from(role: Role) -> u8 {
        match role {
            Role::None => 0u8,
            Role::Student => 1u8,
            Role::Teacher => 2u8,
            Role::Admin => 3u8,
        }
    }
}

impl From<u8> for Role {
    fn from(value: u8) -> Self {
        match value {
            1 => Role::Student,
            2 => Role::Teacher,
            3..=u8::MAX => Role::Admin,
            0 => Role::None,
        }
    }
}

impl Role {
    /// Indicates whether user with role belongs to the teacher group and can create courses
    pub fn can_teach(self) -> bool {
        self >= Role::Teacher
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::None
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::None => write!(f, "none"),
            Role::Student => write!(f, "student"),
            Role::Teacher => write!(f, "teacher"),
            Role::Admin => write!(f, "admin"),
        }
    }
}
