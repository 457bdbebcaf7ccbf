use bson::doc;
use mongodb::options::FindOptions;
use mongodb::Database;
use rocket::futures::TryStreamExt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::Config;
use crate::data::assignment::db::AssignmentDbExt;
use crate::data::chat::db::ChatDbExt;
use crate::data::course::db::CourseDbExt;
use crate::data::filter;
use crate::data::storage::MediaStore;
use crate::middleware::paging::PageState;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::security::Security;
use crate::util::check_len;

use super::User;

pub static USER_COLLECTION_NAME: &str = "user";

pub mod problem {
    use crate::resp::problem::Problem;
    use rocket::http::Status;
    use uuid::Uuid;

    #[inline]
    pub fn bad_email(email: impl ToString, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad email.")
            .insert_str("email", email)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_username(username: impl ToString, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad username.")
            .insert_str("username", username)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_name(field: &str, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad name.")
            .insert_str("field", field)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_password(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad password.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        Problem::new_untyped(Status::NotFound, "User doesn't exist.")
            .insert("id", id.to_string())
            .clone()
    }

    #[inline]
    pub fn bad_login(is_email: bool) -> Problem {
        Problem::new_untyped(
            Status::Unauthorized,
            if is_email {
                "Bad email or password."
            } else {
                "Bad username or password."
            },
        )
    }

    #[inline]
    pub fn inactive() -> Problem {
        Problem::new_untyped(Status::Unauthorized, "Account not activated.")
            .detail("Follow the activation link sent to your e-mail address.")
            .to_owned()
    }

    #[inline]
    pub fn bad_activation() -> Problem {
        Problem::new_untyped(Status::BadRequest, "Activation link is invalid.")
            .detail("The link is malformed, expired or was already used.")
            .to_owned()
    }
}

fn validate_email(email: &str) -> Result<(), Problem> {
    if !email.contains('@') {
        return Err(problem::bad_email(email, "Not a valid e-mail address."));
    }
    if email.len() > 254 {
        return Err(problem::bad_email(email, "E-mail address is too long."));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<(), Problem> {
    if username.len() < 5 {
        return Err(problem::bad_username(
            username,
            "Username must be at least 5 characters (bytes) long.",
        ));
    }
    if username.len() > 32 {
        return Err(problem::bad_username(
            username,
            "Username can't be longer than 32 (bytes) characters.",
        ));
    }
    if username.contains('@') {
        return Err(problem::bad_username(username, "Username can't contain '@'."));
    }
    Ok(())
}

fn validate_names(first_name: &str, last_name: &str) -> Result<(), Problem> {
    check_len(first_name, 0, 64).map_err(|e| problem::bad_name("first_name", e))?;
    check_len(last_name, 0, 64).map_err(|e| problem::bad_name("last_name", e))?;
    Ok(())
}

#[derive(Clone, FromForm, ToSchema)]
pub struct UserSignupData {
    pub email: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[schema(format = "password")]
    pub password: String,
    #[schema(format = "password")]
    pub password_confirm: String,
}

impl UserSignupData {
    pub fn id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, self.username.as_bytes())
    }

    pub fn into_user(self, security: &Security) -> User {
        let mut user = User::new(self.email, self.username, self.password, security);
        user.first_name = self.first_name.unwrap_or_default().trim().to_string();
        user.last_name = self.last_name.unwrap_or_default().trim().to_string();
        user
    }
}

impl std::fmt::Debug for UserSignupData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserSignupInfo:{}", self.username)
    }
}

impl UserSignupData {
    pub fn validate(&self) -> Result<(), Problem> {
        validate_email(&self.email)?;
        validate_username(&self.username)?;
        validate_names(
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default(),
        )?;

        if self.password.len() < 8 {
            return Err(problem::bad_password(
                "Password must be at least 8 characters (bytes) long.",
            ));
        }

        if self.password.len() > 1024 {
            return Err(problem::bad_password(
                "Passwords longer than 1024 characters aren't supported.",
            ));
        }

        if self.password != self.password_confirm {
            return Err(problem::bad_password("Passwords don't match."));
        }

        Ok(())
    }
}

#[derive(Clone, FromForm, ToSchema)]
pub struct UserLoginData {
    /// Username or e-mail address.
    pub identifier: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for UserLoginData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserLoginInfo:{}", self.identifier)
    }
}

impl UserLoginData {
    pub fn is_email(&self) -> bool {
        self.identifier.contains('@')
    }

    pub fn validate(&self, is_email: bool) -> Result<(), Problem> {
        let identifier_ok = if is_email {
            self.identifier.len() <= 254
        } else {
            (5..=32).contains(&self.identifier.len())
        };

        if !identifier_ok || self.password.len() < 8 || self.password.len() > 1024 {
            return Err(problem::bad_login(is_email));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UserUpdateData {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl UserUpdateData {
    pub fn validate(&self) -> Result<(), Problem> {
        validate_email(&self.email)?;
        validate_username(&self.username)?;
        validate_names(&self.first_name, &self.last_name)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RoleUpdateData {
    pub role: Role,
}

/// Role given to a newly created account.
pub fn initial_role(username: &str, config: &Config) -> Role {
    if config.admin_usernames.iter().any(|it| it == username) {
        Role::Admin
    } else if config.teacher_usernames.iter().any(|it| it == username) {
        Role::Teacher
    } else {
        Role::Student
    }
}

pub trait UserDbExt {
    async fn create_user(
        &self,
        create_user: UserSignupData,
        config: &Config,
        security: &Security,
    ) -> Result<User, Problem>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem>;
    async fn require_user(&self, id: Uuid) -> Result<User, Problem>;
    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>, Problem>;

    async fn find_user_by_email(&self, email: impl AsRef<str>) -> Result<Option<User>, Problem>;
    async fn find_user_by_username(
        &self,
        username: impl AsRef<str>,
    ) -> Result<Option<User>, Problem>;

    async fn search_users(
        &self,
        query: &str,
        exclude: Uuid,
        page: PageState,
    ) -> Result<Vec<User>, Problem>;

    async fn update_user(&self, user: &User) -> Result<(), Problem>;
    async fn update_profile(&self, user: User, data: UserUpdateData) -> Result<User, Problem>;

    async fn delete_user(&self, id: Uuid, media: &MediaStore) -> Result<Option<User>, Problem>;
}

impl UserDbExt for Database {
    async fn create_user(
        &self,
        create_user: UserSignupData,
        config: &Config,
        security: &Security,
    ) -> Result<User, Problem> {
        if self.find_user_by_email(&create_user.email).await?.is_some() {
            return Err(problem::bad_email(
                create_user.email.to_string(),
                "Email already registered.",
            ));
        }

        if self
            .find_user_by_username(&create_user.username)
            .await?
            .is_some()
        {
            return Err(problem::bad_username(
                create_user.username.to_string(),
                "Username already used.",
            ));
        }

        let mut user = create_user.into_user(security);
        user.user_role = initial_role(&user.username, config);
        user.active = config.auto_activate;

        self.collection::<User>(USER_COLLECTION_NAME)
            .insert_one(&user, None)
            .await?;

        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn require_user(&self, id: Uuid) -> Result<User, Problem> {
        self.get_user(id).await?.ok_or_else(|| problem::not_found(id))
    }

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>, Problem> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let users = self
            .collection::<User>(USER_COLLECTION_NAME)
            .find(filter::by_ids(ids), None)
            .await?
            .try_collect()
            .await?;
        Ok(users)
    }

    async fn find_user_by_email(&self, email: impl AsRef<str>) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(doc! { "email": email.as_ref() }, None)
            .await
            .map_err(Problem::from)
    }

    async fn find_user_by_username(
        &self,
        username: impl AsRef<str>,
    ) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(doc! { "username": username.as_ref() }, None)
            .await
            .map_err(Problem::from)
    }

    async fn search_users(
        &self,
        query: &str,
        exclude: Uuid,
        page: PageState,
    ) -> Result<Vec<User>, Problem> {
        let pattern = regex::escape(query.trim());
        let matcher = doc! { "$regex": pattern, "$options": "i" };

        let filter = doc! {
            "_id": { "$ne": crate::data::bson_id(exclude) },
            "$or": [
                { "username": matcher.clone() },
                { "first_name": matcher.clone() },
                { "last_name": matcher },
            ],
        };
        let options = FindOptions::builder()
            .sort(doc! { "joined": 1 })
            .skip(page.skip())
            .limit(page.limit())
            .build();

        let users = self
            .collection::<User>(USER_COLLECTION_NAME)
            .find(filter, options)
            .await?
            .try_collect()
            .await?;
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> Result<(), Problem> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .replace_one(filter::by_id(user.id), user, None)
            .await?;
        Ok(())
    }

    async fn update_profile(&self, mut user: User, data: UserUpdateData) -> Result<User, Problem> {
        if data.email != user.email {
            if let Some(other) = self.find_user_by_email(&data.email).await? {
                if other.id != user.id {
                    return Err(problem::bad_email(data.email, "Email already registered."));
                }
            }
        }
        if data.username != user.username {
            if let Some(other) = self.find_user_by_username(&data.username).await? {
                if other.id != user.id {
                    return Err(problem::bad_username(data.username, "Username already used."));
                }
            }
        }

        user.email = data.email;
        user.username = data.username;
        user.first_name = data.first_name.trim().to_string();
        user.last_name = data.last_name.trim().to_string();

        self.update_user(&user).await?;
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid, media: &MediaStore) -> Result<Option<User>, Problem> {
        let user = match self.get_user(id).await? {
            Some(it) => it,
            None => return Ok(None),
        };

        for course in self.courses_taught_by(id).await? {
            self.delete_course(&course, media).await?;
        }
        self.delete_enrollments_of(id).await?;
        self.delete_student_work(id, media).await?;
        self.delete_threads_of(id).await?;

        if let Some(picture) = &user.picture {
            media.remove(picture).await?;
        }

        self.collection::<User>(USER_COLLECTION_NAME)
            .delete_one(filter::by_id(id), None)
            .await?;

        tracing::info!("Deleted user {} ({})", user.username, id);
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(username: &str) -> UserSignupData {
        UserSignupData {
            email: format!("{}@example.com", username),
            username: username.to_string(),
            first_name: Some("Jan".to_string()),
            last_name: Some("Kowalski".to_string()),
            password: "p4ssw0rd!".to_string(),
            password_confirm: "p4ssw0rd!".to_string(),
        }
    }

    #[test]
    fn valid_signup_passes() {
        assert!(signup("jan_kowalski").validate().is_ok());
    }

    #[test]
    fn signup_rejects_bad_fields() {
        let mut data = signup("jan_kowalski");
        data.email = "not-an-email".to_string();
        assert_eq!(data.validate().unwrap_err().title, "Bad email.");

        let data = signup("jan");
        assert_eq!(data.validate().unwrap_err().title, "Bad username.");

        let data = signup("a_very_long_username_that_keeps_going");
        assert_eq!(data.validate().unwrap_err().title, "Bad username.");

        let mut data = signup("jan_kowalski");
        data.password = "short".to_string();
        data.password_confirm = "short".to_string();
        assert_eq!(data.validate().unwrap_err().title, "Bad password.");

        let mut data = signup("jan_kowalski");
        data.password_confirm = "different1".to_string();
        let problem = data.validate().unwrap_err();
        assert_eq!(problem.detail.as_deref(), Some("Passwords don't match."));

        let mut data = signup("jan_kowalski");
        data.first_name = Some("x".repeat(65));
        assert_eq!(data.validate().unwrap_err().title, "Bad name.");
    }

    #[test]
    fn login_identifier_kind() {
        let login = UserLoginData {
            identifier: "jan@example.com".to_string(),
            password: "p4ssw0rd!".to_string(),
        };
        assert!(login.is_email());
        assert!(login.validate(true).is_ok());

        let login = UserLoginData {
            identifier: "jan".to_string(),
            password: "p4ssw0rd!".to_string(),
        };
        assert!(!login.is_email());
        let problem = login.validate(false).unwrap_err();
        assert_eq!(problem.title, "Bad username or password.");
    }

    #[test]
    fn initial_roles_follow_config() {
        let mut config = Config::default();
        config.admin_usernames = vec!["admin".to_string()];
        config.teacher_usernames = vec!["mr_green".to_string()];

        assert_eq!(initial_role("admin", &config), Role::Admin);
        assert_eq!(initial_role("mr_green", &config), Role::Teacher);
        assert_eq!(initial_role("student1", &config), Role::Student);
    }

    #[test]
    fn signup_builds_user() {
        let security = Security::for_tests();
        let data = signup("jan_kowalski");
        let id = data.id();
        let user = data.into_user(&security);

        assert_eq!(user.id, id);
        assert_eq!(user.first_name, "Jan");
        assert!(user.pw_hash.matches("p4ssw0rd!", &security));
    }

    #[test]
    fn profile_update_validation() {
        let data = UserUpdateData {
            username: "jan_kowalski".to_string(),
            email: "jan@example.com".to_string(),
            first_name: String::new(),
            last_name: String::new(),
        };
        assert!(data.validate().is_ok());

        let data = UserUpdateData {
            username: "jan@kowalski".to_string(),
            ..data
        };
        assert!(data.validate().is_err());
    }
}
