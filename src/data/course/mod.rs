use chrono::{DateTime, Utc};
use rocket::fs::TempFile;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::storage::StoredFile;
use crate::data::user::{PasswordHash, UserResponse};
use crate::resp::problem::{problems, Problem};
use crate::security::Security;
use crate::util::check_len;

pub mod db;

/// Field of study a course belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Degree {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Semester {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub name: String,
}

/// Degree or semester as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LabelResponse {
    pub id: Uuid,
    pub name: String,
}

impl From<Degree> for LabelResponse {
    fn from(degree: Degree) -> Self {
        LabelResponse {
            id: degree.id,
            name: degree.name,
        }
    }
}

impl From<Semester> for LabelResponse {
    fn from(semester: Semester) -> Self {
        LabelResponse {
            id: semester.id,
            name: semester.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LabelCreateData {
    pub name: String,
}

impl LabelCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        check_len(&self.name, 1, 32).map_err(|e| problems::bad_field("name", e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub teacher: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub access_key: PasswordHash,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub degree: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub semester: Uuid,
    #[serde(default)]
    pub image: Option<StoredFile>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created: DateTime<Utc>,
}

impl Course {
    pub fn key_matches(&self, access_key: &str, security: &Security) -> bool {
        self.access_key.matches(access_key, security)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub course: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub student: Uuid,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub joined: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(course: Uuid, student: Uuid) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            course,
            student,
            joined: Utc::now(),
        }
    }
}

/// How the requesting user relates to a course.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CourseAccess {
    Owner,
    Admin,
    Enrolled,
    Outsider,
}

impl CourseAccess {
    pub fn is_member(self) -> bool {
        self != CourseAccess::Outsider
    }

    pub fn can_manage(self) -> bool {
        matches!(self, CourseAccess::Owner | CourseAccess::Admin)
    }
}

#[derive(FromForm)]
pub struct CourseCreateData<'r> {
    pub title: String,
    pub description: Option<String>,
    pub access_key: String,
    pub degree: Uuid,
    pub semester: Uuid,
    pub image: Option<TempFile<'r>>,
}

impl std::fmt::Debug for CourseCreateData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CourseCreateData:{}", self.title)
    }
}

impl CourseCreateData<'_> {
    pub fn validate(&self) -> Result<(), Problem> {
        check_len(&self.title, 1, 64).map_err(|e| problems::bad_field("title", e))?;
        check_len(self.description.as_deref().unwrap_or_default(), 0, 2048)
            .map_err(|e| problems::bad_field("description", e))?;
        check_len(&self.access_key, 1, 64).map_err(|e| problems::bad_field("access_key", e))?;
        Ok(())
    }

    pub fn into_course(
        self,
        teacher: Uuid,
        image: Option<StoredFile>,
        security: &Security,
    ) -> Course {
        Course {
            id: Uuid::new_v4(),
            teacher,
            title: self.title.trim().to_string(),
            description: self.description.unwrap_or_default(),
            access_key: PasswordHash::new(&self.access_key, security),
            degree: self.degree,
            semester: self.semester,
            image,
            created: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EnrollData {
    pub access_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseResponse {
    pub id: Uuid,
    pub teacher: Uuid,
    pub title: String,
    pub description: String,
    pub degree: Uuid,
    pub semester: Uuid,
    pub image: Option<String>,
    pub created: DateTime<Utc>,
}

impl From<&Course> for CourseResponse {
    fn from(course: &Course) -> Self {
        CourseResponse {
            id: course.id,
            teacher: course.teacher,
            title: course.title.clone(),
            description: course.description.clone(),
            degree: course.degree,
            semester: course.semester,
            image: course.image.as_ref().map(StoredFile::media_url),
            created: course.created,
        }
    }
}

impl From<Course> for CourseResponse {
    fn from(course: Course) -> Self {
        CourseResponse::from(&course)
    }
}

/// Everything a course member sees on the course page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseDetailResponse {
    #[serde(flatten)]
    pub course: CourseResponse,
    pub teacher_info: Option<UserResponse>,
    pub topics: Vec<crate::data::topic::TopicDetailResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_data(title: &str, key: &str) -> CourseCreateData<'static> {
        CourseCreateData {
            title: title.to_string(),
            description: Some("Linear algebra basics".to_string()),
            access_key: key.to_string(),
            degree: Uuid::new_v4(),
            semester: Uuid::new_v4(),
            image: None,
        }
    }

    #[test]
    fn course_form_validation() {
        assert!(create_data("Algebra", "secret").validate().is_ok());

        let problem = create_data("", "secret").validate().unwrap_err();
        assert_eq!(problem.body["field"], "title");

        let problem = create_data(&"x".repeat(65), "secret").validate().unwrap_err();
        assert_eq!(problem.body["field"], "title");

        let problem = create_data("Algebra", "").validate().unwrap_err();
        assert_eq!(problem.body["field"], "access_key");

        let mut data = create_data("Algebra", "secret");
        data.description = Some("d".repeat(2049));
        assert_eq!(data.validate().unwrap_err().body["field"], "description");
    }

    #[test]
    fn access_key_is_hashed() {
        let security = Security::for_tests();
        let teacher = Uuid::new_v4();
        let course = create_data("Algebra", "open sesame").into_course(teacher, None, &security);

        assert_eq!(course.teacher, teacher);
        assert!(course.key_matches("open sesame", &security));
        assert!(!course.key_matches("open sesame!", &security));
        assert_eq!(CourseResponse::from(&course).image, None);
    }

    #[test]
    fn access_levels() {
        assert!(CourseAccess::Owner.can_manage());
        assert!(CourseAccess::Admin.can_manage());
        assert!(!CourseAccess::Enrolled.can_manage());
        assert!(CourseAccess::Enrolled.is_member());
        assert!(!CourseAccess::Outsider.is_member());
    }

    #[test]
    fn label_validation() {
        let label = LabelCreateData {
            name: "Informatyka".to_string(),
        };
        assert!(label.validate().is_ok());

        let label = LabelCreateData {
            name: " ".to_string(),
        };
        assert!(label.validate().is_err());
    }
}
