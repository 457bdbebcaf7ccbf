use bson::doc;
use mongodb::options::{FindOptions, UpdateOptions};
use mongodb::Database;
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use super::{Course, CourseAccess, Degree, Enrollment, Semester};
use crate::data::filter;
use crate::data::storage::MediaStore;
use crate::data::topic::db::TopicDbExt;
use crate::middleware::paging::PageState;
use crate::resp::jwt::{role_problem, UserRoleToken};
use crate::resp::problem::Problem;
use crate::role::Role;

pub static COURSE_COLLECTION_NAME: &str = "course";
pub static DEGREE_COLLECTION_NAME: &str = "degree";
pub static SEMESTER_COLLECTION_NAME: &str = "semester";
pub static ENROLLMENT_COLLECTION_NAME: &str = "enrollment";

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use rocket::http::Status;
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("Course", id)
    }

    #[inline]
    pub fn not_member(id: Uuid) -> Problem {
        problems::forbidden("Only the course teacher and enrolled students can access it.")
            .insert_str("course", id)
            .to_owned()
    }

    #[inline]
    pub fn bad_access_key() -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad access key.")
    }

    #[inline]
    pub fn own_course() -> Problem {
        Problem::new_untyped(Status::BadRequest, "Can't enroll in your own course.")
    }
}

pub trait CourseDbExt {
    async fn list_degrees(&self) -> Result<Vec<Degree>, Problem>;
    async fn create_degree(&self, name: &str) -> Result<Degree, Problem>;
    async fn list_semesters(&self) -> Result<Vec<Semester>, Problem>;
    async fn create_semester(&self, name: &str) -> Result<Semester, Problem>;
    async fn degree_exists(&self, id: Uuid) -> Result<bool, Problem>;
    async fn semester_exists(&self, id: Uuid) -> Result<bool, Problem>;

    async fn create_course(&self, course: &Course) -> Result<(), Problem>;
    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, Problem>;
    async fn list_courses(&self, page: PageState) -> Result<Vec<Course>, Problem>;
    async fn courses_taught_by(&self, teacher: Uuid) -> Result<Vec<Course>, Problem>;
    async fn delete_course(&self, course: &Course, media: &MediaStore) -> Result<(), Problem>;

    async fn course_access(
        &self,
        course: &Course,
        auth: &UserRoleToken,
    ) -> Result<CourseAccess, Problem>;
    /// A course the caller may modify. Anyone else is told it doesn't exist.
    async fn managed_course(&self, id: Uuid, auth: &UserRoleToken) -> Result<Course, Problem>;
    /// A course the caller teaches or is enrolled in.
    async fn member_course(
        &self,
        id: Uuid,
        auth: &UserRoleToken,
    ) -> Result<(Course, CourseAccess), Problem>;

    async fn is_enrolled(&self, course: Uuid, student: Uuid) -> Result<bool, Problem>;
    async fn enroll(&self, course: Uuid, student: Uuid) -> Result<bool, Problem>;
    async fn leave(&self, course: Uuid, student: Uuid) -> Result<bool, Problem>;
    async fn enrolled_course_ids(&self, student: Uuid) -> Result<Vec<Uuid>, Problem>;
    async fn enrolled_courses(&self, student: Uuid) -> Result<Vec<Course>, Problem>;
    async fn delete_enrollments_of(&self, student: Uuid) -> Result<u64, Problem>;
}

impl CourseDbExt for Database {
    async fn list_degrees(&self) -> Result<Vec<Degree>, Problem> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        let degrees = self
            .collection::<Degree>(DEGREE_COLLECTION_NAME)
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        Ok(degrees)
    }

    async fn create_degree(&self, name: &str) -> Result<Degree, Problem> {
        let degree = Degree {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
        };
        self.collection::<Degree>(DEGREE_COLLECTION_NAME)
            .insert_one(&degree, None)
            .await?;
        Ok(degree)
    }

    async fn list_semesters(&self) -> Result<Vec<Semester>, Problem> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        let semesters = self
            .collection::<Semester>(SEMESTER_COLLECTION_NAME)
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        Ok(semesters)
    }

    async fn create_semester(&self, name: &str) -> Result<Semester, Problem> {
        let semester = Semester {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
        };
        self.collection::<Semester>(SEMESTER_COLLECTION_NAME)
            .insert_one(&semester, None)
            .await?;
        Ok(semester)
    }

    async fn degree_exists(&self, id: Uuid) -> Result<bool, Problem> {
        let count = self
            .collection::<Degree>(DEGREE_COLLECTION_NAME)
            .count_documents(filter::by_id(id), None)
            .await?;
        Ok(count > 0)
    }

    async fn semester_exists(&self, id: Uuid) -> Result<bool, Problem> {
        let count = self
            .collection::<Semester>(SEMESTER_COLLECTION_NAME)
            .count_documents(filter::by_id(id), None)
            .await?;
        Ok(count > 0)
    }

    async fn create_course(&self, course: &Course) -> Result<(), Problem> {
        self.collection::<Course>(COURSE_COLLECTION_NAME)
            .insert_one(course, None)
            .await?;
        tracing::info!("Created course '{}' ({})", course.title, course.id);
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, Problem> {
        self.collection(COURSE_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn list_courses(&self, page: PageState) -> Result<Vec<Course>, Problem> {
        let options = FindOptions::builder()
            .sort(doc! { "created": -1 })
            .skip(page.skip())
            .limit(page.limit())
            .build();
        let courses = self
            .collection::<Course>(COURSE_COLLECTION_NAME)
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        Ok(courses)
    }

    async fn courses_taught_by(&self, teacher: Uuid) -> Result<Vec<Course>, Problem> {
        let courses = self
            .collection::<Course>(COURSE_COLLECTION_NAME)
            .find(filter::by_field("teacher", teacher), None)
            .await?
            .try_collect()
            .await?;
        Ok(courses)
    }

    async fn delete_course(&self, course: &Course, media: &MediaStore) -> Result<(), Problem> {
        for topic in self.topics_of_course(course.id).await? {
            self.delete_topic(&topic, media).await?;
        }

        self.collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME)
            .delete_many(filter::by_field("course", course.id), None)
            .await?;

        if let Some(image) = &course.image {
            media.remove_all([image]).await;
        }

        self.collection::<Course>(COURSE_COLLECTION_NAME)
            .delete_one(filter::by_id(course.id), None)
            .await?;

        tracing::info!("Deleted course '{}' ({})", course.title, course.id);
        Ok(())
    }

    async fn course_access(
        &self,
        course: &Course,
        auth: &UserRoleToken,
    ) -> Result<CourseAccess, Problem> {
        if course.teacher == auth.user {
            return Ok(CourseAccess::Owner);
        }
        if auth.is_admin() {
            return Ok(CourseAccess::Admin);
        }
        if self.is_enrolled(course.id, auth.user).await? {
            return Ok(CourseAccess::Enrolled);
        }
        Ok(CourseAccess::Outsider)
    }

    async fn managed_course(&self, id: Uuid, auth: &UserRoleToken) -> Result<Course, Problem> {
        match self.get_course(id).await? {
            Some(course) if course.teacher == auth.user || auth.is_admin() => Ok(course),
            Some(_) => {
                tracing::debug!("user {} doesn't manage course {}", auth.user, id);
                Err(problem::not_found(id))
            }
            None => Err(problem::not_found(id)),
        }
    }

    async fn member_course(
        &self,
        id: Uuid,
        auth: &UserRoleToken,
    ) -> Result<(Course, CourseAccess), Problem> {
        let course = self
            .get_course(id)
            .await?
            .ok_or_else(|| problem::not_found(id))?;

        let access = self.course_access(&course, auth).await?;
        if !access.is_member() {
            return Err(problem::not_member(id));
        }

        Ok((course, access))
    }

    async fn is_enrolled(&self, course: Uuid, student: Uuid) -> Result<bool, Problem> {
        let mut filter = filter::by_field("course", course);
        filter.extend(filter::by_field("student", student));

        let count = self
            .collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME)
            .count_documents(filter, None)
            .await?;
        Ok(count > 0)
    }

    /// Returns `false` when the student was already enrolled.
    async fn enroll(&self, course: Uuid, student: Uuid) -> Result<bool, Problem> {
        let enrollment = Enrollment::new(course, student);

        let mut filter = filter::by_field("course", course);
        filter.extend(filter::by_field("student", student));

        let result = self
            .collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME)
            .update_one(
                filter,
                doc! { "$setOnInsert": {
                    "_id": crate::data::bson_id(enrollment.id),
                    "joined": bson::DateTime::from_chrono(enrollment.joined),
                } },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await;

        match result {
            Ok(result) => Ok(result.upserted_id.is_some()),
            // Two concurrent upserts can race on the unique index.
            Err(e) if crate::resp::problem::is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn leave(&self, course: Uuid, student: Uuid) -> Result<bool, Problem> {
        let mut filter = filter::by_field("course", course);
        filter.extend(filter::by_field("student", student));

        let result = self
            .collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME)
            .delete_one(filter, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn enrolled_course_ids(&self, student: Uuid) -> Result<Vec<Uuid>, Problem> {
        let enrollments: Vec<Enrollment> = self
            .collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME)
            .find(filter::by_field("student", student), None)
            .await?
            .try_collect()
            .await?;
        Ok(enrollments.into_iter().map(|it| it.course).collect())
    }

    async fn enrolled_courses(&self, student: Uuid) -> Result<Vec<Course>, Problem> {
        let ids = self.enrolled_course_ids(student).await?;
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let options = FindOptions::builder().sort(doc! { "title": 1 }).build();
        let courses = self
            .collection::<Course>(COURSE_COLLECTION_NAME)
            .find(filter::by_ids(&ids), options)
            .await?
            .try_collect()
            .await?;
        Ok(courses)
    }

    async fn delete_enrollments_of(&self, student: Uuid) -> Result<u64, Problem> {
        let result = self
            .collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME)
            .delete_many(filter::by_field("student", student), None)
            .await?;
        Ok(result.deleted_count)
    }
}

/// Fails unless the caller can create courses.
pub fn require_teacher(auth: &UserRoleToken) -> Result<(), Problem> {
    if !auth.can_teach() {
        return Err(role_problem(Role::Teacher));
    }
    Ok(())
}
