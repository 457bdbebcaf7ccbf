use chrono::{DateTime, Duration, Utc};
use rocket::fs::TempFile;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::storage::StoredFile;
use crate::data::user::UserResponse;
use crate::resp::problem::{problems, Problem};
use crate::util::check_len;

pub mod db;

pub const MAX_GRADE: u8 = 100;

/// Work given to the students of the course its topics belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub due_date: DateTime<Utc>,
    #[serde(with = "crate::data::uuid_bson::vec")]
    pub topics: Vec<Uuid>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created: DateTime<Utc>,
}

impl Assignment {
    pub fn is_late(&self, at: DateTime<Utc>) -> bool {
        at > self.due_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub assignment: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub student: Uuid,
    pub file: StoredFile,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub submitted_on: DateTime<Utc>,
    #[serde(default)]
    pub late: bool,
}

/// Teacher's grade for a student's submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSubmission {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub assignment: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub student: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub submission: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub teacher: Uuid,
    pub grade: u8,
    pub comment: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub rated_on: DateTime<Utc>,
}

fn validate_text(title: &str, content: &str) -> Result<(), Problem> {
    check_len(title, 1, 64).map_err(|e| problems::bad_field("title", e))?;
    check_len(content, 1, 1024).map_err(|e| problems::bad_field("content", e))?;
    Ok(())
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AssignmentCreateData {
    pub title: String,
    pub content: String,
    /// Defaults to one week from now.
    pub due_date: Option<DateTime<Utc>>,
    /// Topics besides the one in the path.
    #[serde(default)]
    pub topics: Vec<Uuid>,
}

impl AssignmentCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        validate_text(&self.title, &self.content)
    }

    pub fn into_assignment(self, topics: Vec<Uuid>) -> Assignment {
        let now = Utc::now();
        Assignment {
            id: Uuid::new_v4(),
            title: self.title.trim().to_string(),
            content: self.content,
            due_date: self.due_date.unwrap_or(now + Duration::weeks(1)),
            topics,
            created: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AssignmentUpdateData {
    pub title: String,
    pub content: String,
    pub due_date: Option<DateTime<Utc>>,
    /// Replaces the assignment's topics when present.
    pub topics: Option<Vec<Uuid>>,
}

impl AssignmentUpdateData {
    pub fn validate(&self) -> Result<(), Problem> {
        validate_text(&self.title, &self.content)?;
        if matches!(&self.topics, Some(topics) if topics.is_empty()) {
            return Err(problems::bad_field(
                "topics",
                "An assignment needs at least one topic.",
            ));
        }
        Ok(())
    }

    pub fn apply(self, assignment: &mut Assignment, topics: Option<Vec<Uuid>>) {
        assignment.title = self.title.trim().to_string();
        assignment.content = self.content;
        if let Some(due_date) = self.due_date {
            assignment.due_date = due_date;
        }
        if let Some(topics) = topics {
            assignment.topics = topics;
        }
    }
}

#[derive(FromForm)]
pub struct SubmissionUpload<'r> {
    pub file: TempFile<'r>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RateData {
    pub grade: i64,
    pub comment: String,
}

impl RateData {
    pub fn validate(&self) -> Result<u8, Problem> {
        check_len(&self.comment, 1, 1024).map_err(|e| problems::bad_field("comment", e))?;
        match u8::try_from(self.grade) {
            Ok(grade) if grade <= MAX_GRADE => Ok(grade),
            _ => Err(problems::bad_field(
                "grade",
                format!("Grade must be between 0 and {}.", MAX_GRADE),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub due_date: DateTime<Utc>,
    pub topics: Vec<Uuid>,
    pub created: DateTime<Utc>,
}

impl From<&Assignment> for AssignmentResponse {
    fn from(assignment: &Assignment) -> Self {
        AssignmentResponse {
            id: assignment.id,
            title: assignment.title.clone(),
            content: assignment.content.clone(),
            due_date: assignment.due_date,
            topics: assignment.topics.clone(),
            created: assignment.created,
        }
    }
}

impl From<Assignment> for AssignmentResponse {
    fn from(assignment: Assignment) -> Self {
        AssignmentResponse::from(&assignment)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmissionResponse {
    pub id: Uuid,
    pub assignment: Uuid,
    pub student: Uuid,
    pub filename: String,
    pub submitted_on: DateTime<Utc>,
    pub late: bool,
}

impl From<&Submission> for SubmissionResponse {
    fn from(submission: &Submission) -> Self {
        SubmissionResponse {
            id: submission.id,
            assignment: submission.assignment,
            student: submission.student,
            filename: submission.file.name.clone(),
            submitted_on: submission.submitted_on,
            late: submission.late,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GradeResponse {
    pub id: Uuid,
    pub assignment: Uuid,
    pub student: Uuid,
    pub submission: Uuid,
    pub teacher: Uuid,
    pub grade: u8,
    pub comment: String,
    pub rated_on: DateTime<Utc>,
}

impl From<&RateSubmission> for GradeResponse {
    fn from(rate: &RateSubmission) -> Self {
        GradeResponse {
            id: rate.id,
            assignment: rate.assignment,
            student: rate.student,
            submission: rate.submission,
            teacher: rate.teacher,
            grade: rate.grade,
            comment: rate.comment.clone(),
            rated_on: rate.rated_on,
        }
    }
}

/// An assignment as listed for a student.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StudentAssignmentResponse {
    #[serde(flatten)]
    pub assignment: AssignmentResponse,
    pub course: Option<Uuid>,
    pub submission: Option<SubmissionResponse>,
}

/// A submission as listed for grading.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RatingRowResponse {
    pub submission: SubmissionResponse,
    pub student: Option<UserResponse>,
    pub grade: Option<GradeResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseGradeResponse {
    pub assignment: AssignmentResponse,
    pub grade: Option<GradeResponse>,
}
