use bson::doc;
use chrono::Utc;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReplaceOptions, ReturnDocument};
use mongodb::Database;
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use super::{Assignment, RateSubmission, Submission};
use crate::data::{bson_id, filter};
use crate::data::storage::{MediaStore, StoredFile};
use crate::data::topic::db::TopicDbExt;
use crate::resp::problem::{is_duplicate_key, problems, Problem};

pub static ASSIGNMENT_COLLECTION_NAME: &str = "assignment";
pub static SUBMISSION_COLLECTION_NAME: &str = "submission";
pub static RATE_COLLECTION_NAME: &str = "submission.rate";

fn by_assignment_and_student(assignment: Uuid, student: Uuid) -> bson::Document {
    let mut filter = filter::by_field("assignment", assignment);
    filter.extend(filter::by_field("student", student));
    filter
}

pub trait AssignmentDbExt {
    async fn create_assignment(&self, assignment: &Assignment) -> Result<(), Problem>;
    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, Problem>;
    async fn require_assignment(&self, id: Uuid) -> Result<Assignment, Problem>;
    /// Assignment `id` attached to a topic of course `course`, or 404.
    async fn course_assignment(&self, course: Uuid, id: Uuid) -> Result<Assignment, Problem>;
    async fn replace_assignment(&self, assignment: &Assignment) -> Result<(), Problem>;
    async fn assignments_of_topics(&self, topics: &[Uuid]) -> Result<Vec<Assignment>, Problem>;
    /// Courses whose topics hold the assignment.
    async fn assignment_courses(&self, assignment: &Assignment) -> Result<Vec<Uuid>, Problem>;
    /// Deduplicated topic ids, all of which must belong to `course`.
    async fn course_topics(&self, course: Uuid, topics: &[Uuid]) -> Result<Vec<Uuid>, Problem>;
    async fn delete_assignment(
        &self,
        assignment: &Assignment,
        media: &MediaStore,
    ) -> Result<(), Problem>;
    /// Removes a topic from every assignment. Assignments left without topics are deleted.
    async fn detach_topic(&self, topic: Uuid, media: &MediaStore) -> Result<(), Problem>;

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, Problem>;
    async fn submission_of(
        &self,
        assignment: Uuid,
        student: Uuid,
    ) -> Result<Option<Submission>, Problem>;
    async fn submissions_of(&self, assignment: Uuid) -> Result<Vec<Submission>, Problem>;
    async fn submissions_of_student(
        &self,
        student: Uuid,
        assignments: &[Uuid],
    ) -> Result<Vec<Submission>, Problem>;
    async fn submit(
        &self,
        assignment: &Assignment,
        student: Uuid,
        file: StoredFile,
        media: &MediaStore,
    ) -> Result<Submission, Problem>;

    async fn grade_of(
        &self,
        assignment: Uuid,
        student: Uuid,
    ) -> Result<Option<RateSubmission>, Problem>;
    async fn grades_of(&self, assignment: Uuid) -> Result<Vec<RateSubmission>, Problem>;
    async fn grades_of_student(
        &self,
        student: Uuid,
        assignments: &[Uuid],
    ) -> Result<Vec<RateSubmission>, Problem>;
    async fn rate(
        &self,
        submission: &Submission,
        teacher: Uuid,
        grade: u8,
        comment: String,
    ) -> Result<RateSubmission, Problem>;

    async fn delete_student_work(&self, student: Uuid, media: &MediaStore) -> Result<(), Problem>;
}

impl AssignmentDbExt for Database {
    async fn create_assignment(&self, assignment: &Assignment) -> Result<(), Problem> {
        self.collection::<Assignment>(ASSIGNMENT_COLLECTION_NAME)
            .insert_one(assignment, None)
            .await?;
        tracing::info!("Created assignment '{}' ({})", assignment.title, assignment.id);
        Ok(())
    }

    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, Problem> {
        self.collection(ASSIGNMENT_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn require_assignment(&self, id: Uuid) -> Result<Assignment, Problem> {
        self.get_assignment(id)
            .await?
            .ok_or_else(|| problems::not_found("Assignment", id))
    }

    async fn course_assignment(&self, course: Uuid, id: Uuid) -> Result<Assignment, Problem> {
        let assignment = self.require_assignment(id).await?;
        if self.assignment_courses(&assignment).await?.contains(&course) {
            Ok(assignment)
        } else {
            Err(problems::not_found("Assignment", id))
        }
    }

    async fn replace_assignment(&self, assignment: &Assignment) -> Result<(), Problem> {
        self.collection::<Assignment>(ASSIGNMENT_COLLECTION_NAME)
            .replace_one(filter::by_id(assignment.id), assignment, None)
            .await?;
        Ok(())
    }

    async fn assignments_of_topics(&self, topics: &[Uuid]) -> Result<Vec<Assignment>, Problem> {
        if topics.is_empty() {
            return Ok(vec![]);
        }

        let options = FindOptions::builder().sort(doc! { "due_date": 1 }).build();
        let assignments = self
            .collection::<Assignment>(ASSIGNMENT_COLLECTION_NAME)
            .find(filter::by_field_in("topics", topics), options)
            .await?
            .try_collect()
            .await?;
        Ok(assignments)
    }

    async fn assignment_courses(&self, assignment: &Assignment) -> Result<Vec<Uuid>, Problem> {
        let mut courses = Vec::new();
        for topic in &assignment.topics {
            if let Some(topic) = self.get_topic(*topic).await? {
                if !courses.contains(&topic.course) {
                    courses.push(topic.course);
                }
            }
        }
        Ok(courses)
    }

    async fn course_topics(&self, course: Uuid, topics: &[Uuid]) -> Result<Vec<Uuid>, Problem> {
        let mut checked = Vec::with_capacity(topics.len());
        for id in topics {
            if checked.contains(id) {
                continue;
            }
            self.course_topic(course, *id).await.map_err(|_| {
                problems::bad_field("topics", "Topics must belong to the assignment's course.")
                    .insert_str("topic", id)
                    .to_owned()
            })?;
            checked.push(*id);
        }
        Ok(checked)
    }

    async fn delete_assignment(
        &self,
        assignment: &Assignment,
        media: &MediaStore,
    ) -> Result<(), Problem> {
        let files: Vec<StoredFile> = self
            .submissions_of(assignment.id)
            .await?
            .into_iter()
            .map(|it| it.file)
            .collect();

        self.collection::<RateSubmission>(RATE_COLLECTION_NAME)
            .delete_many(filter::by_field("assignment", assignment.id), None)
            .await?;
        self.collection::<Submission>(SUBMISSION_COLLECTION_NAME)
            .delete_many(filter::by_field("assignment", assignment.id), None)
            .await?;
        media.remove_all(files.iter()).await;

        self.collection::<Assignment>(ASSIGNMENT_COLLECTION_NAME)
            .delete_one(filter::by_id(assignment.id), None)
            .await?;

        tracing::info!("Deleted assignment '{}' ({})", assignment.title, assignment.id);
        Ok(())
    }

    async fn detach_topic(&self, topic: Uuid, media: &MediaStore) -> Result<(), Problem> {
        for mut assignment in self.assignments_of_topics(&[topic]).await? {
            assignment.topics.retain(|it| *it != topic);

            if assignment.topics.is_empty() {
                self.delete_assignment(&assignment, media).await?;
            } else {
                self.replace_assignment(&assignment).await?;
            }
        }
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, Problem> {
        self.collection(SUBMISSION_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn submission_of(
        &self,
        assignment: Uuid,
        student: Uuid,
    ) -> Result<Option<Submission>, Problem> {
        self.collection(SUBMISSION_COLLECTION_NAME)
            .find_one(by_assignment_and_student(assignment, student), None)
            .await
            .map_err(Problem::from)
    }

    async fn submissions_of(&self, assignment: Uuid) -> Result<Vec<Submission>, Problem> {
        let options = FindOptions::builder()
            .sort(doc! { "submitted_on": 1 })
            .build();
        let submissions = self
            .collection::<Submission>(SUBMISSION_COLLECTION_NAME)
            .find(filter::by_field("assignment", assignment), options)
            .await?
            .try_collect()
            .await?;
        Ok(submissions)
    }

    async fn submissions_of_student(
        &self,
        student: Uuid,
        assignments: &[Uuid],
    ) -> Result<Vec<Submission>, Problem> {
        if assignments.is_empty() {
            return Ok(vec![]);
        }

        let mut filter = filter::by_field("student", student);
        filter.extend(filter::by_field_in("assignment", assignments));

        let submissions = self
            .collection::<Submission>(SUBMISSION_COLLECTION_NAME)
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(submissions)
    }

    /// Stores a student's submission, replacing their earlier one.
    async fn submit(
        &self,
        assignment: &Assignment,
        student: Uuid,
        file: StoredFile,
        media: &MediaStore,
    ) -> Result<Submission, Problem> {
        let now = Utc::now();
        let late = assignment.is_late(now);
        let fresh = Uuid::new_v4();

        // One atomic upsert: concurrent first submissions meet on the unique
        // (assignment, student) index and the loser updates the winner's row.
        let update = doc! {
            "$set": {
                "file": { "name": &file.name, "path": &file.path },
                "submitted_on": bson::DateTime::from_chrono(now),
                "late": late,
            },
            "$setOnInsert": { "_id": bson_id(fresh) },
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();

        let collection = self.collection::<Submission>(SUBMISSION_COLLECTION_NAME);
        let filter = by_assignment_and_student(assignment.id, student);
        let previous = match collection
            .find_one_and_update(filter.clone(), update.clone(), options.clone())
            .await
        {
            Err(e) if is_duplicate_key(&e) => {
                collection
                    .find_one_and_update(filter, update, options)
                    .await?
            }
            other => other?,
        };

        let submission = Submission {
            id: previous.as_ref().map(|it| it.id).unwrap_or(fresh),
            assignment: assignment.id,
            student,
            file,
            submitted_on: now,
            late,
        };

        if let Some(previous) = previous {
            if previous.file != submission.file {
                media.remove_all([&previous.file]).await;
            }
        }

        tracing::debug!(
            "stored submission {} for assignment {} (late: {})",
            submission.id,
            assignment.id,
            submission.late
        );
        Ok(submission)
    }

    async fn grade_of(
        &self,
        assignment: Uuid,
        student: Uuid,
    ) -> Result<Option<RateSubmission>, Problem> {
        self.collection(RATE_COLLECTION_NAME)
            .find_one(by_assignment_and_student(assignment, student), None)
            .await
            .map_err(Problem::from)
    }

    async fn grades_of(&self, assignment: Uuid) -> Result<Vec<RateSubmission>, Problem> {
        let grades = self
            .collection::<RateSubmission>(RATE_COLLECTION_NAME)
            .find(filter::by_field("assignment", assignment), None)
            .await?
            .try_collect()
            .await?;
        Ok(grades)
    }

    async fn grades_of_student(
        &self,
        student: Uuid,
        assignments: &[Uuid],
    ) -> Result<Vec<RateSubmission>, Problem> {
        if assignments.is_empty() {
            return Ok(vec![]);
        }

        let mut filter = filter::by_field("student", student);
        filter.extend(filter::by_field_in("assignment", assignments));

        let grades = self
            .collection::<RateSubmission>(RATE_COLLECTION_NAME)
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(grades)
    }

    async fn rate(
        &self,
        submission: &Submission,
        teacher: Uuid,
        grade: u8,
        comment: String,
    ) -> Result<RateSubmission, Problem> {
        let previous = self
            .grade_of(submission.assignment, submission.student)
            .await?;

        let rate = RateSubmission {
            id: previous.map(|it| it.id).unwrap_or_else(Uuid::new_v4),
            assignment: submission.assignment,
            student: submission.student,
            submission: submission.id,
            teacher,
            grade,
            comment: comment.trim().to_string(),
            rated_on: Utc::now(),
        };

        self.collection::<RateSubmission>(RATE_COLLECTION_NAME)
            .replace_one(
                by_assignment_and_student(submission.assignment, submission.student),
                &rate,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;

        tracing::info!(
            "Rated submission {} with {} by {}",
            submission.id,
            grade,
            teacher
        );
        Ok(rate)
    }

    async fn delete_student_work(&self, student: Uuid, media: &MediaStore) -> Result<(), Problem> {
        let submissions: Vec<Submission> = self
            .collection::<Submission>(SUBMISSION_COLLECTION_NAME)
            .find(filter::by_field("student", student), None)
            .await?
            .try_collect()
            .await?;
        let files: Vec<StoredFile> = submissions.into_iter().map(|it| it.file).collect();

        self.collection::<RateSubmission>(RATE_COLLECTION_NAME)
            .delete_many(filter::by_field("student", student), None)
            .await?;
        self.collection::<Submission>(SUBMISSION_COLLECTION_NAME)
            .delete_many(filter::by_field("student", student), None)
            .await?;
        media.remove_all(files.iter()).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::assignment::AssignmentCreateData;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn cleanup_futures_can_cross_threads() {
        let db = mongodb::Client::with_uri_str("mongodb://127.0.0.1:1")
            .await
            .expect("client options parse")
            .database("cez_offline");
        let media = MediaStore::new(std::env::temp_dir());
        let assignment = AssignmentCreateData {
            title: "Dot products".to_string(),
            content: String::new(),
            due_date: None,
            topics: vec![],
        }
        .into_assignment(vec![Uuid::new_v4()]);
        let file = StoredFile {
            name: "a.py".to_string(),
            path: "submissions/a.py".to_string(),
        };

        assert_send(&db.delete_assignment(&assignment, &media));
        assert_send(&db.delete_student_work(Uuid::new_v4(), &media));
        assert_send(&db.submit(&assignment, Uuid::new_v4(), file, &media));
    }
}
