use bson::doc;
use mongodb::options::FindOptions;
use mongodb::Database;
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use super::{CourseFile, Topic};
use crate::data::assignment::db::AssignmentDbExt;
use crate::data::filter;
use crate::data::storage::MediaStore;
use crate::resp::problem::{problems, Problem};

pub static TOPIC_COLLECTION_NAME: &str = "topic";
pub static COURSE_FILE_COLLECTION_NAME: &str = "course.file";

pub trait TopicDbExt {
    async fn create_topic(&self, topic: &Topic) -> Result<(), Problem>;
    async fn get_topic(&self, id: Uuid) -> Result<Option<Topic>, Problem>;
    /// Topic `id` of course `course`, or 404.
    async fn course_topic(&self, course: Uuid, id: Uuid) -> Result<Topic, Problem>;
    async fn replace_topic(&self, topic: &Topic) -> Result<(), Problem>;
    async fn topics_of_course(&self, course: Uuid) -> Result<Vec<Topic>, Problem>;
    async fn delete_topic(&self, topic: &Topic, media: &MediaStore) -> Result<(), Problem>;

    async fn create_file(&self, file: &CourseFile) -> Result<(), Problem>;
    /// File `id` attached to any topic of course `course`, or 404.
    async fn course_file(&self, course: Uuid, id: Uuid) -> Result<CourseFile, Problem>;
    async fn files_of_topics(&self, topics: &[Uuid]) -> Result<Vec<CourseFile>, Problem>;
    async fn delete_file(&self, file: &CourseFile, media: &MediaStore) -> Result<(), Problem>;
}

impl TopicDbExt for Database {
    async fn create_topic(&self, topic: &Topic) -> Result<(), Problem> {
        self.collection::<Topic>(TOPIC_COLLECTION_NAME)
            .insert_one(topic, None)
            .await?;
        Ok(())
    }

    async fn get_topic(&self, id: Uuid) -> Result<Option<Topic>, Problem> {
        self.collection(TOPIC_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn course_topic(&self, course: Uuid, id: Uuid) -> Result<Topic, Problem> {
        match self.get_topic(id).await? {
            Some(topic) if topic.course == course => Ok(topic),
            _ => Err(problems::not_found("Topic", id)),
        }
    }

    async fn replace_topic(&self, topic: &Topic) -> Result<(), Problem> {
        self.collection::<Topic>(TOPIC_COLLECTION_NAME)
            .replace_one(filter::by_id(topic.id), topic, None)
            .await?;
        Ok(())
    }

    async fn topics_of_course(&self, course: Uuid) -> Result<Vec<Topic>, Problem> {
        let options = FindOptions::builder().sort(doc! { "created": 1 }).build();
        let topics = self
            .collection::<Topic>(TOPIC_COLLECTION_NAME)
            .find(filter::by_field("course", course), options)
            .await?
            .try_collect()
            .await?;
        Ok(topics)
    }

    async fn delete_topic(&self, topic: &Topic, media: &MediaStore) -> Result<(), Problem> {
        for file in self.files_of_topics(&[topic.id]).await? {
            self.delete_file(&file, media).await?;
        }

        self.detach_topic(topic.id, media).await?;

        self.collection::<Topic>(TOPIC_COLLECTION_NAME)
            .delete_one(filter::by_id(topic.id), None)
            .await?;

        tracing::debug!("deleted topic {} of course {}", topic.id, topic.course);
        Ok(())
    }

    async fn create_file(&self, file: &CourseFile) -> Result<(), Problem> {
        self.collection::<CourseFile>(COURSE_FILE_COLLECTION_NAME)
            .insert_one(file, None)
            .await?;
        Ok(())
    }

    async fn course_file(&self, course: Uuid, id: Uuid) -> Result<CourseFile, Problem> {
        let file: CourseFile = self
            .collection(COURSE_FILE_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problems::not_found("Course file", id))?;

        match self.get_topic(file.topic).await? {
            Some(topic) if topic.course == course => Ok(file),
            _ => Err(problems::not_found("Course file", id)),
        }
    }

    async fn files_of_topics(&self, topics: &[Uuid]) -> Result<Vec<CourseFile>, Problem> {
        if topics.is_empty() {
            return Ok(vec![]);
        }

        let options = FindOptions::builder().sort(doc! { "uploaded": 1 }).build();
        let files = self
            .collection::<CourseFile>(COURSE_FILE_COLLECTION_NAME)
            .find(filter::by_field_in("topic", topics), options)
            .await?
            .try_collect()
            .await?;
        Ok(files)
    }

    async fn delete_file(&self, file: &CourseFile, media: &MediaStore) -> Result<(), Problem> {
        self.collection::<CourseFile>(COURSE_FILE_COLLECTION_NAME)
            .delete_one(filter::by_id(file.id), None)
            .await?;
        media.remove_all([&file.file]).await;
        Ok(())
    }
}
