use bson::doc;
use chrono::Utc;
use mongodb::options::FindOptions;
use mongodb::Database;
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use super::{pair_key, ChatMessage, Thread};
use crate::data::{bson_id, filter};
use crate::resp::problem::{is_duplicate_key, Problem};

pub static THREAD_COLLECTION_NAME: &str = "chat.thread";
pub static MESSAGE_COLLECTION_NAME: &str = "chat.message";

fn by_participant(user: Uuid) -> bson::Document {
    doc! {
        "$or": [
            { "first_person": bson_id(user) },
            { "second_person": bson_id(user) },
        ]
    }
}

pub trait ChatDbExt {
    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, Problem>;
    async fn threads_of(&self, user: Uuid) -> Result<Vec<Thread>, Problem>;
    async fn thread_between(&self, a: Uuid, b: Uuid) -> Result<Option<Thread>, Problem>;
    /// Returns the thread and whether it was just created.
    async fn get_or_create_thread(
        &self,
        creator: Uuid,
        other: Uuid,
    ) -> Result<(Thread, bool), Problem>;
    async fn delete_thread(&self, thread: &Thread) -> Result<(), Problem>;
    async fn delete_threads_of(&self, user: Uuid) -> Result<(), Problem>;

    async fn messages_of(&self, threads: &[Uuid]) -> Result<Vec<ChatMessage>, Problem>;
    /// Stores a message and moves its thread to the current time.
    async fn store_message(&self, message: &ChatMessage) -> Result<(), Problem>;
    /// Marks messages `reader` received in `thread` as read.
    async fn mark_read(&self, thread: Uuid, reader: Uuid) -> Result<u64, Problem>;
}

impl ChatDbExt for Database {
    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, Problem> {
        self.collection(THREAD_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn threads_of(&self, user: Uuid) -> Result<Vec<Thread>, Problem> {
        let options = FindOptions::builder().sort(doc! { "timestamp": 1 }).build();
        let threads = self
            .collection::<Thread>(THREAD_COLLECTION_NAME)
            .find(by_participant(user), options)
            .await?
            .try_collect()
            .await?;
        Ok(threads)
    }

    async fn thread_between(&self, a: Uuid, b: Uuid) -> Result<Option<Thread>, Problem> {
        self.collection(THREAD_COLLECTION_NAME)
            .find_one(doc! { "pair": pair_key(a, b) }, None)
            .await
            .map_err(Problem::from)
    }

    async fn get_or_create_thread(
        &self,
        creator: Uuid,
        other: Uuid,
    ) -> Result<(Thread, bool), Problem> {
        if let Some(thread) = self.thread_between(creator, other).await? {
            return Ok((thread, false));
        }

        let thread = Thread::new(creator, other);
        match self
            .collection::<Thread>(THREAD_COLLECTION_NAME)
            .insert_one(&thread, None)
            .await
        {
            Ok(_) => {
                tracing::debug!("created chat thread {} ({})", thread.id, thread.pair);
                Ok((thread, true))
            }
            // The other participant opened the same thread concurrently.
            Err(e) if is_duplicate_key(&e) => {
                let existing = self.thread_between(creator, other).await?;
                existing.map(|it| (it, false)).ok_or_else(|| e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_thread(&self, thread: &Thread) -> Result<(), Problem> {
        self.collection::<ChatMessage>(MESSAGE_COLLECTION_NAME)
            .delete_many(filter::by_field("thread", thread.id), None)
            .await?;
        self.collection::<Thread>(THREAD_COLLECTION_NAME)
            .delete_one(filter::by_id(thread.id), None)
            .await?;
        Ok(())
    }

    async fn delete_threads_of(&self, user: Uuid) -> Result<(), Problem> {
        let ids: Vec<Uuid> = self
            .threads_of(user)
            .await?
            .into_iter()
            .map(|it| it.id)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        self.collection::<ChatMessage>(MESSAGE_COLLECTION_NAME)
            .delete_many(filter::by_field_in("thread", &ids), None)
            .await?;
        self.collection::<Thread>(THREAD_COLLECTION_NAME)
            .delete_many(filter::by_ids(&ids), None)
            .await?;
        Ok(())
    }

    async fn messages_of(&self, threads: &[Uuid]) -> Result<Vec<ChatMessage>, Problem> {
        if threads.is_empty() {
            return Ok(vec![]);
        }

        let options = FindOptions::builder().sort(doc! { "date": 1 }).build();
        let messages = self
            .collection::<ChatMessage>(MESSAGE_COLLECTION_NAME)
            .find(filter::by_field_in("thread", threads), options)
            .await?
            .try_collect()
            .await?;
        Ok(messages)
    }

    async fn store_message(&self, message: &ChatMessage) -> Result<(), Problem> {
        self.collection::<ChatMessage>(MESSAGE_COLLECTION_NAME)
            .insert_one(message, None)
            .await?;

        self.collection::<Thread>(THREAD_COLLECTION_NAME)
            .update_one(
                filter::by_id(message.thread),
                doc! { "$set": { "timestamp": bson::DateTime::from_chrono(Utc::now()) } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn mark_read(&self, thread: Uuid, reader: Uuid) -> Result<u64, Problem> {
        let mut filter = filter::by_field("thread", thread);
        filter.insert("user", doc! { "$ne": bson_id(reader) });
        filter.insert("is_read", false);

        let result = self
            .collection::<ChatMessage>(MESSAGE_COLLECTION_NAME)
            .update_many(filter, doc! { "$set": { "is_read": true } }, None)
            .await?;
        Ok(result.modified_count)
    }
}
