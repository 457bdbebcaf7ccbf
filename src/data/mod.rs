use bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use uuid::Uuid;

pub mod assignment;
pub mod chat;
pub mod course;
pub mod storage;
pub mod topic;
pub mod user;

/// Converts an id into the BSON value it is stored as.
#[inline]
pub fn bson_id(id: Uuid) -> bson::Uuid {
    bson::Uuid::from(id)
}

/// Common query documents.
pub mod filter {
    use super::bson_id;
    use bson::{doc, Document};
    use uuid::Uuid;

    #[inline]
    pub fn by_id(id: Uuid) -> Document {
        doc! { "_id": bson_id(id) }
    }

    #[inline]
    pub fn by_ids(ids: &[Uuid]) -> Document {
        doc! { "_id": { "$in": ids.iter().copied().map(bson_id).collect::<Vec<_>>() } }
    }

    #[inline]
    pub fn by_field(field: &str, id: Uuid) -> Document {
        let mut filter = Document::new();
        filter.insert(field, bson_id(id));
        filter
    }

    #[inline]
    pub fn by_field_in(field: &str, ids: &[Uuid]) -> Document {
        let mut filter = Document::new();
        filter.insert(
            field,
            doc! { "$in": ids.iter().copied().map(bson_id).collect::<Vec<_>>() },
        );
        filter
    }
}

/// Serde helpers storing optional and repeated ids as BSON binary UUIDs,
/// the way `bson::serde_helpers::uuid_1_as_binary` stores single ones.
pub mod uuid_bson {
    pub mod vec {
        use serde::{Deserialize, Deserializer, Serializer};
        use uuid::Uuid;

        pub fn serialize<S: Serializer>(ids: &[Uuid], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(ids.iter().map(|id| bson::Uuid::from(*id)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Uuid>, D::Error> {
            Ok(Vec::<bson::Uuid>::deserialize(deserializer)?
                .into_iter()
                .map(Uuid::from)
                .collect())
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use uuid::Uuid;

        pub fn serialize<S: Serializer>(id: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error> {
            id.map(bson::Uuid::from).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Uuid>, D::Error> {
            Ok(Option::<bson::Uuid>::deserialize(deserializer)?.map(Uuid::from))
        }
    }
}

async fn unique_index(db: &Database, collection: &str, keys: Document) -> mongodb::error::Result<()> {
    let model = IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build();
    db.collection::<Document>(collection)
        .create_index(model, None)
        .await?;
    Ok(())
}

/// Creates the unique indexes backing one-per-pair invariants.
pub async fn ensure_indexes(db: &Database) -> mongodb::error::Result<()> {
    unique_index(db, user::db::USER_COLLECTION_NAME, doc! { "username": 1 }).await?;
    unique_index(db, user::db::USER_COLLECTION_NAME, doc! { "email": 1 }).await?;
    unique_index(
        db,
        course::db::ENROLLMENT_COLLECTION_NAME,
        doc! { "course": 1, "student": 1 },
    )
    .await?;
    unique_index(
        db,
        assignment::db::SUBMISSION_COLLECTION_NAME,
        doc! { "assignment": 1, "student": 1 },
    )
    .await?;
    unique_index(
        db,
        assignment::db::RATE_COLLECTION_NAME,
        doc! { "assignment": 1, "student": 1 },
    )
    .await?;
    unique_index(db, chat::db::THREAD_COLLECTION_NAME, doc! { "pair": 1 }).await?;
    Ok(())
}
