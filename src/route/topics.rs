use chrono::Utc;
use mongodb::Database;
use rocket::form::Form;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::data::course::db::CourseDbExt;
use crate::data::storage::{Download, MediaStore, COURSE_FILES};
use crate::data::topic::db::TopicDbExt;
use crate::data::topic::{CourseFile, CourseFileResponse, CourseFileUpload, TopicData, TopicResponse};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;

/// Add a topic to a course
#[utoipa::path(
    request_body = TopicData,
    responses(
        (status = 200, description = "Created topic", body = TopicResponse),
        (status = 400, description = "Invalid topic data", body = Problem),
        (status = 404, description = "Course doesn't exist or isn't the caller's", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course/<course_id>/topic", format = "json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn topic_create(
    course_id: Uuid,
    data: Json<TopicData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<TopicResponse>, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    data.validate()?;

    let topic = data.into_inner().into_topic(course.id);
    db.create_topic(&topic).await?;

    Ok(Json(TopicResponse::from(topic)))
}

/// Edit a topic
#[utoipa::path(
    request_body = TopicData,
    responses(
        (status = 200, description = "Updated topic", body = TopicResponse),
        (status = 404, description = "Course or topic doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/course/<course_id>/topic/<topic_id>", format = "json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn topic_update(
    course_id: Uuid,
    topic_id: Uuid,
    data: Json<TopicData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<TopicResponse>, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let mut topic = db.course_topic(course.id, topic_id).await?;
    data.validate()?;

    data.into_inner().apply(&mut topic);
    db.replace_topic(&topic).await?;

    Ok(Json(TopicResponse::from(topic)))
}

/// Delete a topic with its files
#[utoipa::path(
    responses(
        (status = 200, description = "ID of the deleted topic", body = String),
        (status = 404, description = "Course or topic doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/course/<course_id>/topic/<topic_id>")]
#[tracing::instrument(skip(db, media))]
pub async fn topic_delete(
    course_id: Uuid,
    topic_id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<String, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let topic = db.course_topic(course.id, topic_id).await?;

    db.delete_topic(&topic, media).await?;
    Ok(topic.id.to_string())
}

/// Attach a file to a topic
#[utoipa::path(
    responses(
        (status = 200, description = "Stored file", body = CourseFileResponse),
        (status = 400, description = "Invalid file data", body = Problem),
        (status = 404, description = "Course or topic doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course/<course_id>/topic/<topic_id>/file", data = "<upload>")]
#[tracing::instrument(skip(db, media))]
pub async fn file_upload(
    course_id: Uuid,
    topic_id: Uuid,
    mut upload: Form<CourseFileUpload<'_>>,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<Json<CourseFileResponse>, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let topic = db.course_topic(course.id, topic_id).await?;
    upload.validate()?;

    let stored = media.store(COURSE_FILES, "file", &mut upload.file).await?;
    let file = CourseFile {
        id: Uuid::new_v4(),
        topic: topic.id,
        name: upload.name.trim().to_string(),
        file: stored,
        uploaded: Utc::now(),
    };

    if let Err(e) = db.create_file(&file).await {
        media.remove_all([&file.file]).await;
        return Err(e);
    }

    Ok(Json(CourseFileResponse::from(&file)))
}

/// Remove a course file
#[utoipa::path(
    responses(
        (status = 200, description = "ID of the deleted file", body = String),
        (status = 404, description = "Course or file doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/course/<course_id>/file/<file_id>")]
#[tracing::instrument(skip(db, media))]
pub async fn file_delete(
    course_id: Uuid,
    file_id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<String, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let file = db.course_file(course.id, file_id).await?;

    db.delete_file(&file, media).await?;
    Ok(file.id.to_string())
}

/// Download a course file
#[utoipa::path(
    responses(
        (status = 200, description = "File contents"),
        (status = 403, description = "Caller isn't a course member", body = Problem),
        (status = 404, description = "Course or file doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course/<course_id>/file/<file_id>")]
#[tracing::instrument(skip(db, media))]
pub async fn file_download(
    course_id: Uuid,
    file_id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<Download, Problem> {
    let (course, _) = db.member_course(course_id, &auth).await?;
    let file = db.course_file(course.id, file_id).await?;

    media.download(&file.file).await
}

#[cfg(test)]
mod topic_endpoints {
    use rocket::http::{ContentType, Status};
    use uuid::Uuid;

    use crate::data::assignment::db::AssignmentDbExt;
    use crate::data::assignment::AssignmentCreateData;
    use crate::data::storage::SUBMISSIONS;
    use crate::data::topic::db::TopicDbExt;
    use crate::data::topic::TopicData;
    use crate::role::Role;
    use crate::route::testing::{
        database, live_client, media, offline_client, remove_users, seed_course, seed_user,
        stored_file,
    };

    #[rocket::async_test]
    async fn v1_topic_create_requires_login() {
        let client = offline_client().await;

        let response = client
            .post(format!("/api/v1/course/{}/topic", Uuid::new_v4()))
            .header(ContentType::JSON)
            .body(r#"{"title":"Vectors","content":""}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn v1_file_download_requires_login() {
        let client = offline_client().await;

        let response = client
            .get(format!(
                "/api/v1/course/{}/file/{}",
                Uuid::new_v4(),
                Uuid::new_v4()
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_topic_delete_cascades_to_assignments() {
        let client = live_client().await;
        let db = database(&client);
        let media = media(&client);
        let (teacher, cookie) = seed_user(&client, "teacher", Role::Teacher).await;
        let (student, _) = seed_user(&client, "student", Role::Student).await;
        let course = seed_course(&client, &teacher, "open-sesame").await;

        let topic = |title: &str| {
            TopicData {
                title: title.to_string(),
                content: String::new(),
            }
            .into_topic(course.id)
        };
        let vectors = topic("Vectors");
        let matrices = topic("Matrices");
        db.create_topic(&vectors).await.expect("topic");
        db.create_topic(&matrices).await.expect("topic");

        let assignment = |title: &str, topics: Vec<Uuid>| {
            AssignmentCreateData {
                title: title.to_string(),
                content: "Show your work.".to_string(),
                due_date: None,
                topics: vec![],
            }
            .into_assignment(topics)
        };
        let only_vectors = assignment("Dot products", vec![vectors.id]);
        let shared = assignment("Linear maps", vec![vectors.id, matrices.id]);
        db.create_assignment(&only_vectors).await.expect("assignment");
        db.create_assignment(&shared).await.expect("assignment");

        let file = stored_file(&client, SUBMISSIONS, "42").await;
        db.submit(&only_vectors, student.id, file.clone(), media)
            .await
            .expect("submission");

        let response = client
            .delete(format!("/api/v1/course/{}/topic/{}", course.id, vectors.id))
            .cookie(cookie)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        assert!(db.get_topic(vectors.id).await.expect("topic").is_none());
        assert!(
            db.get_assignment(only_vectors.id).await.expect("assignment").is_none(),
            "assignment without topics left should be deleted"
        );
        assert!(db.submissions_of(only_vectors.id).await.expect("submissions").is_empty());
        assert!(!media.resolve(&file).exists(), "submitted file wasn't removed");

        let detached = db
            .get_assignment(shared.id)
            .await
            .expect("assignment")
            .expect("assignment with other topics should survive");
        assert_eq!(detached.topics, vec![matrices.id]);

        remove_users(&client, &[&teacher, &student]).await;
    }
}
