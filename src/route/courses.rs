use mongodb::Database;
use rocket::form::Form;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::data::assignment::db::AssignmentDbExt;
use crate::data::assignment::AssignmentResponse;
use crate::data::course::db::problem as course_problem;
use crate::data::course::db::{require_teacher, CourseDbExt};
use crate::data::course::{
    Course, CourseCreateData, CourseDetailResponse, CourseResponse, EnrollData, LabelCreateData,
    LabelResponse,
};
use crate::data::storage::{MediaStore, COURSE_IMAGES, COURSE_IMAGE_SIZE};
use crate::data::topic::db::TopicDbExt;
use crate::data::topic::{CourseFileResponse, TopicDetailResponse, TopicResponse};
use crate::data::user::db::UserDbExt;
use crate::data::user::UserResponse;
use crate::middleware::paging::PageState;
use crate::resp::jwt::{role_problem, UserRoleToken};
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::security::Security;

/// List degrees
#[utoipa::path(responses((status = 200, description = "All degrees", body = Vec<LabelResponse>)))]
#[get("/degree")]
#[tracing::instrument(skip(db))]
pub async fn degree_list(db: &State<Database>) -> Result<Json<Vec<LabelResponse>>, Problem> {
    let degrees = db.list_degrees().await?;
    Ok(Json(degrees.into_iter().map(LabelResponse::from).collect()))
}

/// Create a degree
#[utoipa::path(
    request_body = LabelCreateData,
    responses(
        (status = 200, description = "Created degree", body = LabelResponse),
        (status = 401, description = "Caller isn't an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/degree", format = "json", data = "<label>")]
#[tracing::instrument(skip(db))]
pub async fn degree_create(
    label: Json<LabelCreateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<LabelResponse>, Problem> {
    if !auth.is_admin() {
        return Err(role_problem(Role::Admin));
    }
    label.validate()?;

    let degree = db.create_degree(&label.name).await?;
    Ok(Json(LabelResponse::from(degree)))
}

/// List semesters
#[utoipa::path(responses((status = 200, description = "All semesters", body = Vec<LabelResponse>)))]
#[get("/semester")]
#[tracing::instrument(skip(db))]
pub async fn semester_list(db: &State<Database>) -> Result<Json<Vec<LabelResponse>>, Problem> {
    let semesters = db.list_semesters().await?;
    Ok(Json(semesters.into_iter().map(LabelResponse::from).collect()))
}

/// Create a semester
#[utoipa::path(
    request_body = LabelCreateData,
    responses(
        (status = 200, description = "Created semester", body = LabelResponse),
        (status = 401, description = "Caller isn't an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/semester", format = "json", data = "<label>")]
#[tracing::instrument(skip(db))]
pub async fn semester_create(
    label: Json<LabelCreateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<LabelResponse>, Problem> {
    if !auth.is_admin() {
        return Err(role_problem(Role::Admin));
    }
    label.validate()?;

    let semester = db.create_semester(&label.name).await?;
    Ok(Json(LabelResponse::from(semester)))
}

/// List courses
#[utoipa::path(
    params(
        ("page" = Option<u32>, Query, description = "Page number, starting at 0"),
        ("len" = Option<u32>, Query, description = "Page length"),
    ),
    responses((status = 200, description = "A page of courses", body = Vec<CourseResponse>))
)]
#[get("/course")]
#[tracing::instrument(skip(db))]
pub async fn course_list(
    page: PageState,
    db: &State<Database>,
) -> Result<Json<Vec<CourseResponse>>, Problem> {
    let courses = db.list_courses(page).await?;
    Ok(Json(courses.into_iter().map(CourseResponse::from).collect()))
}

/// Create a course
#[utoipa::path(
    responses(
        (status = 200, description = "Created course", body = CourseResponse),
        (status = 400, description = "Invalid course data", body = Problem),
        (status = 401, description = "Caller isn't a teacher", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course", data = "<create>")]
#[tracing::instrument(skip(db, media, security))]
pub async fn course_create(
    mut create: Form<CourseCreateData<'_>>,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
    security: &State<Security>,
) -> Result<Json<CourseResponse>, Problem> {
    require_teacher(&auth)?;
    create.validate()?;

    if !db.degree_exists(create.degree).await? {
        return Err(problems::bad_field("degree", "Degree doesn't exist."));
    }
    if !db.semester_exists(create.semester).await? {
        return Err(problems::bad_field("semester", "Semester doesn't exist."));
    }

    let image = match create.image.as_mut() {
        Some(file) if file.len() > 0 => Some(
            media
                .store_image(COURSE_IMAGES, "image", file, COURSE_IMAGE_SIZE)
                .await?,
        ),
        _ => None,
    };

    let course = create.into_inner().into_course(auth.user, image, security);
    if let Err(e) = db.create_course(&course).await {
        media.remove_all(course.image.iter()).await;
        return Err(e);
    }

    Ok(Json(CourseResponse::from(course)))
}

pub(crate) async fn course_detail(
    db: &Database,
    course: Course,
) -> Result<CourseDetailResponse, Problem> {
    let topics = db.topics_of_course(course.id).await?;
    let topic_ids: Vec<Uuid> = topics.iter().map(|it| it.id).collect();

    let files = db.files_of_topics(&topic_ids).await?;
    let assignments = db.assignments_of_topics(&topic_ids).await?;
    let teacher = db.get_user(course.teacher).await?;

    let topics = topics
        .iter()
        .map(|topic| TopicDetailResponse {
            topic: TopicResponse::from(topic),
            files: files
                .iter()
                .filter(|it| it.topic == topic.id)
                .map(CourseFileResponse::from)
                .collect(),
            assignments: assignments
                .iter()
                .filter(|it| it.topics.contains(&topic.id))
                .map(AssignmentResponse::from)
                .collect(),
        })
        .collect();

    Ok(CourseDetailResponse {
        course: CourseResponse::from(&course),
        teacher_info: teacher.map(UserResponse::from),
        topics,
    })
}

/// Course page with topics, files and assignments
#[utoipa::path(
    responses(
        (status = 200, description = "Course details", body = CourseDetailResponse),
        (status = 403, description = "Caller isn't a course member", body = Problem),
        (status = 404, description = "Course doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course/<id>")]
#[tracing::instrument(skip(db))]
pub async fn course_get(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<CourseDetailResponse>, Problem> {
    let (course, _) = db.member_course(id, &auth).await?;
    Ok(Json(course_detail(db, course).await?))
}

/// Delete a course with all of its content
#[utoipa::path(
    responses(
        (status = 200, description = "ID of the deleted course", body = String),
        (status = 404, description = "Course doesn't exist or isn't the caller's", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/course/<id>")]
#[tracing::instrument(skip(db, media))]
pub async fn course_delete(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<String, Problem> {
    let course = db.managed_course(id, &auth).await?;
    db.delete_course(&course, media).await?;
    Ok(course.id.to_string())
}

/// Enroll in a course with its access key
#[utoipa::path(
    request_body = EnrollData,
    responses(
        (status = 200, description = "Enrolled course", body = CourseResponse),
        (status = 400, description = "Bad access key", body = Problem),
        (status = 404, description = "Course doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course/<id>/enroll", format = "json", data = "<enroll>")]
#[tracing::instrument(skip(db, security))]
pub async fn course_enroll(
    id: Uuid,
    enroll: Json<EnrollData>,
    auth: UserRoleToken,
    db: &State<Database>,
    security: &State<Security>,
) -> Result<Json<CourseResponse>, Problem> {
    let course = db
        .get_course(id)
        .await?
        .ok_or_else(|| course_problem::not_found(id))?;

    if course.teacher == auth.user {
        return Err(course_problem::own_course());
    }
    if !course.key_matches(&enroll.access_key, security) {
        return Err(course_problem::bad_access_key());
    }

    if db.enroll(course.id, auth.user).await? {
        tracing::info!("User {} enrolled in course {}", auth.user, course.id);
    }

    Ok(Json(CourseResponse::from(course)))
}

/// Leave a course
#[utoipa::path(
    responses(
        (status = 200, description = "ID of the course left", body = String),
        (status = 404, description = "Caller isn't enrolled", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/course/<id>/enroll")]
#[tracing::instrument(skip(db))]
pub async fn course_leave(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<String, Problem> {
    if !db.leave(id, auth.user).await? {
        return Err(problems::not_found("Enrollment", id));
    }
    Ok(id.to_string())
}

/// Courses the caller is enrolled in
#[utoipa::path(
    responses((status = 200, description = "Enrolled courses", body = Vec<CourseResponse>)),
    security(("jwt" = []))
)]
#[get("/user/me/courses")]
#[tracing::instrument(skip(db))]
pub async fn my_courses(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<CourseResponse>>, Problem> {
    let courses = db.enrolled_courses(auth.user).await?;
    Ok(Json(courses.into_iter().map(CourseResponse::from).collect()))
}

#[cfg(test)]
mod course_endpoints {
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::Value;
    use uuid::Uuid;

    use crate::data::assignment::db::AssignmentDbExt;
    use crate::data::assignment::AssignmentCreateData;
    use crate::data::course::db::CourseDbExt;
    use crate::data::storage::SUBMISSIONS;
    use crate::data::topic::db::TopicDbExt;
    use crate::data::topic::TopicData;
    use crate::role::Role;
    use crate::route::testing::{
        database, live_client, media, offline_client, remove_users, seed_course, seed_user,
        stored_file,
    };

    async fn enroll<'c>(
        client: &'c Client,
        course: Uuid,
        cookie: &Cookie<'static>,
        access_key: &str,
    ) -> LocalResponse<'c> {
        client
            .post(format!("/api/v1/course/{}/enroll", course))
            .header(ContentType::JSON)
            .cookie(cookie.clone())
            .body(serde_json::json!({ "access_key": access_key }).to_string())
            .dispatch()
            .await
    }

    async fn problem_title(response: LocalResponse<'_>) -> Option<String> {
        let body: Value = response.into_json().await?;
        body["title"].as_str().map(str::to_string)
    }

    #[rocket::async_test]
    async fn v1_course_create_requires_login() {
        let client = offline_client().await;

        let response = client
            .post("/api/v1/course")
            .header(ContentType::Form)
            .body("title=Algebra&access_key=secret")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn v1_course_detail_requires_login() {
        let client = offline_client().await;

        let response = client
            .get(format!("/api/v1/course/{}", Uuid::new_v4()))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn v1_enroll_requires_login() {
        let client = offline_client().await;

        let response = client
            .post(format!("/api/v1/course/{}/enroll", Uuid::new_v4()))
            .header(ContentType::JSON)
            .body(r#"{"access_key":"secret"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_enroll_checks_access_key() {
        let client = live_client().await;
        let (teacher, teacher_cookie) = seed_user(&client, "teacher", Role::Teacher).await;
        let (student, student_cookie) = seed_user(&client, "student", Role::Student).await;
        let course = seed_course(&client, &teacher, "open-sesame").await;

        let response = enroll(&client, course.id, &student_cookie, "open-barley").await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(problem_title(response).await.as_deref(), Some("Bad access key."));

        let response = enroll(&client, course.id, &teacher_cookie, "open-sesame").await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(
            problem_title(response).await.as_deref(),
            Some("Can't enroll in your own course.")
        );

        for _ in 0..2 {
            let response = enroll(&client, course.id, &student_cookie, "open-sesame").await;
            assert_eq!(response.status(), Status::Ok, "re-enrolling should succeed");
        }
        let enrolled = database(&client)
            .enrolled_course_ids(student.id)
            .await
            .expect("enrollments");
        assert_eq!(enrolled, vec![course.id], "enrolled more than once");

        remove_users(&client, &[&teacher, &student]).await;
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_course_detail_is_for_members() {
        let client = live_client().await;
        let (teacher, _) = seed_user(&client, "teacher", Role::Teacher).await;
        let (student, student_cookie) = seed_user(&client, "student", Role::Student).await;
        let course = seed_course(&client, &teacher, "open-sesame").await;

        let response = client
            .get(format!("/api/v1/course/{}", course.id))
            .cookie(student_cookie.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = enroll(&client, course.id, &student_cookie, "open-sesame").await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/api/v1/course/{}", course.id))
            .cookie(student_cookie)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        remove_users(&client, &[&teacher, &student]).await;
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_course_delete_removes_its_content() {
        let client = live_client().await;
        let db = database(&client);
        let media = media(&client);
        let (teacher, teacher_cookie) = seed_user(&client, "teacher", Role::Teacher).await;
        let (student, _) = seed_user(&client, "student", Role::Student).await;
        let course = seed_course(&client, &teacher, "open-sesame").await;

        let topic = TopicData {
            title: "Vectors".to_string(),
            content: String::new(),
        }
        .into_topic(course.id);
        db.create_topic(&topic).await.expect("topic");
        let assignment = AssignmentCreateData {
            title: "Dot products".to_string(),
            content: "Solve all of them.".to_string(),
            due_date: None,
            topics: vec![],
        }
        .into_assignment(vec![topic.id]);
        db.create_assignment(&assignment).await.expect("assignment");

        db.enroll(course.id, student.id).await.expect("enrollment");
        let file = stored_file(&client, SUBMISSIONS, "42").await;
        let submission = db
            .submit(&assignment, student.id, file.clone(), media)
            .await
            .expect("submission");
        db.rate(&submission, teacher.id, 90, "Good".to_string())
            .await
            .expect("grade");

        let response = client
            .delete(format!("/api/v1/course/{}", course.id))
            .cookie(teacher_cookie)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        assert!(db.get_course(course.id).await.expect("course").is_none());
        assert!(db.get_topic(topic.id).await.expect("topic").is_none());
        assert!(db.get_assignment(assignment.id).await.expect("assignment").is_none());
        assert!(db.get_submission(submission.id).await.expect("submission").is_none());
        assert!(db.grades_of(assignment.id).await.expect("grades").is_empty());
        assert!(db.enrolled_course_ids(student.id).await.expect("enrollments").is_empty());
        assert!(!media.resolve(&file).exists(), "submitted file wasn't removed");

        remove_users(&client, &[&teacher, &student]).await;
    }
}
