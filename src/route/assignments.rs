use mongodb::Database;
use rocket::form::Form;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::data::assignment::db::AssignmentDbExt;
use crate::data::assignment::{
    Assignment, AssignmentCreateData, AssignmentResponse, AssignmentUpdateData, GradeResponse,
    RateData, RatingRowResponse, StudentAssignmentResponse, SubmissionResponse, SubmissionUpload,
};
use crate::data::course::db::CourseDbExt;
use crate::data::course::CourseAccess;
use crate::data::storage::{Download, MediaStore, SUBMISSIONS};
use crate::data::topic::db::TopicDbExt;
use crate::data::user::db::UserDbExt;
use crate::data::user::UserResponse;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};

/// Best access the caller has to any course holding the assignment.
async fn assignment_access(
    db: &Database,
    assignment: &Assignment,
    auth: &UserRoleToken,
) -> Result<CourseAccess, Problem> {
    let mut best = CourseAccess::Outsider;
    for course_id in db.assignment_courses(assignment).await? {
        let course = match db.get_course(course_id).await? {
            Some(it) => it,
            None => continue,
        };
        match db.course_access(&course, auth).await? {
            CourseAccess::Owner => return Ok(CourseAccess::Owner),
            CourseAccess::Outsider => {}
            other => best = other,
        }
    }
    Ok(best)
}

fn not_participant(id: Uuid) -> Problem {
    problems::forbidden("Only members of the assignment's course can access it.")
        .insert_str("assignment", id)
        .to_owned()
}

/// Add an assignment to a topic
#[utoipa::path(
    request_body = AssignmentCreateData,
    responses(
        (status = 200, description = "Created assignment", body = AssignmentResponse),
        (status = 400, description = "Invalid assignment data", body = Problem),
        (status = 404, description = "Course or topic doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course/<course_id>/topic/<topic_id>/assignment", format = "json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn assignment_create(
    course_id: Uuid,
    topic_id: Uuid,
    data: Json<AssignmentCreateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<AssignmentResponse>, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let topic = db.course_topic(course.id, topic_id).await?;
    data.validate()?;

    let mut requested = vec![topic.id];
    requested.extend(data.topics.iter().copied());
    let topics = db.course_topics(course.id, &requested).await?;

    let assignment = data.into_inner().into_assignment(topics);
    db.create_assignment(&assignment).await?;

    Ok(Json(AssignmentResponse::from(assignment)))
}

/// Edit an assignment
#[utoipa::path(
    request_body = AssignmentUpdateData,
    responses(
        (status = 200, description = "Updated assignment", body = AssignmentResponse),
        (status = 400, description = "Invalid assignment data", body = Problem),
        (status = 404, description = "Course or assignment doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/course/<course_id>/assignment/<assignment_id>", format = "json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn assignment_update(
    course_id: Uuid,
    assignment_id: Uuid,
    data: Json<AssignmentUpdateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<AssignmentResponse>, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let mut assignment = db.course_assignment(course.id, assignment_id).await?;
    data.validate()?;

    let topics = match &data.topics {
        Some(topics) => Some(db.course_topics(course.id, topics).await?),
        None => None,
    };

    data.into_inner().apply(&mut assignment, topics);
    db.replace_assignment(&assignment).await?;

    Ok(Json(AssignmentResponse::from(assignment)))
}

/// Delete an assignment with its submissions and grades
#[utoipa::path(
    responses(
        (status = 200, description = "ID of the deleted assignment", body = String),
        (status = 404, description = "Course or assignment doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/course/<course_id>/assignment/<assignment_id>")]
#[tracing::instrument(skip(db, media))]
pub async fn assignment_delete(
    course_id: Uuid,
    assignment_id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<String, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let assignment = db.course_assignment(course.id, assignment_id).await?;

    db.delete_assignment(&assignment, media).await?;
    Ok(assignment.id.to_string())
}

/// Assignments of every course the caller is enrolled in
#[utoipa::path(
    responses((status = 200, description = "Assignments with the caller's submissions", body = Vec<StudentAssignmentResponse>)),
    security(("jwt" = []))
)]
#[get("/assignment")]
#[tracing::instrument(skip(db))]
pub async fn assignment_list(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<StudentAssignmentResponse>>, Problem> {
    let mut listed: Vec<(Uuid, Assignment)> = Vec::new();

    for course in db.enrolled_course_ids(auth.user).await? {
        let topics: Vec<Uuid> = db
            .topics_of_course(course)
            .await?
            .into_iter()
            .map(|it| it.id)
            .collect();

        for assignment in db.assignments_of_topics(&topics).await? {
            if !listed.iter().any(|(_, it)| it.id == assignment.id) {
                listed.push((course, assignment));
            }
        }
    }

    let ids: Vec<Uuid> = listed.iter().map(|(_, it)| it.id).collect();
    let submissions = db.submissions_of_student(auth.user, &ids).await?;

    let response = listed
        .iter()
        .map(|(course, assignment)| StudentAssignmentResponse {
            assignment: AssignmentResponse::from(assignment),
            course: Some(*course),
            submission: submissions
                .iter()
                .find(|it| it.assignment == assignment.id)
                .map(SubmissionResponse::from),
        })
        .collect();

    Ok(Json(response))
}

/// Assignment details
#[utoipa::path(
    responses(
        (status = 200, description = "Assignment", body = AssignmentResponse),
        (status = 403, description = "Caller isn't a course member", body = Problem),
        (status = 404, description = "Assignment doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/assignment/<id>")]
#[tracing::instrument(skip(db))]
pub async fn assignment_get(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<AssignmentResponse>, Problem> {
    let assignment = db.require_assignment(id).await?;

    if !assignment_access(db, &assignment, &auth).await?.is_member() {
        return Err(not_participant(id));
    }

    Ok(Json(AssignmentResponse::from(assignment)))
}

/// Upload a solution, replacing an earlier one
#[utoipa::path(
    responses(
        (status = 200, description = "Stored submission", body = SubmissionResponse),
        (status = 400, description = "Empty upload", body = Problem),
        (status = 403, description = "Caller isn't enrolled in the assignment's course", body = Problem),
        (status = 404, description = "Assignment doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/assignment/<id>/submission", data = "<upload>")]
#[tracing::instrument(skip(upload, db, media))]
pub async fn submission_create(
    id: Uuid,
    mut upload: Form<SubmissionUpload<'_>>,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<Json<SubmissionResponse>, Problem> {
    let assignment = db.require_assignment(id).await?;

    if assignment_access(db, &assignment, &auth).await? != CourseAccess::Enrolled {
        return Err(problems::forbidden(
            "Only students enrolled in the assignment's course can submit solutions.",
        ));
    }

    let stored = media.store(SUBMISSIONS, "file", &mut upload.file).await?;
    let submission = match db.submit(&assignment, auth.user, stored.clone(), media).await {
        Ok(it) => it,
        Err(e) => {
            media.remove_all([&stored]).await;
            return Err(e);
        }
    };

    Ok(Json(SubmissionResponse::from(&submission)))
}

/// The caller's submission for an assignment
#[utoipa::path(
    responses(
        (status = 200, description = "Submission", body = SubmissionResponse),
        (status = 404, description = "Nothing was submitted", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/assignment/<id>/submission")]
#[tracing::instrument(skip(db))]
pub async fn submission_get(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<SubmissionResponse>, Problem> {
    let submission = db
        .submission_of(id, auth.user)
        .await?
        .ok_or_else(|| problems::not_found("Submission", id))?;

    Ok(Json(SubmissionResponse::from(&submission)))
}

/// Download a submitted file
#[utoipa::path(
    responses(
        (status = 200, description = "File contents"),
        (status = 404, description = "Submission doesn't exist or isn't visible to the caller", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/submission/<id>/file")]
#[tracing::instrument(skip(db, media))]
pub async fn submission_file(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<Download, Problem> {
    let submission = db
        .get_submission(id)
        .await?
        .ok_or_else(|| problems::not_found("Submission", id))?;

    if submission.student != auth.user {
        let assignment = db.require_assignment(submission.assignment).await?;
        if !assignment_access(db, &assignment, &auth).await?.can_manage() {
            return Err(problems::not_found("Submission", id));
        }
    }

    media.download(&submission.file).await
}

/// Submissions of an assignment with their grades
#[utoipa::path(
    responses(
        (status = 200, description = "Submissions to grade", body = Vec<RatingRowResponse>),
        (status = 404, description = "Course or assignment doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course/<course_id>/assignment/<assignment_id>/rate")]
#[tracing::instrument(skip(db))]
pub async fn rating_list(
    course_id: Uuid,
    assignment_id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<RatingRowResponse>>, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let assignment = db.course_assignment(course.id, assignment_id).await?;

    let submissions = db.submissions_of(assignment.id).await?;
    let grades = db.grades_of(assignment.id).await?;
    let students: Vec<Uuid> = submissions.iter().map(|it| it.student).collect();
    let users = db.get_users(&students).await?;

    let rows = submissions
        .iter()
        .map(|submission| RatingRowResponse {
            submission: SubmissionResponse::from(submission),
            student: users
                .iter()
                .find(|it| it.id == submission.student)
                .map(UserResponse::from),
            grade: grades
                .iter()
                .find(|it| it.student == submission.student)
                .map(GradeResponse::from),
        })
        .collect();

    Ok(Json(rows))
}

/// Grade a submission
#[utoipa::path(
    request_body = RateData,
    responses(
        (status = 200, description = "Stored grade", body = GradeResponse),
        (status = 400, description = "Invalid grade", body = Problem),
        (status = 404, description = "Course, assignment or submission doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post(
    "/course/<course_id>/assignment/<assignment_id>/rate/<submission_id>",
    format = "json",
    data = "<data>"
)]
#[tracing::instrument(skip(db))]
pub async fn rate_submission(
    course_id: Uuid,
    assignment_id: Uuid,
    submission_id: Uuid,
    data: Json<RateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<GradeResponse>, Problem> {
    let course = db.managed_course(course_id, &auth).await?;
    let assignment = db.course_assignment(course.id, assignment_id).await?;

    let submission = match db.get_submission(submission_id).await? {
        Some(it) if it.assignment == assignment.id => it,
        _ => return Err(problems::not_found("Submission", submission_id)),
    };

    let grade = data.validate()?;
    let data = data.into_inner();
    let rate = db.rate(&submission, auth.user, grade, data.comment).await?;

    Ok(Json(GradeResponse::from(&rate)))
}

#[cfg(test)]
mod assignment_endpoints {
    use chrono::{Duration, Utc};
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use uuid::Uuid;

    use crate::data::assignment::db::AssignmentDbExt;
    use crate::data::assignment::{
        Assignment, AssignmentCreateData, GradeResponse, SubmissionResponse,
    };
    use crate::data::course::db::CourseDbExt;
    use crate::data::course::Course;
    use crate::data::storage::SUBMISSIONS;
    use crate::data::topic::db::TopicDbExt;
    use crate::data::topic::TopicData;
    use crate::data::user::User;
    use crate::role::Role;
    use crate::route::testing::{
        database, live_client, media, multipart, offline_client, remove_users, seed_course,
        seed_user, stored_file,
    };

    struct Classroom {
        teacher: User,
        teacher_cookie: Cookie<'static>,
        student: User,
        student_cookie: Cookie<'static>,
        course: Course,
        assignment: Assignment,
    }

    /// A course with one assignment and one enrolled student.
    async fn classroom(client: &Client) -> Classroom {
        let db = database(client);
        let (teacher, teacher_cookie) = seed_user(client, "teacher", Role::Teacher).await;
        let (student, student_cookie) = seed_user(client, "student", Role::Student).await;
        let course = seed_course(client, &teacher, "open-sesame").await;

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

        Classroom {
            teacher,
            teacher_cookie,
            student,
            student_cookie,
            course,
            assignment,
        }
    }

    async fn submit<'c>(
        client: &'c Client,
        assignment: Uuid,
        cookie: &Cookie<'static>,
        filename: &str,
    ) -> LocalResponse<'c> {
        let (content_type, body) = multipart("file", filename, b"x = 42");
        client
            .post(format!("/api/v1/assignment/{}/submission", assignment))
            .header(content_type)
            .cookie(cookie.clone())
            .body(body)
            .dispatch()
            .await
    }

    async fn rate<'c>(
        client: &'c Client,
        room: &Classroom,
        assignment: Uuid,
        submission: Uuid,
        grade: i64,
    ) -> LocalResponse<'c> {
        client
            .post(format!(
                "/api/v1/course/{}/assignment/{}/rate/{}",
                room.course.id, assignment, submission
            ))
            .header(ContentType::JSON)
            .cookie(room.teacher_cookie.clone())
            .body(serde_json::json!({ "grade": grade, "comment": "Checked" }).to_string())
            .dispatch()
            .await
    }

    #[rocket::async_test]
    async fn v1_assignment_list_requires_login() {
        let client = offline_client().await;

        let response = client.get("/api/v1/assignment").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn v1_rating_requires_login() {
        let client = offline_client().await;

        let response = client
            .post(format!(
                "/api/v1/course/{}/assignment/{}/rate/{}",
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4()
            ))
            .header(ContentType::JSON)
            .body(r#"{"grade":90,"comment":"Nice"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_submission_requires_enrollment() {
        let client = live_client().await;
        let room = classroom(&client).await;
        let (outsider, outsider_cookie) = seed_user(&client, "outsider", Role::Student).await;

        let response = submit(&client, room.assignment.id, &outsider_cookie, "a.py").await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = submit(&client, room.assignment.id, &room.teacher_cookie, "a.py").await;
        assert_eq!(response.status(), Status::Forbidden, "owners can't submit");

        remove_users(&client, &[&room.teacher, &room.student, &outsider]).await;
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_resubmission_replaces_previous_file() {
        let client = live_client().await;
        let db = database(&client);
        let room = classroom(&client).await;

        let response = submit(&client, room.assignment.id, &room.student_cookie, "first.py").await;
        assert_eq!(response.status(), Status::Ok);
        let first: SubmissionResponse = response.into_json().await.expect("submission json");
        assert!(!first.late);
        let first_file = db
            .submission_of(room.assignment.id, room.student.id)
            .await
            .expect("submission")
            .expect("stored submission")
            .file;
        assert!(media(&client).resolve(&first_file).exists());

        let response = submit(&client, room.assignment.id, &room.student_cookie, "second.py").await;
        assert_eq!(response.status(), Status::Ok);
        let second: SubmissionResponse = response.into_json().await.expect("submission json");

        assert_eq!(first.id, second.id, "resubmission should keep the row");
        assert_eq!(second.filename, "second.py");
        assert!(
            !media(&client).resolve(&first_file).exists(),
            "replaced file wasn't removed"
        );
        let rows = db.submissions_of(room.assignment.id).await.expect("submissions");
        assert_eq!(rows.len(), 1);

        remove_users(&client, &[&room.teacher, &room.student]).await;
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_late_submissions_are_flagged() {
        let client = live_client().await;
        let db = database(&client);
        let room = classroom(&client).await;

        let mut overdue = room.assignment.clone();
        overdue.due_date = Utc::now() - Duration::days(1);
        db.replace_assignment(&overdue).await.expect("assignment");

        let response = submit(&client, overdue.id, &room.student_cookie, "late.py").await;
        assert_eq!(response.status(), Status::Ok);
        let submission: SubmissionResponse = response.into_json().await.expect("submission json");
        assert!(submission.late);

        let stored = db
            .submission_of(overdue.id, room.student.id)
            .await
            .expect("submission")
            .expect("stored submission");
        assert!(stored.late, "late flag wasn't persisted");

        remove_users(&client, &[&room.teacher, &room.student]).await;
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_rating_replaces_earlier_grade() {
        let client = live_client().await;
        let db = database(&client);
        let room = classroom(&client).await;

        let file = stored_file(&client, SUBMISSIONS, "42").await;
        let submission = db
            .submit(&room.assignment, room.student.id, file, media(&client))
            .await
            .expect("submission");

        let response = rate(&client, &room, room.assignment.id, submission.id, 70).await;
        assert_eq!(response.status(), Status::Ok);
        let first: GradeResponse = response.into_json().await.expect("grade json");

        let response = rate(&client, &room, room.assignment.id, submission.id, 95).await;
        assert_eq!(response.status(), Status::Ok);
        let second: GradeResponse = response.into_json().await.expect("grade json");

        assert_eq!(first.id, second.id, "grading again should keep the row");
        assert_eq!(second.grade, 95);
        assert_eq!(second.teacher, room.teacher.id);
        let grades = db.grades_of(room.assignment.id).await.expect("grades");
        assert_eq!(grades.len(), 1);

        let response = rate(&client, &room, room.assignment.id, submission.id, 101).await;
        assert_eq!(response.status(), Status::BadRequest);

        remove_users(&client, &[&room.teacher, &room.student]).await;
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn v1_rating_checks_submission_assignment() {
        let client = live_client().await;
        let db = database(&client);
        let room = classroom(&client).await;

        let mut other = room.assignment.clone();
        other.id = Uuid::new_v4();
        other.title = "Cross products".to_string();
        db.create_assignment(&other).await.expect("assignment");

        let file = stored_file(&client, SUBMISSIONS, "42").await;
        let foreign = db
            .submit(&other, room.student.id, file, media(&client))
            .await
            .expect("submission");

        let response = rate(&client, &room, room.assignment.id, foreign.id, 80).await;
        assert_eq!(response.status(), Status::NotFound);
        assert!(db.grades_of(other.id).await.expect("grades").is_empty());

        remove_users(&client, &[&room.teacher, &room.student]).await;
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB instance"]
    async fn concurrent_first_submissions_share_one_row() {
        let client = live_client().await;
        let db = database(&client);
        let media = media(&client);
        let room = classroom(&client).await;

        let left = stored_file(&client, SUBMISSIONS, "left").await;
        let right = stored_file(&client, SUBMISSIONS, "right").await;
        let (a, b) = tokio::join!(
            db.submit(&room.assignment, room.student.id, left.clone(), media),
            db.submit(&room.assignment, room.student.id, right.clone(), media),
        );
        let (a, b) = (a.expect("submission"), b.expect("submission"));
        assert_eq!(a.id, b.id);

        let rows = db.submissions_of(room.assignment.id).await.expect("submissions");
        assert_eq!(rows.len(), 1);
        let kept = &rows[0].file;
        assert!(media.resolve(kept).exists());
        let removed = if kept.path == left.path { &right } else { &left };
        assert!(!media.resolve(removed).exists(), "losing file wasn't removed");

        remove_users(&client, &[&room.teacher, &room.student]).await;
    }
}
