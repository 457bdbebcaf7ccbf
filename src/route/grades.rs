use mongodb::Database;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::data::assignment::db::AssignmentDbExt;
use crate::data::assignment::{AssignmentResponse, CourseGradeResponse, GradeResponse};
use crate::data::course::db::problem as course_problem;
use crate::data::course::db::CourseDbExt;
use crate::data::course::CourseResponse;
use crate::data::topic::db::TopicDbExt;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;

/// Courses the caller can see grades for
#[utoipa::path(
    responses((status = 200, description = "Enrolled courses", body = Vec<CourseResponse>)),
    security(("jwt" = []))
)]
#[get("/grades")]
#[tracing::instrument(skip(db))]
pub async fn grades_overview(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<CourseResponse>>, Problem> {
    let courses = db.enrolled_courses(auth.user).await?;
    Ok(Json(courses.into_iter().map(CourseResponse::from).collect()))
}

/// The caller's grade for every assignment of a course
#[utoipa::path(
    responses(
        (status = 200, description = "Assignments with grades", body = Vec<CourseGradeResponse>),
        (status = 403, description = "Caller isn't enrolled", body = Problem),
        (status = 404, description = "Course doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/grades/<course_id>")]
#[tracing::instrument(skip(db))]
pub async fn course_grades(
    course_id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<CourseGradeResponse>>, Problem> {
    let course = db
        .get_course(course_id)
        .await?
        .ok_or_else(|| course_problem::not_found(course_id))?;

    if !db.is_enrolled(course.id, auth.user).await? {
        return Err(course_problem::not_member(course.id));
    }

    let topics: Vec<Uuid> = db
        .topics_of_course(course.id)
        .await?
        .into_iter()
        .map(|it| it.id)
        .collect();
    let assignments = db.assignments_of_topics(&topics).await?;

    let ids: Vec<Uuid> = assignments.iter().map(|it| it.id).collect();
    let grades = db.grades_of_student(auth.user, &ids).await?;

    let response = assignments
        .iter()
        .map(|assignment| CourseGradeResponse {
            assignment: AssignmentResponse::from(assignment),
            grade: grades
                .iter()
                .find(|it| it.assignment == assignment.id)
                .map(GradeResponse::from),
        })
        .collect();

    Ok(Json(response))
}
