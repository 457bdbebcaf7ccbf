use std::collections::BTreeMap;

use rocket::http::Status;
use rocket::{Build, Catcher, Request, Rocket, Route};

pub mod assignments;
pub mod chat;
pub mod courses;
pub mod files;
pub mod grades;
pub mod topics;
pub mod users;

use assignments::*;
use chat::*;
use courses::*;
use files::*;
use grades::*;
use topics::*;
use users::*;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    data::{
        assignment as ad, chat as cd, course as crd, topic as td,
        user::db::{RoleUpdateData, UserLoginData, UserSignupData, UserUpdateData},
        user::{ProfileResponse, UserResponse},
    },
    resp::{
        jwt::{auth_problem, doc::JWTAuth},
        problem::Problem,
    },
    role::Role,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        app,
        user_create,
        user_activate,
        login_submit,
        logout,
        user_get,
        user_me,
        user_update,
        user_picture,
        user_set_role,
        user_delete,
        degree_list,
        degree_create,
        semester_list,
        semester_create,
        course_list,
        course_create,
        course_get,
        course_delete,
        course_enroll,
        course_leave,
        my_courses,
        topic_create,
        topic_update,
        topic_delete,
        file_upload,
        file_delete,
        file_download,
        assignment_create,
        assignment_update,
        assignment_delete,
        assignment_list,
        assignment_get,
        submission_create,
        submission_get,
        submission_file,
        rating_list,
        rate_submission,
        grades_overview,
        course_grades,
        chat_threads,
        chat_search,
        thread_open,
        thread_delete,
        thread_read
    ),
    components(schemas(
        Role,
        UserResponse,
        ProfileResponse,
        UserLoginData,
        UserSignupData,
        UserUpdateData,
        RoleUpdateData,
        crd::LabelResponse,
        crd::LabelCreateData,
        crd::EnrollData,
        crd::CourseResponse,
        crd::CourseDetailResponse,
        td::TopicData,
        td::TopicResponse,
        td::CourseFileResponse,
        td::TopicDetailResponse,
        ad::AssignmentCreateData,
        ad::AssignmentUpdateData,
        ad::RateData,
        ad::AssignmentResponse,
        ad::SubmissionResponse,
        ad::GradeResponse,
        ad::StudentAssignmentResponse,
        ad::RatingRowResponse,
        ad::CourseGradeResponse,
        cd::IncomingMessage,
        cd::OutgoingMessage,
        cd::SenderData,
        cd::SocketError,
        cd::SearchData,
        cd::MessageResponse,
        cd::ThreadResponse,
        Problem
    )),
    modifiers(&JWTAuth, &V1_PREFIX)
)]
pub struct ApiDocV1;

pub struct PathPrefix(pub &'static str);
static V1_PREFIX: PathPrefix = PathPrefix("/api/v1");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            // The application entry point isn't served under the API prefix.
            if path == "/" {
                new_paths.insert(path, item);
                continue;
            }
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

pub fn api_v1() -> Vec<Route> {
    routes![
        user_create,
        user_activate,
        login_submit,
        logout,
        user_get,
        user_me,
        user_update,
        user_picture,
        user_set_role,
        user_delete,
        degree_list,
        degree_create,
        semester_list,
        semester_create,
        course_list,
        course_create,
        course_get,
        course_delete,
        course_enroll,
        course_leave,
        my_courses,
        topic_create,
        topic_update,
        topic_delete,
        file_upload,
        file_delete,
        file_download,
        assignment_create,
        assignment_update,
        assignment_delete,
        assignment_list,
        assignment_get,
        submission_create,
        submission_get,
        submission_file,
        rating_list,
        rate_submission,
        grades_overview,
        course_grades,
        chat_threads,
        chat_search,
        thread_open,
        thread_delete,
        thread_read,
        chat_socket
    ]
}

/// Guards can't hand their problem to a catcher, so 401 is rebuilt here.
#[catch(401)]
fn unauthorized() -> Problem {
    auth_problem("Missing or invalid credentials.")
}

#[catch(422)]
fn unprocessable() -> Problem {
    Problem::new_untyped(Status::UnprocessableEntity, "Unable to parse request data.")
}

#[catch(default)]
fn default_problem(status: Status, _: &Request) -> Problem {
    Problem::new_untyped(status, status.reason().unwrap_or("Unknown error."))
}

pub fn api_catchers() -> Vec<Catcher> {
    catchers![unauthorized, unprocessable, default_problem]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/api/v1", api_v1())
        .register("/", api_catchers())
        .mount(
            "/",
            SwaggerUi::new("/swagger/<_..>").url("/api/v1/openapi.json", ApiDocV1::openapi()),
        )
        .mount("/", routes![app, app_path, default_picture, public_media])
}

#[cfg(test)]
pub mod testing {
    use mongodb::Database;
    use rocket::http::{ContentType, Cookie, RawStr};
    use rocket::local::asynchronous::Client;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::data::course::db::CourseDbExt;
    use crate::data::course::{Course, CourseCreateData};
    use crate::data::storage::{MediaStore, StoredFile};
    use crate::data::user::db::{UserDbExt, USER_COLLECTION_NAME};
    use crate::data::user::User;
    use crate::mail::Mailer;
    use crate::resp::jwt::UserRoleToken;
    use crate::role::Role;
    use crate::security::Security;

    /// URL encodes form fields for a request body.
    pub fn form(fields: &[(&str, &str)]) -> String {
        fields
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    RawStr::new(key).percent_encode(),
                    RawStr::new(value).percent_encode()
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// A backend whose database is never reached. Requests that fail on
    /// guards or validation can be checked against it.
    pub async fn offline_client() -> Client {
        let mut config = Config::default();
        config.media_root = std::env::temp_dir().join(format!("cez-media-{}", Uuid::new_v4()));
        config.public_content = std::env::temp_dir().join("cez-public-missing");

        let db = mongodb::Client::with_uri_str("mongodb://127.0.0.1:1")
            .await
            .expect("client options parse")
            .database("cez_offline");

        let rocket = crate::assemble(config, Security::for_tests(), db, Mailer::default())
            .expect("backend assembles");
        Client::tracked(rocket).await.expect("valid rocket")
    }

    /// A backend connected to the configured MongoDB instance.
    pub async fn live_client() -> Client {
        let rocket = crate::create(None).await.expect("backend starts");
        Client::tracked(rocket).await.expect("invalid backend")
    }

    pub fn database(client: &Client) -> &Database {
        client.rocket().state().expect("database")
    }

    pub fn media(client: &Client) -> &MediaStore {
        client.rocket().state().expect("media store")
    }

    /// Inserts an active account with `role`, returning it with its auth cookie.
    pub async fn seed_user(client: &Client, prefix: &str, role: Role) -> (User, Cookie<'static>) {
        let security: &Security = client.rocket().state().expect("security");

        let tag = Uuid::new_v4().simple().to_string();
        let username = format!("{}_{}", prefix, &tag[..8]);
        let mut user = User::new(
            format!("{}@example.com", username),
            &username,
            "pa55word!",
            security,
        );
        user.user_role = role;

        database(client)
            .collection::<User>(USER_COLLECTION_NAME)
            .insert_one(&user, None)
            .await
            .expect("unable to insert test user");

        let cookie = UserRoleToken::new(&user)
            .cookie(&security.jwt_keys.private)
            .expect("unable to encode UserRoleToken cookie");
        (user, cookie)
    }

    /// A course taught by `teacher` that opens with `access_key`.
    pub async fn seed_course(client: &Client, teacher: &User, access_key: &str) -> Course {
        let security: &Security = client.rocket().state().expect("security");
        let db = database(client);

        let tag = Uuid::new_v4().simple().to_string();
        let degree = db
            .create_degree(&format!("Degree {}", &tag[..8]))
            .await
            .expect("unable to create degree");
        let semester = db
            .create_semester(&format!("Semester {}", &tag[..8]))
            .await
            .expect("unable to create semester");

        let course = CourseCreateData {
            title: format!("Course {}", &tag[..8]),
            description: None,
            access_key: access_key.to_string(),
            degree: degree.id,
            semester: semester.id,
            image: None,
        }
        .into_course(teacher.id, None, security);

        db.create_course(&course)
            .await
            .expect("unable to create test course");
        course
    }

    /// Writes `content` straight into the media store, as an upload would.
    pub async fn stored_file(client: &Client, category: &str, content: &str) -> StoredFile {
        let file = StoredFile {
            name: "solution.txt".to_string(),
            path: format!("{}/{}.txt", category, Uuid::new_v4()),
        };
        let target = media(client).resolve(&file);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.expect("media dir");
        }
        tokio::fs::write(&target, content).await.expect("write media file");
        file
    }

    /// Deletes test accounts along with everything they own.
    pub async fn remove_users(client: &Client, users: &[&User]) {
        for user in users {
            database(client)
                .delete_user(user.id, media(client))
                .await
                .expect("unable to delete test user");
        }
    }

    /// A multipart body holding one file field.
    pub fn multipart(field: &str, filename: &str, content: &[u8]) -> (ContentType, Vec<u8>) {
        const BOUNDARY: &str = "cez-test-boundary";

        let mut body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, field, filename
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let content_type =
            ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY));
        (content_type, body)
    }
}
