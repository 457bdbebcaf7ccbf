use chrono::{Duration, Utc};
use mongodb::Database;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::{Cookie, CookieJar};
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::config::Config;
use crate::data::storage::{MediaStore, PROFILE_PICTURES, THUMBNAIL_SIZE};
use crate::data::user::activation;
use crate::data::user::db::problem as user_problem;
use crate::data::user::db::{
    RoleUpdateData, UserDbExt, UserLoginData, UserSignupData, UserUpdateData,
};
use crate::data::user::{ProfileResponse, UserResponse};
use crate::mail::{self, Mailer};
use crate::resp::jwt::{auth_problem, role_problem, UserRoleToken, AUTH_COOKIE_NAME};
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::security::Security;

#[derive(FromForm)]
pub struct ProfilePictureUpload<'r> {
    pub picture: TempFile<'r>,
}

impl std::fmt::Debug for ProfilePictureUpload<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProfilePictureUpload:{} bytes", self.picture.len())
    }
}

/// Register a new account
#[utoipa::path(
    request_body(content = UserSignupData, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Created account", body = ProfileResponse),
        (status = 400, description = "Invalid or already used signup data", body = Problem),
    )
)]
#[post("/user", data = "<create_user>")]
#[tracing::instrument(skip(cookies, db, c, security, mailer))]
pub async fn user_create(
    create_user: Form<UserSignupData>,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
    c: &State<Config>,
    security: &State<Security>,
    mailer: &State<Mailer>,
) -> Result<Json<ProfileResponse>, Problem> {
    create_user.validate()?;

    let user = db
        .create_user(create_user.into_inner(), c, security)
        .await?;

    if user.active {
        let token = UserRoleToken::new(&user);
        cookies.add(token.cookie(&security.jwt_keys.private)?);
    } else {
        let token = activation::make_token(&user, &security.salt, Utc::now());
        let link = mail::activation_link(&c.site_url, user.id, &token);
        let (subject, body) = mail::activation_mail(&user, &link);
        mailer.send(&user.email, subject, body).await?;
    }

    Ok(Json(ProfileResponse::from(&user)))
}

/// Activate an account with the link sent after signup
#[utoipa::path(
    responses(
        (status = 200, description = "Activated account", body = ProfileResponse),
        (status = 400, description = "Invalid, expired or used link", body = Problem),
    )
)]
#[get("/user/activate/<id>/<token>")]
#[tracing::instrument(skip(cookies, db, c, security))]
pub async fn user_activate(
    id: Uuid,
    token: &str,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
    c: &State<Config>,
    security: &State<Security>,
) -> Result<Json<ProfileResponse>, Problem> {
    let mut user = db
        .get_user(id)
        .await?
        .ok_or_else(user_problem::bad_activation)?;

    let timeout = Duration::days(c.activation_timeout_days as i64);
    if !activation::check_token(&user, token, &security.salt, Utc::now(), timeout) {
        return Err(user_problem::bad_activation());
    }

    user.active = true;
    db.update_user(&user).await?;
    tracing::info!("Activated user {} ({})", user.username, user.id);

    cookies.add(UserRoleToken::new(&user).cookie(&security.jwt_keys.private)?);
    Ok(Json(ProfileResponse::from(&user)))
}

/// Log in with a username or e-mail address
#[utoipa::path(
    request_body(content = UserLoginData, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Logged in user", body = ProfileResponse),
        (status = 401, description = "Bad credentials or inactive account", body = Problem),
    )
)]
#[post("/login", data = "<login_user>")]
#[tracing::instrument(skip(cookies, db, security))]
pub async fn login_submit(
    login_user: Form<UserLoginData>,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
    security: &State<Security>,
) -> Result<Json<ProfileResponse>, Problem> {
    let is_email = login_user.is_email();

    login_user.validate(is_email)?;

    let user = match is_email {
        true => db.find_user_by_email(&login_user.identifier).await,
        false => db.find_user_by_username(&login_user.identifier).await,
    }?;

    let user = user.ok_or_else(|| user_problem::bad_login(is_email))?;

    if !user.pw_hash.matches(&login_user.password, security) {
        return Err(user_problem::bad_login(is_email));
    }

    if !user.active {
        return Err(user_problem::inactive());
    }

    let urt = UserRoleToken::new(&user);
    cookies.add(urt.cookie(&security.jwt_keys.private)?);

    Ok(Json(ProfileResponse::from(&user)))
}

/// Log out
#[utoipa::path(responses((status = 200, description = "Auth cookie removed")))]
#[post("/logout")]
pub async fn logout(cookies: &CookieJar<'_>) {
    cookies.remove(Cookie::from(AUTH_COOKIE_NAME));
}

/// Public information about a user
#[utoipa::path(
    responses(
        (status = 200, description = "User information", body = UserResponse),
        (status = 401, description = "Missing or expired token", body = Problem),
        (status = 404, description = "User doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/user/<id>")]
#[tracing::instrument(skip(db))]
pub async fn user_get(
    id: Uuid,
    _auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<UserResponse>, Problem> {
    let user = db.require_user(id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// Profile of the logged in user
#[utoipa::path(
    responses(
        (status = 200, description = "Own profile", body = ProfileResponse),
        (status = 401, description = "Missing or expired token", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/user/me")]
#[tracing::instrument(skip(db))]
pub async fn user_me(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<ProfileResponse>, Problem> {
    let user = db.require_user(auth.user).await?;
    Ok(Json(ProfileResponse::from(&user)))
}

/// Update own profile
#[utoipa::path(
    request_body = UserUpdateData,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 400, description = "Invalid or already used data", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/user/me", format = "json", data = "<update>")]
#[tracing::instrument(skip(db))]
pub async fn user_update(
    update: Json<UserUpdateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<ProfileResponse>, Problem> {
    update.validate()?;

    let user = db.require_user(auth.user).await?;
    let user = db.update_profile(user, update.into_inner()).await?;

    Ok(Json(ProfileResponse::from(&user)))
}

/// Replace own profile picture
#[utoipa::path(
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 400, description = "Upload isn't a supported image", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/user/me/picture", data = "<upload>")]
#[tracing::instrument(skip(db, media))]
pub async fn user_picture(
    mut upload: Form<ProfilePictureUpload<'_>>,
    auth: UserRoleToken,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<Json<ProfileResponse>, Problem> {
    let mut user = db.require_user(auth.user).await?;

    let picture = media
        .store_image(PROFILE_PICTURES, "picture", &mut upload.picture, THUMBNAIL_SIZE)
        .await?;

    let previous = user.picture.replace(picture);
    if let Err(e) = db.update_user(&user).await {
        media.remove_all(user.picture.as_slice()).await;
        return Err(e);
    }

    if let Some(previous) = previous {
        media.remove_all([&previous]).await;
    }

    Ok(Json(ProfileResponse::from(&user)))
}

/// Change a user's role
#[utoipa::path(
    request_body = RoleUpdateData,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Caller isn't an admin", body = Problem),
        (status = 404, description = "User doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/user/<id>/role", format = "json", data = "<update>")]
#[tracing::instrument(skip(db))]
pub async fn user_set_role(
    id: Uuid,
    update: Json<RoleUpdateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<UserResponse>, Problem> {
    if !auth.is_admin() {
        return Err(role_problem(Role::Admin));
    }

    let mut user = db.require_user(id).await?;
    user.user_role = update.role;
    db.update_user(&user).await?;

    tracing::info!("User {} now has role {}", user.username, user.user_role);
    Ok(Json(UserResponse::from(user)))
}

/// Delete a user and everything they own
#[utoipa::path(
    responses(
        (status = 200, description = "ID of the deleted user", body = String),
        (status = 401, description = "Caller isn't the user or an admin", body = Problem),
        (status = 404, description = "User doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/user/<id>")]
#[tracing::instrument(skip(cookies, db, media))]
pub async fn user_delete(
    id: Uuid,
    auth: UserRoleToken,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
    media: &State<MediaStore>,
) -> Result<String, Problem> {
    if auth.user != id && !auth.is_admin() {
        return Err(auth_problem("Only admins can delete other users."));
    }

    let removed = db.delete_user(id, media).await?;

    if let Some(removed) = removed {
        if auth.user == id {
            cookies.remove(Cookie::from(AUTH_COOKIE_NAME));
        }
        Ok(removed.id.to_string())
    } else {
        Err(user_problem::not_found(id))
    }
}

///////////////////////
//       TESTS
///////////////////////
