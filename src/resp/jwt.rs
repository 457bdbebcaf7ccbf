use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::{Cookie, CookieJar, Status};
use rocket::request::{self, FromRequest, Request};
use rocket::time::OffsetDateTime;
use serde::{Deserialize, Serialize};

use super::util::date_time_as_unix_seconds;
use crate::data::user::User;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::security::Security;
use rocket::outcome::Outcome::{Error as Failure, Success};
use uuid::Uuid;

pub static AUTH_COOKIE_NAME: &str = "jwt_auth";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleToken {
    #[serde(with = "date_time_as_unix_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "date_time_as_unix_seconds")]
    exp: DateTime<Utc>,
    pub user: Uuid,
    pub role: Role,
}

impl UserRoleToken {
    pub fn new(user: &User) -> UserRoleToken {
        let now = Utc::now();
        UserRoleToken {
            iat: now,
            exp: now + Duration::weeks(1),
            user: user.id,
            role: user.user_role,
        }
    }

    pub fn can_teach(&self) -> bool {
        self.role.can_teach()
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn encode_jwt(
        &self,
        private_key: impl AsRef<[u8]>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let header = Header::new(Algorithm::PS256);
        let key = EncodingKey::from_rsa_pem(private_key.as_ref())?;

        encode(&header, &self, &key)
    }

    pub fn cookie(
        &self,
        private_key: impl AsRef<[u8]>,
    ) -> Result<Cookie<'static>, jsonwebtoken::errors::Error> {
        Ok(
            Cookie::build((AUTH_COOKIE_NAME, self.encode_jwt(private_key)?))
                .secure(true)
                .expires(OffsetDateTime::from_unix_timestamp(self.exp.timestamp()).ok())
                .path("/")
                .http_only(true)
                .build(),
        )
    }
}

pub fn auth_problem(detail: impl ToString) -> Problem {
    Problem::new_untyped(Status::Unauthorized, "Unable to authorize user.")
        .detail(detail)
        .clone()
}

/// Problem returned when the caller's role doesn't permit an operation.
pub fn role_problem(required: Role) -> Problem {
    auth_problem("Permission level too low.")
        .insert("required_role", required)
        .clone()
}

pub fn extract_claims(
    cookies: &CookieJar,
    public_key: impl AsRef<[u8]>,
) -> Result<UserRoleToken, Problem> {
    let auth_cookie = cookies.get(AUTH_COOKIE_NAME);
    let token = match auth_cookie {
        Some(jwt) => jwt.value().to_owned(),
        None => {
            return Err(auth_problem("No JWT auth cookie."));
        }
    };
    tracing::debug!("extracted jwt auth from cookie");

    let key = DecodingKey::from_rsa_pem(public_key.as_ref())
        .map_err(|_| auth_problem("Server JWT key isn't valid."))?;

    match decode::<UserRoleToken>(&token, &key, &Validation::new(Algorithm::PS256))
        .map(|data| data.claims)
    {
        Ok(it) => {
            tracing::debug!("decoded user role token for user: {}", it.user);

            Ok(it)
        }
        Err(_) => Err(auth_problem("JWT cookie was malformed.")),
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserRoleToken {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let security: &Security = match req.rocket().state() {
            Some(it) => it,
            None => {
                tracing::error!("security state isn't managed");
                return Failure((
                    Status::InternalServerError,
                    auth_problem("Server security isn't configured."),
                ));
            }
        };

        tracing::trace!("extracting user role token from request cookies");
        match extract_claims(req.cookies(), &security.jwt_keys.public) {
            Ok(claims) => Success(claims),
            Err(e) => {
                tracing::debug!("unable to extract claims from cookies");
                Failure((Status::Unauthorized, e))
            }
        }
    }
}

pub mod doc {
    use utoipa::openapi::security::*;

    #[derive(Clone, Copy)]
    pub struct JWTAuth;

    impl From<JWTAuth> for SecurityScheme {
        fn from(_: JWTAuth) -> SecurityScheme {
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(super::AUTH_COOKIE_NAME)))
        }
    }

    impl utoipa::Modify for JWTAuth {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            if let Some(c) = openapi.components.as_mut() {
                c.add_security_scheme("jwt", *self)
            }
        }
    }
}

#[cfg(test)]
pub trait HasAuthCookie {
    fn get_auth_cookie(&self, public_key: impl AsRef<[u8]>) -> Option<UserRoleToken>;
}

#[cfg(test)]
impl HasAuthCookie for rocket::local::asynchronous::LocalResponse<'_> {
    fn get_auth_cookie(&self, public_key: impl AsRef<[u8]>) -> Option<UserRoleToken> {
        tracing::trace!("extracting user role token from response cookies");
        extract_claims(self.cookies(), public_key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    #[test]
    #[ignore = "generates a 4096 bit RSA key pair on first run"]
    fn jwt_configured_properly() {
        let mut now = Utc::now();
        now = now.round_subsecs(0);

        let user = Uuid::new_v4();

        let urt = UserRoleToken {
            iat: now,
            exp: now + Duration::weeks(1),
            user,
            role: Role::Teacher,
        };

        let dir = tempfile::tempdir().expect("temp dir");
        let security = Security::load_from(dir.path(), 4).expect("security material");

        let token = urt
            .encode_jwt(&security.jwt_keys.private)
            .expect("encoding should work for example");

        let decoded: UserRoleToken = decode(
            &token,
            &DecodingKey::from_rsa_pem(&security.jwt_keys.public)
                .expect("user_auth public key isn't valid. Unable to decode JWT."),
            &Validation::new(Algorithm::PS256),
        )
        .map(|data| data.claims)
        .expect("unable to decode encoded token");

        assert_eq!(now, decoded.iat);
        assert_eq!(now + Duration::weeks(1), decoded.exp);
        assert_eq!(user, decoded.user);
        assert_eq!(decoded.role, Role::Teacher);
    }

    #[test]
    fn role_problem_is_unauthorized() {
        let problem = role_problem(Role::Teacher);
        assert_eq!(problem.status, Status::Unauthorized);
        assert_eq!(problem.detail.as_deref(), Some("Permission level too low."));
        assert_eq!(problem.body["required_role"], "Teacher");
    }
}
