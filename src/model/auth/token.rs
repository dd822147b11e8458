use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rocket::{
    http::{Cookie, SameSite, Status},
    outcome::{try_outcome, IntoOutcome},
    request::{FromRequest, Outcome},
    time::Duration,
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::election::ElectionController;
use crate::error::Error;

use super::user::{Rights, User};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// Who is asking, and as what. Carried in a signed cookie and checked on
/// every request that needs a logged-in user.
#[derive(Serialize, Deserialize)]
pub struct AuthToken<U> {
    /// Normalised voter identifier, or the admin email.
    #[serde(rename = "sub")]
    pub id: String,
    pub name: String,
    #[serde(rename = "rgt")]
    pub rights: Rights,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U: User> AuthToken<U> {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rights: U::RIGHTS,
            phantom: PhantomData,
        }
    }

    /// Sign this token into a session cookie that expires with it.
    pub fn into_cookie(self, config: &Config) -> Result<Cookie<'static>, Error> {
        let issued_at = Utc::now();
        let session = Session {
            token: self,
            issued_at,
            expire_at: issued_at + config.auth_ttl(),
        };
        let jwt = jsonwebtoken::encode(
            &Header::default(),
            &session,
            &EncodingKey::from_secret(config.jwt_secret()),
        )?;

        Ok(Cookie::build(AUTH_TOKEN_COOKIE, jwt)
            .max_age(Duration::seconds(config.auth_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish())
    }

    /// Verify the cookie's signature and expiry and recover the token.
    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, Error> {
        let session = jsonwebtoken::decode::<Session<U>>(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )?;
        Ok(session.claims.token)
    }
}

/// JWT claims: the token plus its validity window.
#[derive(Serialize, Deserialize)]
struct Session<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "iat", with = "ts_seconds")]
    issued_at: DateTime<Utc>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Accept the cookie only if it carries this user type's rights and its
    /// holder still belongs to the election. Anything else forwards, so an
    /// unauthorised request falls through to a 404.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let cookie = try_outcome!(req.cookies().get(AUTH_TOKEN_COOKIE).or_forward(()));
        let token = try_outcome!(Self::from_cookie(cookie, config).ok().or_forward(()));
        if token.rights != U::RIGHTS {
            return Outcome::Forward(());
        }

        match token.rights {
            // The admin address may have been changed in config since login.
            Rights::Admin if config.is_admin_email(&token.id) => Outcome::Success(token),
            Rights::Admin => Outcome::Forward(()),
            // The roster may have been replaced by a reset since login.
            Rights::Voter => {
                // Unwrap is safe as the controller is always managed.
                let controller = req.guard::<&State<ElectionController>>().await.unwrap();
                match controller.roster().knows_voter(&token.id) {
                    Ok(true) => Outcome::Success(token),
                    Ok(false) => Outcome::Forward(()),
                    Err(e) => Outcome::Failure((Status::InternalServerError, e.into())),
                }
            }
        }
    }
}
