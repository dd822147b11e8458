use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};
use serde::Serialize;

use crate::{
    config::Config,
    election::ElectionController,
    error::{Error, Result},
    model::{
        auth::{Admin, AdminCredentials, AuthToken, Voter, VoterCredentials, AUTH_TOKEN_COOKIE},
        roster::normalize_voter_id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![authenticate_voter, authenticate_admin, logout]
}

/// Who is now logged in.
#[derive(Debug, Serialize)]
pub struct Session {
    pub id: String,
    pub name: String,
}

#[post("/auth/voter", data = "<credentials>", format = "json")]
pub async fn authenticate_voter(
    cookies: &CookieJar<'_>,
    credentials: Json<VoterCredentials>,
    controller: &State<ElectionController>,
    config: &State<Config>,
) -> Result<Json<Session>> {
    let id = normalize_voter_id(&credentials.email);
    let name = controller
        .roster()
        .is_valid_voter(&id, &credentials.secret)?
        .ok_or_else(|| {
            Error::Status(
                Status::Unauthorized,
                "No voter found with the provided email and secret combination.".to_string(),
            )
        })?;

    let token = AuthToken::<Voter>::new(&id, &name);
    info!("{id} logged in as {}", token.rights);
    cookies.add(token.into_cookie(config)?);

    Ok(Json(Session { id, name }))
}

#[post("/auth/admin", data = "<credentials>", format = "json")]
pub async fn authenticate_admin(
    cookies: &CookieJar<'_>,
    credentials: Json<AdminCredentials>,
    config: &State<Config>,
) -> Result<Json<Session>> {
    if !config.is_admin_email(&credentials.email) {
        return Err(Error::Status(
            Status::Unauthorized,
            "That email does not belong to the administrator.".to_string(),
        ));
    }
    if !config.is_admin(&credentials.email, &credentials.password) {
        return Err(Error::Status(
            Status::Unauthorized,
            "Incorrect administrator password.".to_string(),
        ));
    }

    let id = config.admin_email().to_string();
    let token = AuthToken::<Admin>::new(&id, "Administrator");
    info!("{id} logged in as {}", token.rights);
    cookies.add(token.into_cookie(config)?);

    Ok(Json(Session {
        id,
        name: "Administrator".to_string(),
    }))
}

#[delete("/auth")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{json, Value},
    };

    use super::*;

    #[backend_test]
    async fn voter_login_normalises_email(client: Client) {
        let response = client
            .post(uri!(authenticate_voter))
            .header(ContentType::JSON)
            .body(json!(VoterCredentials::example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let session: Value = response.into_json().await.unwrap();
        assert_eq!(session["id"], "a@x.org");
        assert_eq!(session["name"], "Alice Example");
    }

    #[backend_test]
    async fn voter_login_rejects_wrong_secret(client: Client) {
        let mut credentials = VoterCredentials::example();
        credentials.secret = "43".into();
        let response = client
            .post(uri!(authenticate_voter))
            .header(ContentType::JSON)
            .body(json!(credentials).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_none());
    }

    #[backend_test]
    async fn admin_login_distinguishes_wrong_password(client: Client) {
        let mut credentials = AdminCredentials::example();
        credentials.password = "guess".into();
        let response = client
            .post(uri!(authenticate_admin))
            .header(ContentType::JSON)
            .body(json!(credentials).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
        let message = response.into_string().await.unwrap();
        assert!(message.contains("password"));

        let response = client
            .post(uri!(authenticate_admin))
            .header(ContentType::JSON)
            .body(json!(AdminCredentials::example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test(voter)]
    async fn logout_drops_the_session(client: Client) {
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());
        let response = client.delete(uri!(logout)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_none());
    }
}
