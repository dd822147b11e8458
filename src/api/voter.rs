use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::{
    election::{CastReceipt, ElectionController},
    error::Result,
    model::{
        auth::{AuthToken, Voter},
        ballot::{BallotView, CandidateId},
    },
};

pub fn routes() -> Vec<Route> {
    routes![get_ballot, cast_ballot]
}

/// A voter's selection, as submitted from the ballot form.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BallotSubmission {
    pub choices: Vec<CandidateId>,
}

/// The logged-in voter's current ballot, for pre-populating the form.
#[get("/voter/ballot")]
async fn get_ballot(
    token: AuthToken<Voter>,
    controller: &State<ElectionController>,
) -> Result<Json<BallotView>> {
    Ok(Json(controller.ballot_of(&token.id)?))
}

#[put("/voter/ballot", data = "<submission>", format = "json")]
async fn cast_ballot(
    token: AuthToken<Voter>,
    submission: Json<BallotSubmission>,
    controller: &State<ElectionController>,
) -> Result<Json<CastReceipt>> {
    let receipt = controller
        .cast_vote(&token.id, submission.into_inner().choices)
        .await?;
    Ok(Json(receipt))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::{json, Value},
    };

    use super::*;
    use crate::model::{
        election::ElectionStatus,
        ledger::Ledger,
        roster::examples::{ANA, BOB},
    };
    use crate::sync::{MemoryStore, RemoteError};

    async fn cast<'c>(client: &'c Client, choices: &[&str]) -> LocalResponse<'c> {
        client
            .put(uri!(cast_ballot))
            .header(ContentType::JSON)
            .body(json!({ "choices": choices }).to_string())
            .dispatch()
            .await
    }

    #[backend_test(voter)]
    async fn recast_replaces_the_ballot(client: Client, ledger: Ledger) {
        let response = client.get(uri!(get_ballot)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let view: BallotView = response.into_json().await.unwrap();
        assert!(!view.has_voted());

        assert_eq!(Status::Ok, cast(&client, &[ANA]).await.status());
        assert_eq!(Status::Ok, cast(&client, &[BOB]).await.status());

        let view: BallotView = client
            .get(uri!(get_ballot))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(view.voter_id, "a@x.org");
        assert_eq!(view.choices, vec![BOB.to_string()]);
        assert_eq!(ledger.ballot_count().unwrap(), 1);
    }

    #[backend_test(voter)]
    async fn too_many_selections_are_unprocessable(client: Client, ledger: Ledger) {
        let response = cast(&client, &[ANA, BOB]).await;
        assert_eq!(Status::UnprocessableEntity, response.status());
        assert_eq!(ledger.ballot_count().unwrap(), 0);
    }

    #[backend_test(voter)]
    async fn closed_election_is_forbidden(client: Client, ledger: Ledger) {
        ledger.set_status(ElectionStatus::Closed).unwrap();
        let response = cast(&client, &[ANA]).await;
        assert_eq!(Status::Forbidden, response.status());
        assert_eq!(ledger.ballot_count().unwrap(), 0);
    }

    #[backend_test(voter)]
    async fn sync_failure_is_reported_softly(client: Client, store: MemoryStore) {
        store.fail_with(Some(RemoteError::Transient("offline".to_string())));
        let response = cast(&client, &[ANA]).await;
        assert_eq!(Status::Ok, response.status());
        let receipt: Value = response.into_json().await.unwrap();
        assert!(receipt["sync_warning"].is_string());
        assert_eq!(receipt["ballot"]["choices"], json!([ANA]));
    }

    #[backend_test]
    async fn anonymous_users_cannot_vote(client: Client) {
        let response = cast(&client, &[ANA]).await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn admins_cannot_vote(client: Client) {
        let response = client.get(uri!(get_ballot)).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }
}
