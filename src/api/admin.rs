use rocket::{
    http::{ContentType, Header},
    serde::json::Json,
    Responder, Route, State,
};

use crate::{
    election::{ElectionController, ElectionOverview, Transition},
    error::Result,
    model::{
        auth::{Admin, AuthToken},
        election::NewElection,
        tally::Tally,
    },
    sync::SyncReport,
};

pub fn routes() -> Vec<Route> {
    routes![
        get_election,
        close_election,
        reopen_election,
        reset_election,
        get_results,
        export_ballots,
        download_snapshot,
        download_ledger,
        push_ledger,
        resume_sync,
    ]
}

/// A file handed to the browser as an attachment.
#[derive(Responder)]
pub struct Download {
    body: Vec<u8>,
    content_type: ContentType,
    disposition: Header<'static>,
}

impl Download {
    fn new(body: Vec<u8>, content_type: ContentType, file_name: &str) -> Self {
        Self {
            body,
            content_type,
            disposition: Header::new(
                "Content-Disposition",
                format!("attachment; filename=\"{file_name}\""),
            ),
        }
    }
}

#[get("/admin/election")]
async fn get_election(
    _token: AuthToken<Admin>,
    controller: &State<ElectionController>,
) -> Result<Json<ElectionOverview>> {
    Ok(Json(controller.overview()?))
}

#[post("/admin/election/close")]
async fn close_election(
    _token: AuthToken<Admin>,
    controller: &State<ElectionController>,
) -> Result<Json<Transition>> {
    Ok(Json(controller.close().await?))
}

#[post("/admin/election/reopen")]
async fn reopen_election(
    _token: AuthToken<Admin>,
    controller: &State<ElectionController>,
) -> Result<Json<Transition>> {
    Ok(Json(controller.reopen().await?))
}

#[post("/admin/election/reset", data = "<next>", format = "json")]
async fn reset_election(
    _token: AuthToken<Admin>,
    next: Json<NewElection>,
    controller: &State<ElectionController>,
) -> Result<Json<Transition>> {
    Ok(Json(controller.reset(next.into_inner()).await?))
}

#[get("/admin/results")]
async fn get_results(
    _token: AuthToken<Admin>,
    controller: &State<ElectionController>,
) -> Result<Json<Tally>> {
    Ok(Json(controller.tally()?))
}

#[get("/admin/export")]
async fn export_ballots(
    _token: AuthToken<Admin>,
    controller: &State<ElectionController>,
) -> Result<Download> {
    let (table, _) = controller.export()?;
    let file_name = format!("ballots_{}.csv", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
    Ok(Download::new(table, ContentType::CSV, &file_name))
}

#[get("/admin/snapshots/<stem>")]
async fn download_snapshot(
    _token: AuthToken<Admin>,
    stem: &str,
    controller: &State<ElectionController>,
) -> Result<Download> {
    let table = controller.snapshot_export(stem)?;
    Ok(Download::new(table, ContentType::CSV, &format!("{stem}.csv")))
}

#[get("/admin/ledger")]
async fn download_ledger(
    _token: AuthToken<Admin>,
    controller: &State<ElectionController>,
) -> Result<Download> {
    let bytes = controller.ledger_bytes()?;
    let file_name = controller
        .ledger()
        .path()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ballots.db".to_string());
    Ok(Download::new(bytes, ContentType::Binary, &file_name))
}

#[post("/admin/sync/push")]
async fn push_ledger(
    _token: AuthToken<Admin>,
    controller: &State<ElectionController>,
) -> Json<SyncReport> {
    Json(controller.push_now().await)
}

/// Clear an earlier credential failure and try again straight away.
#[post("/admin/sync/resume")]
async fn resume_sync(
    _token: AuthToken<Admin>,
    controller: &State<ElectionController>,
) -> Json<SyncReport> {
    controller.sync().resume();
    Json(controller.push_now().await)
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{json, Value},
    };

    use super::*;
    use crate::model::{
        election::ElectionStatus,
        ledger::Ledger,
        roster::examples::{ANA, BOB},
    };
    use crate::sync::{MemoryStore, RemoteError};

    fn seed_ballots(ledger: &Ledger) {
        ledger.upsert_ballot("a@x.org", &[ANA.into()]).unwrap();
        ledger.upsert_ballot("b@x.org", &[BOB.into()]).unwrap();
        ledger.upsert_ballot("c@x.org", &[BOB.into()]).unwrap();
    }

    #[backend_test(admin)]
    async fn close_then_reopen(client: Client, ledger: Ledger, store: MemoryStore) {
        let response = client.post(uri!(close_election)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let transition: Value = response.into_json().await.unwrap();
        assert_eq!(transition["settings"]["status"], "CLOSED");
        assert_eq!(transition["sync"]["outcome"], "pushed");
        assert_eq!(ledger.status().unwrap(), ElectionStatus::Closed);
        assert!(store.object("ballots.db").is_some());

        let response = client.post(uri!(close_election)).dispatch().await;
        assert_eq!(Status::Conflict, response.status());

        let response = client.post(uri!(reopen_election)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(ledger.status().unwrap(), ElectionStatus::Open);
    }

    #[backend_test(admin)]
    async fn reset_starts_a_fresh_election(client: Client, ledger: Ledger) {
        seed_ballots(&ledger);

        let response = client
            .post(uri!(reset_election))
            .header(ContentType::JSON)
            .body(json!({ "title": "Runoff", "max_selections": 2 }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let transition: Value = response.into_json().await.unwrap();
        assert_eq!(transition["settings"]["title"], "Runoff");
        assert_eq!(transition["settings"]["status"], "OPEN");
        assert!(transition["snapshot"]["export_path"].is_string());
        assert_eq!(ledger.ballot_count().unwrap(), 0);
        assert_eq!(ledger.max_selections().unwrap(), 2);

        let overview: Value = client
            .get(uri!(get_election))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(overview["snapshots"].as_array().unwrap().len(), 1);
        assert_eq!(overview["ballots"], 0);
    }

    #[backend_test(admin)]
    async fn archived_snapshots_can_be_downloaded(client: Client, ledger: Ledger) {
        seed_ballots(&ledger);
        let transition: Value = client
            .post(uri!(reset_election))
            .header(ContentType::JSON)
            .body(json!({}).to_string())
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        let export_path = transition["snapshot"]["export_path"].as_str().unwrap();
        let stem = std::path::Path::new(export_path)
            .file_stem()
            .unwrap()
            .to_string_lossy()
            .into_owned();

        let response = client
            .get(uri!(download_snapshot(stem = stem.as_str())))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(response.content_type(), Some(ContentType::CSV));
        let table = response.into_string().await.unwrap();
        assert!(table.lines().last().unwrap().starts_with("TOTAL,"));
        assert_eq!(table.lines().count(), 5);

        let response = client
            .get(uri!(download_snapshot(stem = "backup_ballots_19990101_000000")))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn bad_reset_is_rejected(client: Client, ledger: Ledger) {
        seed_ballots(&ledger);

        let response = client
            .post(uri!(reset_election))
            .header(ContentType::JSON)
            .body(json!({ "max_selections": 0 }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::UnprocessableEntity, response.status());
        assert_eq!(ledger.ballot_count().unwrap(), 3);
    }

    #[backend_test(admin)]
    async fn results_rank_candidates(client: Client, ledger: Ledger) {
        seed_ballots(&ledger);

        let response = client.get(uri!(get_results)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let tally: Tally = response.into_json().await.unwrap();
        assert_eq!(tally.voters, 3);
        assert_eq!(tally.ranking[0].candidate, BOB);
        assert_eq!(tally.votes_for(BOB), 2);
        assert_eq!(tally.votes_for(ANA), 1);
    }

    #[backend_test(admin)]
    async fn downloads_are_attachments(client: Client, ledger: Ledger) {
        seed_ballots(&ledger);

        let response = client.get(uri!(export_ballots)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(response.content_type(), Some(ContentType::CSV));
        let disposition = response.headers().get_one("Content-Disposition").unwrap();
        assert!(disposition.starts_with("attachment"));
        let table = response.into_string().await.unwrap();
        // Columns follow the catalogue order: Bob, then Ana.
        assert_eq!(table.lines().last().unwrap(), "TOTAL,,2,1,3");

        let response = client.get(uri!(download_ledger)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let bytes = response.into_bytes().await.unwrap();
        assert!(bytes.starts_with(b"SQLite format 3"));
    }

    #[backend_test(admin)]
    async fn resume_after_expired_credentials(client: Client, ledger: Ledger, store: MemoryStore) {
        seed_ballots(&ledger);
        store.fail_with(Some(RemoteError::AuthExpired("ExpiredToken".to_string())));

        let report: Value = client
            .post(uri!(push_ledger))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(report["outcome"], "failed");

        store.fail_with(None);
        let report: Value = client
            .post(uri!(push_ledger))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(report["outcome"], "auth_expired");

        let report: Value = client
            .post(uri!(resume_sync))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(report["outcome"], "pushed");
    }

    #[backend_test(voter)]
    async fn voters_cannot_administer(client: Client, ledger: Ledger) {
        let response = client.post(uri!(close_election)).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
        assert_eq!(ledger.status().unwrap(), ElectionStatus::Open);
    }
}
