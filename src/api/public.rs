use rocket::{serde::json::Json, Route, State};
use serde::Serialize;

use crate::{
    election::ElectionController,
    error::Result,
    model::{ballot::CandidateId, election::ElectionStatus},
};

pub fn routes() -> Vec<Route> {
    routes![election, candidates]
}

/// What anyone may know about the current election.
#[derive(Debug, Serialize)]
pub struct ElectionInfo {
    pub title: String,
    pub status: ElectionStatus,
    pub max_selections: u32,
}

#[get("/election")]
async fn election(controller: &State<ElectionController>) -> Result<Json<ElectionInfo>> {
    let settings = controller.settings()?;
    Ok(Json(ElectionInfo {
        title: settings.title,
        status: settings.status,
        max_selections: settings.max_selections,
    }))
}

#[get("/candidates")]
async fn candidates(controller: &State<ElectionController>) -> Result<Json<Vec<CandidateId>>> {
    Ok(Json(controller.candidates()?))
}
