#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use config::{ConfigFairing, LedgerFairing, SyncFairing};
use logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod election;
pub mod error;
pub mod logging;
pub mod model;
pub mod sync;

pub use config::Config;

/// The server as configured by `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build(), SyncFairing::from_config())
}

/// Mount the API and attach the fairings. Ignition runs them in attach order:
/// config, then the ledger, then sync (which needs both).
fn assemble(rocket: Rocket<Build>, sync: SyncFairing) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(LedgerFairing)
        .attach(sync)
}

/// A fresh directory for one test's ledger, backups and roster.
#[cfg(test)]
pub(crate) fn test_dir() -> std::path::PathBuf {
    let random: u32 = rand::random();
    std::env::temp_dir().join(format!("ballot-ledger-test{random}"))
}

/// A server whose every file lives under `dir`, replicating into `store`.
#[cfg(test)]
pub(crate) fn rocket_for_test(dir: &std::path::Path, store: sync::MemoryStore) -> Rocket<Build> {
    use std::sync::Arc;

    use crate::model::roster::{examples, CsvRoster, Roster, RosterUpdate};

    CsvRoster::new(dir)
        .replace(&RosterUpdate {
            voters_csv: examples::VOTERS_CSV.to_string(),
            candidates_csv: examples::CANDIDATES_CSV.to_string(),
        })
        .unwrap();

    let figment = rocket::Config::figment()
        .merge(("ledger_path", dir.join("ballots.db")))
        .merge(("backup_dir", dir.join("backups")))
        .merge(("roster_dir", dir))
        .merge(("jwt_secret", "test-jwt-secret"))
        .merge(("auth_ttl", 600))
        .merge(("admin_email", "Admin@x.org"))
        .merge(("admin_password", "letmein-admin"))
        .merge(("default_title", "Test election"))
        .merge(("default_max_selections", 1))
        .merge(("s3_key", "ballots.db"))
        .merge(("sync_interval", 900));

    assemble(
        rocket::custom(figment),
        SyncFairing::with_remote(Arc::new(store)),
    )
}
