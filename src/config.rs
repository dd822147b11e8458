use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::election::{ElectionController, SnapshotArchiver};
use crate::model::{election::ElectionDefaults, ledger::Ledger, roster::CsvRoster};
use crate::sync::{RemoteStore, S3Store, SyncClient, SyncPolicy};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    admin_email: String,
    #[serde(default = "default_title")]
    default_title: String,
    #[serde(default = "default_max_selections")]
    default_max_selections: u32,
    // secrets
    jwt_secret: String,
    admin_password: String,
}

fn default_title() -> String {
    ElectionDefaults::default().title
}

fn default_max_selections() -> u32 {
    ElectionDefaults::default().max_selections
}

impl Config {
    /// Valid lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to sign JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Does this pair identify the administrator?
    pub fn is_admin(&self, email: &str, password: &str) -> bool {
        self.is_admin_email(email) && password == self.admin_password
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        email.trim().eq_ignore_ascii_case(self.admin_email.trim())
    }

    pub fn admin_email(&self) -> &str {
        &self.admin_email
    }

    /// Settings written into a brand new ledger.
    pub fn election_defaults(&self) -> ElectionDefaults {
        ElectionDefaults {
            title: self.default_title.clone(),
            max_selections: self.default_max_selections.max(1),
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Where the ledger, its backups and the roster live.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_roster_dir")]
    pub roster_dir: PathBuf,
    // secrets, used only when the matching roster file is absent
    #[serde(default)]
    pub voters_csv: Option<String>,
    #[serde(default)]
    pub candidates_csv: Option<String>,
}

fn default_ledger_path() -> PathBuf {
    "ballots.db".into()
}

fn default_backup_dir() -> PathBuf {
    "backups".into()
}

fn default_roster_dir() -> PathBuf {
    ".".into()
}

impl LedgerConfig {
    pub fn roster(&self) -> CsvRoster {
        CsvRoster::new(&self.roster_dir)
            .with_inline(self.voters_csv.clone(), self.candidates_csv.clone())
    }

    pub fn archiver(&self) -> SnapshotArchiver {
        SnapshotArchiver::new(&self.backup_dir)
    }
}

/// A fairing that opens the ledger file, creating and seeding it if needed,
/// and places the `Ledger` and its `LedgerConfig` into managed state.
/// Must be attached after [`ConfigFairing`].
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<LedgerConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load ledger config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let defaults = match rocket.state::<Config>() {
            Some(app) => app.election_defaults(),
            None => {
                error!("Ledger fairing attached before the config fairing");
                return Err(rocket);
            }
        };

        // Open the ledger.
        let ledger = match Ledger::open(&config.ledger_path, defaults) {
            Ok(ledger) => ledger,
            Err(e) => {
                error!("Failed to open ledger {}: {e}", config.ledger_path.display());
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(ledger).manage(config);
        Ok(rocket)
    }
}

/// Configuration for replication to S3.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "enabled")]
    pub sync_enabled: bool,
    #[serde(default)]
    pub aws_region: String,
    #[serde(default)]
    pub aws_access_key_id: String,
    #[serde(default)]
    pub aws_endpoint_url: Option<String>,
    #[serde(default)]
    pub s3_bucket: String,
    #[serde(default = "default_s3_key")]
    pub s3_key: String,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u32,
    #[serde(default = "enabled")]
    pub push_requires_ballots: bool,
    // secrets
    #[serde(default)]
    pub aws_secret_access_key: String,
}

fn enabled() -> bool {
    true
}

fn default_s3_key() -> String {
    "ballots.db".to_string()
}

fn default_sync_interval() -> u32 {
    15 * 60
}

impl SyncConfig {
    /// Minimum time between two opportunistic pushes.
    pub fn sync_interval(&self) -> Duration {
        Duration::seconds(self.sync_interval.into())
    }

    /// Is there enough here to reach a bucket?
    pub fn is_complete(&self) -> bool {
        self.sync_enabled && !self.s3_bucket.is_empty() && !self.aws_region.is_empty()
    }
}

/// A fairing that connects the ledger to its remote copy, runs the startup
/// reconciliation, and places the `ElectionController` into managed state.
/// Must be attached after [`LedgerFairing`].
pub struct SyncFairing {
    remote: Option<Arc<dyn RemoteStore>>,
}

impl SyncFairing {
    /// Build the remote store from `SyncConfig` at ignition.
    pub fn from_config() -> Self {
        Self { remote: None }
    }

    /// Use the given store instead of whatever the config describes.
    pub fn with_remote(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote: Some(remote),
        }
    }
}

#[rocket::async_trait]
impl Fairing for SyncFairing {
    fn info(&self) -> Info {
        Info {
            name: "Remote sync",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<SyncConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load sync config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let (ledger, ledger_config) = match (rocket.state::<Ledger>(), rocket.state::<LedgerConfig>()) {
            (Some(ledger), Some(ledger_config)) => (ledger.clone(), ledger_config.clone()),
            _ => {
                error!("Sync fairing attached before the ledger fairing");
                return Err(rocket);
            }
        };

        // Construct the client.
        let remote = match &self.remote {
            Some(remote) => Some(remote.clone()),
            None if config.is_complete() => {
                let store: Arc<dyn RemoteStore> = Arc::new(S3Store::from_config(&config));
                info!("Loaded S3 config for {}", store.describe(&config.s3_key));
                Some(store)
            }
            None => {
                warn!("Remote sync is not configured, the ledger lives on this machine only");
                None
            }
        };
        let sync = match remote {
            Some(remote) => SyncClient::new(ledger.clone(), remote, &config.s3_key, SyncPolicy::from(&config)),
            None => SyncClient::disabled(ledger.clone()),
        };

        // A failed reconciliation is reported but never stops the server.
        let outcome = sync.reconcile_on_startup().await;
        if let Some(warning) = outcome.warning() {
            warn!("Startup reconciliation: {warning}");
        }

        // Manage the state.
        let controller = ElectionController::new(
            ledger,
            Arc::new(ledger_config.roster()),
            ledger_config.archiver(),
            Arc::new(sync),
        );
        rocket = rocket.manage(controller).manage(config);
        Ok(rocket)
    }
}
