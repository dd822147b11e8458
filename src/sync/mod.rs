//! Replication of the ledger file to a remote object store.
//!
//! Sync is best-effort. Every operation returns a [`SyncOutcome`] instead of
//! an error, so the caller decides whether to surface it; nothing here ever
//! aborts a vote or an admin action.

#[cfg(test)]
mod memory;
mod remote;
mod s3;

#[cfg(test)]
pub use memory::MemoryStore;
pub use remote::{RemoteError, RemoteMetadata, RemoteStore};
pub use s3::S3Store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::SyncConfig;
use crate::model::ledger::{Ledger, StorageError};

/// Tunable knobs of the periodic push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Minimum time between two opportunistic pushes.
    pub interval: Duration,
    /// Skip opportunistic pushes while the ledger holds no ballots.
    pub require_ballots: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::minutes(15),
            require_ballots: true,
        }
    }
}

impl From<&SyncConfig> for SyncPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: config.sync_interval(),
            require_ballots: config.push_requires_ballots,
        }
    }
}

/// Why a sync operation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No remote store is configured.
    Disabled,
    /// Credentials were rejected earlier and nobody has resumed sync since.
    AuthExpired,
    /// Nothing worth pushing yet.
    EmptyLedger,
    /// The last push was too recent.
    Throttled { next_due: DateTime<Utc> },
}

#[derive(Debug, Error)]
pub enum SyncFailure {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The soft result of a sync operation.
#[derive(Debug)]
pub enum SyncOutcome {
    Pushed { at: DateTime<Utc> },
    Pulled { remote_modified: DateTime<Utc> },
    UpToDate,
    Skipped(SkipReason),
    Failed(SyncFailure),
}

impl SyncOutcome {
    pub fn is_pushed(&self) -> bool {
        matches!(self, Self::Pushed { .. })
    }

    pub fn is_pulled(&self) -> bool {
        matches!(self, Self::Pulled { .. })
    }

    /// A message for the operator if this outcome deserves one.
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Failed(failure) => Some(format!("Remote sync failed: {failure}")),
            Self::Skipped(SkipReason::AuthExpired) => Some(
                "Remote sync is paused until the storage credentials are refreshed".to_string(),
            ),
            _ => None,
        }
    }

    pub fn report(&self) -> SyncReport {
        let (outcome, at) = match self {
            Self::Pushed { at } => ("pushed", Some(*at)),
            Self::Pulled { remote_modified } => ("pulled", Some(*remote_modified)),
            Self::UpToDate => ("up_to_date", None),
            Self::Skipped(SkipReason::Throttled { next_due }) => ("throttled", Some(*next_due)),
            Self::Skipped(SkipReason::Disabled) => ("disabled", None),
            Self::Skipped(SkipReason::AuthExpired) => ("auth_expired", None),
            Self::Skipped(SkipReason::EmptyLedger) => ("empty_ledger", None),
            Self::Failed(_) => ("failed", None),
        };
        SyncReport {
            outcome,
            at,
            warning: self.warning(),
        }
    }
}

/// Serialisable summary of a [`SyncOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub outcome: &'static str,
    pub at: Option<DateTime<Utc>>,
    pub warning: Option<String>,
}

/// Keeps one serialised copy of the ledger at a fixed path in the remote store.
pub struct SyncClient {
    ledger: Ledger,
    remote: Option<Arc<dyn RemoteStore>>,
    path: String,
    policy: SyncPolicy,
    auth_expired: AtomicBool,
}

impl SyncClient {
    pub fn new(
        ledger: Ledger,
        remote: Arc<dyn RemoteStore>,
        path: impl Into<String>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            ledger,
            remote: Some(remote),
            path: path.into(),
            policy,
            auth_expired: AtomicBool::new(false),
        }
    }

    /// A client that skips every operation.
    pub fn disabled(ledger: Ledger) -> Self {
        Self {
            ledger,
            remote: None,
            path: String::new(),
            policy: SyncPolicy::default(),
            auth_expired: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub fn is_auth_expired(&self) -> bool {
        self.auth_expired.load(Ordering::SeqCst)
    }

    /// Where the remote copy lives, if anywhere.
    pub fn location(&self) -> Option<String> {
        self.remote.as_ref().map(|remote| remote.describe(&self.path))
    }

    /// Re-enable sync after the operator has refreshed the credentials.
    pub fn resume(&self) {
        if self.auth_expired.swap(false, Ordering::SeqCst) {
            info!("Remote sync resumed");
        }
    }

    /// Upload the whole ledger, overwriting the remote copy.
    pub async fn push(&self) -> SyncOutcome {
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(skipped) => return skipped,
        };
        let bytes = match self.ledger.export_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return self.failure("push", e.into()),
        };
        let size = bytes.len();
        if let Err(e) = remote.put(&self.path, bytes).await {
            return self.failure("push", e.into());
        }

        let at = Utc::now();
        if let Err(e) = self.ledger.set_last_remote_sync_at(at) {
            return self.failure("push", e.into());
        }
        info!("Pushed ledger ({size} bytes) to {}", remote.describe(&self.path));
        SyncOutcome::Pushed { at }
    }

    /// Replace the local ledger with the remote copy, if there is one.
    pub async fn pull(&self) -> SyncOutcome {
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(skipped) => return skipped,
        };
        match remote.metadata(&self.path).await {
            Ok(metadata) => self.adopt(remote, metadata.last_modified).await,
            Err(RemoteError::NotFound) => {
                info!("No remote ledger at {}, nothing to pull", remote.describe(&self.path));
                SyncOutcome::UpToDate
            }
            Err(e) => self.failure("pull", e.into()),
        }
    }

    /// Decide, once per process start, whether the remote copy should replace
    /// the local one.
    pub async fn reconcile_on_startup(&self) -> SyncOutcome {
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(skipped) => return skipped,
        };
        let ballots = match self.ledger.ballot_count() {
            Ok(count) => count,
            Err(e) => return self.failure("reconcile", e.into()),
        };
        if ballots == 0 {
            info!("Local ledger holds no ballots, pulling remote copy");
            return self.pull().await;
        }

        let remote_modified = match remote.metadata(&self.path).await {
            Ok(metadata) => metadata.last_modified,
            Err(RemoteError::NotFound) => {
                info!("No remote ledger yet, keeping local ledger ({ballots} ballots)");
                return SyncOutcome::UpToDate;
            }
            Err(e) => return self.failure("reconcile", e.into()),
        };
        let local_synced = match self.ledger.last_remote_sync_at() {
            Ok(at) => at,
            Err(e) => return self.failure("reconcile", e.into()),
        };

        match local_synced {
            None => {
                info!("Local ledger was never synced, adopting remote copy from {remote_modified}");
                self.adopt(remote, remote_modified).await
            }
            Some(synced) if remote_modified > synced => {
                info!("Remote ledger ({remote_modified}) is newer than our last sync ({synced}), adopting it");
                self.adopt(remote, remote_modified).await
            }
            Some(synced) => {
                info!("Local ledger (synced {synced}) is current, keeping it");
                SyncOutcome::UpToDate
            }
        }
    }

    /// Push if enough time has passed since the last successful push.
    /// Called after every ballot write.
    pub async fn maybe_periodic_push(&self) -> SyncOutcome {
        if let Err(skipped) = self.remote() {
            return skipped;
        }
        if self.policy.require_ballots {
            match self.ledger.ballot_count() {
                Ok(0) => return SyncOutcome::Skipped(SkipReason::EmptyLedger),
                Ok(_) => {}
                Err(e) => return self.failure("push", e.into()),
            }
        }
        match self.ledger.last_remote_sync_at() {
            Ok(Some(synced)) => {
                let next_due = synced + self.policy.interval;
                if Utc::now() < next_due {
                    return SyncOutcome::Skipped(SkipReason::Throttled { next_due });
                }
            }
            Ok(None) => {}
            Err(e) => return self.failure("push", e.into()),
        }
        self.push().await
    }

    async fn adopt(&self, remote: &dyn RemoteStore, remote_modified: DateTime<Utc>) -> SyncOutcome {
        let bytes = match remote.get(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => return self.failure("pull", e.into()),
        };
        if let Err(e) = self
            .ledger
            .restore_from_bytes(&bytes)
            .and_then(|()| self.ledger.set_last_remote_sync_at(remote_modified))
        {
            return self.failure("pull", e.into());
        }
        info!("Pulled ledger ({} bytes) from {}", bytes.len(), remote.describe(&self.path));
        SyncOutcome::Pulled { remote_modified }
    }

    fn remote(&self) -> Result<&dyn RemoteStore, SyncOutcome> {
        let remote = self
            .remote
            .as_deref()
            .ok_or(SyncOutcome::Skipped(SkipReason::Disabled))?;
        if self.is_auth_expired() {
            return Err(SyncOutcome::Skipped(SkipReason::AuthExpired));
        }
        Ok(remote)
    }

    fn failure(&self, operation: &str, failure: SyncFailure) -> SyncOutcome {
        match &failure {
            SyncFailure::Remote(RemoteError::AuthExpired(_)) => {
                self.auth_expired.store(true, Ordering::SeqCst);
                error!("Remote {operation} failed: {failure}");
                error!("Remote sync disabled until credentials are refreshed");
            }
            SyncFailure::Remote(_) => warn!("Remote {operation} failed: {failure}"),
            SyncFailure::Storage(_) => error!("Remote {operation} aborted by local storage failure: {failure}"),
        }
        SyncOutcome::Failed(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::election::ElectionDefaults;

    const KEY: &str = "ballots.db";

    fn client(ledger: &Ledger, store: &MemoryStore) -> SyncClient {
        SyncClient::new(
            ledger.clone(),
            Arc::new(store.clone()),
            KEY,
            SyncPolicy::default(),
        )
    }

    /// A second ledger next to `ledger`, standing in for another machine's copy.
    fn other_ledger(ledger: &Ledger) -> Ledger {
        Ledger::open(ledger.path().with_file_name("other.db"), ElectionDefaults::default()).unwrap()
    }

    #[backend_test]
    async fn push_uploads_and_records_sync_time(ledger: Ledger, store: MemoryStore) {
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();
        let before = Utc::now();

        let outcome = client(&ledger, &store).push().await;

        assert!(outcome.is_pushed());
        assert!(store.object(KEY).is_some());
        let synced = ledger.last_remote_sync_at().unwrap().unwrap();
        assert!(synced >= before);
    }

    #[backend_test]
    async fn periodic_push_respects_interval(ledger: Ledger, store: MemoryStore) {
        let sync = client(&ledger, &store);
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();

        let recent = Utc::now() - Duration::minutes(5);
        ledger.set_last_remote_sync_at(recent).unwrap();
        let outcome = sync.maybe_periodic_push().await;
        assert!(matches!(outcome, SyncOutcome::Skipped(SkipReason::Throttled { .. })));
        assert_eq!(ledger.last_remote_sync_at().unwrap(), Some(recent));

        let stale = Utc::now() - Duration::minutes(20);
        ledger.set_last_remote_sync_at(stale).unwrap();
        let outcome = sync.maybe_periodic_push().await;
        assert!(outcome.is_pushed());
        assert!(ledger.last_remote_sync_at().unwrap().unwrap() > stale);
    }

    #[backend_test]
    async fn periodic_push_skips_empty_ledger(ledger: Ledger, store: MemoryStore) {
        let puts = store.puts();
        let outcome = client(&ledger, &store).maybe_periodic_push().await;
        assert!(matches!(outcome, SyncOutcome::Skipped(SkipReason::EmptyLedger)));
        assert_eq!(store.puts(), puts);
    }

    #[backend_test]
    async fn first_periodic_push_goes_out_immediately(ledger: Ledger, store: MemoryStore) {
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();
        assert_eq!(ledger.last_remote_sync_at().unwrap(), None);
        assert!(client(&ledger, &store).maybe_periodic_push().await.is_pushed());
    }

    #[backend_test]
    async fn empty_local_ledger_adopts_remote(ledger: Ledger, store: MemoryStore) {
        let other = other_ledger(&ledger);
        other.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();
        other.upsert_ballot("b@x.org", &["Bob".into()]).unwrap();
        other.set_title("Remote title").unwrap();
        let modified = Utc::now() - Duration::hours(1);
        store.seed(KEY, other.export_bytes().unwrap(), modified);

        let outcome = client(&ledger, &store).reconcile_on_startup().await;

        assert!(outcome.is_pulled());
        assert_eq!(ledger.ballots().unwrap(), other.ballots().unwrap());
        assert_eq!(ledger.title().unwrap(), "Remote title");
        assert_eq!(ledger.last_remote_sync_at().unwrap(), Some(modified));
    }

    #[backend_test]
    async fn newer_local_ledger_is_kept(ledger: Ledger, store: MemoryStore) {
        let other = other_ledger(&ledger);
        other.upsert_ballot("b@x.org", &["Bob".into()]).unwrap();
        store.seed(KEY, other.export_bytes().unwrap(), Utc::now() - Duration::hours(2));

        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();
        ledger.set_last_remote_sync_at(Utc::now() - Duration::hours(1)).unwrap();
        let before = ledger.ballots().unwrap();

        let outcome = client(&ledger, &store).reconcile_on_startup().await;

        assert!(matches!(outcome, SyncOutcome::UpToDate));
        assert_eq!(ledger.ballots().unwrap(), before);
    }

    #[backend_test]
    async fn newer_remote_ledger_wins(ledger: Ledger, store: MemoryStore) {
        let other = other_ledger(&ledger);
        other.upsert_ballot("b@x.org", &["Bob".into()]).unwrap();
        let modified = Utc::now() - Duration::minutes(10);
        store.seed(KEY, other.export_bytes().unwrap(), modified);

        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();
        ledger.set_last_remote_sync_at(Utc::now() - Duration::hours(1)).unwrap();

        let outcome = client(&ledger, &store).reconcile_on_startup().await;

        assert!(outcome.is_pulled());
        let ballots = ledger.ballots().unwrap();
        assert_eq!(ballots.len(), 1);
        assert_eq!(ballots[0].voter_id, "b@x.org");
        assert_eq!(ledger.last_remote_sync_at().unwrap(), Some(modified));
    }

    #[backend_test]
    async fn never_synced_local_ledger_defers_to_remote(ledger: Ledger, store: MemoryStore) {
        let other = other_ledger(&ledger);
        other.upsert_ballot("b@x.org", &["Bob".into()]).unwrap();
        store.seed(KEY, other.export_bytes().unwrap(), Utc::now() - Duration::days(3));
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();

        let outcome = client(&ledger, &store).reconcile_on_startup().await;

        assert!(outcome.is_pulled());
        assert!(ledger.get_ballot("a@x.org").unwrap().is_none());
    }

    #[backend_test]
    async fn missing_remote_keeps_local(ledger: Ledger, store: MemoryStore) {
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();

        let outcome = client(&ledger, &store).reconcile_on_startup().await;

        assert!(matches!(outcome, SyncOutcome::UpToDate));
        assert_eq!(ledger.ballot_count().unwrap(), 1);
    }

    #[backend_test]
    async fn unreachable_remote_leaves_local_untouched_at_startup(
        ledger: Ledger,
        store: MemoryStore,
    ) {
        let other = other_ledger(&ledger);
        other.upsert_ballot("b@x.org", &["Bob".into()]).unwrap();
        store.seed(KEY, other.export_bytes().unwrap(), Utc::now());

        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();
        let synced = Utc::now() - Duration::hours(1);
        ledger.set_last_remote_sync_at(synced).unwrap();
        let before = ledger.ballots().unwrap();

        for failure in [
            RemoteError::Transient("connection reset".to_string()),
            RemoteError::AuthExpired("ExpiredToken".to_string()),
        ] {
            store.fail_with(Some(failure));
            let outcome = client(&ledger, &store).reconcile_on_startup().await;

            assert!(matches!(outcome, SyncOutcome::Failed(SyncFailure::Remote(_))));
            assert!(outcome.warning().is_some());
            assert_eq!(ledger.ballots().unwrap(), before);
            assert_eq!(ledger.last_remote_sync_at().unwrap(), Some(synced));
        }
    }

    #[backend_test]
    async fn expired_credentials_pause_sync_until_resumed(ledger: Ledger, store: MemoryStore) {
        let sync = client(&ledger, &store);
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();

        store.fail_with(Some(RemoteError::AuthExpired("ExpiredToken".to_string())));
        let outcome = sync.push().await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed(SyncFailure::Remote(RemoteError::AuthExpired(_)))
        ));
        assert!(sync.is_auth_expired());

        // Even with working credentials again, nothing goes out until resumed.
        store.fail_with(None);
        let outcome = sync.push().await;
        assert!(matches!(outcome, SyncOutcome::Skipped(SkipReason::AuthExpired)));
        assert!(outcome.warning().is_some());

        sync.resume();
        assert!(sync.push().await.is_pushed());
    }

    #[backend_test]
    async fn transient_failures_are_soft(ledger: Ledger, store: MemoryStore) {
        let sync = client(&ledger, &store);
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();

        store.fail_with(Some(RemoteError::Transient("connection reset".to_string())));
        let outcome = sync.push().await;
        assert!(matches!(outcome, SyncOutcome::Failed(SyncFailure::Remote(_))));
        assert!(outcome.warning().is_some());
        assert!(!sync.is_auth_expired());
        assert_eq!(ledger.last_remote_sync_at().unwrap(), None);
        assert_eq!(ledger.ballot_count().unwrap(), 1);

        // The next trigger simply tries again.
        store.fail_with(None);
        assert!(sync.maybe_periodic_push().await.is_pushed());
    }

    #[backend_test]
    async fn disabled_client_skips_everything(ledger: Ledger) {
        let sync = SyncClient::disabled(ledger.clone());
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();
        assert!(matches!(sync.push().await, SyncOutcome::Skipped(SkipReason::Disabled)));
        assert!(matches!(
            sync.reconcile_on_startup().await,
            SyncOutcome::Skipped(SkipReason::Disabled)
        ));
        assert_eq!(sync.push().await.warning(), None);
    }
}
