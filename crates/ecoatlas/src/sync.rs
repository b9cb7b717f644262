//! Flushing the offline queue to the backend.
//!
//! Reports are always written to the local store first. A sync walks the
//! queue and submits each report on its own: an accepted report is deleted
//! locally, a rejected one stays queued for the next manual sync. There is
//! no backoff and no retry limit.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::remote::{is_local_image, ObservationRow, ObservationSink};
use crate::report::PendingReport;
use crate::storage::ReportStore;

/// Whether to try the network right after queueing a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitMode {
    /// Queue, then submit immediately.
    #[default]
    Online,
    /// Queue only; a later sync submits it.
    Offline,
}

/// What happened to a submitted report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The backend accepted the report and the local copy was removed.
    Submitted,
    /// The report is waiting in the local queue.
    Queued {
        /// Local id of the queued report.
        id: i64,
        /// Why it was not submitted, if an attempt was made.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// A report the backend did not accept during a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// Local id of the report, still queued.
    pub id: i64,
    /// Error message.
    pub error: String,
    /// Whether a later attempt could plausibly succeed.
    pub retryable: bool,
}

/// Result of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Reports attempted.
    pub attempted: usize,
    /// Local ids accepted by the backend and removed from the queue.
    pub synced: Vec<i64>,
    /// Reports left in the queue.
    pub failed: Vec<SyncFailure>,
}

impl SyncSummary {
    /// Check if nothing was pending.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.attempted == 0
    }

    /// Check if every attempted report was accepted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Clears the running flag when a sync ends, however it ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pushes queued reports to an [`ObservationSink`].
///
/// At most one sync runs per synchronizer at a time. Two synchronizers over
/// the same queue (for example two processes) can still submit a report
/// twice; the report's idempotency key lets the backend drop the replay.
#[derive(Debug)]
pub struct Synchronizer<S> {
    sink: S,
    user_id: Option<String>,
    idempotency_key: bool,
    running: AtomicBool,
}

impl<S: ObservationSink> Synchronizer<S> {
    /// Create a synchronizer that sends idempotency keys and no user id.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            user_id: None,
            idempotency_key: true,
            running: AtomicBool::new(false),
        }
    }

    /// Record this user as the author of submitted reports.
    #[must_use]
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Enable or disable idempotency keys.
    ///
    /// Without them a report submitted twice is stored twice remotely.
    #[must_use]
    pub fn with_idempotency_key(mut self, enabled: bool) -> Self {
        self.idempotency_key = enabled;
        self
    }

    /// The sink reports are pushed to.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Check if a sync is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queue a report and, in [`SubmitMode::Online`], try to submit it now.
    ///
    /// The report is always written locally first, so a failed or skipped
    /// submission leaves it queued. If a sync is running the report is left
    /// for that sync (or the next one).
    ///
    /// # Errors
    ///
    /// Returns a validation error if the report is incomplete, or a storage
    /// error. Remote failures are reported as [`SubmitOutcome::Queued`].
    pub async fn submit(
        &self,
        store: &ReportStore,
        report: &PendingReport,
        mode: SubmitMode,
    ) -> Result<SubmitOutcome> {
        let id = store.enqueue(report)?;

        if mode == SubmitMode::Offline {
            info!(id, "Report queued for later sync");
            return Ok(SubmitOutcome::Queued { id, reason: None });
        }

        let Some(_guard) = SyncGuard::acquire(&self.running) else {
            debug!(id, "Sync in progress, leaving report queued");
            return Ok(SubmitOutcome::Queued {
                id,
                reason: Some(Error::SyncInProgress.to_string()),
            });
        };

        let mut queued = report.clone();
        queued.id = Some(id);

        match self.push(store, queued).await {
            Ok(()) => {
                store.delete(id)?;
                info!(id, kind = %report.kind, "Report submitted");
                Ok(SubmitOutcome::Submitted)
            }
            Err(e) => {
                warn!(id, error = %e, "Submission failed, report stays queued");
                Ok(SubmitOutcome::Queued {
                    id,
                    reason: Some(e.to_string()),
                })
            }
        }
    }

    /// Submit every queued report, each independently.
    ///
    /// Accepted reports are removed from the store; the others are left
    /// exactly as they were. An empty queue makes no remote calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncInProgress`] if this synchronizer is already
    /// syncing, or a storage error. Remote failures never abort the pass.
    pub async fn sync(&self, store: &ReportStore) -> Result<SyncSummary> {
        let _guard = SyncGuard::acquire(&self.running).ok_or(Error::SyncInProgress)?;

        let pending = store.list_pending()?;
        let mut summary = SyncSummary::default();
        if pending.is_empty() {
            debug!("Nothing to sync");
            return Ok(summary);
        }

        info!(count = pending.len(), "Synchronizing pending reports");
        for report in pending {
            let Some(id) = report.id else {
                continue;
            };
            summary.attempted += 1;

            match self.push(store, report).await {
                Ok(()) => {
                    if !store.delete(id)? {
                        debug!(id, "Report already removed by another sync");
                    }
                    summary.synced.push(id);
                }
                Err(e) => {
                    warn!(id, error = %e, "Report not accepted, keeping it queued");
                    summary.failed.push(SyncFailure {
                        id,
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            synced = summary.synced.len(),
            failed = summary.failed.len(),
            "Sync finished"
        );
        Ok(summary)
    }

    /// Upload a local photo if needed, then insert the report remotely.
    async fn push(&self, store: &ReportStore, mut report: PendingReport) -> Result<()> {
        if is_local_image(&report.image_url) {
            let url = self.sink.upload_photo(Path::new(&report.image_url)).await?;
            if let Some(id) = report.id {
                store.set_image_url(id, &url)?;
            }
            report.image_url = url;
        }

        let row =
            ObservationRow::from_report(&report, self.user_id.as_deref(), self.idempotency_key);
        self.sink.insert_observation(&row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{AlertLevel, GeoPoint};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records inserted rows; rejects descriptions containing "reject".
    #[derive(Debug, Default)]
    struct FakeSink {
        rows: Mutex<Vec<ObservationRow>>,
        uploads: Mutex<Vec<String>>,
        offline: bool,
    }

    impl FakeSink {
        fn offline() -> Self {
            Self {
                offline: true,
                ..Self::default()
            }
        }

        fn rows(&self) -> Vec<ObservationRow> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObservationSink for FakeSink {
        async fn insert_observation(&self, row: &ObservationRow) -> Result<()> {
            tokio::task::yield_now().await;
            if self.offline {
                return Err(Error::remote(503, "offline"));
            }
            if row.description.contains("reject") {
                return Err(Error::remote(409, "species does not exist"));
            }
            self.rows.lock().unwrap().push(row.clone());
            Ok(())
        }

        async fn upload_photo(&self, path: &Path) -> Result<String> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.uploads.lock().unwrap().push(name.clone());
            Ok(format!("https://cdn.test/{name}"))
        }
    }

    fn store() -> ReportStore {
        ReportStore::open_in_memory().unwrap()
    }

    fn report(description: &str) -> PendingReport {
        PendingReport::observation(description, GeoPoint::new(8.0, 1.0).unwrap(), None)
    }

    #[tokio::test]
    async fn test_sync_empty_queue_is_noop() {
        let store = store();
        let sync = Synchronizer::new(FakeSink::default());

        let summary = sync.sync(&store).await.unwrap();

        assert!(summary.is_noop());
        assert!(summary.is_complete());
        assert!(sync.sink().rows().is_empty());
    }

    #[tokio::test]
    async fn test_sync_success_removes_only_that_entry() {
        crate::logging::init_test_logging();
        let store = store();
        let ok = store.enqueue(&report("Céphalophe")).unwrap();
        let bad = store.enqueue(&report("reject me")).unwrap();
        let sync = Synchronizer::new(FakeSink::default());

        let summary = sync.sync(&store).await.unwrap();

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.synced, vec![ok]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].id, bad);
        assert!(!summary.failed[0].retryable);
        assert!(store.get(ok).unwrap().is_none());
        assert!(store.get(bad).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_reports() {
        let store = store();
        store.enqueue(&report("reject first")).unwrap();
        let second = store.enqueue(&report("second")).unwrap();
        let third = store.enqueue(&report("third")).unwrap();
        let sync = Synchronizer::new(FakeSink::default());

        let summary = sync.sync(&store).await.unwrap();

        assert_eq!(summary.synced, vec![second, third]);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_report_is_unchanged() {
        let store = store();
        let id = store.enqueue(&report("kept as is")).unwrap();
        let before = store.get(id).unwrap().unwrap();
        let sync = Synchronizer::new(FakeSink::offline());

        let summary = sync.sync(&store).await.unwrap();

        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].retryable);
        assert_eq!(store.get(id).unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_report_is_retried_every_sync() {
        let store = store();
        store.enqueue(&report("reject forever")).unwrap();
        let sync = Synchronizer::new(FakeSink::default());

        for _ in 0..3 {
            let summary = sync.sync(&store).await.unwrap();
            assert_eq!(summary.attempted, 1);
            assert_eq!(summary.failed.len(), 1);
        }
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_rejected() {
        let store = store();
        store.enqueue(&report("one")).unwrap();
        let sync = Synchronizer::new(FakeSink::default());

        let (first, second) = tokio::join!(sync.sync(&store), sync.sync(&store));

        assert_eq!(first.unwrap().synced.len(), 1);
        assert!(matches!(second, Err(Error::SyncInProgress)));
        assert_eq!(sync.sink().rows().len(), 1);
        assert!(!sync.is_running());
    }

    #[tokio::test]
    async fn test_replays_share_client_ref() {
        let store = store();
        let queued = report("submitted twice");
        store.enqueue(&queued).unwrap();
        let a = Synchronizer::new(FakeSink::default());
        let b = Synchronizer::new(FakeSink::default());

        let (ra, rb) = tokio::join!(a.sync(&store), b.sync(&store));
        ra.unwrap();
        rb.unwrap();

        // Both saw the report: the backend relies on the key to drop one.
        let ref_a = a.sink().rows()[0].client_ref;
        let ref_b = b.sink().rows()[0].client_ref;
        assert_eq!(ref_a, Some(queued.client_ref));
        assert_eq!(ref_a, ref_b);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idempotency_key_can_be_disabled() {
        let store = store();
        store.enqueue(&report("no key")).unwrap();
        let sync = Synchronizer::new(FakeSink::default()).with_idempotency_key(false);

        sync.sync(&store).await.unwrap();

        assert!(sync.sink().rows()[0].client_ref.is_none());
    }

    #[tokio::test]
    async fn test_user_id_is_attached() {
        let store = store();
        store.enqueue(&report("with user")).unwrap();
        let sync =
            Synchronizer::new(FakeSink::default()).with_user_id(Some("user-9".to_string()));

        sync.sync(&store).await.unwrap();

        assert_eq!(sync.sink().rows()[0].user_id.as_deref(), Some("user-9"));
    }

    #[tokio::test]
    async fn test_local_photo_uploaded_before_insert() {
        let store = store();
        store
            .enqueue(&report("with photo").with_image("/sdcard/DCIM/calao.jpg"))
            .unwrap();
        let sync = Synchronizer::new(FakeSink::default());

        sync.sync(&store).await.unwrap();

        assert_eq!(*sync.sink().uploads.lock().unwrap(), vec!["calao.jpg"]);
        assert_eq!(
            sync.sink().rows()[0].image_url,
            "https://cdn.test/calao.jpg"
        );
    }

    #[tokio::test]
    async fn test_uploaded_photo_url_kept_when_insert_fails() {
        let store = store();
        let id = store
            .enqueue(&report("reject with photo").with_image("/tmp/x.png"))
            .unwrap();
        let sync = Synchronizer::new(FakeSink::default());

        sync.sync(&store).await.unwrap();

        // Next attempt won't upload again
        assert_eq!(
            store.get(id).unwrap().unwrap().image_url,
            "https://cdn.test/x.png"
        );
    }

    #[tokio::test]
    async fn test_submit_online_success() {
        let store = store();
        let sync = Synchronizer::new(FakeSink::default());
        let alert = PendingReport::alert(
            "Braconnage",
            GeoPoint::new(10.0, 0.9).unwrap(),
            AlertLevel::Critical,
        );

        let outcome = sync.submit(&store, &alert, SubmitMode::Online).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Submitted);
        assert_eq!(store.count().unwrap(), 0);
        let rows = sync.sink().rows();
        assert!(rows[0].is_verified);
    }

    #[tokio::test]
    async fn test_submit_online_failure_stays_queued() {
        let store = store();
        let sync = Synchronizer::new(FakeSink::offline());

        let outcome = sync
            .submit(&store, &report("no network"), SubmitMode::Online)
            .await
            .unwrap();

        match outcome {
            SubmitOutcome::Queued { id, reason } => {
                assert!(store.get(id).unwrap().is_some());
                assert!(reason.unwrap().contains("offline"));
            }
            SubmitOutcome::Submitted => panic!("should have been queued"),
        }
    }

    #[tokio::test]
    async fn test_submit_offline_never_calls_sink() {
        let store = store();
        let sync = Synchronizer::new(FakeSink::default());

        let outcome = sync
            .submit(&store, &report("later"), SubmitMode::Offline)
            .await
            .unwrap();

        assert!(matches!(outcome, SubmitOutcome::Queued { reason: None, .. }));
        assert!(sync.sink().rows().is_empty());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_description() {
        let store = store();
        let sync = Synchronizer::new(FakeSink::default());

        let err = sync
            .submit(&store, &report(""), SubmitMode::Online)
            .await
            .unwrap_err();

        assert!(err.is_validation_error());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(SubmitOutcome::Queued {
            id: 4,
            reason: None,
        })
        .unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["id"], 4);
    }
}
