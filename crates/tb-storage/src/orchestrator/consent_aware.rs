//! Routes writes by tracking consent.
//!
//! Three delegates: the pending directory, the granted directory and a
//! discarding no-op. The initial delegate is resolved when the orchestrator
//! is built; after that the active delegate only changes on the serial
//! queue, once the migration for that transition has run, so a write
//! submitted after a consent change always sees the migrated directories.
//!
//! Writes must be submitted to the same queue. The startup migration wipes
//! the pending directory, so a write that bypasses the queue while consent
//! is pending can land before that wipe and be discarded with it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tb_common::{TrackingConsent, WipeRetryConfig};

use super::{FileOrchestrator, NoOpFileOrchestrator};
use crate::consent::{ConsentListener, ConsentProvider};
use crate::executor::TaskExecutor;
use crate::file::FileHandler;
use crate::logging::{event_names, MAINTAINER};
use crate::migration::{self, MigrationOutcome};

pub struct ConsentAwareFileOrchestrator {
    pending: Arc<dyn FileOrchestrator>,
    granted: Arc<dyn FileOrchestrator>,
    discard: Arc<dyn FileOrchestrator>,
    executor: Arc<dyn TaskExecutor>,
    file_handler: Arc<dyn FileHandler>,
    wipe_retry: WipeRetryConfig,
    active: RwLock<TrackingConsent>,
    this: Weak<ConsentAwareFileOrchestrator>,
}

impl ConsentAwareFileOrchestrator {
    /// Build the orchestrator, register it with `consent_provider`, route to
    /// the delegate of the current consent and queue the startup migration.
    pub fn new(
        pending: Arc<dyn FileOrchestrator>,
        granted: Arc<dyn FileOrchestrator>,
        executor: Arc<dyn TaskExecutor>,
        file_handler: Arc<dyn FileHandler>,
        wipe_retry: WipeRetryConfig,
        consent_provider: &dyn ConsentProvider,
    ) -> Arc<Self> {
        let orchestrator = Arc::new_cyclic(|this| ConsentAwareFileOrchestrator {
            pending,
            granted,
            discard: Arc::new(NoOpFileOrchestrator),
            executor,
            file_handler,
            wipe_retry,
            active: RwLock::new(TrackingConsent::Pending),
            this: this.clone(),
        });

        consent_provider.register_listener(orchestrator.clone());
        let current = consent_provider.current_consent();
        *orchestrator
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner) = current;
        orchestrator.handle_consent_change(None, current);
        orchestrator
    }

    /// Consent whose delegate currently receives writes.
    pub fn active_consent(&self) -> TrackingConsent {
        *self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending(&self) -> &Arc<dyn FileOrchestrator> {
        &self.pending
    }

    pub fn granted(&self) -> &Arc<dyn FileOrchestrator> {
        &self.granted
    }

    fn delegate_for(&self, consent: TrackingConsent) -> &Arc<dyn FileOrchestrator> {
        match consent {
            TrackingConsent::Pending => &self.pending,
            TrackingConsent::Granted => &self.granted,
            TrackingConsent::NotGranted => &self.discard,
        }
    }

    fn active_delegate(&self) -> &Arc<dyn FileOrchestrator> {
        self.delegate_for(self.active_consent())
    }

    fn handle_consent_change(&self, previous: Option<TrackingConsent>, next: TrackingConsent) {
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let task = Box::new(move || {
            // "No previous state" owns the pending directory.
            let previous_dir = this
                .delegate_for(previous.unwrap_or(TrackingConsent::Pending))
                .root_dir();
            let next_dir = this.delegate_for(next).root_dir();

            let operation = migration::decide(previous, previous_dir, next, next_dir);
            let outcome = operation.run(this.file_handler.as_ref(), &this.wipe_retry);

            *this.active.write().unwrap_or_else(PoisonError::into_inner) = next;

            internal_log!(
                DEBUG,
                MAINTAINER,
                event_names::CONSENT_CHANGED,
                previous = ?previous,
                next = %next,
                operation = operation.name(),
                completed = outcome != MigrationOutcome::Failed,
                "Consent migration finished"
            );
        });

        if let Err(e) = self.executor.submit("consent_migration", task) {
            internal_log!(
                ERROR,
                MAINTAINER,
                event_names::TASK_REJECTED,
                task = "consent_migration",
                error = %e,
                "Unable to schedule consent migration, keeping current delegate"
            );
        }
    }
}

impl ConsentListener for ConsentAwareFileOrchestrator {
    fn on_consent_changed(&self, previous: TrackingConsent, next: TrackingConsent) {
        self.handle_consent_change(Some(previous), next);
    }
}

impl FileOrchestrator for ConsentAwareFileOrchestrator {
    fn writable_file(&self, requested_size: u64, force_new_file: bool) -> Option<PathBuf> {
        self.active_delegate()
            .writable_file(requested_size, force_new_file)
    }

    fn readable_file(&self, excluded: &HashSet<PathBuf>) -> Option<PathBuf> {
        self.granted.readable_file(excluded)
    }

    fn all_files(&self) -> Vec<PathBuf> {
        let mut files = self.pending.all_files();
        files.extend(self.granted.all_files());
        files
    }

    fn flushable_files(&self) -> Vec<PathBuf> {
        self.granted.flushable_files()
    }

    fn metadata_file(&self, batch_file: &Path) -> Option<PathBuf> {
        self.active_delegate().metadata_file(batch_file)
    }

    fn root_dir(&self) -> Option<PathBuf> {
        None
    }
}
