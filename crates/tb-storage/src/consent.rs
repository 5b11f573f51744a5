//! Tracking consent provider.
//!
//! Holds the current consent, notifies listeners on change and optionally
//! persists the value to a small JSON state file so a restart resumes with
//! the last decision.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tb_common::{Error, Result, TrackingConsent};

use crate::logging::{event_names, MAINTAINER, USER};

/// Receives consent transitions.
pub trait ConsentListener: Send + Sync {
    fn on_consent_changed(&self, previous: TrackingConsent, next: TrackingConsent);
}

/// Source of the current tracking consent.
pub trait ConsentProvider: Send + Sync {
    fn current_consent(&self) -> TrackingConsent;

    /// Listeners are never unregistered.
    fn register_listener(&self, listener: Arc<dyn ConsentListener>);
}

/// On-disk form of the consent state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConsent {
    pub consent: TrackingConsent,
    pub updated_at: DateTime<Utc>,
}

impl PersistedConsent {
    pub fn new(consent: TrackingConsent) -> Self {
        PersistedConsent {
            consent,
            updated_at: Utc::now(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::InvalidConsent(e.to_string()))
    }

    /// Load the state file; `Ok(None)` when it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the state file through a temp file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(self)?;
        let mut temp = path.as_os_str().to_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, content)?;
        fs::rename(&temp, path)?;
        Ok(())
    }
}

/// In-process [`ConsentProvider`].
pub struct TrackingConsentProvider {
    consent: Mutex<TrackingConsent>,
    listeners: Mutex<Vec<Arc<dyn ConsentListener>>>,
    state_file: Option<PathBuf>,
}

impl TrackingConsentProvider {
    pub fn new(initial: TrackingConsent) -> Self {
        TrackingConsentProvider {
            consent: Mutex::new(initial),
            listeners: Mutex::new(Vec::new()),
            state_file: None,
        }
    }

    /// Provider backed by a state file. A missing or unreadable file starts
    /// at `Pending`.
    pub fn with_state_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = match PersistedConsent::load(&path) {
            Ok(Some(state)) => state.consent,
            Ok(None) => TrackingConsent::Pending,
            Err(e) => {
                internal_log!(
                    WARN,
                    MAINTAINER,
                    event_names::CONSENT_STATE_ERROR,
                    path = %path.display(),
                    error = %e,
                    "Unable to read consent state, falling back to pending"
                );
                TrackingConsent::Pending
            }
        };
        TrackingConsentProvider {
            consent: Mutex::new(initial),
            listeners: Mutex::new(Vec::new()),
            state_file: Some(path),
        }
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    /// Update the consent. Listeners hear about actual changes only.
    pub fn set_consent(&self, next: TrackingConsent) {
        let previous = {
            let mut current = self.consent.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == next {
                return;
            }
            let previous = *current;
            *current = next;
            self.persist(next);
            previous
        };

        internal_log!(
            INFO,
            USER,
            event_names::CONSENT_CHANGED,
            previous = %previous,
            next = %next,
            "Tracking consent changed"
        );

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_consent_changed(previous, next);
        }
    }

    fn persist(&self, consent: TrackingConsent) {
        let Some(path) = self.state_file.as_deref() else {
            return;
        };
        if let Err(e) = PersistedConsent::new(consent).save(path) {
            internal_log!(
                ERROR,
                MAINTAINER,
                event_names::CONSENT_STATE_ERROR,
                path = %path.display(),
                error = %e,
                "Unable to persist consent state"
            );
        }
    }
}

impl ConsentProvider for TrackingConsentProvider {
    fn current_consent(&self) -> TrackingConsent {
        *self.consent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_listener(&self, listener: Arc<dyn ConsentListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(TrackingConsent, TrackingConsent)>>,
    }

    impl ConsentListener for Recorder {
        fn on_consent_changed(&self, previous: TrackingConsent, next: TrackingConsent) {
            self.seen.lock().unwrap().push((previous, next));
        }
    }

    #[test]
    fn test_listeners_notified_on_change_only() {
        let provider = TrackingConsentProvider::new(TrackingConsent::Pending);
        let recorder = Arc::new(Recorder::default());
        provider.register_listener(recorder.clone());

        provider.set_consent(TrackingConsent::Pending);
        provider.set_consent(TrackingConsent::Granted);
        provider.set_consent(TrackingConsent::Granted);
        provider.set_consent(TrackingConsent::NotGranted);

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                (TrackingConsent::Pending, TrackingConsent::Granted),
                (TrackingConsent::Granted, TrackingConsent::NotGranted),
            ]
        );
        assert_eq!(provider.current_consent(), TrackingConsent::NotGranted);
    }

    #[test]
    fn test_listener_may_read_provider_during_notification() {
        struct Reentrant(Arc<TrackingConsentProvider>, Mutex<Option<TrackingConsent>>);
        impl ConsentListener for Reentrant {
            fn on_consent_changed(&self, _: TrackingConsent, _: TrackingConsent) {
                *self.1.lock().unwrap() = Some(self.0.current_consent());
            }
        }

        let provider = Arc::new(TrackingConsentProvider::new(TrackingConsent::Pending));
        let listener = Arc::new(Reentrant(provider.clone(), Mutex::new(None)));
        provider.register_listener(listener.clone());
        provider.set_consent(TrackingConsent::Granted);

        assert_eq!(*listener.1.lock().unwrap(), Some(TrackingConsent::Granted));
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feature-consent.json");

        let provider = TrackingConsentProvider::with_state_file(&path);
        assert_eq!(provider.current_consent(), TrackingConsent::Pending);
        provider.set_consent(TrackingConsent::Granted);

        let restored = TrackingConsentProvider::with_state_file(&path);
        assert_eq!(restored.current_consent(), TrackingConsent::Granted);
    }

    #[test]
    fn test_corrupt_state_file_falls_back_to_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feature-consent.json");
        fs::write(&path, "{\"consent\": \"maybe\"}").unwrap();

        let provider = TrackingConsentProvider::with_state_file(&path);
        assert_eq!(provider.current_consent(), TrackingConsent::Pending);
        assert!(matches!(
            PersistedConsent::load(&path),
            Err(Error::InvalidConsent(_))
        ));
    }

    #[test]
    fn test_persisted_consent_format() {
        let state = PersistedConsent::from_json(
            r#"{"consent":"not_granted","updated_at":"2026-01-15T14:30:22Z"}"#,
        )
        .unwrap();
        assert_eq!(state.consent, TrackingConsent::NotGranted);
    }
}
