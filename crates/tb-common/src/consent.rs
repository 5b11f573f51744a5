//! Tracking consent values.

use serde::{Deserialize, Serialize};

/// The user's current authorization to collect and send data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingConsent {
    /// Undecided: data is buffered but never uploaded.
    #[default]
    Pending,
    /// Data may be persisted and uploaded.
    Granted,
    /// Data is discarded at write time.
    NotGranted,
}

impl TrackingConsent {
    /// All consent values, in declaration order.
    pub const ALL: [TrackingConsent; 3] = [
        TrackingConsent::Pending,
        TrackingConsent::Granted,
        TrackingConsent::NotGranted,
    ];

    /// Stable lowercase name used in logs, state files and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingConsent::Pending => "pending",
            TrackingConsent::Granted => "granted",
            TrackingConsent::NotGranted => "not_granted",
        }
    }
}

impl std::fmt::Display for TrackingConsent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TrackingConsent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(TrackingConsent::Pending),
            "granted" => Ok(TrackingConsent::Granted),
            "not_granted" | "notgranted" | "denied" => Ok(TrackingConsent::NotGranted),
            _ => Err(format!("unknown tracking consent: {}", s)),
        }
    }
}
