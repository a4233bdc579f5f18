//! Dashboard preferences kept in durable storage.
//!
//! Preferences outlive the session: they are written to a durable
//! [`Storage`] and restored at start-up, while credentials stay in the
//! session-scoped store.

use fitdash_core::{get_json, set_json, SharedStorage, StorageError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Durable storage key holding the preferences.
pub const PREFERENCES_KEY: &str = "fitdash.preferences";

/// Time window shown by the dashboard charts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    /// Last 7 days
    Week,
    /// Last 30 days
    #[default]
    Month,
    /// Last 90 days
    Quarter,
    /// Last 365 days
    Year,
    /// Everything on record
    All,
}

impl TimeRange {
    /// Length of the window in days, `None` for [`TimeRange::All`].
    pub fn days(self) -> Option<u32> {
        match self {
            Self::Week => Some(7),
            Self::Month => Some(30),
            Self::Quarter => Some(90),
            Self::Year => Some(365),
            Self::All => None,
        }
    }
}

/// Colour scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Light
    Light,
    /// Dark
    Dark,
    /// Follow the operating system
    #[default]
    System,
}

/// Highlight thresholds for the training charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Weekly mileage goal
    pub weekly_mileage_goal: f64,
    /// Acute:chronic training-load ratio above which load is flagged
    pub training_load_ratio_high: f64,
    /// Acute:chronic training-load ratio below which load is flagged
    pub training_load_ratio_low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            weekly_mileage_goal: 20.0,
            training_load_ratio_high: 1.5,
            training_load_ratio_low: 0.8,
        }
    }
}

/// User preferences for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Selected time range
    pub time_range: TimeRange,
    /// Chart thresholds
    pub thresholds: Thresholds,
    /// Colour scheme
    pub theme: Theme,
}

/// Loads and saves [`Preferences`] in durable storage.
#[derive(Clone)]
pub struct PreferencesStore {
    storage: SharedStorage,
}

impl PreferencesStore {
    /// Create a store on `storage`, which should be durable.
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Load the saved preferences.
    ///
    /// Missing or unreadable entries yield the defaults.
    pub fn load(&self) -> Preferences {
        match get_json::<Preferences>(self.storage.as_ref(), PREFERENCES_KEY) {
            Ok(Some(preferences)) => preferences,
            Ok(None) => Preferences::default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable preferences, using defaults");
                Preferences::default()
            }
        }
    }

    /// Persist `preferences`.
    pub fn save(&self, preferences: &Preferences) -> Result<(), StorageError> {
        set_json(self.storage.as_ref(), PREFERENCES_KEY, preferences)
    }

    /// Load, modify and save in one step.
    pub fn update(&self, f: impl FnOnce(&mut Preferences)) -> Result<Preferences, StorageError> {
        let mut preferences = self.load();
        f(&mut preferences);
        self.save(&preferences)?;
        Ok(preferences)
    }
}

impl std::fmt::Debug for PreferencesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferencesStore").finish_non_exhaustive()
    }
}
