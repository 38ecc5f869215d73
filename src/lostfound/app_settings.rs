use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::lostfound::{LostFound, error::Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThemeMode::Light => write!(f, "light"),
            ThemeMode::Dark => write!(f, "dark"),
            ThemeMode::System => write!(f, "system"),
        }
    }
}

impl FromStr for ThemeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(ThemeMode::Light),
            "dark" => Ok(ThemeMode::Dark),
            "system" => Ok(ThemeMode::System),
            _ => Err(format!("Invalid theme mode: {}", s)),
        }
    }
}

/// Local, per-device settings. Never synced to the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub id: i64,
    pub theme_mode: ThemeMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self::new(ThemeMode::default())
    }
}

impl AppSettings {
    pub fn new(theme_mode: ThemeMode) -> Self {
        let now = Utc::now();
        Self {
            id: 1, // single-row table
            theme_mode,
            created_at: now,
            updated_at: now,
        }
    }

    /// The dark-mode flag the UI reads. `System` defers to the platform and reads as `false`.
    pub fn is_dark_mode(&self) -> bool {
        self.theme_mode == ThemeMode::Dark
    }
}

impl LostFound {
    /// Loads the current local settings.
    ///
    /// Default settings are created during initialization, so this only fails
    /// when the database itself is unreachable or the stored row is corrupt.
    pub async fn app_settings(&self) -> Result<AppSettings> {
        AppSettings::load(&self.database).await
    }

    /// Updates only the theme mode in the local settings.
    pub async fn update_theme_mode(&self, theme_mode: ThemeMode) -> Result<()> {
        tracing::debug!(
            target: "lostfound::app_settings",
            "Updating theme mode to {}",
            theme_mode
        );
        AppSettings::update_theme_mode(theme_mode, &self.database).await
    }

    /// Toggles the dark-mode flag. Turning it off selects the light theme.
    pub async fn set_dark_mode(&self, enabled: bool) -> Result<()> {
        let theme_mode = if enabled {
            ThemeMode::Dark
        } else {
            ThemeMode::Light
        };
        self.update_theme_mode(theme_mode).await
    }
}
