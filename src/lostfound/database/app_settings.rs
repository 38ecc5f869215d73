use chrono::{DateTime, Utc};
use std::str::FromStr;

use super::{Database, DatabaseError, utils::parse_timestamp};
use crate::lostfound::app_settings::{AppSettings, ThemeMode};
use crate::lostfound::error::LostFoundError;

#[derive(Debug)]
struct AppSettingsRow {
    id: i64,
    theme_mode: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r, R> sqlx::FromRow<'r, R> for AppSettingsRow
where
    R: sqlx::Row,
    &'r str: sqlx::ColumnIndex<R>,
    String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    fn from_row(row: &'r R) -> std::result::Result<Self, sqlx::Error> {
        Ok(AppSettingsRow {
            id: row.try_get("id")?,
            theme_mode: row.try_get("theme_mode")?,
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }
}

impl AppSettingsRow {
    fn into_app_settings(self) -> Result<AppSettings, LostFoundError> {
        let theme_mode = ThemeMode::from_str(&self.theme_mode)
            .map_err(|e| LostFoundError::Configuration(format!("Invalid theme mode: {}", e)))?;

        Ok(AppSettings {
            id: self.id,
            theme_mode,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl AppSettings {
    pub(crate) async fn load(database: &Database) -> Result<AppSettings, LostFoundError> {
        let settings_row =
            sqlx::query_as::<_, AppSettingsRow>("SELECT * FROM app_settings WHERE id = 1")
                .fetch_one(&database.pool)
                .await
                .map_err(|_| {
                    LostFoundError::Configuration("App settings not found".to_string())
                })?;

        settings_row.into_app_settings()
    }

    /// Inserts the default row unless one already exists.
    pub(crate) async fn find_or_create_default(
        database: &Database,
    ) -> Result<AppSettings, LostFoundError> {
        let defaults = AppSettings::default();
        sqlx::query(
            "INSERT OR IGNORE INTO app_settings (id, theme_mode, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(defaults.id)
        .bind(defaults.theme_mode.to_string())
        .bind(defaults.created_at.timestamp_millis())
        .bind(defaults.updated_at.timestamp_millis())
        .execute(&database.pool)
        .await
        .map_err(DatabaseError::from)?;

        Self::load(database).await
    }

    pub(crate) async fn update_theme_mode(
        theme_mode: ThemeMode,
        database: &Database,
    ) -> Result<(), LostFoundError> {
        sqlx::query("UPDATE app_settings SET theme_mode = ?, updated_at = ? WHERE id = 1")
            .bind(theme_mode.to_string())
            .bind(Utc::now().timestamp_millis())
            .execute(&database.pool)
            .await
            .map_err(DatabaseError::from)?;

        Ok(())
    }
}
