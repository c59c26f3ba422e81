//! [`ConfigurationStore`] over the `app_config` table.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use zeroize::Zeroizing;

use crate::config_store::{ConfigurationStore, SecretValue};
use crate::error::CoreResult;

use super::SqliteBackend;
use super::rows::format_timestamp;

#[async_trait]
impl ConfigurationStore for SqliteBackend {
    async fn get(&self, key: &str) -> CoreResult<Option<SecretValue>> {
        let conn = self.get_connection()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM app_config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(Zeroizing::new))
    }

    async fn put(&self, key: &str, value: SecretValue) -> CoreResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO app_config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value.as_str(), format_timestamp(Utc::now())],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ENCRYPTION_KEY;

    #[tokio::test]
    async fn test_put_then_get() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();

        assert!(backend.get(ENCRYPTION_KEY).await.unwrap().is_none());
        backend
            .put(ENCRYPTION_KEY, Zeroizing::new("first".to_string()))
            .await
            .unwrap();
        backend
            .put(ENCRYPTION_KEY, Zeroizing::new("second".to_string()))
            .await
            .unwrap();
        let value = backend.get(ENCRYPTION_KEY).await.unwrap().unwrap();
        assert_eq!(value.as_str(), "second");
    }
}
