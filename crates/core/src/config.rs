//! Core configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{HashingParams, PasswordPolicy};

#[cfg(feature = "sqlite")]
use crate::backends::sqlite::SqliteBackendConfig;

/// Configuration for [`CareCore`](crate::service::CareCore).
///
/// Every field has a default, so `{}` is a valid configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Deadline applied to each request, in milliseconds. `0` disables it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Rules new passwords must satisfy.
    #[serde(default)]
    pub password_policy: PasswordPolicy,

    /// Argon2id cost parameters for new digests.
    #[serde(default)]
    pub hashing: HashingParams,

    #[cfg(feature = "sqlite")]
    #[serde(default)]
    pub sqlite: SqliteBackendConfig,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            password_policy: PasswordPolicy::default(),
            hashing: HashingParams::default(),
            #[cfg(feature = "sqlite")]
            sqlite: SqliteBackendConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}
