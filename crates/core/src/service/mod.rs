//! Request entry point.
//!
//! [`CareCore`] wires the storage backend, field encryption and credential
//! hashing together. Every request goes through
//! [`CareCore::with_tenant_context`], which builds the tenant context,
//! checks the tenant is active, applies the request deadline and hands the
//! operation a [`RequestScope`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use carebase_core::backends::sqlite::SqliteBackend;
//! use carebase_core::config::CoreConfig;
//! use carebase_core::config_store::{ConfigurationStore, ENCRYPTION_KEY};
//! use carebase_core::crypto::FieldKey;
//! use carebase_core::service::CareCore;
//! use carebase_core::tenant::{Principal, TenantId};
//! use carebase_core::types::NewPatient;
//!
//! # async fn example() -> carebase_core::CoreResult<()> {
//! let backend = SqliteBackend::open("carebase.db")?;
//! backend.init_schema()?;
//! backend.put(ENCRYPTION_KEY, FieldKey::generate_base64()).await?;
//!
//! let store: Arc<dyn ConfigurationStore> = Arc::new(backend.clone());
//! let core = CareCore::new(backend, store, CoreConfig::default());
//!
//! let nurse = Principal::member("nurse-1", TenantId::new("clinic-north"));
//! let patient = core
//!     .with_tenant_context(Some(&nurse), |scope| async move {
//!         scope
//!             .create_patient(NewPatient::named("Ana Lima").notes("allergic to penicillin"))
//!             .await
//!     })
//!     .await?;
//! # let _ = patient;
//! # Ok(())
//! # }
//! ```

mod records;
mod scope;

use std::future::Future;
use std::sync::Arc;

use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

pub use scope::RequestScope;

use crate::backends::sqlite::SqliteBackend;
use crate::config::CoreConfig;
use crate::config_store::ConfigurationStore;
use crate::crypto::{CredentialHasher, FieldEncryptionService};
use crate::error::{CoreResult, TransactionError};
use crate::tenant::{Principal, build_context};

/// The Carebase core.
///
/// Cloning is cheap; clones share the connection pool and configuration.
#[derive(Clone)]
pub struct CareCore {
    backend: SqliteBackend,
    fields: FieldEncryptionService,
    hasher: CredentialHasher,
    config: Arc<CoreConfig>,
}

impl std::fmt::Debug for CareCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CareCore")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CareCore {
    pub fn new(
        backend: SqliteBackend,
        config_store: Arc<dyn ConfigurationStore>,
        config: CoreConfig,
    ) -> Self {
        let hasher = CredentialHasher::new(config.hashing, &config.password_policy);
        Self {
            backend,
            fields: FieldEncryptionService::new(config_store),
            hasher,
            config: Arc::new(config),
        }
    }

    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    pub fn fields(&self) -> &FieldEncryptionService {
        &self.fields
    }

    pub fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Builds the scope of one request.
    ///
    /// Fails with `Unauthenticated` without a principal, and with
    /// `TenantInactive` or `UnknownTenant` when the principal's tenant cannot
    /// be used.
    pub fn scope(&self, principal: Option<&Principal>) -> CoreResult<RequestScope> {
        let mut context = build_context(principal)?
            .with_correlation_id(Uuid::new_v4().to_string());
        if let Some(timeout) = self.config.request_timeout() {
            context = context.with_timeout(timeout);
        }
        if let Some(tenant) = context.tenant_id() {
            self.backend.ensure_tenant_active(tenant)?;
        }
        Ok(RequestScope::new(self.clone(), context))
    }

    /// Runs `operation` inside the scope of `principal`.
    ///
    /// This is the single entry point for request handlers. The operation is
    /// aborted once the request deadline passes; any unit of work it still
    /// holds is rolled back.
    pub async fn with_tenant_context<F, Fut, T>(
        &self,
        principal: Option<&Principal>,
        operation: F,
    ) -> CoreResult<T>
    where
        F: FnOnce(RequestScope) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let scope = self.scope(principal)?;
        let context = scope.context();
        let span = info_span!(
            "request",
            principal = %context.principal_id(),
            tenant = context.tenant_id().map(|t| t.as_str()).unwrap_or("*"),
            correlation_id = context.correlation_id().unwrap_or_default(),
        );
        let timeout = self.config.request_timeout();
        let timeout_ms = self.config.request_timeout_ms;

        async move {
            let Some(timeout) = timeout else {
                return operation(scope).await;
            };
            match tokio::time::timeout(timeout, operation(scope)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms, "request deadline elapsed");
                    Err(TransactionError::Timeout { timeout_ms }.into())
                }
            }
        }
        .instrument(span)
        .await
    }
}
