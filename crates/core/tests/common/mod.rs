//! Shared fixtures for the integration tests.
//!
//! Every test gets its own in-memory database, a fresh field key and cheap
//! Argon2 parameters so password tests stay fast.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use carebase_core::backends::sqlite::SqliteBackend;
use carebase_core::config_store::{ENCRYPTION_KEY, InMemoryConfigStore};
use carebase_core::crypto::{FieldKey, HashingParams};
use carebase_core::types::{NewPatient, Patient};
use carebase_core::{CareCore, CoreConfig, Principal, RequestScope, TenantId};

pub fn cheap_hashing() -> HashingParams {
    HashingParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn test_config() -> CoreConfig {
    CoreConfig {
        hashing: cheap_hashing(),
        ..CoreConfig::default()
    }
}

/// A core wired to a throwaway database and key store.
pub struct Harness {
    pub core: CareCore,
    pub backend: SqliteBackend,
    pub store: Arc<InMemoryConfigStore>,
}

impl Harness {
    pub fn in_memory() -> Self {
        let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
        Self::with_backend(backend, test_config())
    }

    pub fn on_disk(path: &Path) -> Self {
        let backend = SqliteBackend::open(path).expect("Failed to open SQLite database");
        Self::with_backend(backend, test_config())
    }

    pub fn with_backend(backend: SqliteBackend, config: CoreConfig) -> Self {
        backend.init_schema().expect("Failed to initialize schema");
        let store = Arc::new(InMemoryConfigStore::with_value(
            ENCRYPTION_KEY,
            FieldKey::generate_base64().as_str(),
        ));
        let core = CareCore::new(backend.clone(), store.clone(), config);
        Self {
            core,
            backend,
            store,
        }
    }

    /// A second core over the same database and key store.
    pub fn reconfigured(&self, config: CoreConfig) -> CareCore {
        CareCore::new(self.backend.clone(), self.store.clone(), config)
    }

    pub fn root(&self) -> RequestScope {
        self.core
            .scope(Some(&root()))
            .expect("Failed to build privileged scope")
    }

    pub fn scope(&self, principal: &Principal) -> RequestScope {
        self.core
            .scope(Some(principal))
            .expect("Failed to build request scope")
    }

    /// Creates a tenant and returns a member principal bound to it.
    pub fn tenant(&self, code: &str) -> (TenantId, Principal) {
        let tenant = self
            .root()
            .create_tenant(code)
            .expect("Failed to create tenant");
        let member = Principal::member(format!("staff-{code}"), tenant.id.clone());
        (tenant.id, member)
    }

    pub async fn patient(&self, principal: &Principal, name: &str) -> Patient {
        self.scope(principal)
            .create_patient(NewPatient::named(name))
            .await
            .expect("Failed to create patient")
    }
}

pub fn root() -> Principal {
    Principal::privileged("root", None)
}
