//! The per-request scope handed to operations.

use tracing::{debug, instrument, warn};

use crate::audit::{AuditEntry, AuditFilter};
use crate::backends::sqlite::SqliteUnitOfWork;
use crate::crypto::{CredentialHasher, Envelope, FieldEncryptionService, RehashOutcome, validate_strength};
use crate::error::{CoreResult, CredentialError};
use crate::tenant::{PrincipalId, TenantContext, TenantId};
use crate::types::{NewPrincipal, PrincipalRecord, Tenant};

use super::CareCore;

/// Everything one request may do, bound to its [`TenantContext`].
///
/// Protected fields are encrypted before a unit of work opens and decrypted
/// after it commits, so no key lookup ever happens while a connection is
/// held.
#[derive(Clone)]
pub struct RequestScope {
    core: CareCore,
    context: TenantContext,
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl RequestScope {
    pub(super) fn new(core: CareCore, context: TenantContext) -> Self {
        Self { core, context }
    }

    pub fn context(&self) -> &TenantContext {
        &self.context
    }

    pub(super) fn fields(&self) -> &FieldEncryptionService {
        self.core.fields()
    }

    fn hasher(&self) -> &CredentialHasher {
        self.core.hasher()
    }

    /// Opens a read-write unit of work for this request.
    pub fn begin(&self) -> CoreResult<SqliteUnitOfWork> {
        self.core.backend().begin(Some(&self.context))
    }

    /// Opens a read-only unit of work for this request.
    pub fn begin_read(&self) -> CoreResult<SqliteUnitOfWork> {
        self.core.backend().begin_read(Some(&self.context))
    }

    /// Runs `f` in a fresh unit of work and commits it.
    pub(super) fn write<T>(
        &self,
        f: impl FnOnce(&mut SqliteUnitOfWork) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut uow = self.begin()?;
        let value = f(&mut uow)?;
        uow.commit()?;
        Ok(value)
    }

    /// Runs `f` in a read-only unit of work.
    pub(super) fn read<T>(&self, f: impl FnOnce(&SqliteUnitOfWork) -> CoreResult<T>) -> CoreResult<T> {
        let uow = self.begin_read()?;
        let value = f(&uow)?;
        uow.commit()?;
        Ok(value)
    }

    /// Encrypts a protected field value.
    pub async fn protect_field(&self, plaintext: Option<&str>) -> CoreResult<Option<Envelope>> {
        self.fields().encrypt(plaintext).await
    }

    /// Decrypts a protected field value.
    pub async fn reveal_field(&self, envelope: Option<&Envelope>) -> CoreResult<Option<String>> {
        self.fields().decrypt(envelope).await
    }

    #[instrument(skip(self), fields(principal = %self.context.principal_id()))]
    pub fn create_tenant(&self, code: &str) -> CoreResult<Tenant> {
        self.write(|uow| uow.create_tenant(code))
    }

    #[instrument(skip(self), fields(principal = %self.context.principal_id()))]
    pub fn deactivate_tenant(&self, id: &TenantId) -> CoreResult<Tenant> {
        self.write(|uow| uow.deactivate_tenant(id))
    }

    pub fn get_tenant(&self, id: &TenantId) -> CoreResult<Option<Tenant>> {
        self.read(|uow| uow.get_tenant(id))
    }

    pub fn list_tenants(&self) -> CoreResult<Vec<Tenant>> {
        self.read(|uow| uow.list_tenants())
    }

    #[instrument(skip(self, new), fields(principal = %self.context.principal_id()))]
    pub fn create_principal(&self, new: &NewPrincipal) -> CoreResult<PrincipalRecord> {
        self.write(|uow| uow.create_principal(new))
    }

    #[instrument(skip(self), fields(principal = %self.context.principal_id()))]
    pub fn transfer_principal(&self, id: &PrincipalId, to: &TenantId) -> CoreResult<PrincipalRecord> {
        self.write(|uow| uow.transfer_principal(id, to))
    }

    pub fn get_principal(&self, id: &PrincipalId) -> CoreResult<Option<PrincipalRecord>> {
        self.read(|uow| uow.get_principal(id))
    }

    pub fn list_principals(&self) -> CoreResult<Vec<PrincipalRecord>> {
        self.read(|uow| uow.list_principals())
    }

    /// Sets a principal's password after checking it against the policy.
    ///
    /// Every violated rule is reported at once. Members may only set their
    /// own password.
    #[instrument(skip(self, password), fields(principal = %self.context.principal_id()))]
    pub fn set_password(&self, id: &PrincipalId, password: &str) -> CoreResult<()> {
        let violations = validate_strength(password, &self.core.config().password_policy);
        if !violations.is_empty() {
            return Err(CredentialError::WeakInput { violations }.into());
        }
        let digest = self.hasher().hash(password)?;
        self.write(|uow| uow.set_password_digest(id, &digest))
    }

    /// Checks a principal's password.
    ///
    /// Members may only check their own password. A principal without a
    /// password never verifies. A matching digest made
    /// under outdated hashing parameters is replaced; failing to store the
    /// replacement does not fail the check.
    #[instrument(skip(self, password), fields(principal = %self.context.principal_id()))]
    pub fn verify_password(&self, id: &PrincipalId, password: &str) -> CoreResult<bool> {
        let Some(digest) = self.read(|uow| uow.password_digest(id))? else {
            return Ok(false);
        };
        if !self.hasher().needs_rehash(&digest) {
            return Ok(self.hasher().verify(password, &digest));
        }

        match self.hasher().rehash(password, &digest) {
            Ok(RehashOutcome::Unchanged) => Ok(false),
            Err(e) => {
                warn!(target_principal = %id, error = %e, "could not upgrade password digest");
                Ok(self.hasher().verify(password, &digest))
            }
            Ok(RehashOutcome::Rehashed(fresh)) => {
                match self.write(|uow| uow.set_password_digest(id, &fresh)) {
                    Ok(()) => debug!(target_principal = %id, "upgraded password digest"),
                    Err(e) => warn!(target_principal = %id, error = %e, "failed to store upgraded digest"),
                }
                Ok(true)
            }
        }
    }

    /// Audit entries visible to this request, newest first.
    pub fn audit_trail(&self, filter: &AuditFilter) -> CoreResult<Vec<AuditEntry>> {
        self.read(|uow| uow.list_audit_entries(filter))
    }
}
