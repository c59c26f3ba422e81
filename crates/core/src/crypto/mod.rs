//! Field encryption and credential hashing.
//!
//! - [`FieldEncryptionService`] seals protected fields (clinical notes, care
//!   plans) into AES-256-GCM [`Envelope`]s with a key fetched from the
//!   configuration store on every call.
//! - [`CredentialHasher`] produces and verifies Argon2id password digests;
//!   [`validate_strength`] checks a password against a [`PasswordPolicy`].

mod credentials;
mod envelope;
mod field;

pub use credentials::{
    CredentialHasher, HashingParams, PasswordPolicy, PolicyViolation, RehashOutcome,
    validate_strength,
};
pub use envelope::{ENVELOPE_VERSION, Envelope, FieldKey, PROTECTED_MARKER};
pub use field::FieldEncryptionService;
