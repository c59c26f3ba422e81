//! Scoped repository operations on [`SqliteUnitOfWork`](super::SqliteUnitOfWork).
//!
//! Each submodule adds an `impl SqliteUnitOfWork` block for one family of
//! records. Every method scopes itself first; writes then run their
//! consistency hooks and append an audit entry before returning. Writes
//! with more than one statement run inside
//! [`atomically`](super::SqliteUnitOfWork::atomically), so a failing hook
//! takes the triggering write down with it.

mod aggregates;
mod audit_log;
mod billing;
mod clinical;
mod directory;
mod inventory;
mod scheduling;

pub(crate) use audit_log::SavepointSink;
