//! Column conversions shared by the SQLite repositories.
//!
//! Timestamps are stored as RFC 3339 text with microsecond precision and a
//! `Z` suffix, so lexicographic order matches chronological order. Money is
//! stored as canonical decimal text.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use rust_decimal::Decimal;

use crate::crypto::Envelope;
use crate::tenant::{PrincipalId, TenantId};

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn format_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

pub(crate) fn opt_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn envelope(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Envelope>> {
    let raw: Option<Vec<u8>> = row.get(idx)?;
    Ok(raw.map(Envelope::from_bytes))
}

pub(crate) fn tenant_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<TenantId> {
    row.get::<_, String>(idx).map(TenantId::new)
}

pub(crate) fn opt_tenant_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<TenantId>> {
    row.get::<_, Option<String>>(idx)
        .map(|raw| raw.map(TenantId::new))
}

pub(crate) fn principal_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<PrincipalId> {
    row.get::<_, String>(idx).map(PrincipalId::new)
}

/// Parses a column holding one of a fixed set of names.
pub(crate) fn parsed<T>(
    row: &Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {raw:?}").into(),
        )
    })
}
