use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::{
    error::{FasError, Result},
    storage::models::{new_id, BenefitSpec, CriterionSpec},
};

/// Content-addressed pool of criterion and benefit definitions.
///
/// Interning is insert-or-fetch keyed by the content tuple. It must run inside
/// a write transaction: the unique constraint picks the single winner and the
/// held write lock keeps the fetched row alive until the caller links it.
pub struct Pool;

impl Pool {
    /// Get-or-create the criterion with this (level, type, status).
    pub fn intern_criterion(conn: &Connection, spec: &CriterionSpec) -> Result<String> {
        let candidate = new_id();
        let inserted = conn
            .execute(
                "INSERT INTO criteria (id, criteria_level, criteria_type, status)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (criteria_level, criteria_type, status) DO NOTHING",
                params![candidate, spec.criteria_level, spec.criteria_type, spec.status],
            )
            .map_err(|e| FasError::from_insert(e, "criteria"))?;

        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM criteria
                 WHERE criteria_level = ?1 AND criteria_type = ?2 AND status = ?3",
                params![spec.criteria_level, spec.criteria_type, spec.status],
                |row| row.get(0),
            )
            .optional()?;

        let id = id.ok_or_else(|| {
            FasError::Conflict(format!("criterion {} vanished while interning", spec))
        })?;

        if inserted == 1 {
            debug!("Interned new criterion {} as {}", spec, id);
        } else {
            debug!("Reusing criterion {} ({})", spec, id);
        }
        Ok(id)
    }

    /// Get-or-create the benefit with this (name, amount).
    pub fn intern_benefit(conn: &Connection, spec: &BenefitSpec) -> Result<String> {
        let candidate = new_id();
        let inserted = conn
            .execute(
                "INSERT INTO benefits (id, name, amount_cents)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (name, amount_cents) DO NOTHING",
                params![candidate, spec.name, spec.amount],
            )
            .map_err(|e| FasError::from_insert(e, "benefit"))?;

        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM benefits WHERE name = ?1 AND amount_cents = ?2",
                params![spec.name, spec.amount],
                |row| row.get(0),
            )
            .optional()?;

        let id = id.ok_or_else(|| {
            FasError::Conflict(format!(
                "benefit {} ({}) vanished while interning",
                spec.name, spec.amount
            ))
        })?;

        if inserted == 1 {
            debug!("Interned new benefit {} ({}) as {}", spec.name, spec.amount, id);
        } else {
            debug!("Reusing benefit {} ({}) ({})", spec.name, spec.amount, id);
        }
        Ok(id)
    }
}
