use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::{
    error::{FasError, Result},
    pool::{Pool, ReclaimSummary},
    storage::{
        db,
        models::{new_id, BenefitSpec, CriterionSpec, Scheme, SchemeDraft},
        Database,
    },
};

/// Outcome of the reclaim step that follows an update or delete.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reclamation {
    Completed(ReclaimSummary),
    /// Reclaim failed and was rolled back on its own; the scheme change still
    /// committed and the orphans wait for the next sweep.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemeChange {
    pub scheme_id: String,
    pub reclamation: Reclamation,
}

/// Creates, replaces and deletes schemes.
///
/// Each mutation is one write transaction: scheme row, association rows and
/// pool interning commit together or not at all. Reclamation runs in the same
/// transaction, after the unlink, under a savepoint of its own.
pub struct SchemeManager<'a> {
    db: &'a mut Database,
}

impl<'a> SchemeManager<'a> {
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    pub fn create_scheme(&mut self, draft: &SchemeDraft) -> Result<Scheme> {
        draft.validate()?;

        let tx = self.db.write()?;
        let id = new_id();
        tx.execute(
            "INSERT INTO schemes (id, name) VALUES (?1, ?2)",
            params![id, draft.name.trim()],
        )
        .map_err(|e| FasError::from_insert(e, "scheme"))?;

        link_specs(&tx, &id, draft)?;

        let scheme = db::load_scheme(&tx, &id)?.ok_or_else(|| FasError::not_found("scheme", &id))?;
        tx.commit()?;

        info!(
            "Created scheme '{}' ({}) with {} criteria and {} benefits",
            scheme.name,
            scheme.id,
            scheme.criteria.len(),
            scheme.benefits.len()
        );
        Ok(scheme)
    }

    /// Replace the name and the full criteria/benefit sets.
    pub fn update_scheme(&mut self, id: &str, draft: &SchemeDraft) -> Result<SchemeChange> {
        draft.validate()?;

        let mut tx = self.db.write()?;
        if !db::exists(&tx, "schemes", id)? {
            return Err(FasError::not_found("scheme", id));
        }

        tx.execute(
            "UPDATE schemes SET name = ?1 WHERE id = ?2",
            params![draft.name.trim(), id],
        )
        .map_err(|e| FasError::from_insert(e, "scheme"))?;

        tx.execute("DELETE FROM scheme_criteria WHERE scheme_id = ?1", [id])?;
        tx.execute("DELETE FROM scheme_benefits WHERE scheme_id = ?1", [id])?;
        link_specs(&tx, id, draft)?;

        let reclamation = reclaim_guarded(&mut tx, id);
        tx.commit()?;

        info!("Updated scheme '{}' ({})", draft.name.trim(), id);
        Ok(SchemeChange {
            scheme_id: id.to_string(),
            reclamation,
        })
    }

    /// Remove the scheme; its links and applications go with it.
    pub fn delete_scheme(&mut self, id: &str) -> Result<SchemeChange> {
        let mut tx = self.db.write()?;
        let removed = tx.execute("DELETE FROM schemes WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(FasError::not_found("scheme", id));
        }

        let reclamation = reclaim_guarded(&mut tx, id);
        tx.commit()?;

        info!("Deleted scheme {}", id);
        Ok(SchemeChange {
            scheme_id: id.to_string(),
            reclamation,
        })
    }

    pub fn get_scheme(&mut self, id: &str) -> Result<Scheme> {
        let tx = self.db.read()?;
        let scheme = db::load_scheme(&tx, id)?;
        tx.finish()?;
        scheme.ok_or_else(|| FasError::not_found("scheme", id))
    }

    pub fn list_schemes(&mut self) -> Result<Vec<Scheme>> {
        let tx = self.db.read()?;
        let schemes = db::load_schemes(&tx)?;
        tx.finish()?;
        Ok(schemes)
    }
}

/// Intern every spec of the draft and link it to the scheme. Repeated specs
/// collapse to one link.
fn link_specs(conn: &Connection, scheme_id: &str, draft: &SchemeDraft) -> Result<()> {
    let criteria: BTreeSet<&CriterionSpec> = draft.criteria.iter().collect();
    for spec in criteria {
        let criteria_id = Pool::intern_criterion(conn, spec)?;
        conn.execute(
            "INSERT INTO scheme_criteria (scheme_id, criteria_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
            params![scheme_id, criteria_id],
        )?;
    }

    let benefits: BTreeSet<&BenefitSpec> = draft.benefits.iter().collect();
    for spec in benefits {
        let benefit_id = Pool::intern_benefit(conn, spec)?;
        conn.execute(
            "INSERT INTO scheme_benefits (scheme_id, benefit_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
            params![scheme_id, benefit_id],
        )?;
    }

    Ok(())
}

fn reclaim_guarded(tx: &mut Transaction<'_>, scheme_id: &str) -> Reclamation {
    match reclaim_in_savepoint(tx) {
        Ok(summary) => Reclamation::Completed(summary),
        Err(e) => {
            warn!("Reclaim after change to scheme {} skipped: {}", scheme_id, e);
            Reclamation::Skipped {
                reason: e.to_string(),
            }
        }
    }
}

fn reclaim_in_savepoint(tx: &mut Transaction<'_>) -> Result<ReclaimSummary> {
    let sp = tx.savepoint()?;
    let summary = Pool::reclaim(&sp)?;
    sp.commit()?;
    Ok(summary)
}
