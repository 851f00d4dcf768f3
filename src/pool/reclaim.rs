use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::Result,
    pool::Pool,
    storage::{
        models::{Benefit, Criterion},
        Database,
    },
};

/// Rows removed by one reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimSummary {
    pub criteria_removed: usize,
    pub benefits_removed: usize,
}

impl ReclaimSummary {
    pub fn total(&self) -> usize {
        self.criteria_removed + self.benefits_removed
    }
}

/// Pooled entry with the number of schemes linking it.
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntry<T> {
    #[serde(flatten)]
    pub item: T,
    pub references: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolUsage {
    pub criteria: Vec<PoolEntry<Criterion>>,
    pub benefits: Vec<PoolEntry<Benefit>>,
}

impl PoolUsage {
    pub fn orphans(&self) -> usize {
        self.criteria.iter().filter(|e| e.references == 0).count()
            + self.benefits.iter().filter(|e| e.references == 0).count()
    }
}

impl Pool {
    /// Delete every criterion and benefit no scheme links to.
    ///
    /// Must run on a connection holding the write lock (inside `Database::write`
    /// or a savepoint of it), so that the zero-reference check and the delete
    /// see the same association rows as every concurrent writer.
    pub fn reclaim(conn: &Connection) -> Result<ReclaimSummary> {
        let criteria_removed = conn.execute(
            "DELETE FROM criteria
             WHERE NOT EXISTS (SELECT 1 FROM scheme_criteria sc WHERE sc.criteria_id = criteria.id)",
            [],
        )?;

        let benefits_removed = conn.execute(
            "DELETE FROM benefits
             WHERE NOT EXISTS (SELECT 1 FROM scheme_benefits sb WHERE sb.benefit_id = benefits.id)",
            [],
        )?;

        let summary = ReclaimSummary {
            criteria_removed,
            benefits_removed,
        };
        debug!(
            "Reclaimed {} criteria and {} benefits",
            summary.criteria_removed, summary.benefits_removed
        );
        Ok(summary)
    }

    /// Standalone reclamation pass in its own write transaction.
    ///
    /// Scheme mutations already reclaim inline; this only catches rows left
    /// behind by a reclaim that failed and was skipped.
    pub fn sweep(db: &mut Database) -> Result<ReclaimSummary> {
        let tx = db.write()?;
        let summary = Self::reclaim(&tx)?;
        tx.commit()?;

        if summary.total() > 0 {
            info!(
                "Sweep removed {} orphaned criteria and {} orphaned benefits",
                summary.criteria_removed, summary.benefits_removed
            );
        }
        Ok(summary)
    }

    /// Every pooled definition with its reference count, read from one snapshot.
    pub fn usage(db: &Database) -> Result<PoolUsage> {
        let tx = db.connection().unchecked_transaction()?;

        let mut stmt = tx.prepare(
            "SELECT c.id, c.criteria_level, c.criteria_type, c.status, COUNT(sc.scheme_id)
             FROM criteria c
             LEFT JOIN scheme_criteria sc ON sc.criteria_id = c.id
             GROUP BY c.id
             ORDER BY c.criteria_level, c.criteria_type, c.status",
        )?;
        let criteria = stmt
            .query_map([], |row| {
                Ok(PoolEntry {
                    item: Criterion {
                        id: row.get(0)?,
                        criteria_level: row.get(1)?,
                        criteria_type: row.get(2)?,
                        status: row.get(3)?,
                    },
                    references: row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut stmt = tx.prepare(
            "SELECT b.id, b.name, b.amount_cents, COUNT(sb.scheme_id)
             FROM benefits b
             LEFT JOIN scheme_benefits sb ON sb.benefit_id = b.id
             GROUP BY b.id
             ORDER BY b.name, b.amount_cents",
        )?;
        let benefits = stmt
            .query_map([], |row| {
                Ok(PoolEntry {
                    item: Benefit {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        amount: row.get(2)?,
                    },
                    references: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        tx.finish()?;

        Ok(PoolUsage { criteria, benefits })
    }
}
