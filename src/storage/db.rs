use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::{
    config::DatabaseConfig,
    error::{FasError, Result},
    storage::models::{
        Applicant, Application, Benefit, Criterion, HouseholdMember, Scheme,
    },
};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open(&config.path, config.busy_timeout())
    }

    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        // WAL lets readers keep their snapshot while a writer holds the lock
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("Opened {} (journal_mode={})", path, mode);

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS applicants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                employment_status TEXT NOT NULL,
                marital_status TEXT NOT NULL,
                sex TEXT NOT NULL,
                date_of_birth TEXT NOT NULL,
                UNIQUE (name, date_of_birth)
            );

            CREATE TABLE IF NOT EXISTS household (
                id TEXT PRIMARY KEY,
                applicant_id TEXT NOT NULL REFERENCES applicants(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                relationship TEXT NOT NULL,
                sex TEXT NOT NULL,
                school_level TEXT NOT NULL,
                employment_status TEXT NOT NULL,
                date_of_birth TEXT NOT NULL,
                UNIQUE (applicant_id, name, date_of_birth)
            );

            CREATE TABLE IF NOT EXISTS schemes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS criteria (
                id TEXT PRIMARY KEY,
                criteria_level TEXT NOT NULL,
                criteria_type TEXT NOT NULL,
                status TEXT NOT NULL,
                UNIQUE (criteria_level, criteria_type, status)
            );

            CREATE TABLE IF NOT EXISTS scheme_criteria (
                scheme_id TEXT NOT NULL REFERENCES schemes(id) ON DELETE CASCADE,
                criteria_id TEXT NOT NULL REFERENCES criteria(id) ON DELETE CASCADE,
                PRIMARY KEY (scheme_id, criteria_id)
            );

            CREATE TABLE IF NOT EXISTS benefits (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
                UNIQUE (name, amount_cents)
            );

            CREATE TABLE IF NOT EXISTS scheme_benefits (
                scheme_id TEXT NOT NULL REFERENCES schemes(id) ON DELETE CASCADE,
                benefit_id TEXT NOT NULL REFERENCES benefits(id) ON DELETE CASCADE,
                PRIMARY KEY (scheme_id, benefit_id)
            );

            CREATE TABLE IF NOT EXISTS applications (
                id TEXT PRIMARY KEY,
                applicant_id TEXT NOT NULL REFERENCES applicants(id) ON DELETE CASCADE,
                scheme_id TEXT NOT NULL REFERENCES schemes(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                applied_date TEXT NOT NULL,
                UNIQUE (applicant_id, scheme_id)
            );

            -- Reverse lookups for the reclamation scan
            CREATE INDEX IF NOT EXISTS idx_scheme_criteria_criteria ON scheme_criteria(criteria_id);
            CREATE INDEX IF NOT EXISTS idx_scheme_benefits_benefit ON scheme_benefits(benefit_id);
            CREATE INDEX IF NOT EXISTS idx_household_applicant ON household(applicant_id);",
        )?;
        Ok(())
    }

    /// Write transaction. Takes the write lock up front so every check made
    /// inside it holds until commit.
    pub fn write(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Read transaction giving a consistent snapshot across several queries.
    pub fn read(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Counts taken from one read snapshot.
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let tx = self.conn.unchecked_transaction()?;

        let count = |sql: &str| -> Result<usize> {
            let n: i64 = tx.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        // TOTAL never overflows; the sum is only displayed.
        let total_benefit_cents: f64 = tx.query_row(
            "SELECT TOTAL(b.amount_cents) FROM scheme_benefits sb JOIN benefits b ON b.id = sb.benefit_id",
            [],
            |row| row.get(0),
        )?;

        let stats = DatabaseStats {
            applicants: count("SELECT COUNT(*) FROM applicants")?,
            household_members: count("SELECT COUNT(*) FROM household")?,
            schemes: count("SELECT COUNT(*) FROM schemes")?,
            open_schemes: count(
                "SELECT COUNT(*) FROM schemes s
                 WHERE NOT EXISTS (SELECT 1 FROM scheme_criteria sc WHERE sc.scheme_id = s.id)",
            )?,
            criteria: count("SELECT COUNT(*) FROM criteria")?,
            benefits: count("SELECT COUNT(*) FROM benefits")?,
            applications: count("SELECT COUNT(*) FROM applications")?,
            pending_applications: count("SELECT COUNT(*) FROM applications WHERE status = 'Pending'")?,
            total_benefit_amount: total_benefit_cents / 100.0,
        };
        tx.finish()?;
        Ok(stats)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub applicants: usize,
    pub household_members: usize,
    pub schemes: usize,
    pub open_schemes: usize,
    pub criteria: usize,
    pub benefits: usize,
    pub applications: usize,
    pub pending_applications: usize,
    pub total_benefit_amount: f64,
}

// Row loaders shared by the services. They take a plain `Connection` so they
// work both on the database and inside an open transaction.

pub(crate) fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool> {
    Ok(conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table),
        [id],
        |row| row.get(0),
    )?)
}

pub(crate) fn load_household(conn: &Connection, applicant_id: &str) -> Result<Vec<HouseholdMember>> {
    let mut stmt = conn.prepare(
        "SELECT id, applicant_id, name, relationship, sex, school_level, employment_status, date_of_birth
         FROM household
         WHERE applicant_id = ?1
         ORDER BY date_of_birth, name",
    )?;

    let members = stmt
        .query_map([applicant_id], |row| {
            Ok(HouseholdMember {
                id: row.get(0)?,
                applicant_id: row.get(1)?,
                name: row.get(2)?,
                relationship: row.get(3)?,
                sex: row.get(4)?,
                school_level: row.get(5)?,
                employment_status: row.get(6)?,
                date_of_birth: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(members)
}

pub(crate) fn load_applicant(conn: &Connection, id: &str) -> Result<Option<Applicant>> {
    let applicant = conn
        .query_row(
            "SELECT id, name, employment_status, marital_status, sex, date_of_birth
             FROM applicants
             WHERE id = ?1",
            [id],
            |row| {
                Ok(Applicant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    employment_status: row.get(2)?,
                    marital_status: row.get(3)?,
                    sex: row.get(4)?,
                    date_of_birth: row.get(5)?,
                    household: Vec::new(),
                })
            },
        )
        .optional()?;

    match applicant {
        Some(mut applicant) => {
            applicant.household = load_household(conn, &applicant.id)?;
            Ok(Some(applicant))
        }
        None => Ok(None),
    }
}

pub(crate) fn load_applicants(conn: &Connection) -> Result<Vec<Applicant>> {
    let ids = ids_of(conn, "SELECT id FROM applicants ORDER BY name, date_of_birth")?;
    let mut applicants = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(applicant) = load_applicant(conn, &id)? {
            applicants.push(applicant);
        }
    }
    Ok(applicants)
}

/// Criteria rows are parsed by hand so an unrecognised level or type
/// surfaces as invalid input rather than a storage failure.
pub(crate) fn load_criteria(conn: &Connection, scheme_id: &str) -> Result<Vec<Criterion>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.criteria_level, c.criteria_type, c.status
         FROM criteria c
         JOIN scheme_criteria sc ON c.id = sc.criteria_id
         WHERE sc.scheme_id = ?1
         ORDER BY c.criteria_level, c.criteria_type, c.status",
    )?;

    let rows = stmt
        .query_map([scheme_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, level, kind, status)| {
            Ok(Criterion {
                criteria_level: level.parse().map_err(|e| corrupt_criterion(&id, e))?,
                criteria_type: kind.parse().map_err(|e| corrupt_criterion(&id, e))?,
                id,
                status,
            })
        })
        .collect()
}

fn corrupt_criterion(id: &str, err: impl std::fmt::Display) -> FasError {
    FasError::InvalidInput(format!("stored criterion {} is malformed: {}", id, err))
}

pub(crate) fn load_benefits(conn: &Connection, scheme_id: &str) -> Result<Vec<Benefit>> {
    let mut stmt = conn.prepare(
        "SELECT b.id, b.name, b.amount_cents
         FROM benefits b
         JOIN scheme_benefits sb ON b.id = sb.benefit_id
         WHERE sb.scheme_id = ?1
         ORDER BY b.name, b.amount_cents",
    )?;

    let benefits = stmt
        .query_map([scheme_id], |row| {
            Ok(Benefit {
                id: row.get(0)?,
                name: row.get(1)?,
                amount: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(benefits)
}

pub(crate) fn load_scheme(conn: &Connection, id: &str) -> Result<Option<Scheme>> {
    let name: Option<String> = conn
        .query_row("SELECT name FROM schemes WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;

    match name {
        Some(name) => Ok(Some(Scheme {
            id: id.to_string(),
            name,
            criteria: load_criteria(conn, id)?,
            benefits: load_benefits(conn, id)?,
        })),
        None => Ok(None),
    }
}

pub(crate) fn load_schemes(conn: &Connection) -> Result<Vec<Scheme>> {
    let ids = ids_of(conn, "SELECT id FROM schemes ORDER BY name")?;
    let mut schemes = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(scheme) = load_scheme(conn, &id)? {
            schemes.push(scheme);
        }
    }
    Ok(schemes)
}

pub(crate) fn load_application(conn: &Connection, id: &str) -> Result<Option<Application>> {
    Ok(conn
        .query_row(
            "SELECT id, applicant_id, scheme_id, status, applied_date
             FROM applications
             WHERE id = ?1",
            params![id],
            |row| {
                Ok(Application {
                    id: row.get(0)?,
                    applicant_id: row.get(1)?,
                    scheme_id: row.get(2)?,
                    status: row.get(3)?,
                    applied_date: row.get(4)?,
                })
            },
        )
        .optional()?)
}

pub(crate) fn load_applications(conn: &Connection) -> Result<Vec<Application>> {
    let mut stmt = conn.prepare(
        "SELECT id, applicant_id, scheme_id, status, applied_date
         FROM applications
         ORDER BY applied_date DESC, id",
    )?;

    let applications = stmt
        .query_map([], |row| {
            Ok(Application {
                id: row.get(0)?,
                applicant_id: row.get(1)?,
                scheme_id: row.get(2)?,
                status: row.get(3)?,
                applied_date: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(applications)
}

fn ids_of(conn: &Connection, sql: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.init_schema().unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.schemes, 0);
        assert_eq!(stats.total_benefit_amount, 0.0);
    }

    #[test]
    fn test_stats_total_survives_large_amounts() {
        let db = Database::in_memory().unwrap();
        db.connection()
            .execute_batch(
                "INSERT INTO schemes (id, name) VALUES ('s1', 'One'), ('s2', 'Two');
                 INSERT INTO benefits (id, name, amount_cents) VALUES ('b1', 'Endowment', 5000000000000000000);
                 INSERT INTO scheme_benefits (scheme_id, benefit_id) VALUES ('s1', 'b1'), ('s2', 'b1');",
            )
            .unwrap();

        let stats = db.get_stats().unwrap();

        assert_eq!(stats.schemes, 2);
        assert_eq!(stats.benefits, 1);
        assert_eq!(stats.total_benefit_amount, 1e17);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::in_memory().unwrap();
        let err = db
            .connection()
            .execute(
                "INSERT INTO scheme_criteria (scheme_id, criteria_id) VALUES ('nope', 'nope')",
                [],
            )
            .unwrap_err();

        assert!(matches!(err, rusqlite::Error::SqliteFailure(..)));
    }

    #[test]
    fn test_malformed_criterion_is_invalid_input() {
        let db = Database::in_memory().unwrap();
        db.connection()
            .execute_batch(
                "INSERT INTO schemes (id, name) VALUES ('s1', 'Broken');
                 INSERT INTO criteria (id, criteria_level, criteria_type, status)
                    VALUES ('c1', 'individual', 'favourite_colour', 'blue');
                 INSERT INTO scheme_criteria (scheme_id, criteria_id) VALUES ('s1', 'c1');",
            )
            .unwrap();

        let err = load_scheme(db.connection(), "s1").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_file_database_opens_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fas.db");
        let db = Database::new(path.to_str().unwrap()).unwrap();

        let mode: String = db
            .connection()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
