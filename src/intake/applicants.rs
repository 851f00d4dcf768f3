use rusqlite::{params, Connection};
use tracing::info;

use crate::{
    error::{FasError, Result},
    storage::{
        db,
        models::{new_id, Applicant, ApplicantDraft},
        Database,
    },
};

/// Applicant records and their households.
pub struct ApplicantIntake<'a> {
    db: &'a mut Database,
}

impl<'a> ApplicantIntake<'a> {
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    /// Store the applicant together with their household in one transaction.
    pub fn create_applicant(&mut self, draft: &ApplicantDraft) -> Result<Applicant> {
        draft.validate()?;

        let tx = self.db.write()?;
        let id = new_id();
        tx.execute(
            "INSERT INTO applicants (id, name, employment_status, marital_status, sex, date_of_birth)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                draft.name.trim(),
                draft.employment_status,
                draft.marital_status,
                draft.sex,
                draft.date_of_birth
            ],
        )
        .map_err(|e| FasError::from_insert(e, "applicant"))?;

        insert_household(&tx, &id, draft)?;

        let applicant =
            db::load_applicant(&tx, &id)?.ok_or_else(|| FasError::not_found("applicant", &id))?;
        tx.commit()?;

        info!(
            "Registered applicant {} ({}) with {} household members",
            applicant.name,
            applicant.id,
            applicant.household.len()
        );
        Ok(applicant)
    }

    pub fn list_applicants(&mut self) -> Result<Vec<Applicant>> {
        let tx = self.db.read()?;
        let applicants = db::load_applicants(&tx)?;
        tx.finish()?;
        Ok(applicants)
    }

    pub fn get_applicant(&mut self, id: &str) -> Result<Applicant> {
        let tx = self.db.read()?;
        let applicant = db::load_applicant(&tx, id)?;
        tx.finish()?;
        applicant.ok_or_else(|| FasError::not_found("applicant", id))
    }

    /// Replace the applicant's fields and their whole household.
    pub fn update_applicant(&mut self, id: &str, draft: &ApplicantDraft) -> Result<Applicant> {
        draft.validate()?;

        let tx = self.db.write()?;
        let updated = tx
            .execute(
                "UPDATE applicants
                 SET name = ?1, employment_status = ?2, marital_status = ?3, sex = ?4, date_of_birth = ?5
                 WHERE id = ?6",
                params![
                    draft.name.trim(),
                    draft.employment_status,
                    draft.marital_status,
                    draft.sex,
                    draft.date_of_birth,
                    id
                ],
            )
            .map_err(|e| FasError::from_insert(e, "applicant"))?;
        if updated == 0 {
            return Err(FasError::not_found("applicant", id));
        }

        tx.execute("DELETE FROM household WHERE applicant_id = ?1", [id])?;
        insert_household(&tx, id, draft)?;

        let applicant =
            db::load_applicant(&tx, id)?.ok_or_else(|| FasError::not_found("applicant", id))?;
        tx.commit()?;

        info!("Updated applicant {} ({})", applicant.name, applicant.id);
        Ok(applicant)
    }

    /// Remove the applicant; household and applications go with it.
    pub fn delete_applicant(&mut self, id: &str) -> Result<()> {
        let tx = self.db.write()?;
        let removed = tx.execute("DELETE FROM applicants WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(FasError::not_found("applicant", id));
        }
        tx.commit()?;

        info!("Deleted applicant {}", id);
        Ok(())
    }
}

fn insert_household(conn: &Connection, applicant_id: &str, draft: &ApplicantDraft) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO household
         (id, applicant_id, name, relationship, sex, school_level, employment_status, date_of_birth)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;

    for member in &draft.household {
        stmt.execute(params![
            new_id(),
            applicant_id,
            member.name.trim(),
            member.relationship,
            member.sex,
            member.school_level,
            member.employment_status,
            member.date_of_birth
        ])
        .map_err(|e| FasError::from_insert(e, "household member"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::{
        EmploymentStatus, HouseholdMemberDraft, MaritalStatus, Relationship, SchoolLevel, Sex,
    };
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn daughter(name: &str) -> HouseholdMemberDraft {
        HouseholdMemberDraft {
            name: name.to_string(),
            relationship: Relationship::Daughter,
            sex: Sex::Female,
            school_level: SchoolLevel::Primary,
            employment_status: EmploymentStatus::Unemployed,
            date_of_birth: date(2016, 2, 1),
        }
    }

    fn mary(household: Vec<HouseholdMemberDraft>) -> ApplicantDraft {
        ApplicantDraft {
            name: "Mary".to_string(),
            employment_status: EmploymentStatus::Unemployed,
            marital_status: MaritalStatus::Single,
            sex: Sex::Female,
            date_of_birth: date(1984, 10, 6),
            household,
        }
    }

    #[test]
    fn test_create_stores_household() {
        let mut db = Database::in_memory().unwrap();
        let mut intake = ApplicantIntake::new(&mut db);

        let created = intake.create_applicant(&mary(vec![daughter("Gwen")])).unwrap();

        assert_eq!(created.household.len(), 1);
        assert_eq!(created.household[0].applicant_id, created.id);
        assert_eq!(intake.get_applicant(&created.id).unwrap(), created);
    }

    #[test]
    fn test_duplicate_applicant_conflicts() {
        let mut db = Database::in_memory().unwrap();
        let mut intake = ApplicantIntake::new(&mut db);
        intake.create_applicant(&mary(vec![])).unwrap();

        let err = intake.create_applicant(&mary(vec![])).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(intake.list_applicants().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_member_rolls_back_applicant() {
        let mut db = Database::in_memory().unwrap();
        let mut intake = ApplicantIntake::new(&mut db);

        let err = intake
            .create_applicant(&mary(vec![daughter("Gwen"), daughter("Gwen")]))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(intake.list_applicants().unwrap().is_empty());
    }

    #[test]
    fn test_update_replaces_household() {
        let mut db = Database::in_memory().unwrap();
        let mut intake = ApplicantIntake::new(&mut db);
        let created = intake.create_applicant(&mary(vec![daughter("Gwen")])).unwrap();

        let mut draft = mary(vec![daughter("Jayden"), daughter("Ivy")]);
        draft.employment_status = EmploymentStatus::Employed;
        let updated = intake.update_applicant(&created.id, &draft).unwrap();

        assert_eq!(updated.employment_status, EmploymentStatus::Employed);
        let mut names: Vec<&str> = updated.household.iter().map(|m| m.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Ivy", "Jayden"]);
    }

    #[test]
    fn test_update_and_delete_unknown_are_not_found() {
        let mut db = Database::in_memory().unwrap();
        let mut intake = ApplicantIntake::new(&mut db);

        assert_eq!(
            intake.update_applicant("missing", &mary(vec![])).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            intake.delete_applicant("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_delete_cascades_household() {
        let mut db = Database::in_memory().unwrap();
        let id = {
            let mut intake = ApplicantIntake::new(&mut db);
            let created = intake.create_applicant(&mary(vec![daughter("Gwen")])).unwrap();
            intake.delete_applicant(&created.id).unwrap();
            created.id
        };

        let members: i64 = db
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM household WHERE applicant_id = ?1",
                [&id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(members, 0);
    }

    #[test]
    fn test_blank_name_is_invalid() {
        let mut db = Database::in_memory().unwrap();
        let mut intake = ApplicantIntake::new(&mut db);
        let mut draft = mary(vec![]);
        draft.name = "  ".to_string();

        assert_eq!(
            intake.create_applicant(&draft).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }
}
