use chrono::Utc;
use rusqlite::params;
use tracing::info;

use crate::{
    error::{FasError, Result},
    storage::{
        db,
        models::{new_id, Application, ApplicationPatch, ApplicationRequest, ApplicationStatus},
        Database,
    },
};

/// Applications of applicants to schemes. One application per pair.
pub struct ApplicationDesk<'a> {
    db: &'a mut Database,
}

impl<'a> ApplicationDesk<'a> {
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    /// File a new `Pending` application dated today (UTC).
    pub fn create_application(&mut self, applicant_id: &str, scheme_id: &str) -> Result<Application> {
        let tx = self.db.write()?;
        if !db::exists(&tx, "applicants", applicant_id)? {
            return Err(FasError::not_found("applicant", applicant_id));
        }
        if !db::exists(&tx, "schemes", scheme_id)? {
            return Err(FasError::not_found("scheme", scheme_id));
        }

        let application = Application {
            id: new_id(),
            applicant_id: applicant_id.to_string(),
            scheme_id: scheme_id.to_string(),
            status: ApplicationStatus::Pending,
            applied_date: Utc::now().date_naive(),
        };
        tx.execute(
            "INSERT INTO applications (id, applicant_id, scheme_id, status, applied_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                application.id,
                application.applicant_id,
                application.scheme_id,
                application.status,
                application.applied_date
            ],
        )
        .map_err(|e| FasError::from_insert(e, "applicant and scheme"))?;
        tx.commit()?;

        info!(
            "Applicant {} applied for scheme {} ({})",
            applicant_id, scheme_id, application.id
        );
        Ok(application)
    }

    pub fn submit(&mut self, request: &ApplicationRequest) -> Result<Application> {
        self.create_application(request.applicant_id.trim(), request.scheme_id.trim())
    }

    pub fn list_applications(&mut self) -> Result<Vec<Application>> {
        let tx = self.db.read()?;
        let applications = db::load_applications(&tx)?;
        tx.finish()?;
        Ok(applications)
    }

    pub fn get_application(&mut self, id: &str) -> Result<Application> {
        let tx = self.db.read()?;
        let application = db::load_application(&tx, id)?;
        tx.finish()?;
        application.ok_or_else(|| FasError::not_found("application", id))
    }

    /// Apply the fields present in `patch`.
    pub fn update_application(&mut self, id: &str, patch: &ApplicationPatch) -> Result<Application> {
        let tx = self.db.write()?;
        let mut application =
            db::load_application(&tx, id)?.ok_or_else(|| FasError::not_found("application", id))?;

        if let Some(status) = patch.status {
            application.status = status;
        }
        if let Some(applied_date) = patch.applied_date {
            application.applied_date = applied_date;
        }

        tx.execute(
            "UPDATE applications SET status = ?1, applied_date = ?2 WHERE id = ?3",
            params![application.status, application.applied_date, id],
        )?;
        tx.commit()?;

        info!("Application {} is now {}", id, application.status);
        Ok(application)
    }

    pub fn delete_application(&mut self, id: &str) -> Result<()> {
        let tx = self.db.write()?;
        let removed = tx.execute("DELETE FROM applications WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(FasError::not_found("application", id));
        }
        tx.commit()?;

        info!("Deleted application {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::intake::ApplicantIntake;
    use crate::schemes::SchemeManager;
    use crate::storage::{ApplicantDraft, EmploymentStatus, MaritalStatus, SchemeDraft, Sex};
    use chrono::NaiveDate;

    fn seed(db: &mut Database) -> (String, String) {
        let applicant = ApplicantIntake::new(db)
            .create_applicant(&ApplicantDraft {
                name: "James".to_string(),
                employment_status: EmploymentStatus::Employed,
                marital_status: MaritalStatus::Single,
                sex: Sex::Male,
                date_of_birth: NaiveDate::from_ymd_opt(1990, 7, 1).unwrap(),
                household: vec![],
            })
            .unwrap();
        let scheme = SchemeManager::new(db)
            .create_scheme(&SchemeDraft {
                name: "Open Grant".to_string(),
                criteria: vec![],
                benefits: vec![],
            })
            .unwrap();
        (applicant.id, scheme.id)
    }

    #[test]
    fn test_new_application_is_pending_today() {
        let mut db = Database::in_memory().unwrap();
        let (applicant_id, scheme_id) = seed(&mut db);
        let mut desk = ApplicationDesk::new(&mut db);

        let before = Utc::now().date_naive();
        let application = desk.create_application(&applicant_id, &scheme_id).unwrap();
        let after = Utc::now().date_naive();

        assert_eq!(application.status, ApplicationStatus::Pending);
        assert!(before <= application.applied_date && application.applied_date <= after);
        assert_eq!(desk.get_application(&application.id).unwrap(), application);
    }

    #[test]
    fn test_second_application_conflicts() {
        let mut db = Database::in_memory().unwrap();
        let (applicant_id, scheme_id) = seed(&mut db);
        let mut desk = ApplicationDesk::new(&mut db);
        desk.create_application(&applicant_id, &scheme_id).unwrap();

        let err = desk.create_application(&applicant_id, &scheme_id).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(desk.list_applications().unwrap().len(), 1);
    }

    #[test]
    fn test_submit_request_from_json() {
        let mut db = Database::in_memory().unwrap();
        let (applicant_id, scheme_id) = seed(&mut db);
        let request: ApplicationRequest = serde_json::from_str(&format!(
            r#"{{"applicant_id": "{}", "scheme_id": "{}"}}"#,
            applicant_id, scheme_id
        ))
        .unwrap();

        let application = ApplicationDesk::new(&mut db).submit(&request).unwrap();

        assert_eq!(application.applicant_id, applicant_id);
        assert_eq!(application.scheme_id, scheme_id);
    }

    #[test]
    fn test_missing_parent_is_not_found() {
        let mut db = Database::in_memory().unwrap();
        let (applicant_id, scheme_id) = seed(&mut db);
        let mut desk = ApplicationDesk::new(&mut db);

        match desk.create_application("ghost", &scheme_id).unwrap_err() {
            FasError::NotFound { entity, .. } => assert_eq!(entity, "applicant"),
            other => panic!("unexpected error: {}", other),
        }
        match desk.create_application(&applicant_id, "ghost").unwrap_err() {
            FasError::NotFound { entity, .. } => assert_eq!(entity, "scheme"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let mut db = Database::in_memory().unwrap();
        let (applicant_id, scheme_id) = seed(&mut db);
        let mut desk = ApplicationDesk::new(&mut db);
        let created = desk.create_application(&applicant_id, &scheme_id).unwrap();

        let updated = desk
            .update_application(
                &created.id,
                &ApplicationPatch {
                    status: Some(ApplicationStatus::Approved),
                    applied_date: None,
                },
            )
            .unwrap();

        assert_eq!(updated.status, ApplicationStatus::Approved);
        assert_eq!(updated.applied_date, created.applied_date);
        assert_eq!(desk.get_application(&created.id).unwrap(), updated);
    }

    #[test]
    fn test_scheme_delete_cascades_applications() {
        let mut db = Database::in_memory().unwrap();
        let (applicant_id, scheme_id) = seed(&mut db);
        ApplicationDesk::new(&mut db)
            .create_application(&applicant_id, &scheme_id)
            .unwrap();

        SchemeManager::new(&mut db).delete_scheme(&scheme_id).unwrap();

        assert!(ApplicationDesk::new(&mut db).list_applications().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_application_is_not_found() {
        let mut db = Database::in_memory().unwrap();
        let mut desk = ApplicationDesk::new(&mut db);

        assert_eq!(desk.get_application("nope").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            desk.update_application("nope", &ApplicationPatch::default())
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(desk.delete_application("nope").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
