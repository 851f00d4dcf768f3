use serde::Serialize;
use tracing::debug;

use crate::{
    error::{FasError, Result},
    storage::{
        db,
        models::{Applicant, CriteriaLevel, CriteriaType, Criterion, Scheme},
        Database,
    },
};

/// Why a single criterion is not met, or `None` when it is.
///
/// Individual criteria look at the applicant, household criteria need one
/// matching member (members may differ between criteria). Level/type pairs
/// without a defined meaning never match.
pub fn unmet_reason(applicant: &Applicant, criterion: &Criterion) -> Option<String> {
    let wanted = criterion.status.as_str();

    match (criterion.criteria_level, criterion.criteria_type) {
        (CriteriaLevel::Individual, CriteriaType::EmploymentStatus) => {
            let actual = applicant.employment_status.as_str();
            (actual != wanted).then(|| {
                format!("employment status is '{}', requires '{}'", actual, wanted)
            })
        }
        (CriteriaLevel::Individual, CriteriaType::MaritalStatus) => {
            let actual = applicant.marital_status.as_str();
            (actual != wanted)
                .then(|| format!("marital status is '{}', requires '{}'", actual, wanted))
        }
        (CriteriaLevel::Individual, CriteriaType::HasChildren) => {
            let has_children = applicant.household.iter().any(|m| m.relationship.is_child());
            (!has_children).then(|| "no son or daughter in household".to_string())
        }
        (CriteriaLevel::Household, CriteriaType::SchoolLevel) => {
            let matched = applicant
                .household
                .iter()
                .any(|m| m.school_level.as_str() == wanted);
            (!matched).then(|| household_miss(applicant, "school level", wanted))
        }
        (CriteriaLevel::Household, CriteriaType::EmploymentStatus) => {
            let matched = applicant
                .household
                .iter()
                .any(|m| m.employment_status.as_str() == wanted);
            (!matched).then(|| household_miss(applicant, "employment status", wanted))
        }
        (level, kind) => Some(format!(
            "{} criteria of type {} are not supported",
            level, kind
        )),
    }
}

fn household_miss(applicant: &Applicant, field: &str, wanted: &str) -> String {
    if applicant.household.is_empty() {
        format!("household is empty, requires a member with {} '{}'", field, wanted)
    } else {
        format!("no household member with {} '{}'", field, wanted)
    }
}

pub fn satisfies(applicant: &Applicant, criterion: &Criterion) -> bool {
    unmet_reason(applicant, criterion).is_none()
}

/// Every criterion must hold; a scheme without criteria is open to all.
pub fn is_eligible(applicant: &Applicant, scheme: &Scheme) -> bool {
    scheme.criteria.iter().all(|c| satisfies(applicant, c))
}

/// Schemes the applicant qualifies for, in input order.
pub fn eligible_schemes(applicant: &Applicant, schemes: &[Scheme]) -> Vec<Scheme> {
    schemes
        .iter()
        .filter(|scheme| is_eligible(applicant, scheme))
        .cloned()
        .collect()
}

/// Per-scheme outcome with the reasons for every unmet criterion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibilityReport {
    pub scheme_id: String,
    pub scheme_name: String,
    pub eligible: bool,
    pub unmet: Vec<String>,
}

pub fn explain(applicant: &Applicant, scheme: &Scheme) -> EligibilityReport {
    let unmet: Vec<String> = scheme
        .criteria
        .iter()
        .filter_map(|c| unmet_reason(applicant, c).map(|reason| format!("{}: {}", c.spec(), reason)))
        .collect();

    EligibilityReport {
        scheme_id: scheme.id.clone(),
        scheme_name: scheme.name.clone(),
        eligible: unmet.is_empty(),
        unmet,
    }
}

/// An applicant's facts together with the scheme universe, read at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilitySnapshot {
    pub applicant: Applicant,
    pub schemes: Vec<Scheme>,
}

/// Where the checker reads facts from.
#[cfg_attr(test, mockall::automock)]
pub trait EligibilitySource {
    /// `None` when the applicant does not exist.
    fn snapshot(&self, applicant_id: &str) -> Result<Option<EligibilitySnapshot>>;
}

impl<T: EligibilitySource + ?Sized> EligibilitySource for &T {
    fn snapshot(&self, applicant_id: &str) -> Result<Option<EligibilitySnapshot>> {
        (**self).snapshot(applicant_id)
    }
}

impl EligibilitySource for Database {
    fn snapshot(&self, applicant_id: &str) -> Result<Option<EligibilitySnapshot>> {
        let tx = self.connection().unchecked_transaction()?;
        let applicant = match db::load_applicant(&tx, applicant_id)? {
            Some(applicant) => applicant,
            None => return Ok(None),
        };
        let schemes = db::load_schemes(&tx)?;
        tx.finish()?;

        Ok(Some(EligibilitySnapshot { applicant, schemes }))
    }
}

/// Answers eligibility queries keyed by applicant id, recomputed on every call.
pub struct EligibilityChecker<S> {
    source: S,
}

impl<S: EligibilitySource> EligibilityChecker<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    fn load(&self, applicant_id: &str) -> Result<EligibilitySnapshot> {
        self.source
            .snapshot(applicant_id)?
            .ok_or_else(|| FasError::not_found("applicant", applicant_id))
    }

    pub fn eligible_schemes_for(&self, applicant_id: &str) -> Result<Vec<Scheme>> {
        let snapshot = self.load(applicant_id)?;
        let eligible = eligible_schemes(&snapshot.applicant, &snapshot.schemes);

        debug!(
            "Applicant {} eligible for {} of {} schemes",
            applicant_id,
            eligible.len(),
            snapshot.schemes.len()
        );
        Ok(eligible)
    }

    pub fn explain_for(&self, applicant_id: &str) -> Result<Vec<EligibilityReport>> {
        let snapshot = self.load(applicant_id)?;
        Ok(snapshot
            .schemes
            .iter()
            .map(|scheme| explain(&snapshot.applicant, scheme))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{
        EmploymentStatus, HouseholdMember, MaritalStatus, Relationship, SchoolLevel, Sex,
    };
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn applicant(household: Vec<HouseholdMember>) -> Applicant {
        Applicant {
            id: "a1".to_string(),
            name: "Mary".to_string(),
            employment_status: EmploymentStatus::Employed,
            marital_status: MaritalStatus::Single,
            sex: Sex::Female,
            date_of_birth: date(1984, 10, 6),
            household,
        }
    }

    fn member(relationship: Relationship, school: SchoolLevel, work: EmploymentStatus) -> HouseholdMember {
        HouseholdMember {
            id: format!("m-{}-{}", relationship, school),
            applicant_id: "a1".to_string(),
            name: format!("{} {}", relationship, school),
            relationship,
            sex: Sex::Male,
            school_level: school,
            employment_status: work,
            date_of_birth: date(2016, 2, 1),
        }
    }

    fn criterion(level: CriteriaLevel, kind: CriteriaType, status: &str) -> Criterion {
        Criterion {
            id: format!("{}-{}-{}", level, kind, status),
            criteria_level: level,
            criteria_type: kind,
            status: status.to_string(),
        }
    }

    fn scheme(name: &str, criteria: Vec<Criterion>) -> Scheme {
        Scheme {
            id: name.to_lowercase(),
            name: name.to_string(),
            criteria,
            benefits: vec![],
        }
    }

    #[test]
    fn test_open_scheme_always_eligible() {
        let open = scheme("Open", vec![]);

        assert!(is_eligible(&applicant(vec![]), &open));
        assert!(is_eligible(
            &applicant(vec![member(Relationship::Son, SchoolLevel::Primary, EmploymentStatus::Unemployed)]),
            &open
        ));
    }

    #[test]
    fn test_individual_criteria() {
        let a = applicant(vec![]);

        assert!(satisfies(&a, &criterion(CriteriaLevel::Individual, CriteriaType::EmploymentStatus, "employed")));
        assert!(!satisfies(&a, &criterion(CriteriaLevel::Individual, CriteriaType::EmploymentStatus, "unemployed")));
        assert!(satisfies(&a, &criterion(CriteriaLevel::Individual, CriteriaType::MaritalStatus, "single")));
        assert!(!satisfies(&a, &criterion(CriteriaLevel::Individual, CriteriaType::MaritalStatus, "married")));
    }

    #[test]
    fn test_has_children_ignores_status() {
        let with_daughter = applicant(vec![member(
            Relationship::Daughter,
            SchoolLevel::Secondary,
            EmploymentStatus::Unemployed,
        )]);
        let with_spouse = applicant(vec![member(
            Relationship::Spouse,
            SchoolLevel::Graduated,
            EmploymentStatus::Employed,
        )]);
        let c = criterion(CriteriaLevel::Individual, CriteriaType::HasChildren, "whatever");

        assert!(satisfies(&with_daughter, &c));
        assert!(!satisfies(&with_spouse, &c));
    }

    #[test]
    fn test_household_criteria_can_match_different_members() {
        let a = applicant(vec![
            member(Relationship::Son, SchoolLevel::Primary, EmploymentStatus::Unemployed),
            member(Relationship::Spouse, SchoolLevel::Graduated, EmploymentStatus::Employed),
        ]);
        let s = scheme(
            "Family",
            vec![
                criterion(CriteriaLevel::Household, CriteriaType::SchoolLevel, "primary"),
                criterion(CriteriaLevel::Household, CriteriaType::EmploymentStatus, "employed"),
            ],
        );

        assert!(is_eligible(&a, &s));
    }

    #[test]
    fn test_unmatched_household_criterion_excludes_scheme() {
        let a = applicant(vec![member(
            Relationship::Son,
            SchoolLevel::Secondary,
            EmploymentStatus::Unemployed,
        )]);
        let s = scheme(
            "Primary Support",
            vec![
                criterion(CriteriaLevel::Individual, CriteriaType::EmploymentStatus, "employed"),
                criterion(CriteriaLevel::Household, CriteriaType::SchoolLevel, "primary"),
            ],
        );

        assert!(!is_eligible(&a, &s));
    }

    #[test]
    fn test_empty_household_never_satisfies_household_criteria() {
        let a = applicant(vec![]);
        let c = criterion(CriteriaLevel::Household, CriteriaType::EmploymentStatus, "employed");

        let reason = unmet_reason(&a, &c).unwrap();
        assert!(reason.starts_with("household is empty"));
    }

    #[test]
    fn test_unsupported_combination_fails_closed() {
        let a = applicant(vec![member(
            Relationship::Son,
            SchoolLevel::Primary,
            EmploymentStatus::Unemployed,
        )]);

        assert!(!satisfies(&a, &criterion(CriteriaLevel::Individual, CriteriaType::SchoolLevel, "primary")));
        assert!(!satisfies(&a, &criterion(CriteriaLevel::Household, CriteriaType::MaritalStatus, "single")));
    }

    #[test]
    fn test_matching_is_exact() {
        let a = applicant(vec![]);

        assert!(!satisfies(&a, &criterion(CriteriaLevel::Individual, CriteriaType::EmploymentStatus, "Employed")));
    }

    #[test]
    fn test_employed_single_scenario() {
        let a = applicant(vec![]);
        let s1 = scheme(
            "S1",
            vec![criterion(CriteriaLevel::Individual, CriteriaType::EmploymentStatus, "employed")],
        );
        let s2 = scheme(
            "S2",
            vec![
                criterion(CriteriaLevel::Individual, CriteriaType::EmploymentStatus, "employed"),
                criterion(CriteriaLevel::Individual, CriteriaType::HasChildren, ""),
            ],
        );

        let eligible = eligible_schemes(&a, &[s1.clone(), s2]);
        assert_eq!(eligible, vec![s1]);
    }

    #[test]
    fn test_explain_lists_every_unmet_criterion() {
        let a = applicant(vec![]);
        let s = scheme(
            "Retiree Family",
            vec![
                criterion(CriteriaLevel::Individual, CriteriaType::EmploymentStatus, "retired"),
                criterion(CriteriaLevel::Individual, CriteriaType::HasChildren, ""),
                criterion(CriteriaLevel::Individual, CriteriaType::MaritalStatus, "single"),
            ],
        );

        let report = explain(&a, &s);

        assert!(!report.eligible);
        assert_eq!(report.unmet.len(), 2);
        assert!(report.unmet[0].contains("requires 'retired'"));
        assert!(report.unmet[1].contains("no son or daughter"));
    }

    #[test]
    fn test_checker_reports_missing_applicant() {
        let mut source = MockEligibilitySource::new();
        source.expect_snapshot().returning(|_| Ok(None));

        let checker = EligibilityChecker::new(source);
        let err = checker.eligible_schemes_for("ghost").unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_checker_filters_snapshot() {
        let open = scheme("Open", vec![]);
        let closed = scheme(
            "Married Only",
            vec![criterion(CriteriaLevel::Individual, CriteriaType::MaritalStatus, "married")],
        );
        let snapshot = EligibilitySnapshot {
            applicant: applicant(vec![]),
            schemes: vec![open.clone(), closed],
        };

        let mut source = MockEligibilitySource::new();
        source
            .expect_snapshot()
            .times(2)
            .returning(move |_| Ok(Some(snapshot.clone())));

        let checker = EligibilityChecker::new(source);

        assert_eq!(checker.eligible_schemes_for("a1").unwrap(), vec![open]);
        let reports = checker.explain_for("a1").unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].eligible);
        assert!(!reports[1].eligible);
    }

    #[test]
    fn test_checker_propagates_source_failure() {
        let mut source = MockEligibilitySource::new();
        source
            .expect_snapshot()
            .returning(|_| Err(FasError::Database(rusqlite::Error::InvalidQuery)));

        let checker = EligibilityChecker::new(source);
        let err = checker.explain_for("a1").unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::StorageFailure);
    }
}
