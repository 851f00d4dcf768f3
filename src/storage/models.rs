use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{FasError, Result};

/// Raised when a string is outside a field's closed value set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field} '{value}', valid options: [{options}]")]
pub struct ParseValueError {
    pub field: &'static str,
    pub value: String,
    pub options: String,
}

impl From<ParseValueError> for FasError {
    fn from(err: ParseValueError) -> Self {
        FasError::InvalidInput(err.to_string())
    }
}

/// Declares a closed value set: canonical spelling, case-insensitive parsing,
/// serde and SQLite text conversions.
macro_rules! closed_set {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseValueError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let s = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| ParseValueError {
                        field: $field,
                        value: s.to_string(),
                        options: Self::ALL
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseValueError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

closed_set!(EmploymentStatus, "employment status" {
    Employed => "employed",
    Unemployed => "unemployed",
    SelfEmployed => "self-employed",
    Retired => "retired",
});

closed_set!(MaritalStatus, "marital status" {
    Single => "single",
    Married => "married",
    Divorced => "divorced",
    Widowed => "widowed",
});

closed_set!(Sex, "sex" {
    Male => "male",
    Female => "female",
});

closed_set!(Relationship, "relationship" {
    Parent => "parent",
    Son => "son",
    Daughter => "daughter",
    Sibling => "sibling",
    Spouse => "spouse",
    Other => "other",
});

closed_set!(SchoolLevel, "school level" {
    None => "none",
    Primary => "primary",
    Secondary => "secondary",
    PostSecondary => "post-secondary",
    University => "university",
    Graduated => "graduated",
});

closed_set!(
    /// Whose facts a criterion is checked against.
    CriteriaLevel, "criteria level" {
    Individual => "individual",
    Household => "household",
});

closed_set!(CriteriaType, "criteria type" {
    EmploymentStatus => "employment_status",
    MaritalStatus => "marital_status",
    HasChildren => "has_children",
    SchoolLevel => "school_level",
});

closed_set!(ApplicationStatus, "application status" {
    Pending => "Pending",
    Approved => "Approved",
    Rejected => "Rejected",
    Withdrawn => "Withdrawn",
});

impl Relationship {
    pub fn is_child(&self) -> bool {
        matches!(self, Relationship::Son | Relationship::Daughter)
    }
}

/// Non-negative currency value held as whole cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Amount(i64);

impl Amount {
    /// Largest accepted amount, one trillion in whole currency units.
    pub const MAX_CENTS: i64 = 100_000_000_000_000;

    pub fn from_cents(cents: i64) -> Result<Self> {
        if cents < 0 {
            return Err(FasError::InvalidInput(format!(
                "benefit amount must not be negative, got {} cents",
                cents
            )));
        }
        if cents > Self::MAX_CENTS {
            return Err(FasError::InvalidInput(format!(
                "benefit amount must not exceed {} cents, got {}",
                Self::MAX_CENTS,
                cents
            )));
        }
        Ok(Self(cents))
    }

    pub fn from_decimal(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(FasError::InvalidInput(format!(
                "benefit amount must be a finite number, got {}",
                value
            )));
        }
        let cents = (value * 100.0).round();
        if cents < 0.0 || cents > Self::MAX_CENTS as f64 {
            return Err(FasError::InvalidInput(format!(
                "benefit amount must be between 0 and {}, got {}",
                Self(Self::MAX_CENTS),
                value
            )));
        }
        Self::from_cents(cents as i64)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_decimal())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Amount::from_decimal(value).map_err(serde::de::Error::custom)
    }
}

impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Amount {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let cents = value.as_i64()?;
        if !(0..=Amount::MAX_CENTS).contains(&cents) {
            return Err(FromSqlError::OutOfRange(cents));
        }
        Ok(Amount(cents))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applicant {
    pub id: String,
    pub name: String,
    pub employment_status: EmploymentStatus,
    pub marital_status: MaritalStatus,
    pub sex: Sex,
    pub date_of_birth: NaiveDate,
    pub household: Vec<HouseholdMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdMember {
    pub id: String,
    pub applicant_id: String,
    pub name: String,
    pub relationship: Relationship,
    pub sex: Sex,
    pub school_level: SchoolLevel,
    pub employment_status: EmploymentStatus,
    pub date_of_birth: NaiveDate,
}

/// Applicant as submitted for intake or replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantDraft {
    pub name: String,
    pub employment_status: EmploymentStatus,
    pub marital_status: MaritalStatus,
    pub sex: Sex,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub household: Vec<HouseholdMemberDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdMemberDraft {
    pub name: String,
    pub relationship: Relationship,
    pub sex: Sex,
    pub school_level: SchoolLevel,
    pub employment_status: EmploymentStatus,
    pub date_of_birth: NaiveDate,
}

impl ApplicantDraft {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FasError::InvalidInput("applicant name is required".to_string()));
        }
        if self.household.iter().any(|m| m.name.trim().is_empty()) {
            return Err(FasError::InvalidInput(
                "household member name is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub criteria_level: CriteriaLevel,
    pub criteria_type: CriteriaType,
    pub status: String,
}

/// Content key of a criterion. Two specs that compare equal intern to the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CriterionSpec {
    pub criteria_level: CriteriaLevel,
    pub criteria_type: CriteriaType,
    #[serde(default, deserialize_with = "canonical_status")]
    pub status: String,
}

impl CriterionSpec {
    pub fn new(criteria_level: CriteriaLevel, criteria_type: CriteriaType, status: &str) -> Self {
        Self {
            criteria_level,
            criteria_type,
            status: canonicalize_status(status),
        }
    }
}

impl Criterion {
    pub fn spec(&self) -> CriterionSpec {
        CriterionSpec {
            criteria_level: self.criteria_level,
            criteria_type: self.criteria_type,
            status: self.status.clone(),
        }
    }
}

impl fmt::Display for CriterionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.criteria_type == CriteriaType::HasChildren {
            write!(f, "{}/{}", self.criteria_level, self.criteria_type)
        } else {
            write!(f, "{}/{}={}", self.criteria_level, self.criteria_type, self.status)
        }
    }
}

fn canonicalize_status(status: &str) -> String {
    status.trim().to_lowercase()
}

fn canonical_status<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(canonicalize_status(&raw))
}

fn trimmed<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Benefit {
    pub id: String,
    pub name: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BenefitSpec {
    #[serde(deserialize_with = "trimmed")]
    pub name: String,
    pub amount: Amount,
}

impl BenefitSpec {
    pub fn new(name: &str, amount: Amount) -> Self {
        Self {
            name: name.trim().to_string(),
            amount,
        }
    }
}

impl Benefit {
    pub fn spec(&self) -> BenefitSpec {
        BenefitSpec {
            name: self.name.clone(),
            amount: self.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheme {
    pub id: String,
    pub name: String,
    pub criteria: Vec<Criterion>,
    pub benefits: Vec<Benefit>,
}

impl Scheme {
    /// Open-enrollment schemes carry no criteria.
    pub fn is_open(&self) -> bool {
        self.criteria.is_empty()
    }
}

/// Scheme as submitted for creation or full replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeDraft {
    pub name: String,
    #[serde(default)]
    pub criteria: Vec<CriterionSpec>,
    #[serde(default)]
    pub benefits: Vec<BenefitSpec>,
}

impl SchemeDraft {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FasError::InvalidInput("scheme name is required".to_string()));
        }
        if self.benefits.iter().any(|b| b.name.trim().is_empty()) {
            return Err(FasError::InvalidInput("benefit name is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub applicant_id: String,
    pub scheme_id: String,
    pub status: ApplicationStatus,
    pub applied_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRequest {
    pub applicant_id: String,
    pub scheme_id: String,
}

/// Administrative edit of an application; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationPatch {
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
    #[serde(default)]
    pub applied_date: Option<NaiveDate>,
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
