pub mod db;
pub mod models;

pub use db::{Database, DatabaseStats};
pub use models::{
    Amount, Applicant, ApplicantDraft, Application, ApplicationPatch, ApplicationRequest,
    ApplicationStatus, Benefit, BenefitSpec, CriteriaLevel, CriteriaType, Criterion,
    CriterionSpec, EmploymentStatus, HouseholdMember, HouseholdMemberDraft, MaritalStatus,
    Relationship, Scheme, SchemeDraft, SchoolLevel, Sex,
};
