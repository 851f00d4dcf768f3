pub mod eligibility;
pub mod lifecycle;

pub use eligibility::{
    eligible_schemes, explain, is_eligible, satisfies, EligibilityChecker, EligibilityReport,
    EligibilitySnapshot, EligibilitySource,
};
pub use lifecycle::{Reclamation, SchemeChange, SchemeManager};
