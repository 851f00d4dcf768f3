pub mod applicants;
pub mod applications;

pub use applicants::ApplicantIntake;
pub use applications::ApplicationDesk;
