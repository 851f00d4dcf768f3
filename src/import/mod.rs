pub mod batch;

pub use batch::{BatchImporter, ImportSummary, SeedDocument};
