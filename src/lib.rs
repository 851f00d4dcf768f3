pub mod cli;
pub mod config;
pub mod error;
pub mod import;
pub mod intake;
pub mod pool;
pub mod schemes;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use error::{ErrorKind, FasError, Result};
