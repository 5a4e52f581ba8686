pub mod config;
pub mod error;
pub mod logging;

pub use config::TallyConfig;
pub use error::{ErrorCategory, TallyError};
pub use logging::{init_logging, init_logging_to_dir};
