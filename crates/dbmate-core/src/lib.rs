pub mod config;
pub mod error;
pub mod url;

pub use config::{DatabaseConfig, DbmateConfig, TransactionMode};
pub use error::{DbmateError, Result};
pub use crate::url::ConnectionDescriptor;
