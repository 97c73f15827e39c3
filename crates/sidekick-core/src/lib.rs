pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::SidekickConfig;
pub use error::{Result, SidekickError};
pub use types::*;
