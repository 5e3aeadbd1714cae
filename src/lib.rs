pub mod config;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod local;
pub mod utils;

pub use error::{ExperimentError, Result};
