pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod object;

pub use error::{ReaperError, Result};
