pub mod actions;
pub mod analysis;
pub mod audit;
pub mod cancel;
pub mod config;
pub mod config_store;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod model;
pub mod progress;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod storage;

pub use cancel::CancelToken;
pub use config::AppConfig;
pub use engine::{Audited, DuplicateScan, Janitor};
pub use error::{Error, Result};
pub use progress::{ProgressReporter, SilentReporter};
