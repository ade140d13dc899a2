pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod language;
pub mod logging;
pub mod model;
pub mod remote;
pub mod stats;

pub use cancel::CancellationToken;
pub use error::{Result, StatError};
pub use stats::Stats;
