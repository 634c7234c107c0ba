//! Command-line front end over the feature query core and the job engine.

pub mod app;
pub mod config;

pub use app::App;
pub use config::{AppConfig, JobsConfig};
