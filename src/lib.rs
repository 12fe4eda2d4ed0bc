pub mod config;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod sandbox;
pub mod stages;
pub mod target;
pub mod telemetry;
pub mod ui;
