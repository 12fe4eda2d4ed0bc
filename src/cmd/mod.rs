//! CLI command implementations.
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `run`       | `Run`            |
//! | `graph`     | `Graph`          |
//! | `telemetry` | `Telemetry`      |
//! | `config`    | `Config`         |
//!
//! Commands return the process exit code on success. Errors map through [`exit_code_for`].

pub mod config;
pub mod graph;
pub mod run;
pub mod telemetry;

pub use config::cmd_config;
pub use graph::cmd_graph;
pub use run::{RunArgs, cmd_run};
pub use telemetry::cmd_telemetry;

use mend::errors::ConfigError;

/// Internal defect or unexpected I/O failure.
pub const EXIT_INTERNAL: u8 = 1;
/// Misconfiguration; matches clap's usage-error code.
pub const EXIT_MISCONFIG: u8 = 2;

pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<ConfigError>()) {
        EXIT_MISCONFIG
    } else {
        EXIT_INTERNAL
    }
}
