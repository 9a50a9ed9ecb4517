// Multitrack Output Services
// Business logic layer

mod attempt_clock;
mod errors;
mod events;
mod every_minute;
mod http;
mod identity;
mod launch_args;
mod log_manager;
mod main_context;
mod multitrack_output;
mod runtime;
mod settings_manager;

pub mod amf;
pub mod censored_json;
pub mod flv_mux;
pub mod go_live_client;
pub mod integrity;
pub mod ivs_events;
pub mod output_builder;
pub mod system_info;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use attempt_clock::*;
pub use censored_json::censored_json;
pub use errors::*;
pub use events::*;
pub use every_minute::*;
pub use http::*;
pub use identity::*;
pub use launch_args::*;
pub use log_manager::*;
pub use main_context::*;
pub use multitrack_output::*;
pub use runtime::*;
pub use settings_manager::*;
pub use telemetry::{EventProperties, TelemetrySubmitter};
