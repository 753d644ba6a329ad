pub mod corrlog;
pub mod engine;
pub mod error;
pub mod job;
pub mod join;
pub mod logging;
pub mod params;
pub mod results;
pub mod schema;
pub mod stats;
pub mod telemetry;
pub mod template;
