// Public API - only expose the runner module
pub mod runner;

// Internal modules - organized by subsystem
mod config;
mod db;
mod load;
mod plan;
mod reconcile;
mod source;
mod telemetry;
