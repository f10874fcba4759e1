pub mod adapters;
pub mod assembler;
pub mod backfill;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod daylight;
pub mod derive;
pub mod field;
pub mod logging;
pub mod report;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod telemetry;
