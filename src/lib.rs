pub mod config;
pub mod db;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod orchestrator;
pub mod plan;
pub mod sql;
pub mod ui;
