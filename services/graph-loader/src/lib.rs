//! Loads economic-indicator spreadsheets into a property graph:
//! State -> EDD -> County -> Sector -> Sub_Sector -> Metric.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod normalize;
pub mod orchestrator;
pub mod store;
pub mod upsert;
