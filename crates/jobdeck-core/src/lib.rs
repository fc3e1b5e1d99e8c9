pub mod config;
pub mod job;
pub mod launcher;
pub mod logging;
pub mod models;
pub mod monitoring;
pub mod orchestration;
pub mod persistence;
pub mod registry;
pub mod sqlite;
pub mod statistics;
