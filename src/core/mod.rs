//! Core types: errors, configuration, scenario planning.

pub mod config;
pub mod errors;
pub mod scenario;
