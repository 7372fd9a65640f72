//! Subcommand implementations

pub mod checkpoints;
pub mod chunk;
pub mod config;
pub mod doctor;
pub mod run;
