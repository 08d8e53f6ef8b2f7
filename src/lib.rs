pub mod analyzer;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod marker;
pub mod tee;
