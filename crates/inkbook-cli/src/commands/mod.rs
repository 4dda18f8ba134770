//! Command handlers

pub mod config;
pub mod export;
pub mod init;
pub mod restore;
pub mod retention;
pub mod schedule;
pub mod snapshot;
pub mod status;
