//! hpcsync CLI library
//!
//! This library exposes the binary's modules for integration testing.
//! The CLI entry point is in main.rs.

pub mod backends;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod process;
