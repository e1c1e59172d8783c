//! CLI module for the rembg-dispatch library
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;
mod progress;

pub use main_impl::{main, BackendArgs, Cli, Command};
