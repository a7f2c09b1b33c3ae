//! CLI subcommand implementations for the jobscout binary.

pub mod config;
pub mod output;
pub mod run_cmd;
pub mod scan_cmd;
pub mod sitemap_cmd;
