// Copyright 2026 Jobscout Contributors
// SPDX-License-Identifier: MIT

//! Jobscout runtime library: the HTTP, discovery, and results adapters that
//! plug into the `jobscout` core, plus the CLI subcommands.
//!
//! This library crate exposes the adapters for integration testing.

pub mod acquisition;
pub mod audit;
pub mod cartography;
pub mod cli;
