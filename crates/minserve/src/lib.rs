// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal tools for serving HTTP out of the relay

pub mod response;
pub mod server;
pub mod signal;

pub use server::Server;
