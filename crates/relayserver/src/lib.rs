// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An ephemeral, path-addressed HTTP relay.
//!
//! A sender POSTs (or PUTs) a byte stream to any path; the `n` receivers that GET the
//! same path (default one) get that stream live, byte for byte, with backpressure to
//! the slowest of them. Nothing is ever stored: a path exists only while its
//! participants are connected, and is forgotten the moment a transfer completes or
//! every participant walks away.

mod headers;
mod multipart;
mod opts;
mod params;
mod registry;
mod rendezvous;
mod reserved;
mod server;
mod stream;

pub use opts::Opts;
pub use server::run;
