// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opts = relayserver::Opts::parse();
    relayserver::run(opts).await
}
