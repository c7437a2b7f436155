// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::net::IpAddr;

use clap::{crate_version, Parser};

#[derive(Debug, Parser)]
#[clap(
    name = "relayserver",
    about = "Ephemeral path-addressed HTTP relay",
    version = crate_version!()
)]
pub struct Opts {
    #[clap(
        long,
        help = "Address to bind.",
        default_value = "0.0.0.0",
        env = "RELAYSERVER_HOST"
    )]
    pub host: IpAddr,

    #[clap(
        short,
        long,
        help = "Port to listen on.",
        default_value = "8080",
        env = "RELAYSERVER_PORT"
    )]
    pub port: u16,

    #[clap(
        long,
        help = "Maximum simultaneously connected clients before connections are shed with a 503",
        default_value = "1024",
        env = "RELAYSERVER_MAX_CLIENTS"
    )]
    pub max_clients: usize,
}
