// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shutdown signal detection

use tokio::signal::ctrl_c;

/// Future that resolves when a graceful shutdown has been requested.
///
/// Detects a `SIGINT`.
///
/// **BEWARE:** This alters process state by _permanently_ registering an interrupt
/// handler through [`tokio`], so it should only be called near the entry point of a
/// program, not by a library. The usual caveats around signals apply; they may only be
/// detected after this is first called, multiple signals may be collapsed, etc.
///
/// # Panics
///
/// Panics if the underlying [`tokio::signal`] registration fails, which the docs only
/// describe as happening when lower-level things fail "for some reason".
pub async fn graceful_shutdown_requested() {
    ctrl_c().await.expect("Unable to await CTRL-C");
}

/// Future that resolves when a fast shutdown has been requested.
///
/// Things that constitute a request for a fast shutdown:
///
/// * Multiple `SIGINT`s
/// * At least one `SIGTERM`
///
/// The caveats of [`graceful_shutdown_requested`] apply here too.
pub async fn fast_shutdown_requested() {
    let want_to_shutdown = async {
        ctrl_c().await.expect("Unable to await CTRL-C");
        ctrl_c().await.expect("Unable to await CTRL-C");
    };

    #[cfg(unix)]
    let want_to_shutdown = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("Can't register SIGTERM handler");
        tokio::select! {
            _ = want_to_shutdown => {},
            _ = sigterm.recv() => {},
        };
    };

    want_to_shutdown.await
}

// Automated testing of signals is not worth the trouble: registering a handler is
// permanent and global, destroying test isolation. These functions are small and
// change rarely; they are exercised manually.
