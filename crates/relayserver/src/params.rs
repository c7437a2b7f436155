// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query-parameter extraction for relay paths

use hyper::Uri;

/// Errors from rejecting a malformed query parameter
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("invalid receiver count {0:?}: n must be an integer >= 1")]
    InvalidReceiverCount(String),
}

/// Look up the first occurrence of a query parameter, percent-decoded.
pub fn str_param(uri: &Uri, name: &str) -> Option<String> {
    if let Some(query) = uri.query() {
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            if k == name {
                return Some(v.into_owned());
            }
        }
    }
    None
}

/// Extract the receiver count `n` declared by a request.
///
/// Absent means a plain one-to-one transfer. Zero and negative counts are rejected
/// rather than clamped; a typo'd `n` silently defaulting to 1 would strand the other
/// participants of an intended multicast.
pub fn receiver_count(uri: &Uri) -> Result<u32, ParamError> {
    match str_param(uri, "n") {
        None => Ok(1),
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|&n| n >= 1)
            .ok_or(ParamError::InvalidReceiverCount(raw)),
    }
}
