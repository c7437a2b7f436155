// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request routing and the relay's send/receive handlers

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use futures::TryStreamExt;
use hyper::body::Incoming;
use hyper::header::CONTENT_RANGE;
use hyper::{Method, Request, StatusCode};
use multer::Multipart;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tracing::{info, warn};

use minserve::response::{self, ErrResponse, GenericResponse, ResponseResult};
use minserve::signal::{fast_shutdown_requested, graceful_shutdown_requested};
use minserve::Server;

use crate::opts::Opts;
use crate::registry::{DetachGuard, Registry};
use crate::rendezvous::SenderAttach;
use crate::stream::{ActiveStream, BodyStream};
use crate::{headers, multipart, params, reserved};

/// Bind the configured address and serve the relay until shutdown.
pub async fn run(opts: Opts) -> anyhow::Result<()> {
    let registry = Arc::new(Registry::new());
    let server = Server::new(opts.max_clients);

    let address = SocketAddr::from((opts.host, opts.port));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Listening on {address}");
    let connections = futures::stream::unfold(listener, |listener| async {
        Some((listener.accept().await, listener))
    });

    let respond_registry = Arc::clone(&registry);
    let run = server.serve(connections, move |request, _peer| {
        let registry = Arc::clone(&respond_registry);
        async move { respond(registry, request).await }
    });

    let graceful_shutdown = async {
        graceful_shutdown_requested().await;
        info!("Graceful shutdown requested...");
        server.graceful_shutdown().await;
    };

    tokio::select! {
        biased;
        _ = fast_shutdown_requested() => info!("Fast shutdown requested..."),
        _ = async { tokio::join!(run, graceful_shutdown) } => {}
    };

    Ok(())
}

/// Answer one request, whatever it is.
async fn respond(registry: Arc<Registry>, request: Request<Incoming>) -> GenericResponse {
    let mut response = route(registry, request).await;
    headers::add_cors_headers(response.headers_mut());
    response
}

/// Classify a request by method, path and headers, and dispatch it.
async fn route(registry: Arc<Registry>, request: Request<Incoming>) -> GenericResponse {
    let method = request.method().clone();
    match method {
        Method::OPTIONS => return headers::preflight(),
        Method::GET | Method::HEAD | Method::POST | Method::PUT => {}
        _ => return headers::method_not_allowed(),
    }

    let path = percent_decode_str(request.uri().path())
        .decode_utf8_lossy()
        .into_owned();

    if reserved::is_reserved(&path) {
        return if matches!(method, Method::GET | Method::HEAD) {
            reserved::respond(&method, &path, request.uri())
        } else {
            response::text(
                StatusCode::BAD_REQUEST,
                format!("cannot send to the reserved path {path:?}"),
            )
        };
    }

    // Never hand out relayed bytes as a Service Worker script; a hostile sender
    // could otherwise install itself into a receiver's browser.
    if method == Method::GET
        && request
            .headers()
            .get(&headers::SERVICE_WORKER)
            .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"script"))
    {
        return response::text(
            StatusCode::BAD_REQUEST,
            "this relay cannot serve Service Worker scripts",
        );
    }

    if matches!(method, Method::POST | Method::PUT)
        && request.headers().contains_key(CONTENT_RANGE)
    {
        return response::text(StatusCode::BAD_REQUEST, "partial uploads are not supported");
    }

    let n = match params::receiver_count(request.uri()) {
        Ok(n) => n,
        Err(err) => return response::text(StatusCode::BAD_REQUEST, err),
    };

    let result = match method {
        Method::POST | Method::PUT => handle_send(registry, path, n, request).await,
        _ => handle_receive(registry, path, n).await,
    };
    match result {
        Ok(response) | Err(ErrResponse(response)) => response,
    }
}

fn bad_request(err: impl ToString) -> ErrResponse {
    ErrResponse(response::text(StatusCode::BAD_REQUEST, err))
}

/// The sender side of a rendezvous: attach, wait for the set to complete, stream.
async fn handle_send(
    registry: Arc<Registry>,
    path: String,
    n: u32,
    request: Request<Incoming>,
) -> ResponseResult {
    // The boundary lives in the content-type header, so a broken one is caught
    // here, before this sender occupies the path.
    let boundary = multipart::boundary(request.headers()).map_err(bad_request)?;

    let (rendezvous, attach, id) = registry.attach_sender(&path, n).map_err(bad_request)?;
    let _guard = DetachGuard::new(Arc::clone(&registry), Arc::clone(&rendezvous), id);
    info!("Sender attached to {path:?} (n={n})");

    let start = match attach {
        SenderAttach::Start(start) => start,
        SenderAttach::Wait(pending) => match pending.await {
            Ok(start) => start,
            Err(_) => {
                return Ok(response::text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "the rendezvous was abandoned",
                ))
            }
        },
    };
    let receiver_count = start.gates.len();
    info!("Streaming {path:?} to {receiver_count} receiver(s)");

    let request_headers = request.headers().clone();
    let body = BodyStream(request.into_body()).map_err(anyhow::Error::from);
    let mut active = ActiveStream::new(registry, rendezvous, start.gates);

    let outcome = match boundary {
        Some(boundary) => {
            let mut parts = Multipart::new(body, boundary);
            match parts.next_field().await {
                Ok(Some(field)) => {
                    let projected = headers::receiver_headers(&multipart::part_headers(&field));
                    if active.open(&projected) > 0 {
                        active.abort("a receiver went away before streaming began");
                        return Ok(response::text(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "a receiver went away before streaming began",
                        ));
                    }
                    active.multicast(field.map_err(anyhow::Error::from)).await
                }
                Ok(None) => {
                    warn!("Multipart body on {path:?} contains no parts");
                    active.refuse(StatusCode::BAD_REQUEST, "multipart body contains no parts");
                    return Ok(response::text(
                        StatusCode::BAD_REQUEST,
                        "multipart body contains no parts",
                    ));
                }
                Err(err) => {
                    warn!("Unreadable multipart body on {path:?}: {err}");
                    active.refuse(StatusCode::BAD_REQUEST, "unreadable multipart body");
                    return Ok(response::text(
                        StatusCode::BAD_REQUEST,
                        format!("unreadable multipart body: {err}"),
                    ));
                }
            }
        }
        None => {
            let projected = headers::receiver_headers(&request_headers);
            if active.open(&projected) > 0 {
                active.abort("a receiver went away before streaming began");
                return Ok(response::text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "a receiver went away before streaming began",
                ));
            }
            active.multicast(body).await
        }
    };

    match outcome {
        Ok(transferred) => {
            active.complete();
            info!("Completed {path:?}: {transferred} bytes to {receiver_count} receiver(s)");
            Ok(response::text(
                StatusCode::OK,
                format!("transferred {transferred} bytes to {receiver_count} receiver(s)\n"),
            ))
        }
        Err(err) => {
            warn!("Transfer on {path:?} aborted: {err:#}");
            active.abort("transfer aborted");
            Ok(response::text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "transfer aborted",
            ))
        }
    }
}

/// The receiver side of a rendezvous: reserve a slot, then wait for the stream.
async fn handle_receive(registry: Arc<Registry>, path: String, n: u32) -> ResponseResult {
    let (rendezvous, waiter, id) = registry.attach_receiver(&path, n).map_err(bad_request)?;
    let _guard = DetachGuard::new(registry, rendezvous, id);
    info!("Receiver attached to {path:?} (n={n})");

    match waiter.await {
        Ok(response) => Ok(response),
        Err(_) => Ok(response::text(
            StatusCode::INTERNAL_SERVER_ERROR,
            "the sender went away before streaming began",
        )),
    }
}
