// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Moving the sender's bytes to every receiver
//!
//! Each receiver gets a bounded channel whose receiving half backs its response body.
//! The pump copies one chunk at a time from the sender into every channel, so the
//! read side advances only as fast as the slowest receiver drains; nothing buffers
//! beyond one chunk per receiver.

use std::pin::{pin, Pin};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use anyhow::{anyhow, Context as _};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use http::header::HeaderMap;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Frame};
use hyper::{Response, StatusCode};
use pin_project::pin_project;

use minserve::response;

use crate::registry::Registry;
use crate::rendezvous::{Rendezvous, ResponseGate};

/// Convert a [`Body`] into a stream of its data frames.
#[pin_project]
pub struct BodyStream<B>(#[pin] pub B);

impl<B> Stream for BodyStream<B>
where
    B: Body,
{
    type Item = Result<B::Data, B::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            return Poll::Ready(match ready!(this.0.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    Some(Ok(data))
                }
                Some(Err(err)) => Some(Err(err)),
                None => None,
            });
        }
    }
}

type BodyFrame = Result<Frame<Bytes>, anyhow::Error>;

/// One running transfer: the sender side of every receiver's body channel, plus the
/// bookkeeping to withdraw the rendezvous exactly once.
///
/// Whatever happens to the sender's request, the record leaves the registry: the
/// normal paths go through [`complete`](Self::complete), [`abort`](Self::abort) or
/// [`refuse`](Self::refuse), and the drop glue covers the sender's request being torn
/// down mid-transfer by the transport.
pub(crate) struct ActiveStream {
    registry: Arc<Registry>,
    rendezvous: Arc<Rendezvous>,
    gates: Vec<ResponseGate>,
    pipes: Vec<mpsc::Sender<BodyFrame>>,
    finished: bool,
}

impl ActiveStream {
    pub(crate) fn new(
        registry: Arc<Registry>,
        rendezvous: Arc<Rendezvous>,
        gates: Vec<ResponseGate>,
    ) -> Self {
        Self {
            registry,
            rendezvous,
            gates,
            pipes: Vec::new(),
            finished: false,
        }
    }

    /// Send every receiver its response headers, opening its body channel.
    ///
    /// Returns the number of receivers that vanished before their response could be
    /// handed over; any non-zero count means the rendezvous must abort.
    pub(crate) fn open(&mut self, headers: &HeaderMap) -> usize {
        let mut lost = 0;
        for gate in self.gates.drain(..) {
            let (pipe, frames) = mpsc::channel(1);
            let mut response = Response::new(BodyExt::boxed(StreamBody::new(frames)));
            *response.headers_mut() = headers.clone();
            if gate.send(response).is_ok() {
                self.pipes.push(pipe);
            } else {
                lost += 1;
            }
        }
        lost
    }

    /// Copy `source` into every open body channel, chunk by chunk.
    ///
    /// Returns the number of bytes relayed. The per-chunk send to each receiver is
    /// what paces the whole transfer to the slowest one.
    pub(crate) async fn multicast(
        &mut self,
        source: impl Stream<Item = anyhow::Result<Bytes>>,
    ) -> anyhow::Result<u64> {
        let mut source = pin!(source);
        let mut transferred = 0u64;
        while let Some(chunk) = source.next().await {
            let chunk = chunk.context("reading the sender body")?;
            if chunk.is_empty() {
                continue;
            }
            transferred += chunk.len() as u64;
            for pipe in &mut self.pipes {
                if pipe.send(Ok(Frame::data(chunk.clone()))).await.is_err() {
                    return Err(anyhow!("a receiver connection went away mid-stream"));
                }
            }
        }
        Ok(transferred)
    }

    /// End the transfer successfully: withdraw the record, then let every body
    /// channel close cleanly.
    pub(crate) fn complete(mut self) {
        self.finished = true;
        self.registry.finish(&self.rendezvous);
        self.pipes.clear();
    }

    /// Tear the transfer down: withdraw the record and push an error frame at every
    /// receiver so their connections terminate instead of ending like a completed
    /// body.
    pub(crate) fn abort(mut self, reason: &str) {
        self.finished = true;
        self.registry.finish(&self.rendezvous);
        for mut pipe in self.pipes.drain(..) {
            let error = anyhow!("{reason}");
            tokio::task::spawn(async move {
                let _ = pipe.send(Err(error)).await;
            });
        }
        // unopened gates drop here; their receivers learn the sender is gone
    }

    /// Turn every still-waiting receiver away with `message` instead of a stream.
    ///
    /// For failures discovered after the set completed but before any receiver's
    /// headers were sent, such as an unreadable multipart body.
    pub(crate) fn refuse(mut self, status: StatusCode, message: &str) {
        self.finished = true;
        self.registry.finish(&self.rendezvous);
        for gate in self.gates.drain(..) {
            let _ = gate.send(response::text(status, message));
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The sender's request was dropped by the transport mid-transfer. Withdraw
        // the record and make a best effort to terminate receivers; a channel whose
        // buffered chunk is still unread keeps its error for later delivery.
        self.registry.finish(&self.rendezvous);
        for pipe in &mut self.pipes {
            let _ = pipe.try_send(Err(anyhow!("the sender connection went away mid-stream")));
        }
    }
}
