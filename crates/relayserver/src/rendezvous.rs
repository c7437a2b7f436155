// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-path rendezvous record and its state machine
//!
//! A rendezvous binds exactly one sender and exactly `n` receivers on one path. It
//! gathers participants, fires the multicast once the set is complete, and is
//! destroyed on completion or abort. All bookkeeping happens in short critical
//! sections behind the record's own lock; nothing is held across I/O.

use std::sync::Mutex;

use tokio::sync::oneshot;

use minserve::response::GenericResponse;

/// Identifies one attached participant within its rendezvous.
pub type ParticipantId = u64;

/// Hands a pending receiver the response it has been waiting for.
pub type ResponseGate = oneshot::Sender<GenericResponse>;

/// The receiving half of a [`ResponseGate`].
pub type ResponseWaiter = oneshot::Receiver<GenericResponse>;

/// Everything the sender needs to begin streaming: one gate per attached receiver,
/// in attach order.
pub struct StreamStart {
    pub gates: Vec<ResponseGate>,
}

/// How an accepted sender proceeds.
pub enum SenderAttach {
    /// All receivers were already waiting; streaming begins immediately.
    Start(StreamStart),
    /// Receivers are still gathering; resolves when the set completes.
    Wait(oneshot::Receiver<StreamStart>),
}

/// Why a participant was turned away from a path.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum AttachError {
    #[error("another sender is connecting to this path")]
    SenderConflict,
    #[error("this path expects n={expected} but the request declared n={requested}")]
    ReceiverCountMismatch { expected: u32, requested: u32 },
    #[error("too many receivers: this path already has n={n} receivers connecting")]
    ReceiverOverflow { n: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    /// Participants are still arriving.
    Gathering,
    /// The set is complete and the sender owns the transfer.
    Streaming,
    /// The record has been withdrawn from the registry.
    Closing,
}

/// The per-path record.
pub struct Rendezvous {
    path: String,
    n: u32,
    slots: Mutex<Slots>,
}

struct Slots {
    state: State,
    next_id: ParticipantId,
    sender: Option<SenderSlot>,
    receivers: Vec<ReceiverSlot>,
}

struct SenderSlot {
    id: ParticipantId,
    start: Option<oneshot::Sender<StreamStart>>,
}

struct ReceiverSlot {
    id: ParticipantId,
    gate: Option<ResponseGate>,
}

impl Slots {
    fn allocate_id(&mut self) -> ParticipantId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn take_gates(&mut self) -> Vec<ResponseGate> {
        self.receivers
            .iter_mut()
            .filter_map(|receiver| receiver.gate.take())
            .collect()
    }
}

impl Rendezvous {
    pub fn new(path: &str, n: u32) -> Self {
        Self {
            path: path.to_owned(),
            n,
            slots: Mutex::new(Slots {
                state: State::Gathering,
                next_id: 0,
                sender: None,
                receivers: Vec::new(),
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Install the sender.
    ///
    /// Completes the set (and returns [`SenderAttach::Start`]) when every receiver is
    /// already waiting; otherwise the sender parks on the returned channel.
    pub fn attach_sender(&self, n: u32) -> Result<(SenderAttach, ParticipantId), AttachError> {
        let mut slots = self.slots.lock().unwrap();
        if n != self.n {
            return Err(AttachError::ReceiverCountMismatch {
                expected: self.n,
                requested: n,
            });
        }
        if slots.sender.is_some() {
            return Err(AttachError::SenderConflict);
        }
        let id = slots.allocate_id();
        if slots.receivers.len() as u32 == self.n {
            slots.state = State::Streaming;
            slots.sender = Some(SenderSlot { id, start: None });
            let gates = slots.take_gates();
            Ok((SenderAttach::Start(StreamStart { gates }), id))
        } else {
            let (start_tx, start_rx) = oneshot::channel();
            slots.sender = Some(SenderSlot {
                id,
                start: Some(start_tx),
            });
            Ok((SenderAttach::Wait(start_rx), id))
        }
    }

    /// Reserve a receiver slot.
    ///
    /// The returned waiter resolves with the receiver's response once the sender's
    /// headers are known. Attaching the last missing receiver hands the parked sender
    /// its [`StreamStart`].
    pub fn attach_receiver(&self, n: u32) -> Result<(ResponseWaiter, ParticipantId), AttachError> {
        let mut slots = self.slots.lock().unwrap();
        if n != self.n {
            return Err(AttachError::ReceiverCountMismatch {
                expected: self.n,
                requested: n,
            });
        }
        if slots.receivers.len() as u32 == self.n {
            return Err(AttachError::ReceiverOverflow { n: self.n });
        }
        let id = slots.allocate_id();
        let (gate, waiter) = oneshot::channel();
        slots.receivers.push(ReceiverSlot {
            id,
            gate: Some(gate),
        });
        if slots.receivers.len() as u32 == self.n && slots.sender.is_some() {
            slots.state = State::Streaming;
            let gates = slots.take_gates();
            if let Some(start) = slots.sender.as_mut().and_then(|sender| sender.start.take()) {
                // The send fails only if the sender's request vanished at this exact
                // moment; its detach then releases the path (see `detach`).
                let _ = start.send(StreamStart { gates });
            }
        }
        Ok((waiter, id))
    }

    /// Remove an aborted participant.
    ///
    /// Returns `true` when the record should be withdrawn from the registry: either
    /// the last gathering participant left, or the sender vanished right as the set
    /// completed (in which case the stream can never run and the path must not stay
    /// occupied).
    pub(crate) fn detach(&self, id: ParticipantId) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.state {
            State::Gathering => {
                if slots.sender.as_ref().is_some_and(|sender| sender.id == id) {
                    slots.sender = None;
                } else {
                    slots.receivers.retain(|receiver| receiver.id != id);
                }
                slots.sender.is_none() && slots.receivers.is_empty()
            }
            State::Streaming => {
                if slots.sender.as_ref().is_some_and(|sender| sender.id == id) {
                    slots.state = State::Closing;
                    true
                } else {
                    // A streaming receiver's departure surfaces through its body
                    // channel, not here.
                    false
                }
            }
            State::Closing => false,
        }
    }

    /// Mark the record as withdrawn.
    pub(crate) fn close(&self) {
        self.slots.lock().unwrap().state = State::Closing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_first_then_sender_starts_immediately() {
        let rendezvous = Rendezvous::new("/p", 1);
        let (_waiter, _id) = rendezvous.attach_receiver(1).unwrap();
        let (attach, _id) = rendezvous.attach_sender(1).unwrap();
        match attach {
            SenderAttach::Start(start) => assert_eq!(start.gates.len(), 1),
            SenderAttach::Wait(_) => panic!("sender should start immediately"),
        }
    }

    #[test]
    fn sender_first_waits_for_receivers() {
        let rendezvous = Rendezvous::new("/p", 2);
        let (attach, _id) = rendezvous.attach_sender(2).unwrap();
        let mut start_rx = match attach {
            SenderAttach::Wait(rx) => rx,
            SenderAttach::Start(_) => panic!("no receivers have attached yet"),
        };
        assert!(start_rx.try_recv().is_err());

        let (_w1, _) = rendezvous.attach_receiver(2).unwrap();
        assert!(start_rx.try_recv().is_err());

        let (_w2, _) = rendezvous.attach_receiver(2).unwrap();
        let start = start_rx.try_recv().expect("the set is complete");
        assert_eq!(start.gates.len(), 2);
    }

    #[test]
    fn mismatched_counts_are_rejected() {
        let rendezvous = Rendezvous::new("/p", 2);
        assert_eq!(
            rendezvous.attach_sender(1).map(|_| ()),
            Err(AttachError::ReceiverCountMismatch {
                expected: 2,
                requested: 1
            })
        );
        assert_eq!(
            rendezvous.attach_receiver(3).map(|_| ()),
            Err(AttachError::ReceiverCountMismatch {
                expected: 2,
                requested: 3
            })
        );
    }

    #[test]
    fn second_sender_conflicts() {
        let rendezvous = Rendezvous::new("/p", 1);
        let (_attach, _id) = rendezvous.attach_sender(1).unwrap();
        assert_eq!(
            rendezvous.attach_sender(1).map(|_| ()),
            Err(AttachError::SenderConflict)
        );
    }

    #[test]
    fn overflowing_receiver_is_rejected() {
        let rendezvous = Rendezvous::new("/p", 2);
        let (_w1, _) = rendezvous.attach_receiver(2).unwrap();
        let (_w2, _) = rendezvous.attach_receiver(2).unwrap();
        assert_eq!(
            rendezvous.attach_receiver(2).map(|_| ()),
            Err(AttachError::ReceiverOverflow { n: 2 })
        );
    }

    #[test]
    fn detached_receiver_frees_its_slot() {
        let rendezvous = Rendezvous::new("/p", 1);
        let (_w1, id1) = rendezvous.attach_receiver(1).unwrap();
        assert!(rendezvous.detach(id1), "record should now be empty");
        let (_w2, _id2) = rendezvous.attach_receiver(1).unwrap();
    }

    #[test]
    fn detach_keeps_record_while_others_remain() {
        let rendezvous = Rendezvous::new("/p", 2);
        let (_w1, id1) = rendezvous.attach_receiver(2).unwrap();
        let (_w2, _id2) = rendezvous.attach_receiver(2).unwrap();
        assert!(!rendezvous.detach(id1));
    }

    #[test]
    fn detach_after_close_is_inert() {
        let rendezvous = Rendezvous::new("/p", 1);
        let (_w, _) = rendezvous.attach_receiver(1).unwrap();
        let (_attach, sender_id) = rendezvous.attach_sender(1).unwrap();
        rendezvous.close();
        assert!(!rendezvous.detach(sender_id));
    }

    #[test]
    fn sender_vanishing_at_completion_releases_the_path() {
        let rendezvous = Rendezvous::new("/p", 1);
        let (attach, sender_id) = rendezvous.attach_sender(1).unwrap();
        let start_rx = match attach {
            SenderAttach::Wait(rx) => rx,
            SenderAttach::Start(_) => panic!("no receivers yet"),
        };
        // the sender's request is dropped, but its detach has not run yet
        drop(start_rx);
        let (_waiter, _) = rendezvous.attach_receiver(1).unwrap();
        assert!(
            rendezvous.detach(sender_id),
            "a completed set without its sender must release the path"
        );
    }
}
