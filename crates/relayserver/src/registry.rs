// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The process-wide map from live paths to rendezvous records

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::rendezvous::{
    AttachError, ParticipantId, Rendezvous, ResponseWaiter, SenderAttach,
};

/// Arbiter of who arrives first on a path and whether later arrivals fit.
///
/// The map lock covers only lookup, insertion and deletion; everything stateful about
/// a single path happens behind the record's own lock. Records are compared by
/// identity on removal so a path that has already been recycled for a new rendezvous
/// is never torn down by its predecessor's cleanup.
#[derive(Default)]
pub struct Registry {
    paths: Mutex<HashMap<String, Arc<Rendezvous>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a sender on `path`, creating the rendezvous if this is the first
    /// arrival.
    pub fn attach_sender(
        &self,
        path: &str,
        n: u32,
    ) -> Result<(Arc<Rendezvous>, SenderAttach, ParticipantId), AttachError> {
        let mut paths = self.paths.lock().unwrap();
        match paths.entry(path.to_owned()) {
            Entry::Occupied(entry) => {
                let rendezvous = Arc::clone(entry.get());
                let (attach, id) = rendezvous.attach_sender(n)?;
                Ok((rendezvous, attach, id))
            }
            Entry::Vacant(entry) => {
                let rendezvous = Arc::new(Rendezvous::new(path, n));
                let (attach, id) = rendezvous.attach_sender(n)?;
                entry.insert(Arc::clone(&rendezvous));
                Ok((rendezvous, attach, id))
            }
        }
    }

    /// Reserve a receiver slot on `path`, creating the rendezvous if this is the
    /// first arrival.
    pub fn attach_receiver(
        &self,
        path: &str,
        n: u32,
    ) -> Result<(Arc<Rendezvous>, ResponseWaiter, ParticipantId), AttachError> {
        let mut paths = self.paths.lock().unwrap();
        match paths.entry(path.to_owned()) {
            Entry::Occupied(entry) => {
                let rendezvous = Arc::clone(entry.get());
                let (waiter, id) = rendezvous.attach_receiver(n)?;
                Ok((rendezvous, waiter, id))
            }
            Entry::Vacant(entry) => {
                let rendezvous = Arc::new(Rendezvous::new(path, n));
                let (waiter, id) = rendezvous.attach_receiver(n)?;
                entry.insert(Arc::clone(&rendezvous));
                Ok((rendezvous, waiter, id))
            }
        }
    }

    /// Remove an aborted participant, destroying the record if it is now empty.
    pub fn detach(&self, rendezvous: &Arc<Rendezvous>, id: ParticipantId) {
        let mut paths = self.paths.lock().unwrap();
        if rendezvous.detach(id) {
            self.remove_if_current(&mut paths, rendezvous);
            debug!("Cleaned up abandoned rendezvous on {:?}", rendezvous.path());
        }
    }

    /// Withdraw a rendezvous whose stream has completed or aborted.
    ///
    /// The path becomes available to new participants before the outcome is reported
    /// to any of the old ones.
    pub fn finish(&self, rendezvous: &Arc<Rendezvous>) {
        let mut paths = self.paths.lock().unwrap();
        self.remove_if_current(&mut paths, rendezvous);
        rendezvous.close();
    }

    fn remove_if_current(
        &self,
        paths: &mut HashMap<String, Arc<Rendezvous>>,
        rendezvous: &Arc<Rendezvous>,
    ) {
        if let Some(current) = paths.get(rendezvous.path()) {
            if Arc::ptr_eq(current, rendezvous) {
                paths.remove(rendezvous.path());
            }
        }
    }
}

/// Detaches a participant when its request is dropped.
///
/// Handlers hold one of these across every await so that a client closing its
/// connection mid-gathering releases the slot it was occupying. Once streaming has
/// started (or the record is gone) the detach is inert, so the guard can simply ride
/// along until the handler returns.
pub struct DetachGuard {
    registry: Arc<Registry>,
    rendezvous: Arc<Rendezvous>,
    id: ParticipantId,
}

impl DetachGuard {
    pub fn new(registry: Arc<Registry>, rendezvous: Arc<Rendezvous>, id: ParticipantId) -> Self {
        Self {
            registry,
            rendezvous,
            id,
        }
    }
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.registry.detach(&self.rendezvous, self.id);
    }
}
