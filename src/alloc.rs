//! Ownership of frame buffers crossing the API boundary.
//!
//! A buffer belongs to the transport until a capture call hands it out, and to
//! the caller until it is given back through the matching `free_*` call. Every
//! hand-out is recorded in a ledger, so that a buffer freed twice, or freed on
//! an instance that never handed it out, is reported as [`Error::NotCaptured`].

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use crate::{Error, Result};

/// Allocation hooks for the frame buffers of a receiving instance.
///
/// Supplying one replaces the default [`Pool`] for that instance's frames.
pub trait Allocator: std::marker::Send + Sync + std::fmt::Debug {
    /// Provide an empty buffer able to hold at least `size` bytes.
    fn allocate(&self, size: usize) -> Vec<u8>;

    /// Take back a buffer that was previously handed out by [`Allocator::allocate`].
    fn free(&self, buffer: Vec<u8>);
}

/// The default [`Allocator`], recycling up to `capacity` released buffers.
#[derive(Debug)]
pub struct Pool {
    buffers: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl Pool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            capacity,
        }
    }

    /// The count of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        crate::lock(&self.buffers).len()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Allocator for Pool {
    fn allocate(&self, size: usize) -> Vec<u8> {
        let mut buffers = crate::lock(&self.buffers);

        match buffers.iter().position(|buffer| buffer.capacity() >= size) {
            Some(idx) => {
                let mut buffer = buffers.swap_remove(idx);
                buffer.clear();

                buffer
            }
            None => Vec::with_capacity(size),
        }
    }

    fn free(&self, buffer: Vec<u8>) {
        let mut buffers = crate::lock(&self.buffers);

        if buffers.len() < self.capacity {
            buffers.push(buffer);
        }
    }
}

/// Proof that a frame was handed out by a specific [`Ledger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Ticket {
    owner: u64,
    id: u64,
}

/// Bookkeeping of the buffers an instance handed out and did not get back yet.
#[derive(Debug)]
pub(crate) struct Ledger {
    owner: u64,
    next: AtomicU64,
    outstanding: Mutex<HashSet<u64>>,
}

impl Ledger {
    pub fn new() -> Self {
        static OWNERS: AtomicU64 = AtomicU64::new(0);

        Self {
            owner: OWNERS.fetch_add(1, Ordering::Relaxed),
            next: AtomicU64::new(0),
            outstanding: Default::default(),
        }
    }

    pub fn issue(&self) -> Ticket {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        crate::lock(&self.outstanding).insert(id);

        Ticket {
            owner: self.owner,
            id,
        }
    }

    pub fn redeem(&self, ticket: Option<Ticket>) -> Result {
        match ticket {
            Some(ticket)
                if ticket.owner == self.owner
                    && crate::lock(&self.outstanding).remove(&ticket.id) =>
            {
                Ok(())
            }
            _ => {
                tracing::warn!("A buffer was freed on an instance that does not own it");

                Err(Error::NotCaptured)
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        crate::lock(&self.outstanding).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_recycles_large_enough_buffers() {
        let pool = Pool::new(2);

        let mut buffer = pool.allocate(64);
        buffer.extend_from_slice(&[1; 64]);
        pool.free(buffer);
        assert_eq!(pool.idle(), 1);

        let buffer = pool.allocate(32);
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 64);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn pool_is_bounded() {
        let pool = Pool::new(1);

        pool.free(vec![0; 4]);
        pool.free(vec![0; 4]);

        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn ledger_rejects_double_free() {
        let ledger = Ledger::new();
        let ticket = ledger.issue();

        assert_eq!(ledger.outstanding(), 1);
        assert!(ledger.redeem(Some(ticket)).is_ok());
        assert!(matches!(
            ledger.redeem(Some(ticket)),
            Err(Error::NotCaptured)
        ));
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn ledger_rejects_foreign_tickets() {
        let (ours, theirs) = (Ledger::new(), Ledger::new());
        let ticket = theirs.issue();

        assert!(ours.redeem(Some(ticket)).is_err());
        assert!(ours.redeem(None).is_err());
        assert!(theirs.redeem(Some(ticket)).is_ok());
    }
}
