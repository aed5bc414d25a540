use std::sync::atomic::{AtomicU64, Ordering};

/// A bounded delivery queue for one stream type, dropping the oldest item on overrun.
#[derive(Debug)]
pub(crate) struct Queue<T> {
    tx: flume::Sender<T>,
    rx: flume::Receiver<T>,

    received: AtomicU64,
    dropped: AtomicU64,
}

impl<T> Queue<T> {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = flume::bounded(depth.max(1));

        Self {
            tx,
            rx,
            received: Default::default(),
            dropped: Default::default(),
        }
    }

    /// Enqueue `item`, returning the items evicted to make room for it.
    pub fn push(&self, mut item: T) -> Vec<T> {
        let mut evicted = Vec::new();
        self.received.fetch_add(1, Ordering::Relaxed);

        loop {
            match self.tx.try_send(item) {
                Ok(()) => break,
                Err(flume::TrySendError::Full(back)) => {
                    item = back;

                    if let Ok(oldest) = self.rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted.push(oldest);
                    }
                }
                Err(flume::TrySendError::Disconnected(_)) => break,
            }
        }

        evicted
    }

    /// Account for an item that was received but never enqueued.
    pub fn reject(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn receiver(&self) -> &flume::Receiver<T> {
        &self.rx
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
