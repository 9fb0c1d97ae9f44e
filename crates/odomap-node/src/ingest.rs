//! Scan ingestion: reorder by stamp, then process one at a time.
//!
//! Scans can arrive from several drivers at once and slightly out of order.
//! [`ReorderQueue`] holds whatever has arrived and always releases the
//! oldest stamp first; [`spawn_scan_worker`] drains it into the node so
//! exactly one scan is being processed at any time.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use odomap_types::LaserScan;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::node::LidarOdometryNode;

struct Pending {
    seq: u64,
    scan: LaserScan,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    /// Reversed so the max-heap yields the oldest stamp, then the earliest arrival.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .scan
            .stamp
            .total_cmp(&self.scan.stamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Pending>,
    seq: u64,
}

/// Bounded, stamp-ordered buffer of pending scans.  Safe to share.
pub struct ReorderQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    dropped: AtomicU64,
}

impl ReorderQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Insert `scan`.  When the queue overflows the oldest pending scan is
    /// evicted and returned.
    pub fn push(&self, scan: LaserScan) -> Option<LaserScan> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = state.seq;
        state.seq += 1;
        state.heap.push(Pending { seq, scan });
        if state.heap.len() > self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return state.heap.pop().map(|p| p.scan);
        }
        None
    }

    /// Remove the pending scan with the oldest stamp.
    pub fn pop(&self) -> Option<LaserScan> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.heap.pop().map(|p| p.scan)
    }

    /// Remove everything, oldest first.
    pub fn drain(&self) -> Vec<LaserScan> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::with_capacity(state.heap.len());
        while let Some(p) = state.heap.pop() {
            out.push(p.scan);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scans evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consume scans from `rx` until the channel closes.
///
/// Everything already waiting in the channel is gathered into a
/// [`ReorderQueue`] before processing, so a burst is handled in stamp order.
/// Returns the number of scans the node committed.
pub fn spawn_scan_worker(
    node: Arc<LidarOdometryNode>,
    mut rx: mpsc::Receiver<LaserScan>,
    capacity: usize,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let queue = ReorderQueue::new(capacity);
        let mut committed = 0u64;

        while let Some(first) = rx.recv().await {
            enqueue(&queue, first);
            while let Ok(scan) = rx.try_recv() {
                enqueue(&queue, scan);
            }

            while let Some(scan) = queue.pop() {
                let worker_node = Arc::clone(&node);
                match tokio::task::spawn_blocking(move || worker_node.on_laser_scan(&scan)).await {
                    Ok(Some(_)) => committed += 1,
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "scan processing task failed"),
                }
                // Pick up scans that arrived meanwhile before choosing the next one.
                while let Ok(scan) = rx.try_recv() {
                    enqueue(&queue, scan);
                }
            }
        }

        debug!(committed, dropped = queue.dropped(), "scan worker finished");
        committed
    })
}

fn enqueue(queue: &ReorderQueue, scan: LaserScan) {
    if let Some(evicted) = queue.push(scan) {
        warn!(
            frame = %evicted.frame_id,
            stamp = evicted.stamp,
            "scan queue full, dropping oldest scan"
        );
    }
}
