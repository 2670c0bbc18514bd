//! Bounded multi-priority command queue.
//!
//! One ring per priority class behind a single mutex. Producers never
//! block: a full queue drops the command and bumps the drop counter, which
//! keeps session tasks responsive under overload. The sole consumer is the
//! frame scheduler, which drains a bounded prefix each tick — there is no
//! condvar because the consumer already wakes on frame cadence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{Priority, RenderCommand};

/// Snapshot of queue accounting. At any instant
/// `total_enqueued == total_dequeued + total_dropped + resident`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_dropped: u64,
    pub resident: usize,
    pub peak_size: usize,
    pub avg_wait_ms: f64,
}

struct Rings {
    by_priority: [VecDeque<RenderCommand>; Priority::COUNT],
    len: usize,
    peak: usize,
}

pub struct CommandQueue {
    rings: Mutex<Rings>,
    capacity: usize,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
    /// EMA of dequeue wait time, f64 bits.
    avg_wait_ms: AtomicU64,
}

const WAIT_EMA_ALPHA: f64 = 0.1;

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: Mutex::new(Rings {
                by_priority: std::array::from_fn(|_| VecDeque::new()),
                len: 0,
                peak: 0,
            }),
            capacity,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            avg_wait_ms: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking enqueue. Returns `false` (and counts a drop) when full.
    pub fn enqueue(&self, mut cmd: RenderCommand) -> bool {
        let Ok(mut rings) = self.rings.lock() else {
            // Poisoned lock means the render thread died mid-frame; the
            // server is already shutting down, treat as drop.
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if rings.len >= self.capacity {
            drop(rings);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        cmd.enqueued_at = std::time::Instant::now();
        let idx = cmd.priority.index();
        rings.by_priority[idx].push_back(cmd);
        rings.len += 1;
        if rings.len > rings.peak {
            rings.peak = rings.len;
        }
        drop(rings);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drain up to `max` commands, strict priority then FIFO. Never blocks;
    /// may return fewer than `max`, including none.
    pub fn dequeue_batch(&self, max: usize) -> Vec<RenderCommand> {
        let mut out = Vec::new();
        let Ok(mut rings) = self.rings.lock() else {
            return out;
        };
        for idx in (0..Priority::COUNT).rev() {
            while out.len() < max {
                match rings.by_priority[idx].pop_front() {
                    Some(cmd) => {
                        rings.len -= 1;
                        out.push(cmd);
                    }
                    None => break,
                }
            }
            if out.len() == max {
                break;
            }
        }
        drop(rings);

        if !out.is_empty() {
            self.dequeued.fetch_add(out.len() as u64, Ordering::Relaxed);
            let now = std::time::Instant::now();
            for cmd in &out {
                let wait_ms = now.duration_since(cmd.enqueued_at).as_secs_f64() * 1000.0;
                self.update_wait_ema(wait_ms);
            }
        }
        out
    }

    pub fn size(&self) -> usize {
        self.rings.lock().map(|r| r.len).unwrap_or(0)
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Discard everything resident; counted as dequeued so the accounting
    /// identity holds.
    pub fn clear(&self) {
        if let Ok(mut rings) = self.rings.lock() {
            let drained = rings.len as u64;
            for ring in rings.by_priority.iter_mut() {
                ring.clear();
            }
            rings.len = 0;
            self.dequeued.fetch_add(drained, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> QueueStats {
        let (resident, peak) = self
            .rings
            .lock()
            .map(|r| (r.len, r.peak))
            .unwrap_or((0, 0));
        QueueStats {
            total_enqueued: self.enqueued.load(Ordering::Relaxed),
            total_dequeued: self.dequeued.load(Ordering::Relaxed),
            total_dropped: self.dropped.load(Ordering::Relaxed),
            resident,
            peak_size: peak,
            avg_wait_ms: f64::from_bits(self.avg_wait_ms.load(Ordering::Relaxed)),
        }
    }

    fn update_wait_ema(&self, sample_ms: f64) {
        // Single consumer, so a plain load-modify-store is race-free here.
        let prev = f64::from_bits(self.avg_wait_ms.load(Ordering::Relaxed));
        let next = if prev == 0.0 {
            sample_ms
        } else {
            prev * (1.0 - WAIT_EMA_ALPHA) + sample_ms * WAIT_EMA_ALPHA
        };
        self.avg_wait_ms.store(next.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use kairos_proto::types::Point;

    fn cmd(priority: Priority, sequence: u32) -> RenderCommand {
        RenderCommand {
            kind: CommandKind::DrawPoint {
                position: Point::new(0.0, 0.0),
                color: Default::default(),
            },
            priority,
            layer_id: 1,
            client_id: 1,
            sequence,
            timestamp_us: 0,
            enqueued_at: std::time::Instant::now(),
        }
    }

    #[test]
    fn priority_preempts_fifo() {
        let q = CommandQueue::new(2000);
        for seq in 0..1000 {
            assert!(q.enqueue(cmd(Priority::Normal, seq)));
        }
        assert!(q.enqueue(cmd(Priority::Critical, 9999)));

        let batch = q.dequeue_batch(10);
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[0].sequence, 9999);
        assert_eq!(batch[0].priority, Priority::Critical);
        // The rest keep their enqueue order.
        for (i, c) in batch[1..].iter().enumerate() {
            assert_eq!(c.sequence, i as u32);
        }
    }

    #[test]
    fn fifo_within_priority() {
        let q = CommandQueue::new(100);
        for seq in 0..50 {
            q.enqueue(cmd(Priority::Normal, seq));
        }
        let batch = q.dequeue_batch(50);
        let seqs: Vec<u32> = batch.iter().map(|c| c.sequence).collect();
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn overflow_drops_and_counts() {
        let q = CommandQueue::new(100);
        let mut accepted = 0;
        for seq in 0..150 {
            if q.enqueue(cmd(Priority::Normal, seq)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 100);
        assert_eq!(q.size(), 100);
        let stats = q.stats();
        assert_eq!(stats.total_dropped, 50);
        assert_eq!(stats.total_enqueued, 100);
        assert!(q.is_full());
    }

    #[test]
    fn accounting_identity_holds() {
        let q = CommandQueue::new(10);
        for seq in 0..25 {
            q.enqueue(cmd(Priority::Normal, seq));
        }
        q.dequeue_batch(4);
        let s = q.stats();
        assert_eq!(
            s.total_enqueued,
            s.total_dequeued + s.resident as u64
        );
        assert_eq!(s.total_dropped, 15);
        assert_eq!(s.peak_size, 10);
    }

    #[test]
    fn dequeue_on_empty_returns_nothing() {
        let q = CommandQueue::new(10);
        assert!(q.dequeue_batch(5).is_empty());
        assert!(q.is_empty());
    }

    #[test]
    fn clear_preserves_identity() {
        let q = CommandQueue::new(10);
        for seq in 0..5 {
            q.enqueue(cmd(Priority::Low, seq));
        }
        q.clear();
        let s = q.stats();
        assert_eq!(s.resident, 0);
        assert_eq!(s.total_enqueued, s.total_dequeued + s.total_dropped);
    }

    #[test]
    fn four_class_strictness() {
        let q = CommandQueue::new(100);
        q.enqueue(cmd(Priority::Low, 1));
        q.enqueue(cmd(Priority::High, 2));
        q.enqueue(cmd(Priority::Normal, 3));
        q.enqueue(cmd(Priority::Critical, 4));
        let order: Vec<u32> = q.dequeue_batch(4).iter().map(|c| c.sequence).collect();
        assert_eq!(order, vec![4, 2, 3, 1]);
    }
}
