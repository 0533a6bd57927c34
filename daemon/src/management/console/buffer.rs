use std::collections::{HashMap, VecDeque};

use log::debug;
use mcsm_protocol::console::{ConsoleEntry, ConsoleFrame};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Result of a console subscription: the catch-up snapshot plus the live channel.
#[derive(Debug)]
pub struct ConsoleSubscription {
    pub id: u64,
    /// the subscriber's previous history is invalid (sequence numbers rewound)
    pub reset: bool,
    pub snapshot: Vec<ConsoleEntry>,
    pub receiver: mpsc::Receiver<ConsoleFrame>,
}

/// Bounded, sequence-numbered console history plus its live subscribers.
pub struct ConsoleBuffer {
    entries: VecDeque<ConsoleEntry>,
    next_seq: u64,
    capacity: usize,
    trim_batch: usize,
    subscribers: HashMap<u64, mpsc::Sender<ConsoleFrame>>,
    next_subscriber: u64,
    subscriber_capacity: usize,
}

impl ConsoleBuffer {
    pub fn new(capacity: usize, trim_batch: usize, subscriber_capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            next_seq: 1,
            capacity: capacity.max(1),
            trim_batch,
            subscribers: HashMap::new(),
            next_subscriber: 1,
            subscriber_capacity: subscriber_capacity.max(1),
        }
    }

    pub fn oldest_seq(&self) -> Option<u64> {
        self.entries.front().map(|e| e.seq)
    }

    pub fn newest_seq(&self) -> Option<u64> {
        self.entries.back().map(|e| e.seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConsoleEntry> {
        self.entries.iter()
    }

    /// Buffers `line` with the next sequence number and, if `broadcast`, offers it to
    /// every subscriber. Returns the assigned sequence number.
    pub fn push(&mut self, line: String, broadcast: bool) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = ConsoleEntry { seq, line };

        if broadcast && !self.subscribers.is_empty() {
            self.send_all(ConsoleFrame::Line(entry.clone()));
        }
        self.entries.push_back(entry);

        if self.entries.len() > self.capacity {
            // drop in batches so a full buffer doesn't shift on every line
            let excess = self.entries.len() - self.capacity;
            let drop = (excess + self.trim_batch).min(self.entries.len() - 1);
            self.entries.drain(..drop);
        }
        seq
    }

    /// Clears history and rewinds sequence numbers to 1. Live subscribers are told
    /// with a `Reset` frame.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.next_seq = 1;
        if !self.subscribers.is_empty() {
            self.send_all(ConsoleFrame::Reset);
        }
    }

    pub fn subscribe(&mut self, last_seen: u64) -> ConsoleSubscription {
        let (reset, snapshot) = match (self.oldest_seq(), self.newest_seq()) {
            (None, _) | (_, None) => (last_seen > 0, vec![]),
            (Some(_), Some(newest)) if last_seen > newest => (true, self.snapshot_after(0)),
            (Some(oldest), Some(_)) if last_seen == 0 || last_seen < oldest => {
                (false, self.snapshot_after(0))
            }
            _ => (false, self.snapshot_after(last_seen)),
        };

        let (tx, receiver) = mpsc::channel(self.subscriber_capacity);
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        self.subscribers.insert(id, tx);

        ConsoleSubscription {
            id,
            reset,
            snapshot,
            receiver,
        }
    }

    /// Safe to call repeatedly; returns whether the subscriber was still registered.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    fn snapshot_after(&self, seq: u64) -> Vec<ConsoleEntry> {
        self.entries
            .iter()
            .filter(|e| e.seq > seq)
            .cloned()
            .collect()
    }

    fn send_all(&mut self, frame: ConsoleFrame) {
        self.subscribers.retain(|id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("console subscriber {} is lagging, frame dropped", id);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filled(n: usize) -> ConsoleBuffer {
        let mut buffer = ConsoleBuffer::new(100, 10, 8);
        for i in 0..n {
            buffer.push(format!("line {}", i), true);
        }
        buffer
    }

    fn seqs(entries: &[ConsoleEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.seq).collect()
    }

    #[test]
    fn sequence_starts_at_one_and_increments() {
        let mut buffer = filled(5);
        assert_eq!(
            buffer.entries().map(|e| e.seq).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.push("again".into(), true), 1);
        assert_eq!(buffer.push("and again".into(), false), 2);
    }

    #[test]
    fn trims_in_batches() {
        let mut buffer = filled(100);
        assert_eq!(buffer.len(), 100);
        buffer.push("overflow".into(), true);
        assert_eq!(buffer.len(), 90);
        assert_eq!(buffer.oldest_seq(), Some(12));
        assert_eq!(buffer.newest_seq(), Some(101));
    }

    #[test]
    fn zero_gets_full_snapshot_without_reset() {
        let mut buffer = filled(3);
        let sub = buffer.subscribe(0);
        assert!(!sub.reset);
        assert_eq!(seqs(&sub.snapshot), vec![1, 2, 3]);
    }

    #[test]
    fn incremental_replay() {
        let mut buffer = filled(5);
        let sub = buffer.subscribe(3);
        assert!(!sub.reset);
        assert_eq!(seqs(&sub.snapshot), vec![4, 5]);

        let caught_up = buffer.subscribe(5);
        assert!(!caught_up.reset);
        assert!(caught_up.snapshot.is_empty());
    }

    #[test]
    fn ahead_of_newest_resets_with_full_snapshot() {
        let mut buffer = filled(4);
        let sub = buffer.subscribe(50);
        assert!(sub.reset);
        assert_eq!(seqs(&sub.snapshot), vec![1, 2, 3, 4]);
    }

    #[test]
    fn older_than_retained_gets_full_snapshot() {
        let mut buffer = filled(150);
        let oldest = buffer.oldest_seq().unwrap();
        let sub = buffer.subscribe(oldest - 1);
        assert!(!sub.reset);
        assert_eq!(sub.snapshot.len(), buffer.len());
    }

    #[test]
    fn empty_buffer_with_history_resets() {
        let mut buffer = ConsoleBuffer::new(10, 2, 4);
        let fresh = buffer.subscribe(0);
        assert!(!fresh.reset);
        let returning = buffer.subscribe(12);
        assert!(returning.reset);
        assert!(returning.snapshot.is_empty());
    }

    #[tokio::test]
    async fn live_frames_and_unsubscribe() {
        let mut buffer = ConsoleBuffer::new(10, 2, 4);
        let mut sub = buffer.subscribe(0);

        buffer.push("visible".into(), true);
        buffer.push("polling echo".into(), false);
        buffer.reset();

        assert_eq!(
            sub.receiver.recv().await,
            Some(ConsoleFrame::Line(ConsoleEntry {
                seq: 1,
                line: "visible".into()
            }))
        );
        assert_eq!(sub.receiver.recv().await, Some(ConsoleFrame::Reset));

        assert!(buffer.unsubscribe(sub.id));
        assert!(!buffer.unsubscribe(sub.id));
        assert_eq!(sub.receiver.recv().await, None);
    }

    #[test]
    fn full_subscriber_drops_and_closed_is_removed() {
        let mut buffer = ConsoleBuffer::new(10, 2, 1);
        let slow = buffer.subscribe(0);
        let gone = buffer.subscribe(0);
        drop(gone.receiver);

        buffer.push("a".into(), true);
        buffer.push("b".into(), true);
        assert_eq!(buffer.subscriber_count(), 1);
        assert_eq!(buffer.len(), 2);
        drop(slow);
    }
}
