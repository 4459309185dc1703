//! The Go-Back-N send buffer.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tokio::sync::mpsc::UnboundedSender;

use snet_types::{NodeId, Segment};

struct SendEntry {
    seg: Segment,
    sent_at: Instant,
}

/// A FIFO of DATA segments in three regions: `[0, unsent)` are outstanding
/// (sent, unacknowledged), `[unsent, len)` have never been transmitted.
/// Acknowledged entries are popped from the front, so an empty deque implies
/// no head, no tail and zero outstanding segments.
pub(crate) struct SendBuffer {
    window: usize,
    tx: UnboundedSender<(NodeId, Segment)>,
    peer_node: NodeId,
    next_seq: u32,
    entries: VecDeque<SendEntry>,
    unsent: usize,
    timer_running: bool,
}

impl SendBuffer {
    pub fn new(window: usize, tx: UnboundedSender<(NodeId, Segment)>) -> Self {
        Self {
            window,
            tx,
            peer_node: 0,
            next_seq: 0,
            entries: VecDeque::new(),
            unsent: 0,
            timer_running: false,
        }
    }

    pub fn set_peer(&mut self, node: NodeId) {
        self.peer_node = node;
    }

    /// Sent-but-unacknowledged segment count.
    pub fn outstanding(&self) -> usize {
        self.unsent
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Appends a DATA segment, assigning it the next byte-based sequence
    /// number and advancing the counter by the payload length.
    pub fn append(&mut self, src_port: u32, dest_port: u32, payload: Vec<u8>) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(payload.len() as u32);
        self.entries.push_back(SendEntry {
            seg: Segment::data(src_port, dest_port, seq, payload),
            sent_at: Instant::now(),
        });
    }

    /// Transmits never-sent segments until the window is full or the buffer
    /// drains. Returns `true` when the caller must start the retransmission
    /// timer for this buffer.
    pub fn send_window(&mut self) -> bool {
        while self.unsent < self.entries.len() && self.unsent < self.window {
            let entry = &mut self.entries[self.unsent];
            entry.sent_at = Instant::now();
            if self.tx.send((self.peer_node, entry.seg.clone())).is_err() {
                tracing::error!(target: "snet/stcp", "sip channel gone, cannot transmit");
                return false;
            }
            self.unsent += 1;
        }
        if self.unsent > 0 && !self.timer_running {
            self.timer_running = true;
            return true;
        }
        false
    }

    /// Cumulative acknowledgement: releases every outstanding segment with a
    /// sequence number strictly below `ack`. Duplicate and stale
    /// acknowledgements are no-ops.
    pub fn recv_ack(&mut self, ack: u32) {
        while self.unsent > 0 {
            match self.entries.front() {
                Some(front) if front.seg.header.seq < ack => {
                    self.entries.pop_front();
                    self.unsent -= 1;
                }
                _ => break,
            }
        }
    }

    /// Age of the oldest outstanding segment.
    pub fn head_age(&self) -> Option<Duration> {
        (self.unsent > 0).then(|| self.entries[0].sent_at.elapsed())
    }

    /// Go-Back-N timeout: retransmits every outstanding segment and
    /// refreshes its send time.
    pub fn retransmit_outstanding(&mut self) {
        for entry in self.entries.iter_mut().take(self.unsent) {
            entry.sent_at = Instant::now();
            if self.tx.send((self.peer_node, entry.seg.clone())).is_err() {
                tracing::error!(target: "snet/stcp", "sip channel gone, cannot retransmit");
                return;
            }
        }
    }

    /// Drops the whole chain (teardown).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.unsent = 0;
    }

    pub fn reset_seq(&mut self) {
        self.next_seq = 0;
    }

    /// Marks the retransmission timer as stopped; the next `send_window`
    /// that leaves segments outstanding will request a fresh one.
    pub fn timer_stopped(&mut self) {
        self.timer_running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snet_types::SegmentKind;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

    fn buffer(window: usize) -> (SendBuffer, UnboundedReceiver<(NodeId, Segment)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut buf = SendBuffer::new(window, tx);
        buf.set_peer(7);
        (buf, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<(NodeId, Segment)>) -> Vec<Segment> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok((node, seg)) => {
                    assert_eq!(node, 7);
                    out.push(seg);
                }
                Err(TryRecvError::Empty) => return out,
                Err(e) => panic!("channel broken: {e}"),
            }
        }
    }

    #[test]
    fn sequence_numbers_count_payload_bytes() {
        let (mut buf, _rx) = buffer(4);
        buf.append(1, 2, vec![0; 10]);
        buf.append(1, 2, vec![0; 3]);
        buf.append(1, 2, vec![0; 5]);
        buf.send_window();
        assert_eq!(
            buf.entries.iter().map(|e| e.seg.header.seq).collect::<Vec<_>>(),
            vec![0, 10, 13]
        );
    }

    #[test]
    fn window_bounds_outstanding_segments() {
        let (mut buf, mut rx) = buffer(3);
        for _ in 0..5 {
            buf.append(1, 2, vec![0; 8]);
        }
        assert!(buf.send_window());
        assert_eq!(buf.outstanding(), 3);
        assert_eq!(drain(&mut rx).len(), 3);

        // Re-pumping without acknowledgements transmits nothing new.
        assert!(!buf.send_window());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn cumulative_ack_opens_the_window() {
        let (mut buf, mut rx) = buffer(3);
        for _ in 0..5 {
            buf.append(1, 2, vec![0; 8]);
        }
        buf.send_window();
        drain(&mut rx);

        // Acks for the first two segments (seqs 0 and 8): ack = 16.
        buf.recv_ack(16);
        assert_eq!(buf.outstanding(), 1);
        assert_eq!(buf.len(), 3);

        buf.send_window();
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].header.seq, 24);
        assert_eq!(buf.outstanding(), 3);
    }

    #[test]
    fn stale_and_duplicate_acks_are_noops() {
        let (mut buf, mut rx) = buffer(4);
        buf.append(1, 2, vec![0; 8]);
        buf.append(1, 2, vec![0; 8]);
        buf.send_window();
        drain(&mut rx);

        buf.recv_ack(8);
        assert_eq!(buf.outstanding(), 1);
        buf.recv_ack(8);
        buf.recv_ack(0);
        assert_eq!(buf.outstanding(), 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn full_ack_leaves_consistent_empty_buffer() {
        let (mut buf, mut rx) = buffer(4);
        buf.append(1, 2, vec![0; 8]);
        buf.append(1, 2, vec![0; 8]);
        buf.send_window();
        drain(&mut rx);

        buf.recv_ack(16);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.outstanding(), 0);
        assert!(buf.head_age().is_none());
    }

    #[test]
    fn timeout_retransmits_all_outstanding() {
        let (mut buf, mut rx) = buffer(3);
        for _ in 0..5 {
            buf.append(1, 2, vec![0; 8]);
        }
        buf.send_window();
        drain(&mut rx);

        buf.retransmit_outstanding();
        let resent = drain(&mut rx);
        assert_eq!(resent.len(), 3);
        assert_eq!(
            resent.iter().map(|s| s.header.seq).collect::<Vec<_>>(),
            vec![0, 8, 16]
        );
        assert!(resent.iter().all(|s| s.kind() == SegmentKind::Data));
    }

    #[test]
    fn timer_request_fires_once_per_drain() {
        let (mut buf, mut rx) = buffer(2);
        buf.append(1, 2, vec![0; 8]);
        assert!(buf.send_window());
        buf.append(1, 2, vec![0; 8]);
        // Timer already running, no second request.
        assert!(!buf.send_window());

        buf.recv_ack(16);
        buf.timer_stopped();
        buf.append(1, 2, vec![0; 8]);
        assert!(buf.send_window());
        drain(&mut rx);
    }

    #[test]
    fn clear_empties_the_chain() {
        let (mut buf, mut rx) = buffer(2);
        for _ in 0..4 {
            buf.append(1, 2, vec![0; 8]);
        }
        buf.send_window();
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.outstanding(), 0);
        drain(&mut rx);
    }
}
