//! Sequenced Output Buffer (C2, §4.2): per-tab ring of numbered chunks with
//! small-write coalescing via a debounce timer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::bus::{BusEvent, EventBus};

pub const MAX_CHUNKS: usize = 1000;
pub const MAX_CHUNK_SIZE: usize = 4096;
pub const FLUSH_DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    pub seq: i64,
    pub data: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub chunk_count: usize,
    pub total_size: usize,
    pub first_seq: i64,
    pub last_seq: i64,
}

struct Inner {
    chunks: VecDeque<OutputChunk>,
    next_seq: i64,
    pending: Vec<u8>,
}

/// Coalescing ring buffer for one tab's PTY output. Single-writer by
/// construction (the PTY reader task or the flush timer), so the only
/// concurrency hazard is the debounce timer racing a synchronous flush --
/// guarded by the `timer_generation` counter.
pub struct SequencedBuffer {
    agent_id: String,
    tab_id: String,
    bus: Arc<EventBus>,
    max_chunks: usize,
    max_chunk_size: usize,
    flush_debounce: Duration,
    inner: Mutex<Inner>,
    timer_generation: AtomicU64,
}

impl SequencedBuffer {
    pub fn new(agent_id: impl Into<String>, tab_id: impl Into<String>, bus: Arc<EventBus>) -> Arc<Self> {
        Self::with_limits(agent_id, tab_id, bus, MAX_CHUNKS, MAX_CHUNK_SIZE, FLUSH_DEBOUNCE)
    }

    pub fn with_limits(
        agent_id: impl Into<String>,
        tab_id: impl Into<String>,
        bus: Arc<EventBus>,
        max_chunks: usize,
        max_chunk_size: usize,
        flush_debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent_id: agent_id.into(),
            tab_id: tab_id.into(),
            bus,
            max_chunks,
            max_chunk_size,
            flush_debounce,
            inner: Mutex::new(Inner {
                chunks: VecDeque::new(),
                next_seq: 0,
                pending: Vec::new(),
            }),
            timer_generation: AtomicU64::new(0),
        })
    }

    /// Seed the buffer on restart recovery with a single chunk at `seq=0`
    /// containing previously-persisted scrollback (§4.4).
    pub fn seed(&self, data: String) {
        let mut inner = self.inner.lock().expect("buffer mutex poisoned");
        debug_assert!(inner.chunks.is_empty() && inner.next_seq == 0);
        inner.chunks.push_back(OutputChunk {
            seq: 0,
            data,
            timestamp: Utc::now().timestamp_millis(),
        });
        inner.next_seq = 1;
    }

    /// Append raw PTY bytes. Flushes synchronously once `pendingData` crosses
    /// `MAX_CHUNK_SIZE`; otherwise (re)arms the debounce timer.
    pub fn append(self: &Arc<Self>, data: &[u8]) {
        let should_flush_now = {
            let mut inner = self.inner.lock().expect("buffer mutex poisoned");
            inner.pending.extend_from_slice(data);
            inner.pending.len() >= self.max_chunk_size
        };

        if should_flush_now {
            self.flush();
            return;
        }

        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.flush_debounce).await;
            this.fire_timer(generation);
        });
    }

    fn fire_timer(&self, generation: u64) {
        if self.timer_generation.load(Ordering::SeqCst) != generation {
            // A later append or an explicit flush superseded this timer.
            return;
        }
        self.flush();
    }

    /// Flush any pending bytes into a new sequenced chunk and publish it.
    /// Cancels any outstanding debounce timer (it will no-op when it fires).
    pub fn flush(&self) {
        let chunk = {
            let mut inner = self.inner.lock().expect("buffer mutex poisoned");
            self.timer_generation.fetch_add(1, Ordering::SeqCst);
            if inner.pending.is_empty() {
                None
            } else {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                let data = String::from_utf8_lossy(&inner.pending).into_owned();
                inner.pending.clear();
                let chunk = OutputChunk {
                    seq,
                    data,
                    timestamp: Utc::now().timestamp_millis(),
                };
                inner.chunks.push_back(chunk.clone());
                while inner.chunks.len() > self.max_chunks {
                    inner.chunks.pop_front();
                }
                Some(chunk)
            }
        };

        if let Some(chunk) = chunk {
            self.bus.publish(BusEvent::Chunk {
                agent_id: self.agent_id.clone(),
                tab_id: self.tab_id.clone(),
                chunk,
            });
        }
    }

    /// Chunks with `seq >= from_seq` in order, plus the current highest
    /// assigned seq (-1 when empty).
    pub fn snapshot(&self, from_seq: i64) -> (Vec<OutputChunk>, i64) {
        let inner = self.inner.lock().expect("buffer mutex poisoned");
        let chunks = inner
            .chunks
            .iter()
            .filter(|c| c.seq >= from_seq)
            .cloned()
            .collect();
        let last_seq = inner.chunks.back().map(|c| c.seq).unwrap_or(-1);
        (chunks, last_seq)
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock().expect("buffer mutex poisoned");
        let total_size = inner.chunks.iter().map(|c| c.data.len()).sum();
        BufferStats {
            chunk_count: inner.chunks.len(),
            total_size,
            first_seq: inner.chunks.front().map(|c| c.seq).unwrap_or(-1),
            last_seq: inner.chunks.back().map(|c| c.seq).unwrap_or(-1),
        }
    }

    /// Reconstruct the full observed stream (in retained-chunk order) and
    /// return at most the last `max_chars` characters, for shutdown
    /// persistence (§4.4, §8 shutdown-drain invariant).
    pub fn tail(&self, max_chars: usize) -> String {
        let inner = self.inner.lock().expect("buffer mutex poisoned");
        let mut combined = String::new();
        for chunk in &inner.chunks {
            combined.push_str(&chunk.data);
        }
        if combined.chars().count() <= max_chars {
            combined
        } else {
            let skip = combined.chars().count() - max_chars;
            combined.chars().skip(skip).collect()
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock().expect("buffer mutex poisoned").pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_buffer(max_chunks: usize) -> Arc<SequencedBuffer> {
        let bus = Arc::new(EventBus::new());
        SequencedBuffer::with_limits("a", "t", bus, max_chunks, MAX_CHUNK_SIZE, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn flush_assigns_monotonic_dense_seq() {
        let buf = test_buffer(1000);
        buf.flush(); // no pending data, no-op
        buf.append(b"hello");
        buf.flush();
        buf.append(b"world");
        buf.flush();
        let (chunks, last_seq) = buf.snapshot(0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[1].seq, 1);
        assert_eq!(last_seq, 1);
    }

    #[tokio::test]
    async fn large_write_flushes_synchronously() {
        let buf = test_buffer(1000);
        let big = vec![b'x'; MAX_CHUNK_SIZE];
        buf.append(&big);
        let (chunks, _) = buf.snapshot(0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data.len(), MAX_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn debounce_coalesces_adjacent_small_writes() {
        let buf = test_buffer(1000);
        buf.append(b"a");
        tokio::time::sleep(Duration::from_millis(5)).await;
        buf.append(b"b");
        tokio::time::sleep(Duration::from_millis(5)).await;
        buf.append(b"c");
        tokio::time::sleep(Duration::from_millis(40)).await;
        let (chunks, _) = buf.snapshot(0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, "abc");
    }

    #[test]
    fn trim_keeps_ring_bounded_and_contiguous() {
        let buf = test_buffer(3);
        for i in 0..5 {
            buf.append(format!("chunk{i}").as_bytes());
            buf.flush();
        }
        let stats = buf.stats();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.first_seq, 2);
        assert_eq!(stats.last_seq, 4);
        assert_eq!(stats.last_seq - stats.first_seq + 1, stats.chunk_count as i64);
    }

    #[test]
    fn empty_buffer_reports_last_seq_negative_one() {
        let buf = test_buffer(1000);
        let stats = buf.stats();
        assert_eq!(stats.last_seq, -1);
        assert_eq!(stats.first_seq, -1);
    }

    #[test]
    fn seed_primes_next_seq_to_one() {
        let buf = test_buffer(1000);
        buf.seed("previous scrollback\n".to_string());
        let (chunks, last_seq) = buf.snapshot(0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(last_seq, 0);
        buf.append(b"more");
        buf.flush();
        let (chunks, _) = buf.snapshot(0);
        assert_eq!(chunks[1].seq, 1);
    }

    #[test]
    fn tail_truncates_to_last_n_chars() {
        let buf = test_buffer(1000);
        buf.append(b"0123456789");
        buf.flush();
        assert_eq!(buf.tail(4), "6789");
        assert_eq!(buf.tail(100), "0123456789");
    }
}
