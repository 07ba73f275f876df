//! Fixed-capacity byte ring with bounded-wait push/pop.
//!
//! The only hand-off point between the fixed-cadence capture reader and the
//! latency-variable upload worker. Storage is allocated once and reused for
//! every session; `reset()` discards whatever is unread.

use parking_lot::{Condvar, Mutex};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};
use std::time::{Duration, Instant};

/// Single-producer single-consumer byte stream buffer.
pub struct RingStream {
    state: Mutex<HeapRb<u8>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RingStream {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingStream capacity must be non-zero");
        Self {
            state: Mutex::new(HeapRb::new(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity().get()
    }

    /// Bytes written and not yet popped.
    pub fn available(&self) -> usize {
        self.state.lock().occupied_len()
    }

    /// Store `data`, waiting up to `timeout` for the consumer to make room.
    ///
    /// Returns the number of bytes accepted. Anything short of `data.len()`
    /// was rejected and is the caller's to drop.
    pub fn push(&self, data: &[u8], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let mut accepted = 0;
        loop {
            let n = state.push_slice(&data[accepted..]);
            if n > 0 {
                accepted += n;
                self.not_empty.notify_one();
            }
            if accepted == data.len() {
                return accepted;
            }
            if self.not_full.wait_until(&mut state, deadline).timed_out() {
                let n = state.push_slice(&data[accepted..]);
                if n > 0 {
                    self.not_empty.notify_one();
                }
                return accepted + n;
            }
        }
    }

    /// Read up to `out.len()` bytes, waiting up to `timeout` for at least one.
    ///
    /// Returns 0 on timeout.
    pub fn pop(&self, out: &mut [u8], timeout: Duration) -> usize {
        if out.is_empty() {
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.is_empty() {
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let n = state.pop_slice(out);
        if n > 0 {
            self.not_full.notify_one();
        }
        n
    }

    /// Discard all unread bytes.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.clear();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_push_pop_basic() {
        let ring = RingStream::new(16);
        assert_eq!(ring.push(&[1, 2, 3, 4, 5], SHORT), 5);
        assert_eq!(ring.available(), 5);

        let mut out = [0u8; 3];
        assert_eq!(ring.pop(&mut out, SHORT), 3);
        assert_eq!(out, [1, 2, 3]);

        let mut out = [0u8; 8];
        assert_eq!(ring.pop(&mut out, SHORT), 2);
        assert_eq!(&out[..2], &[4, 5]);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_pop_times_out_empty() {
        let ring = RingStream::new(8);
        let mut out = [0u8; 4];
        let start = Instant::now();
        assert_eq!(ring.pop(&mut out, SHORT), 0);
        assert!(start.elapsed() >= SHORT);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let ring = RingStream::new(8);
        let mut out = [0u8; 8];
        assert_eq!(ring.push(&[0, 1, 2, 3, 4, 5], SHORT), 6);
        assert_eq!(ring.pop(&mut out[..4], SHORT), 4);
        assert_eq!(ring.push(&[6, 7, 8, 9, 10, 11], SHORT), 6);
        assert_eq!(ring.available(), 8);
        assert_eq!(ring.pop(&mut out, SHORT), 8);
        assert_eq!(out, [4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_reset_discards_unread() {
        let ring = RingStream::new(8);
        ring.push(&[9; 6], SHORT);
        ring.reset();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.push(&[1; 8], SHORT), 8);
    }

    #[test]
    fn test_oversized_push_is_bounded_until_consumer_makes_room() {
        let ring = Arc::new(RingStream::new(1024));
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();

        let accepted = ring.push(&data, SHORT);
        assert!(accepted <= 1024);
        assert_eq!(accepted, 1024);
        assert_eq!(ring.available(), 1024);

        // No room yet: the remainder is rejected.
        assert_eq!(ring.push(&data[accepted..], SHORT), 0);

        let consumer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut out = vec![0u8; 1024];
                let mut got = Vec::new();
                while got.len() < 2000 {
                    let n = ring.pop(&mut out, Duration::from_millis(500));
                    assert!(n > 0, "consumer starved");
                    got.extend_from_slice(&out[..n]);
                }
                got
            })
        };

        let rest = ring.push(&data[accepted..], Duration::from_secs(2));
        assert_eq!(rest, 2000 - accepted);
        let got = consumer.join().unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn test_concurrent_stream_keeps_order() {
        let ring = Arc::new(RingStream::new(64));
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for chunk in (0..=255u8).collect::<Vec<_>>().chunks(10) {
                    let mut off = 0;
                    while off < chunk.len() {
                        off += ring.push(&chunk[off..], Duration::from_millis(50));
                    }
                }
            })
        };
        let mut got = Vec::new();
        let mut out = [0u8; 7];
        while got.len() < 256 {
            let n = ring.pop(&mut out, Duration::from_millis(500));
            got.extend_from_slice(&out[..n]);
        }
        producer.join().unwrap();
        assert_eq!(got, (0..=255u8).collect::<Vec<_>>());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(Vec<u8>),
        Pop(usize),
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => prop::collection::vec(any::<u8>(), 0..200).prop_map(Op::Push),
            3 => (0usize..200).prop_map(Op::Pop),
            1 => Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn outstanding_never_exceeds_capacity(cap in 1usize..160, ops in prop::collection::vec(op(), 1..60)) {
            let ring = RingStream::new(cap);
            let mut model: VecDeque<u8> = VecDeque::new();
            for op in ops {
                match op {
                    Op::Push(data) => {
                        let n = ring.push(&data, Duration::ZERO);
                        prop_assert_eq!(n, data.len().min(cap - model.len()));
                        model.extend(&data[..n]);
                    }
                    Op::Pop(want) => {
                        let mut out = vec![0u8; want];
                        let n = ring.pop(&mut out, Duration::ZERO);
                        let expected: Vec<u8> = model.drain(..want.min(model.len())).collect();
                        prop_assert_eq!(&out[..n], &expected[..]);
                    }
                    Op::Reset => {
                        ring.reset();
                        model.clear();
                    }
                }
                prop_assert!(ring.available() <= cap);
                prop_assert_eq!(ring.available(), model.len());
            }
        }
    }
}
