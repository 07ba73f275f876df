//! Accumulation buffer for compressed bytes awaiting decode.

use std::io::{self, Read};

/// Fixed-capacity byte buffer consumed from the front.
///
/// The decoder sees the unconsumed bytes as one contiguous slice via
/// [`peek`](AccumBuffer::peek); consumed bytes are released with
/// [`commit`](AccumBuffer::commit) and the remainder is compacted lazily,
/// only when new data would not fit behind it.
pub struct AccumBuffer {
    storage: Box<[u8]>,
    start: usize,
    end: usize,
}

impl AccumBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Unconsumed bytes, oldest first.
    pub fn peek(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Drop `n` bytes from the front. `n` is clamped to `len()`.
    pub fn commit(&mut self, n: usize) {
        self.start += n.min(self.len());
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Copy as much of `data` as fits. Returns the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let spare = self.spare_mut();
        let n = data.len().min(spare.len());
        spare[..n].copy_from_slice(&data[..n]);
        self.end += n;
        n
    }

    /// Perform one read from `src` into the free space.
    ///
    /// Returns `Ok(0)` when the buffer is full or the source is exhausted;
    /// callers check [`is_full`](AccumBuffer::is_full) to tell them apart.
    pub fn fill_from<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<usize> {
        let spare = self.spare_mut();
        if spare.is_empty() {
            return Ok(0);
        }
        let n = loop {
            match src.read(spare) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.end += n;
        Ok(n)
    }

    fn spare_mut(&mut self) -> &mut [u8] {
        if self.start > 0 && self.end == self.capacity() {
            self.storage.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        &mut self.storage[self.end..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_commit_then_append_compacts() {
        let mut buf = AccumBuffer::new(8);
        assert_eq!(buf.append(&[1, 2, 3, 4, 5, 6, 7, 8, 9]), 8);
        assert!(buf.is_full());
        buf.commit(3);
        assert_eq!(buf.peek(), &[4, 5, 6, 7, 8]);
        assert_eq!(buf.append(&[10, 11, 12, 13]), 3);
        assert_eq!(buf.peek(), &[4, 5, 6, 7, 8, 10, 11, 12]);
    }

    #[test]
    fn test_fill_from_reader_until_exhausted() {
        let mut buf = AccumBuffer::new(4);
        let mut src: &[u8] = &[1, 2, 3, 4, 5, 6];
        assert_eq!(buf.fill_from(&mut src).unwrap(), 4);
        assert_eq!(buf.fill_from(&mut src).unwrap(), 0);
        assert!(buf.is_full());
        buf.commit(4);
        assert!(buf.is_empty());
        assert_eq!(buf.fill_from(&mut src).unwrap(), 2);
        assert_eq!(buf.peek(), &[5, 6]);
        assert_eq!(buf.fill_from(&mut src).unwrap(), 0);
        assert!(!buf.is_full());
    }

    proptest! {
        // used length == bytes read - bytes consumed, and never above capacity
        #[test]
        fn consumption_invariant(
            cap in 1usize..64,
            input in prop::collection::vec(any::<u8>(), 0..400),
            steps in prop::collection::vec((0usize..40, 0usize..40), 1..80),
        ) {
            let mut buf = AccumBuffer::new(cap);
            let mut src: &[u8] = &input;
            let mut read_total = 0usize;
            let mut consumed_total = 0usize;
            for (read_len, consume) in steps {
                let mut limited = (&mut src).take(read_len as u64);
                read_total += buf.fill_from(&mut limited).unwrap();
                let n = consume.min(buf.len());
                let expected: Vec<u8> = input[consumed_total..consumed_total + n].to_vec();
                prop_assert_eq!(&buf.peek()[..n], &expected[..]);
                buf.commit(n);
                consumed_total += n;
                prop_assert!(buf.len() <= buf.capacity());
                prop_assert_eq!(buf.len(), read_total - consumed_total);
            }
        }
    }
}
