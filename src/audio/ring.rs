//! Fixed-capacity ring buffer for audio samples
//!
//! Single mutex around the storage and index pair, with the element count
//! mirrored in an atomic so fill-level queries from the real-time path never
//! take the lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

struct Inner<T> {
    buffer: Vec<T>,
    write_pos: usize,
    read_pos: usize,
}

/// Bounded FIFO of `T` with wrap-around reads and writes.
///
/// Partial writes and reads are the norm: `write` stores as many elements as
/// fit and reports the count, `read` drains as many as are present. `peek`
/// copies from the head without consuming.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    size: AtomicUsize,
    capacity: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a ring buffer holding up to `capacity` elements.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "ring buffer capacity must be greater than zero".into(),
            ));
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                buffer: vec![T::default(); capacity],
                write_pos: 0,
                read_pos: 0,
            }),
            size: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Append up to `src.len()` elements, returning how many fit.
    pub fn write(&self, src: &[T]) -> usize {
        if src.is_empty() {
            return 0;
        }

        let mut inner = self.inner.lock().unwrap();

        let available = self.capacity - self.size.load(Ordering::Acquire);
        let to_write = src.len().min(available);
        if to_write == 0 {
            return 0;
        }

        // First segment: write position to end of storage
        let pos = inner.write_pos;
        let first = to_write.min(self.capacity - pos);
        inner.buffer[pos..pos + first].copy_from_slice(&src[..first]);

        // Second segment: wrap to the start
        if first < to_write {
            inner.buffer[..to_write - first].copy_from_slice(&src[first..to_write]);
        }

        inner.write_pos = (pos + to_write) % self.capacity;
        self.size.fetch_add(to_write, Ordering::Release);

        to_write
    }

    /// Consume up to `dst.len()` elements from the head, returning the count.
    pub fn read(&self, dst: &mut [T]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let mut inner = self.inner.lock().unwrap();

        let to_read = dst.len().min(self.size.load(Ordering::Acquire));
        if to_read == 0 {
            return 0;
        }

        let pos = inner.read_pos;
        let first = to_read.min(self.capacity - pos);
        dst[..first].copy_from_slice(&inner.buffer[pos..pos + first]);

        if first < to_read {
            dst[first..to_read].copy_from_slice(&inner.buffer[..to_read - first]);
        }

        inner.read_pos = (pos + to_read) % self.capacity;
        self.size.fetch_sub(to_read, Ordering::Release);

        to_read
    }

    /// Copy up to `dst.len()` elements from the head without consuming them.
    pub fn peek(&self, dst: &mut [T]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let inner = self.inner.lock().unwrap();

        let to_read = dst.len().min(self.size.load(Ordering::Acquire));
        if to_read == 0 {
            return 0;
        }

        let pos = inner.read_pos;
        let first = to_read.min(self.capacity - pos);
        dst[..first].copy_from_slice(&inner.buffer[pos..pos + first]);

        if first < to_read {
            dst[first..to_read].copy_from_slice(&inner.buffer[..to_read - first]);
        }

        to_read
    }

    /// Drop up to `count` elements from the head without copying them out.
    ///
    /// Used by the playback path to resynchronize after falling behind; a
    /// plain read would force a scratch allocation on the real-time thread.
    pub fn discard(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }

        let mut inner = self.inner.lock().unwrap();

        let to_drop = count.min(self.size.load(Ordering::Acquire));
        if to_drop == 0 {
            return 0;
        }

        inner.read_pos = (inner.read_pos + to_drop) % self.capacity;
        self.size.fetch_sub(to_drop, Ordering::Release);

        to_drop
    }

    /// Remove all contents.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.write_pos = 0;
        inner.read_pos = 0;
        self.size.store(0, Ordering::Release);
    }

    /// Number of buffered elements. Lock-free.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remaining space in elements. Lock-free.
    pub fn available(&self) -> usize {
        self.capacity - self.len()
    }

    /// Fill level as a percentage (0-100). Lock-free.
    pub fn fill_percentage(&self) -> u8 {
        ((self.len() * 100) / self.capacity) as u8
    }
}
