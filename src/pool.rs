//! A bounded free list of encode buffers.
//!
//! Size classes are powers of two between 64 bytes and 64 KiB with a small
//! per-class cap. Buffers above the largest class bypass the pool and are
//! allocated and dropped directly. Correctness never depends on pooling;
//! this only spares the encoder repeated allocations on a hot connection.

use std::sync::Mutex;

const MIN_CLASS: usize = 64;
const MAX_CLASS: usize = 64 * 1024;
const CLASSES: usize = 11;
const PER_CLASS_CAP: usize = 8;

/// A thread-safe pool of byte buffers.
pub(crate) struct BufferPool {
    classes: [Mutex<Vec<Vec<u8>>>; CLASSES],
}

impl BufferPool {
    pub(crate) fn new() -> Self {
        Self {
            classes: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }

    fn class_of(capacity: usize) -> Option<usize> {
        if capacity > MAX_CLASS {
            return None;
        }

        let size = capacity.max(MIN_CLASS).next_power_of_two();
        Some(size.trailing_zeros() as usize - MIN_CLASS.trailing_zeros() as usize)
    }

    /// Acquire a cleared buffer with at least `capacity` bytes available.
    pub(crate) fn acquire(&self, capacity: usize) -> Vec<u8> {
        let Some(class) = Self::class_of(capacity) else {
            return Vec::with_capacity(capacity);
        };

        let mut buffers = match self.classes[class].lock() {
            Ok(buffers) => buffers,
            Err(poisoned) => poisoned.into_inner(),
        };

        match buffers.pop() {
            Some(buffer) => buffer,
            None => Vec::with_capacity(MIN_CLASS << class),
        }
    }

    /// Return a buffer to its size class, dropping it if the class is full
    /// or the buffer outgrew the largest class.
    pub(crate) fn release(&self, mut buffer: Vec<u8>) {
        let Some(class) = Self::class_of(buffer.capacity()) else {
            return;
        };

        let mut buffers = match self.classes[class].lock() {
            Ok(buffers) => buffers,
            Err(poisoned) => poisoned.into_inner(),
        };

        if buffers.len() < PER_CLASS_CAP {
            buffer.clear();
            buffers.push(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_powers_of_two() {
        assert_eq!(BufferPool::class_of(1), Some(0));
        assert_eq!(BufferPool::class_of(64), Some(0));
        assert_eq!(BufferPool::class_of(65), Some(1));
        assert_eq!(BufferPool::class_of(64 * 1024), Some(CLASSES - 1));
        assert_eq!(BufferPool::class_of(64 * 1024 + 1), None);
    }

    #[test]
    fn acquire_release_reuses() {
        let pool = BufferPool::new();

        let mut buffer = pool.acquire(100);
        buffer.extend_from_slice(b"junk");
        let capacity = buffer.capacity();
        pool.release(buffer);

        let buffer = pool.acquire(100);
        assert!(buffer.is_empty(), "recycled buffers come back cleared");
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn oversized_buffers_bypass() {
        let pool = BufferPool::new();
        let buffer = pool.acquire(1 << 20);
        assert!(buffer.capacity() >= 1 << 20);
        pool.release(buffer);
    }

    #[test]
    fn per_class_cap_bounds_the_list() {
        let pool = BufferPool::new();

        for _ in 0..PER_CLASS_CAP * 2 {
            pool.release(Vec::with_capacity(64));
        }

        let held = match pool.classes[0].lock() {
            Ok(buffers) => buffers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        assert_eq!(held, PER_CLASS_CAP);
    }
}
