//! Bounded free-list of fixed-size copy buffers
//!
//! Each splice direction borrows one buffer for the lifetime of the
//! connection and returns it on drop, so cancellation of a copy direction
//! cannot leak a buffer.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Size of each copy buffer.
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Buffers retained on the free list; releases past this bound just drop.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            buffer_size,
            capacity,
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(BUFFER_SIZE, DEFAULT_CAPACITY)
    }

    /// Take a buffer off the free list, or allocate a fresh one when the
    /// list is empty. The buffer is returned to the pool when the guard
    /// drops.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// Buffers currently sitting on the free list.
    pub fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A buffer checked out of a [`BufferPool`]; returns itself on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_allocates_configured_size() {
        let pool = BufferPool::new(1024, 4);
        let buf = pool.acquire();
        assert_eq!(buf.len(), 1024);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_drop_returns_buffer() {
        let pool = BufferPool::new(1024, 4);
        drop(pool.acquire());
        assert_eq!(pool.idle(), 1);

        // The returned buffer is handed out again.
        let _buf = pool.acquire();
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(64, 2);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_buffer_is_writable() {
        let pool = BufferPool::new(8, 2);
        let mut buf = pool.acquire();
        buf[0] = 0xff;
        buf[7] = 0x01;
        assert_eq!(&buf[..2], &[0xff, 0]);
    }
}
