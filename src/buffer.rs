// Copyright 2025 Europa Software
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Mutex-guarded, growable byte buffer shared between a connection worker
//! and the embedder.
//!
//! The buffer keeps a read and a write cursor over one contiguous
//! allocation. Reads that drain it reset both cursors to zero, and writes
//! that would not fit first compact the unread region to the front and then
//! reallocate to exactly `unread + required`. A canary byte past the usable
//! capacity catches writers that overran their reservation.
//!
//! Access goes through short-lived views which hold the buffer's mutex for
//! their whole lifetime, so a reader can never observe a partial write and a
//! reallocation can never invalidate an outstanding slice. Views are closed
//! with an explicit `commit` of the number of bytes actually read or
//! written.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

/// Written one past the usable capacity; must never change afterwards.
const CANARY: u8 = 0x55;

/// Failures reported by buffer operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// A write commit exceeded the reserved region.
    #[error("write committed past the reserved region")]
    Overflow,
    /// A read commit exceeded the readable region.
    #[error("read committed past the readable region")]
    Overread,
    /// The allocator could not provide the requested capacity.
    #[error("buffer allocation failed")]
    Allocation,
    /// The canary byte past the capacity was mutated.
    #[error("buffer canary was overwritten")]
    Corrupted,
}

#[derive(Debug)]
struct Inner {
    /// Allocation of `capacity + 1` bytes; the last byte is the canary.
    buf: Vec<u8>,
    read: usize,
    write: usize,
}

impl Inner {
    fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        let mut inner = Inner {
            buf: Vec::new(),
            read: 0,
            write: 0,
        };
        inner.grow_to(capacity)?;
        Ok(inner)
    }

    fn capacity(&self) -> usize {
        self.buf.len().saturating_sub(1)
    }

    fn unread(&self) -> usize {
        self.write - self.read
    }

    fn unwritten(&self) -> usize {
        self.capacity() - self.write
    }

    fn check_canary(&self) -> Result<(), BufferError> {
        let canary = self.buf[self.capacity()];
        debug_assert!(canary == CANARY, "buffer canary was overwritten");
        if canary != CANARY {
            return Err(BufferError::Corrupted);
        }
        Ok(())
    }

    /// Replaces the allocation with one of exactly `unread + required`
    /// usable bytes, carrying the unread region to the front.
    fn grow_to(&mut self, required: usize) -> Result<(), BufferError> {
        let new_cap = self.unread() + required;
        let mut new_buf = Vec::new();
        new_buf
            .try_reserve_exact(new_cap + 1)
            .map_err(|_| BufferError::Allocation)?;
        new_buf.extend_from_slice(&self.buf[self.read..self.write]);
        new_buf.resize(new_cap + 1, 0);
        new_buf[new_cap] = CANARY;
        self.write = self.unread();
        self.read = 0;
        self.buf = new_buf;
        Ok(())
    }

    /// Guarantees `required` contiguous writable bytes at the write cursor.
    fn reserve(&mut self, required: usize) -> Result<(), BufferError> {
        if required <= self.unwritten() {
            return Ok(());
        }
        // Compact first; reallocate only if the free tail is still short.
        self.buf.copy_within(self.read..self.write, 0);
        self.write = self.unread();
        self.read = 0;
        if required <= self.unwritten() {
            return Ok(());
        }
        self.grow_to(required)
    }

    fn commit_write(&mut self, n: usize, reserved: usize) -> Result<(), BufferError> {
        if n > reserved || self.write + n > self.capacity() {
            return Err(BufferError::Overflow);
        }
        self.check_canary()?;
        self.write += n;
        Ok(())
    }

    fn commit_read(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.unread() {
            return Err(BufferError::Overread);
        }
        self.check_canary()?;
        self.read += n;
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
        Ok(())
    }
}

/// Single-producer / single-consumer byte buffer between a connection
/// worker and the embedder. See the module docs for the locking contract.
pub struct NetBuffer {
    inner: Mutex<Inner>,
}

impl fmt::Debug for NetBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBuffer")
            .field("readable", &self.readable())
            .finish()
    }
}

impl NetBuffer {
    /// Creates a buffer with `capacity` usable bytes.
    ///
    /// # Panics
    /// Panics if the initial allocation fails; later growth reports
    /// [`BufferError::Allocation`] instead.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(
                Inner::with_capacity(capacity).expect("initial buffer allocation failed"),
            ),
        }
    }

    /// Number of bytes currently readable. May be stale the instant it
    /// returns; take a view to get a stable answer.
    pub fn readable(&self) -> usize {
        self.inner.lock().unwrap().unread()
    }

    /// Reserves at least `required` contiguous writable bytes and returns a
    /// view of them. The buffer stays locked until the view is committed or
    /// dropped.
    pub fn write_view(&self, required: usize) -> Result<WriteView<'_>, BufferError> {
        let mut guard = self.inner.lock().unwrap();
        guard.reserve(required)?;
        Ok(WriteView {
            guard,
            reserved: required,
        })
    }

    /// Returns a view of all currently readable bytes (possibly empty).
    /// The buffer stays locked until the view is committed or dropped.
    pub fn read_view(&self) -> ReadView<'_> {
        ReadView {
            guard: self.inner.lock().unwrap(),
        }
    }

    /// Copies `data` in at the write cursor under a single lock.
    pub fn push(&self, data: &[u8]) -> Result<(), BufferError> {
        let mut guard = self.inner.lock().unwrap();
        guard.reserve(data.len())?;
        let start = guard.write;
        guard.buf[start..start + data.len()].copy_from_slice(data);
        guard.commit_write(data.len(), data.len())
    }

    /// Appends everything readable to `out` and marks it consumed.
    pub fn drain_into(&self, out: &mut Vec<u8>) {
        let mut guard = self.inner.lock().unwrap();
        out.extend_from_slice(&guard.buf[guard.read..guard.write]);
        guard.read = 0;
        guard.write = 0;
    }

    #[cfg(test)]
    fn offsets(&self) -> (usize, usize, usize) {
        let guard = self.inner.lock().unwrap();
        (guard.read, guard.write, guard.capacity())
    }
}

/// Writable view over a reserved region. Commit with the number of bytes
/// actually written; dropping without committing writes nothing.
pub struct WriteView<'a> {
    guard: MutexGuard<'a, Inner>,
    reserved: usize,
}

impl fmt::Debug for WriteView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteView")
            .field("reserved", &self.reserved)
            .finish()
    }
}

impl WriteView<'_> {
    /// The reserved writable region.
    pub fn slice(&mut self) -> &mut [u8] {
        let start = self.guard.write;
        let end = start + self.reserved;
        &mut self.guard.buf[start..end]
    }

    /// Marks `n <= reserved` bytes as written and releases the lock.
    pub fn commit(mut self, n: usize) -> Result<(), BufferError> {
        let reserved = self.reserved;
        self.guard.commit_write(n, reserved)
    }
}

/// Read view over the readable region. Commit with the number of bytes
/// actually consumed; dropping without committing consumes nothing.
pub struct ReadView<'a> {
    guard: MutexGuard<'a, Inner>,
}

impl fmt::Debug for ReadView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadView")
            .field("available", &self.guard.unread())
            .finish()
    }
}

impl ReadView<'_> {
    /// All currently readable bytes.
    pub fn slice(&self) -> &[u8] {
        &self.guard.buf[self.guard.read..self.guard.write]
    }

    /// Marks a prefix of `n` bytes as consumed and releases the lock.
    pub fn commit(mut self, n: usize) -> Result<(), BufferError> {
        self.guard.commit_read(n)
    }
}

#[cfg(test)]
mod test {
    use super::{BufferError, NetBuffer};

    #[test]
    fn new_buffer_is_empty_with_requested_capacity() {
        let buf = NetBuffer::new(64);
        assert_eq!(0, buf.readable());
        assert_eq!((0, 0, 64), buf.offsets());
    }

    #[test]
    fn push_then_drain_round_trips_in_order() {
        let buf = NetBuffer::new(16);
        buf.push(b"HELLO").unwrap();
        buf.push(b" WORLD").unwrap();
        assert_eq!(11, buf.readable());

        let mut out = Vec::new();
        buf.drain_into(&mut out);
        assert_eq!(b"HELLO WORLD", out.as_slice());
        assert_eq!(0, buf.readable());
    }

    #[test]
    fn draining_read_resets_both_cursors() {
        let buf = NetBuffer::new(32);
        buf.push(b"abcdef").unwrap();
        let view = buf.read_view();
        assert_eq!(b"abcdef", view.slice());
        view.commit(6).unwrap();
        assert_eq!((0, 0, 32), buf.offsets());
    }

    #[test]
    fn partial_read_leaves_the_remainder_readable() {
        let buf = NetBuffer::new(32);
        buf.push(b"abcdef").unwrap();
        buf.read_view().commit(2).unwrap();
        let view = buf.read_view();
        assert_eq!(b"cdef", view.slice());
    }

    #[test]
    fn write_view_grows_to_unread_plus_required() {
        let buf = NetBuffer::new(8);
        buf.push(b"abcd").unwrap();
        let mut view = buf.write_view(100).unwrap();
        view.slice()[..3].copy_from_slice(b"efg");
        view.commit(3).unwrap();

        let (_, _, capacity) = buf.offsets();
        assert_eq!(104, capacity);
        let mut out = Vec::new();
        buf.drain_into(&mut out);
        assert_eq!(b"abcdefg", out.as_slice());
    }

    #[test]
    fn reserve_compacts_before_reallocating() {
        let buf = NetBuffer::new(8);
        buf.push(b"abcdef").unwrap();
        buf.read_view().commit(4).unwrap();
        // 2 unread at offset 4; 6 more fit only after compaction.
        let mut view = buf.write_view(6).unwrap();
        view.slice().copy_from_slice(b"ghijkl");
        view.commit(6).unwrap();

        let (_, _, capacity) = buf.offsets();
        assert_eq!(8, capacity);
        let mut out = Vec::new();
        buf.drain_into(&mut out);
        assert_eq!(b"efghijkl", out.as_slice());
    }

    #[test]
    fn committing_more_than_reserved_is_an_overflow() {
        let buf = NetBuffer::new(16);
        let view = buf.write_view(4).unwrap();
        assert_eq!(Err(BufferError::Overflow), view.commit(5));
    }

    #[test]
    fn committing_more_than_readable_is_an_overread() {
        let buf = NetBuffer::new(16);
        buf.push(b"ab").unwrap();
        let view = buf.read_view();
        assert_eq!(Err(BufferError::Overread), view.commit(3));
    }

    #[test]
    fn dropped_view_commits_nothing() {
        let buf = NetBuffer::new(16);
        {
            let mut view = buf.write_view(8).unwrap();
            view.slice()[..8].copy_from_slice(b"ignored!");
        }
        assert_eq!(0, buf.readable());
    }

    #[test]
    fn empty_push_is_a_no_op() {
        let buf = NetBuffer::new(16);
        buf.push(b"").unwrap();
        assert_eq!(0, buf.readable());
    }
}
