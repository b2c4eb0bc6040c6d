use crate::invariants::{
    debug_assert_bounded_count, debug_assert_head_not_past_tail, debug_assert_monotonic,
};
use crate::{Metrics, MetricsSnapshot};
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Default ring capacity: 16 MiB, sized for a sustained burst from the
/// upstream host without backpressuring the socket.
pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Classic SPSC protocol over a byte buffer:
//
// - `head` and `tail` are unbounded u64 sequence counters; the physical index
//   is `counter % capacity`, computed only at access time. `size = tail - head`
//   is therefore unambiguous across wraps.
// - One byte of the buffer is kept unused so that `head == tail` means empty
//   and never full.
//
// Producer (write path):
// 1. Load `tail` Relaxed (only the producer writes tail)
// 2. Check `cached_head` (UnsafeCell, producer-owned) for free space
// 3. On miss, refresh from `head` with Acquire (synchronizes with consumer)
// 4. Write bytes into the reserved run
// 5. Store `tail` with Release (publishes the bytes), wake the consumer
//
// Consumer (read path):
// 1. Load `head` Relaxed (only the consumer writes head)
// 2. Load `tail` with Acquire (synchronizes with producer)
// 3. Read bytes from [head, tail)
// 4. Store `head` with Release (releases the space), wake the producer
//
// The consumer side deliberately has no cached tail: the frame scanner must
// observe bytes as soon as they are published, or a frame whose delimiter
// arrives after a partial peek would never be found.
//
// The mutex/condvar pair exists only for the blocking primitives; the hot
// path never touches it.
//
// =============================================================================

/// Byte-oriented single-producer single-consumer ring buffer.
///
/// The producer obtains a contiguous writable run via [`reserve`], fills it
/// (typically straight from a socket read), and commits the bytes actually
/// written. The consumer observes up to two contiguous readable segments via
/// [`peek`] and releases bytes with [`dequeue`].
///
/// The SPSC discipline is a usage contract: exactly one thread may call the
/// producer methods and exactly one thread the consumer methods. Within that
/// contract all operations are lock-free; [`wait_for_data`] and
/// [`wait_for_space`] add cooperative blocking on top.
///
/// [`reserve`]: ByteRing::reserve
/// [`peek`]: ByteRing::peek
/// [`dequeue`]: ByteRing::dequeue
/// [`wait_for_data`]: ByteRing::wait_for_data
/// [`wait_for_space`]: ByteRing::wait_for_space
pub struct ByteRing {
    // === PRODUCER HOT ===
    /// Tail counter (written by producer, read by consumer).
    tail: CachePadded<AtomicU64>,
    /// Producer's cached view of head (avoids cross-core reads).
    cached_head: CachePadded<UnsafeCell<u64>>,

    // === CONSUMER HOT ===
    /// Head counter (written by consumer, read by producer).
    head: CachePadded<AtomicU64>,

    // === COLD STATE ===
    /// Bumped by `clear()` so a consumer restart is observable.
    generation: AtomicU64,
    /// Set by `close()`; wakes and fails all waiters.
    closed: AtomicBool,
    /// Waiting primitives. Held only across condvar waits and notifies.
    wait_lock: Mutex<()>,
    data_cond: Condvar,
    space_cond: Condvar,
    /// Activity counters (relaxed atomics, negligible overhead).
    metrics: Metrics,

    // === DATA BUFFER ===
    /// Fixed at construction; kept outside the cell so status queries never
    /// touch the buffer.
    capacity: usize,
    /// Fixed-size byte storage. `Box<[u8]>` because the capacity never
    /// changes after construction.
    buffer: UnsafeCell<Box<[u8]>>,
}

// Safety: the SPSC protocol above guarantees that any byte range is written
// by at most one thread at a time, and the acquire/release pairs on the
// cursors order those accesses. `cached_head` is written only by the
// producer thread.
unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

impl ByteRing {
    /// Creates a ring with the given capacity in bytes.
    ///
    /// One byte is kept unused to distinguish empty from full, so the usable
    /// capacity is `capacity - 1`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity < 2`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2 bytes");
        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            wait_lock: Mutex::new(()),
            data_cond: Condvar::new(),
            space_cond: Condvar::new(),
            metrics: Metrics::new(),
            capacity,
            buffer: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
        }
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Total allocated capacity in bytes (one byte of which stays unused).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest number of bytes the ring can hold at once.
    #[inline]
    pub fn usable_capacity(&self) -> usize {
        self.capacity() - 1
    }

    /// Number of readable bytes currently in the ring.
    #[inline]
    pub fn size(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    /// Number of bytes that can still be written.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.usable_capacity() - self.size()
    }

    /// Returns true if no readable bytes are present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Relaxed)
    }

    /// Resync counter; incremented by every [`clear`](ByteRing::clear).
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns true once [`close`](ByteRing::close) has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the ring: all current and future waiters return immediately.
    ///
    /// Data already in the ring stays readable so a consumer can drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let guard = self.lock_wait();
        drop(guard);
        self.data_cond.notify_all();
        self.space_cond.notify_all();
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Reserve the longest contiguous writable run. Returns `None` when full.
    ///
    /// The returned slot is a view straight into the ring storage: read from
    /// a socket into `slot.as_mut_slice()`, then `slot.commit(n)` with the
    /// byte count actually written. Dropping the slot without committing
    /// publishes nothing.
    ///
    /// The run may be shorter than [`free_space`](ByteRing::free_space) when
    /// the writable region wraps the end of the buffer; commit and reserve
    /// again to use the remainder.
    pub fn reserve(&self) -> Option<WriteSlot<'_>> {
        let tail = self.tail.load(Ordering::Relaxed);

        // Fast path: check cached head. A stale cache can only under-report
        // the free space, hence the saturating arithmetic.
        // SAFETY: cached_head is only ever written by the producer, which is
        // the thread running this method.
        let mut head = unsafe { *self.cached_head.get() };
        let mut free = self
            .usable_capacity()
            .saturating_sub(tail.wrapping_sub(head) as usize);

        if free == 0 {
            // Slow path: refresh the cache from the consumer's cursor.
            head = self.head.load(Ordering::Acquire);
            // SAFETY: same single-writer argument as above.
            unsafe {
                *self.cached_head.get() = head;
            }
            free = self
                .usable_capacity()
                .saturating_sub(tail.wrapping_sub(head) as usize);
            if free == 0 {
                return None;
            }
        }

        let cap = self.capacity();
        let idx = (tail as usize) % cap;
        let contiguous = free.min(cap - idx);

        // SAFETY: [tail, tail + contiguous) is not readable by the consumer
        // (it is beyond the published tail) and only the producer writes it.
        // The subsequent Release store in `advance_tail` publishes the bytes.
        let slice = unsafe {
            let buf = &mut *self.buffer.get();
            std::slice::from_raw_parts_mut(buf.as_mut_ptr().add(idx), contiguous)
        };

        Some(WriteSlot { ring: self, slice })
    }

    /// Blocks until at least `n` bytes are writable, the timeout elapses, or
    /// the ring is closed. Returns whether the space is available.
    ///
    /// Spins briefly before parking on the condvar; the consumer wakes the
    /// producer on every [`dequeue`](ByteRing::dequeue).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the usable capacity: such a request could never
    /// be satisfied.
    pub fn wait_for_space(&self, n: usize, timeout: Duration) -> bool {
        assert!(
            n <= self.usable_capacity(),
            "cannot wait for {n} bytes in a ring holding at most {}",
            self.usable_capacity()
        );

        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if self.free_space() >= n || self.is_closed() {
                return self.free_space() >= n;
            }
            backoff.snooze();
        }

        let mut guard = self.lock_wait();
        let deadline = Instant::now() + timeout;
        loop {
            if self.free_space() >= n {
                return true;
            }
            if self.is_closed() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return self.free_space() >= n;
            }
            let (g, _timed_out) = self
                .space_cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = g;
        }
    }

    /// Internal: advance tail by `n` committed bytes and wake the consumer.
    fn advance_tail(&self, n: usize) {
        if n == 0 {
            return;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let new_tail = tail.wrapping_add(n as u64);
        let head = self.head.load(Ordering::Relaxed);

        debug_assert_bounded_count!(new_tail.wrapping_sub(head) as usize, self.usable_capacity());
        debug_assert_monotonic!("tail", tail, new_tail);

        self.tail.store(new_tail, Ordering::Release);
        self.metrics.add_committed(n as u64);

        let guard = self.lock_wait();
        drop(guard);
        self.data_cond.notify_one();
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Exposes the readable bytes as up to two contiguous segments.
    ///
    /// The second segment is non-empty only when the data wraps the end of
    /// the buffer. Both segments are empty when the ring is empty.
    pub fn peek(&self) -> (&[u8], &[u8]) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let avail = tail.wrapping_sub(head) as usize;
        if avail == 0 {
            return (&[], &[]);
        }

        let cap = self.capacity();
        let idx = (head as usize) % cap;
        let first_len = avail.min(cap - idx);
        let second_len = avail - first_len;

        // SAFETY: bytes in [head, tail) were published by the producer's
        // Release store and observed by the Acquire load above; the producer
        // will not overwrite them until head advances past them.
        unsafe {
            let buf = &*self.buffer.get();
            let first = std::slice::from_raw_parts(buf.as_ptr().add(idx), first_len);
            let second = std::slice::from_raw_parts(buf.as_ptr(), second_len);
            (first, second)
        }
    }

    /// Releases `n` consumed bytes back to the producer.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`size`](ByteRing::size).
    pub fn dequeue(&self, n: usize) {
        if n == 0 {
            return;
        }
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        assert!(
            n <= tail.wrapping_sub(head) as usize,
            "cannot dequeue {n} bytes, only {} readable",
            tail.wrapping_sub(head)
        );
        let new_head = head.wrapping_add(n as u64);

        debug_assert_head_not_past_tail!(new_head, tail);
        debug_assert_monotonic!("head", head, new_head);

        self.head.store(new_head, Ordering::Release);
        self.metrics.add_dequeued(n as u64);

        let guard = self.lock_wait();
        drop(guard);
        self.space_cond.notify_one();
    }

    /// Blocks until readable bytes are present, the timeout elapses, or the
    /// ring is closed. Returns whether data is available.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if !self.is_empty() || self.is_closed() {
                return !self.is_empty();
            }
            backoff.snooze();
        }

        let mut guard = self.lock_wait();
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_empty() {
                return true;
            }
            if self.is_closed() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return !self.is_empty();
            }
            let (g, _timed_out) = self
                .data_cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = g;
        }
    }

    /// Drains all readable bytes and bumps the generation counter.
    ///
    /// Consumer-side resynchronization after a protocol violation: the
    /// producer cursor is left alone (rewinding it would race a write in
    /// flight), so bytes committed after the clear remain readable. No
    /// memory is freed.
    pub fn clear(&self) {
        let tail = self.tail.load(Ordering::Acquire);
        self.head.store(tail, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        let guard = self.lock_wait();
        drop(guard);
        self.space_cond.notify_one();
    }

    /// A point-in-time copy of the activity counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[inline]
    fn lock_wait(&self) -> std::sync::MutexGuard<'_, ()> {
        self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ByteRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A reserved contiguous writable run inside the ring.
///
/// Fill `as_mut_slice()` (e.g. by passing it to a socket read), then call
/// [`commit`](WriteSlot::commit) with the number of bytes actually written.
/// Committing fewer bytes than the slot holds is normal; dropping the slot
/// commits nothing.
pub struct WriteSlot<'a> {
    ring: &'a ByteRing,
    slice: &'a mut [u8],
}

impl WriteSlot<'_> {
    /// The writable bytes.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.slice
    }

    /// Length of the reserved run.
    #[inline]
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    /// Returns true if the reserved run is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }

    /// Publishes the first `n` bytes of the run to the consumer.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the reserved length.
    pub fn commit(self, n: usize) {
        assert!(n <= self.slice.len(), "cannot commit more than reserved");
        self.ring.advance_tail(n);
    }
}
