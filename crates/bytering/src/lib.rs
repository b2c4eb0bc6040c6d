//! Byte-oriented SPSC ring buffer with newline frame scanning.
//!
//! Built for continuous stream ingestion: a socket reader writes straight
//! into the ring's reserved region (no per-packet allocation), a single
//! consumer locates newline-terminated frames in place and hands them to a
//! decoder, copying only when a frame spans the ring's wrap point.
//!
//! # Example
//!
//! ```
//! use bytering::ByteRing;
//!
//! let ring = ByteRing::new(1024);
//!
//! // Producer side: reserve, fill, commit.
//! let mut slot = ring.reserve().unwrap();
//! slot.as_mut_slice()[..6].copy_from_slice(b"hello\n");
//! slot.commit(6);
//!
//! // Consumer side: scan for a complete frame, then release it.
//! let frame = ring.next_frame().unwrap();
//! let mut scratch = Vec::new();
//! assert_eq!(frame.contiguous(&mut scratch), b"hello\n");
//! let len = frame.total_len();
//! drop(frame);
//! ring.dequeue(len);
//! ```

mod frame;
mod invariants;
mod metrics;
mod ring;

pub use frame::{Frame, FRAME_DELIMITER, KEEP_ALIVE_MAX};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ring::{ByteRing, WriteSlot, DEFAULT_CAPACITY};
