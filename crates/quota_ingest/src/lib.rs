//! Margin-finance and short-selling quota ingestion service.
//!
//! A back-office mainframe pushes fixed-layout, overpunch-encoded records
//! over a newline-delimited TCP stream. This crate decodes them, maintains
//! per-(area, stock) quota summaries plus a company-wide rollup in memory,
//! and mirrors every mutation into a JSON document store so downstream
//! trading systems can query the current quota picture.
//!
//! The data plane is three threads over [`bytering`]:
//!
//! - a producer that reads the socket straight into the ring,
//! - a single consumer that scans frames, decodes records, and applies them
//!   to the [`store::SummaryStore`] (which publishes through a
//!   [`store::DocumentStore`] adapter),
//! - the main thread, which only waits for a shutdown signal.
//!
//! Per-key publish ordering follows from the consumer being the only writer.

pub mod area;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod record;
pub mod server;
pub mod store;
pub mod summary;

pub use area::AreaMap;
pub use config::ServiceConfig;
pub use error::FeedError;
pub use handler::{Dispatcher, PacketHandler};
pub use record::{Payload, TransactionMessage};
pub use server::IngestServer;
pub use store::{DocumentStore, MemoryStore, RedisJsonStore, SummaryStore};
pub use summary::Summary;
