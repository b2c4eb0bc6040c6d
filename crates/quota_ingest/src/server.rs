//! TCP ingestion: one producer thread feeding the ring, one consumer thread
//! draining frames into the dispatcher.
//!
//! Threads and blocking I/O throughout. The producer accepts one feed
//! connection at a time and reads straight into the ring's reserved region;
//! the consumer owns all decode and handler work, which is what guarantees
//! per-key publish ordering downstream.

use crate::config::ServiceConfig;
use crate::error::FeedError;
use crate::handler::Dispatcher;
use crate::record;
use bytering::ByteRing;
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long blocked waits sleep before re-checking the running flag.
const WAIT_TICK: Duration = Duration::from_millis(100);

/// The ingest server: listener plus the two data-plane threads.
pub struct IngestServer {
    listener: TcpListener,
    ring: Arc<ByteRing>,
    dispatcher: Arc<Dispatcher>,
    running: Arc<AtomicBool>,
    socket_timeout: Duration,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl IngestServer {
    /// Binds the listen socket. Failure here is fatal at startup.
    pub fn bind(cfg: &ServiceConfig, dispatcher: Arc<Dispatcher>) -> Result<Self, FeedError> {
        let listener = TcpListener::bind(("0.0.0.0", cfg.server_port)).map_err(|e| {
            FeedError::TcpStartFailed(format!("bind port {}: {e}", cfg.server_port))
        })?;
        info!(port = cfg.server_port, "feed listener bound");
        Ok(Self {
            listener,
            ring: Arc::new(ByteRing::default()),
            dispatcher,
            running: Arc::new(AtomicBool::new(false)),
            socket_timeout: cfg.socket_timeout(),
            producer: None,
            consumer: None,
        })
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the producer and consumer threads. Idempotent.
    pub fn start(&mut self) -> Result<(), FeedError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let listener = self
            .listener
            .try_clone()
            .map_err(|e| FeedError::TcpStartFailed(format!("clone listener: {e}")))?;
        let ring = Arc::clone(&self.ring);
        let running = Arc::clone(&self.running);
        let timeout = self.socket_timeout;
        self.producer = Some(thread::spawn(move || {
            producer_loop(&listener, &ring, &running, timeout);
        }));

        let ring = Arc::clone(&self.ring);
        let running = Arc::clone(&self.running);
        let dispatcher = Arc::clone(&self.dispatcher);
        self.consumer = Some(thread::spawn(move || {
            consumer_loop(&ring, &dispatcher, &running);
        }));

        Ok(())
    }

    /// Cooperative shutdown: flip the flag, unblock the accept, close the
    /// ring's waiters, join both threads. Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("stopping ingest server");

        // Unblock a pending accept. SHUT_RD on the listening socket is
        // enough on Linux; the accept returns with an error.
        // SAFETY: the fd stays owned by self.listener; shutdown only
        // changes socket state.
        unsafe {
            libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RD);
        }
        self.ring.close();

        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
        let stats = self.ring.metrics();
        info!(
            bytes_in = stats.bytes_committed,
            bytes_out = stats.bytes_dequeued,
            backlog = stats.backlog(),
            "ingest server stopped"
        );
    }

    /// Returns true while the data-plane threads are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for IngestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accept loop: one feed connection at a time, reconnect supported.
fn producer_loop(
    listener: &TcpListener,
    ring: &ByteRing,
    running: &AtomicBool,
    timeout: Duration,
) {
    info!("producer thread started");
    while running.load(Ordering::Acquire) {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !running.load(Ordering::Acquire) {
                    break; // listener shut down by stop()
                }
                error!(error = %e, "accept failed");
                thread::sleep(Duration::from_millis(50));
                continue;
            }
        };
        if !running.load(Ordering::Acquire) {
            break;
        }

        info!(%peer, "feed connected");
        if let Err(e) = stream.set_read_timeout(Some(timeout)) {
            warn!(%peer, error = %e, "could not set read timeout");
        }
        serve_connection(stream, ring, running);
        info!(%peer, "feed disconnected");
    }
    info!("producer thread stopped");
}

/// Reads one connection into the ring until EOF, error, or shutdown.
fn serve_connection(mut stream: TcpStream, ring: &ByteRing, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        let Some(mut slot) = ring.reserve() else {
            // Ring full: let the consumer catch up rather than busy-spin.
            ring.wait_for_space(1, WAIT_TICK);
            continue;
        };

        match stream.read(slot.as_mut_slice()) {
            Ok(0) => break, // peer closed
            Ok(n) => slot.commit(n),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                // Read timeout or signal; drop the untouched slot and
                // re-check the running flag.
            }
            Err(e) => {
                error!(error = %e, "receive failed, closing connection");
                break;
            }
        }
    }
}

/// Frame-drain loop: all decode and handler work happens here.
fn consumer_loop(ring: &ByteRing, dispatcher: &Dispatcher, running: &AtomicBool) {
    info!("consumer thread started");
    let mut scratch: Vec<u8> = Vec::with_capacity(record::MAX_FRAME_LEN);
    let mut frames_applied = 0u64;
    let mut frames_dropped = 0u64;
    let mut keep_alives = 0u64;

    while running.load(Ordering::Acquire) {
        if !ring.wait_for_data(WAIT_TICK) {
            continue;
        }

        let Some(frame) = ring.next_frame() else {
            if ring.free_space() == 0 {
                // A frame larger than the ring can never terminate. The
                // producer blocks on wait_for_space before this can happen
                // in normal operation, so treat it as a protocol violation
                // and resynchronize.
                error!(
                    generation = ring.generation(),
                    "frame exceeds ring capacity, clearing"
                );
                ring.clear();
            } else {
                // Delimiter not yet received.
                thread::yield_now();
            }
            continue;
        };

        let total = frame.total_len();
        if frame.is_keep_alive() {
            debug!(len = total, "keep-alive discarded");
            keep_alives += 1;
            drop(frame);
            ring.dequeue(total);
            continue;
        }

        let result = {
            let content = frame.contiguous(&mut scratch);
            let content = &content[..content.len() - 1]; // strip the delimiter
            record::decode_frame(content).and_then(|msg| dispatcher.dispatch(&msg))
        };
        match result {
            Ok(()) => frames_applied += 1,
            Err(e) => {
                frames_dropped += 1;
                error!(len = total, error = %e, "frame dropped");
            }
        }

        drop(frame);
        ring.dequeue(total);
    }
    info!(frames_applied, frames_dropped, keep_alives, "consumer thread stopped");
}
