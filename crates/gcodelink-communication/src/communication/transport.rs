//! Serial transport thread
//!
//! Owns the physical port. On start it tries to open the port a bounded
//! number of times, then runs a read loop that frames incoming bytes into
//! lines. Writes are handed over through a channel to a second thread that
//! owns the write half, so callers never block on the port and a command
//! never waits behind a pending read.

use super::framing::LineFramer;
use super::serial::{PortOpener, PortStreams};
use super::{Connector, Link, LinkEvent, LinkEventSink};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Longest uninterrupted sleep while waiting between connect attempts
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Connection parameters for the transport thread
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port name
    pub port: String,
    /// Open attempts before giving up
    pub retry_count: u32,
    /// Pause between open attempts
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            retry_count: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Handle to a running transport thread
pub struct Transport {
    writes: mpsc::UnboundedSender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Transport {
    /// Start the transport thread
    pub fn spawn(
        config: TransportConfig,
        opener: Arc<dyn PortOpener>,
        sink: LinkEventSink,
    ) -> io::Result<Self> {
        let (writes, write_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let wake = writes.clone();

        let thread = thread::Builder::new()
            .name(format!("gcodelink-io {}", config.port))
            .spawn(move || run(config, opener, sink, write_rx, wake, thread_stop))?;

        Ok(Self {
            writes,
            stop,
            thread: Some(thread),
        })
    }

    /// Queue bytes for the port; never blocks
    pub fn write(&self, bytes: &[u8]) {
        // A closed channel means the thread already reported its exit
        let _ = self.writes.send(bytes.to_vec());
    }

    /// Request the thread to stop; callable from any thread, any number of times
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wakes the writer thread
        let _ = self.writes.send(Vec::new());
    }

    /// Check if the thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stop the thread and wait for it to exit
    pub fn join(mut self) {
        self.stop_and_wait();
    }

    /// Stop the threads and wait until the port is released
    fn stop_and_wait(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Transport thread panicked");
            }
        }
    }
}

impl Link for Transport {
    fn write(&mut self, bytes: &[u8]) {
        Transport::write(self, bytes);
    }

    fn stop(&mut self) {
        Transport::stop(self);
    }

    fn close(&mut self) {
        self.stop_and_wait();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep for `duration` unless a stop is requested first
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}

/// Try to open the port up to `retry_count` times
fn open_with_retry(
    config: &TransportConfig,
    opener: &dyn PortOpener,
    stop: &AtomicBool,
) -> Result<PortStreams, u32> {
    let mut attempts = 0;

    for attempt in 1..=config.retry_count {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        attempts = attempt;

        match opener.open(&config.port) {
            Ok(port) => {
                tracing::info!("Opened {} on attempt {}", config.port, attempt);
                return Ok(port);
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to open {} (attempt {}/{}): {}",
                    config.port,
                    attempt,
                    config.retry_count,
                    e
                );
                if attempt < config.retry_count {
                    sleep_unless_stopped(config.retry_delay, stop);
                }
            }
        }
    }

    Err(attempts)
}

/// Writer thread body: send each queued payload until stopped or failed
///
/// A write error is parked in `failure` for the reader thread to report, so
/// the sink is only ever called from one thread.
fn write_loop(
    mut writer: Box<dyn Write + Send>,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<io::Error>>>,
) {
    while let Some(bytes) = write_rx.blocking_recv() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if bytes.is_empty() {
            continue;
        }
        if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
            *failure.lock() = Some(e);
            stop.store(true, Ordering::SeqCst);
            break;
        }
    }
}

fn run(
    config: TransportConfig,
    opener: Arc<dyn PortOpener>,
    sink: LinkEventSink,
    write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    wake: mpsc::UnboundedSender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) {
    let started = Instant::now();
    let PortStreams { mut reader, writer } =
        match open_with_retry(&config, opener.as_ref(), &stop) {
            Ok(streams) => streams,
            Err(attempts) => {
                if !stop.load(Ordering::SeqCst) {
                    sink(LinkEvent::ConnectFailed {
                        attempts,
                        elapsed: started.elapsed(),
                    });
                }
                return;
            }
        };

    let failure = Arc::new(Mutex::new(None));
    let writer_thread = {
        let stop = stop.clone();
        let failure = failure.clone();
        thread::Builder::new()
            .name(format!("gcodelink-tx {}", config.port))
            .spawn(move || write_loop(writer, write_rx, stop, failure))
    };
    let writer_thread = match writer_thread {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to start writer for {}: {}", config.port, e);
            sink(LinkEvent::Disconnected {
                reason: e.to_string(),
            });
            return;
        }
    };

    sink(LinkEvent::Connected);

    let mut framer = LineFramer::new();
    let mut buf = [0u8; 256];
    let mut read_error = None;

    while !stop.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) => thread::sleep(Duration::from_millis(1)),
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    tracing::trace!("<< {}", line);
                    sink(LinkEvent::LineReceived(line));
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                tracing::warn!("Read from {} failed: {}", config.port, e);
                read_error = Some(e);
                break;
            }
        }
    }

    stop.store(true, Ordering::SeqCst);
    let _ = wake.send(Vec::new());
    if writer_thread.join().is_err() {
        tracing::error!("Writer thread for {} panicked", config.port);
    }
    drop(reader);

    let write_error = failure.lock().take();
    if let Some(e) = &write_error {
        tracing::warn!("Write to {} failed: {}", config.port, e);
    }
    match read_error.or(write_error) {
        Some(e) => sink(LinkEvent::Disconnected {
            reason: e.to_string(),
        }),
        None => tracing::debug!("Transport for {} stopped", config.port),
    }
}

/// Connector that runs a [`Transport`] thread per connection
pub struct SerialConnector {
    config: TransportConfig,
    opener: Arc<dyn PortOpener>,
}

impl SerialConnector {
    /// Create a connector for one port
    pub fn new(config: TransportConfig, opener: Arc<dyn PortOpener>) -> Self {
        Self { config, opener }
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self, sink: LinkEventSink) -> io::Result<Box<dyn Link>> {
        let transport = Transport::spawn(self.config.clone(), self.opener.clone(), sink)?;
        Ok(Box::new(transport))
    }

    fn target(&self) -> &str {
        &self.config.port
    }
}
