//! End-to-end driver tests against a scripted in-memory GRBL device,
//! running through the real transport thread.

use gcodelink_communication::{
    Dialect, DriverConfig, GcodeDriver, GenericCommand, PortOpener, PortStreams,
};
use gcodelink_core::{ConnectionState, DeviceEvent, ReplyStatus};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const GRBL_BANNER: &str = "Grbl 1.1h ['$' for help]";

#[derive(Default)]
struct DeviceState {
    output: VecDeque<u8>,
    input: Vec<u8>,
    received: Vec<String>,
    silent: bool,
}

impl DeviceState {
    fn reply(&mut self, text: &str) {
        self.output.extend(text.as_bytes());
        self.output.extend(b"\r\n");
    }

    fn on_line(&mut self, line: String) {
        self.received.push(line.clone());
        match line.as_str() {
            "$$" => {
                self.reply("$0=10");
                self.reply("$1=25");
                self.reply("$110=1000.000");
                self.reply("ok");
            }
            "?" => {
                self.reply("<Idle|MPos:0.000,0.000,0.000|FS:0,0>");
                self.reply("ok");
            }
            _ if self.silent => {}
            text if text.starts_with("BAD") => self.reply("error:20"),
            _ => self.reply("ok"),
        }
    }
}

/// Scripted GRBL that answers every line it receives
///
/// Reads behave like a serial port with a read timeout: they return as soon
/// as output is available, or fail with `TimedOut` after `read_timeout`.
#[derive(Clone)]
struct FakeGrbl {
    state: Arc<(Mutex<DeviceState>, Condvar)>,
    read_timeout: Duration,
}

impl FakeGrbl {
    fn new(silent: bool, read_timeout: Duration) -> Self {
        let state = DeviceState {
            silent,
            ..DeviceState::default()
        };
        Self {
            state: Arc::new((Mutex::new(state), Condvar::new())),
            read_timeout,
        }
    }

    /// Power-on output printed every time the port is opened
    fn boot(&self) {
        let mut state = self.state.0.lock().unwrap();
        state.reply("");
        state.reply(GRBL_BANNER);
        self.state.1.notify_all();
    }

    fn received(&self) -> Vec<String> {
        self.state.0.lock().unwrap().received.clone()
    }
}

impl Read for FakeGrbl {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, ready) = &*self.state;
        let state = lock.lock().unwrap();
        let (mut state, _) = ready
            .wait_timeout_while(state, self.read_timeout, |state| state.output.is_empty())
            .unwrap();
        if state.output.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }

        let n = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeGrbl {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.0.lock().unwrap();
        for &byte in buf {
            if byte == b'\r' {
                let line = String::from_utf8_lossy(&state.input).into_owned();
                state.input.clear();
                state.on_line(line);
            } else {
                state.input.push(byte);
            }
        }
        self.state.1.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Marks the port free again once both halves are dropped
struct Lease(Arc<AtomicBool>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One half of an open fake port, holding the port's lease
struct LeasedHalf {
    device: FakeGrbl,
    _lease: Arc<Lease>,
}

impl Read for LeasedHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.read(buf)
    }
}

impl Write for LeasedHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.device.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.device.flush()
    }
}

/// Opens the fake device exclusively, like a tty on Unix
struct FakeOpener {
    device: FakeGrbl,
    in_use: Arc<AtomicBool>,
    opens: AtomicU32,
}

impl FakeOpener {
    fn new(device: FakeGrbl) -> Self {
        Self {
            device,
            in_use: Arc::new(AtomicBool::new(false)),
            opens: AtomicU32::new(0),
        }
    }
}

impl PortOpener for FakeOpener {
    fn open(&self, port: &str) -> io::Result<PortStreams> {
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                format!("{} is busy", port),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.device.boot();

        let lease = Arc::new(Lease(self.in_use.clone()));
        let half = |device: &FakeGrbl| LeasedHalf {
            device: device.clone(),
            _lease: lease.clone(),
        };
        Ok(PortStreams::new(half(&self.device), half(&self.device)))
    }
}

#[derive(Default)]
struct FailingOpener {
    attempts: AtomicU32,
}

impl PortOpener for FailingOpener {
    fn open(&self, port: &str) -> io::Result<PortStreams> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", port),
        ))
    }
}

fn test_config() -> DriverConfig {
    DriverConfig::new("/dev/ttyFAKE")
        .with_dialect(Dialect::grbl())
        .with_retry(2, Duration::from_millis(10))
}

fn start_fake(config: DriverConfig, silent: bool) -> (GcodeDriver, FakeGrbl) {
    let device = FakeGrbl::new(silent, Duration::from_millis(5));
    let opener = Arc::new(FakeOpener::new(device.clone()));
    (GcodeDriver::start(config, opener), device)
}

#[tokio::test]
async fn test_handshake_and_stream() {
    let (driver, device) = start_fake(test_config(), false);

    timeout(TEST_TIMEOUT, driver.wait_ready())
        .await
        .expect("handshake timed out")
        .unwrap();
    assert_eq!(driver.state(), ConnectionState::Ready);
    assert_eq!(driver.settings().get(&0).map(String::as_str), Some("10"));
    assert_eq!(
        driver.settings().get(&110).map(String::as_str),
        Some("1000.000")
    );

    let lines = ["G21", "G90 ; absolute", "G1 X10 Y10 F500"];
    let mut handles = Vec::new();
    for line in lines {
        handles.push(driver.submit(&GenericCommand::new(line).unwrap()).unwrap());
    }
    for handle in handles {
        let reply = timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();
        assert!(reply.is_ok());
    }

    timeout(TEST_TIMEOUT, driver.wait_queue_drained())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.received(), vec!["$$", "G21", "G90", "G1 X10 Y10 F500"]);

    driver.shutdown().await;
}

#[tokio::test]
async fn test_device_error_is_per_command() {
    let config = test_config().with_advanced_flow_control(true);
    let (driver, _device) = start_fake(config, false);
    timeout(TEST_TIMEOUT, driver.wait_ready())
        .await
        .unwrap()
        .unwrap();

    let bad = driver.submit(&GenericCommand::new("BAD X1").unwrap()).unwrap();
    let good = driver.submit(&GenericCommand::new("G0 X1").unwrap()).unwrap();

    let bad = timeout(TEST_TIMEOUT, bad).await.unwrap().unwrap();
    assert_eq!(
        bad.status,
        ReplyStatus::Error {
            code: "20".to_string()
        }
    );
    let good = timeout(TEST_TIMEOUT, good).await.unwrap().unwrap();
    assert!(good.is_ok());
    assert!(bad.id < good.id);
}

#[tokio::test]
async fn test_connect_timeout_rejects_ready() {
    let opener = Arc::new(FailingOpener::default());
    let config = DriverConfig::new("/dev/ttyMISSING").with_retry(5, Duration::from_millis(20));
    let driver = GcodeDriver::start(config, opener.clone());

    let err = timeout(TEST_TIMEOUT, driver.wait_ready())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("after 5 attempts"));
    assert_eq!(opener.attempts.load(Ordering::SeqCst), 5);

    // The engine shut itself down; nothing can be dispatched
    let result = match driver.submit(&GenericCommand::new("G0 X0").unwrap()) {
        Ok(handle) => timeout(TEST_TIMEOUT, handle).await.unwrap(),
        Err(e) => Err(e),
    };
    assert!(result.unwrap_err().is_stopped());
    assert_eq!(driver.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_wait_for_idle_polls_status() {
    let config = DriverConfig {
        idle_poll_interval: Duration::from_millis(5),
        ..test_config()
    };
    let (driver, device) = start_fake(config, false);
    timeout(TEST_TIMEOUT, driver.wait_ready())
        .await
        .unwrap()
        .unwrap();

    timeout(TEST_TIMEOUT, driver.wait_for_idle())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(driver.status(), "Idle");
    assert!(device.received().iter().any(|line| line == "?"));
}

#[tokio::test]
async fn test_stop_rejects_unanswered_commands() {
    let (driver, _device) = start_fake(test_config(), true);
    timeout(TEST_TIMEOUT, driver.wait_ready())
        .await
        .unwrap()
        .unwrap();

    let handle = driver
        .submit(&GenericCommand::new("G4 P100").unwrap())
        .unwrap();
    driver.stop();

    let err = timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap_err();
    assert!(err.is_stopped());
    assert!(driver.wait_queue_drained().await.unwrap_err().is_stopped());
}

#[tokio::test]
async fn test_event_stream_order() {
    let (driver, _device) = start_fake(test_config(), false);
    let mut events = driver.subscribe();

    timeout(TEST_TIMEOUT, driver.wait_ready())
        .await
        .unwrap()
        .unwrap();
    let handle = driver.submit(&GenericCommand::new("M5").unwrap()).unwrap();
    timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    let position = |wanted: &DeviceEvent| seen.iter().position(|event| event == wanted);
    let connected = position(&DeviceEvent::Connected(true)).unwrap();
    let ready = position(&DeviceEvent::StateChanged(ConnectionState::Ready)).unwrap();
    assert!(connected < ready);
    assert!(seen
        .iter()
        .any(|event| *event == DeviceEvent::ResponseReceived("$0=10".to_string())));
    assert!(matches!(
        seen.last(),
        Some(DeviceEvent::CommandProcessed(info, ReplyStatus::Ok)) if info.text == "M5"
    ));
}

#[tokio::test]
async fn test_oversized_command_rejected_at_submit() {
    let config = DriverConfig {
        send_window_bytes: 8,
        ..test_config()
    };
    let (driver, _device) = start_fake(config, false);
    let err = driver
        .submit(&GenericCommand::new("G1 X100 Y100").unwrap())
        .unwrap_err();
    assert!(err.to_string().contains("Buffer overflow"));
}

#[tokio::test]
async fn test_commands_do_not_wait_for_read_timeout() {
    // Reads park for the full timeout whenever the device is quiet
    let device = FakeGrbl::new(false, Duration::from_millis(200));
    let driver = GcodeDriver::start(test_config(), Arc::new(FakeOpener::new(device.clone())));
    timeout(TEST_TIMEOUT, driver.wait_ready())
        .await
        .unwrap()
        .unwrap();

    let started = Instant::now();
    for n in 0..10 {
        let command = GenericCommand::new(format!("G0 X{}", n)).unwrap();
        let reply = timeout(TEST_TIMEOUT, driver.submit(&command).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(reply.is_ok());
    }
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_millis(1000),
        "ten commands took {:?}",
        elapsed
    );
    assert_eq!(device.received().len(), 11);

    driver.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_reopens_exclusive_port() {
    let device = FakeGrbl::new(false, Duration::from_millis(20));
    let opener = Arc::new(FakeOpener::new(device.clone()));
    // A single attempt: a port still held by the old link fails the reconnect
    let config = test_config().with_retry(1, Duration::from_millis(10));
    let driver = GcodeDriver::start(config, opener.clone());
    timeout(TEST_TIMEOUT, driver.wait_ready())
        .await
        .unwrap()
        .unwrap();

    driver.reconnect().unwrap();
    let reply = timeout(
        TEST_TIMEOUT,
        driver.submit(&GenericCommand::new("G0 X5").unwrap()).unwrap(),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(reply.is_ok());
    assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
    timeout(TEST_TIMEOUT, driver.wait_queue_drained())
        .await
        .unwrap()
        .unwrap();
    let received = device.received();
    assert_eq!(received.iter().filter(|line| *line == "$$").count(), 2);
    assert!(received.iter().any(|line| line == "G0 X5"));

    driver.shutdown().await;
}
