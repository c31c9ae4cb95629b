use gcodelink::{stream_program, DriverConfig, GcodeDriver};
use gcodelink_communication::communication::{Connector, Link, LinkEvent, LinkEventSink};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

/// Link that answers every line on the spot, like a very fast GRBL
struct EchoLink {
    sink: LinkEventSink,
    pending: Vec<u8>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Link for EchoLink {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte != b'\r' {
                self.pending.push(byte);
                continue;
            }
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();

            let reply = if line.starts_with("G99") {
                "error:20"
            } else {
                "ok"
            };
            self.sent.lock().unwrap().push(line);
            (self.sink)(LinkEvent::LineReceived(reply.to_string()));
        }
    }

    fn stop(&mut self) {}
}

struct EchoConnector {
    sent: Arc<Mutex<Vec<String>>>,
}

impl Connector for EchoConnector {
    fn connect(&mut self, sink: LinkEventSink) -> io::Result<Box<dyn Link>> {
        sink(LinkEvent::Connected);
        sink(LinkEvent::LineReceived("Grbl 1.1h ['$' for help]".to_string()));
        Ok(Box::new(EchoLink {
            sink,
            pending: Vec::new(),
            sent: self.sent.clone(),
        }))
    }

    fn target(&self) -> &str {
        "echo"
    }
}

#[tokio::test]
async fn test_stream_program_collects_errors() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let driver = GcodeDriver::with_connector(
        DriverConfig::new("echo").with_advanced_flow_control(true),
        Box::new(EchoConnector { sent: sent.clone() }),
    );
    timeout(Duration::from_secs(5), driver.wait_ready())
        .await
        .unwrap()
        .unwrap();

    let program = "; header\nG21\n\nG90 (absolute)\nG99 X1\nG1 X10 Y10 F800\n";
    let summary = timeout(Duration::from_secs(5), stream_program(&driver, program.lines()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.total_lines, 6);
    assert_eq!(summary.submitted, 4);
    assert_eq!(summary.accepted, 3);
    assert_eq!(summary.errors, vec![(5, "20".to_string())]);
    assert!(!summary.is_clean());
    assert_eq!(
        *sent.lock().unwrap(),
        vec!["$$", "G21", "G90", "G99 X1", "G1 X10 Y10 F800"]
    );

    driver.shutdown().await;
}

#[tokio::test]
async fn test_stream_program_skips_oversized_line() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let config = DriverConfig {
        send_window_bytes: 16,
        ..DriverConfig::new("echo")
    };
    let driver = GcodeDriver::with_connector(
        config,
        Box::new(EchoConnector { sent: sent.clone() }),
    );
    timeout(Duration::from_secs(5), driver.wait_ready())
        .await
        .unwrap()
        .unwrap();

    let program = "G21\nG1 X100.000 Y100.000 Z5.000 F1200\nG90\n";
    let summary = timeout(Duration::from_secs(5), stream_program(&driver, program.lines()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.submitted, 2);
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].0, 2);
    assert!(summary.rejected[0].1.contains("Buffer overflow"));
    assert!(!summary.is_clean());
    assert_eq!(*sent.lock().unwrap(), vec!["$$", "G21", "G90"]);

    driver.shutdown().await;
}

#[test]
fn test_version_is_set() {
    assert!(!gcodelink::VERSION.is_empty());
    assert!(!gcodelink::BUILD_DATE.is_empty());
}
