//! Line framing for device responses
//!
//! Accumulates raw bytes and cuts them into lines on CR or LF. A CR/LF pair,
//! or any run of terminators, yields no empty lines.

/// Incremental CR/LF line splitter
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes and collect every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\r' || byte == b'\n' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }

        lines
    }

    /// Bytes received since the last terminator
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Discard a partial line, e.g. after the link was reopened
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_reads() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"o").is_empty());
        assert_eq!(framer.push(b"k\r\n<Idle|MPos"), vec!["ok".to_string()]);
        assert_eq!(framer.pending(), b"<Idle|MPos");
        assert_eq!(
            framer.push(b":0,0,0>\n"),
            vec!["<Idle|MPos:0,0,0>".to_string()]
        );
    }

    #[test]
    fn test_terminator_runs_collapse() {
        let mut framer = LineFramer::new();
        assert_eq!(
            framer.push(b"\r\n\r\nok\r\n\n\rerror:9\r"),
            vec!["ok".to_string(), "error:9".to_string()]
        );
        assert!(framer.pending().is_empty());
    }
}
