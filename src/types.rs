use std::time::Duration;

/// Outcome of streaming a program to a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Lines read from the program
    pub total_lines: usize,
    /// Lines that were submitted after comment stripping
    pub submitted: usize,
    /// Lines the driver refused before sending, as (1-based line number, reason)
    pub rejected: Vec<(usize, String)>,
    /// Commands the device accepted
    pub accepted: usize,
    /// Commands the device rejected, as (1-based line number, error code)
    pub errors: Vec<(usize, String)>,
    /// Commands dropped by a reset or a lost link
    pub aborted: usize,
    /// Wall time from first submission to the last reply
    pub elapsed: Duration,
}

impl StreamSummary {
    /// Check if every line was sent and accepted
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.rejected.is_empty() && self.aborted == 0
    }
}
