//! Response Interpreter
//!
//! Classifies lines received from the device. The rules are applied in a
//! fixed order and are independent of each other, so a single line may yield
//! more than one [`Response`]. A line yielding none is unrecognised and only
//! forwarded to subscribers.

use super::Dialect;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Meaning extracted from a received line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Bracketed status report; carries the first field (e.g. `Idle`)
    Status(String),
    /// Generic acknowledgement
    Ok,
    /// Firmware startup banner
    Banner,
    /// Settings line (`$n=value`)
    Setting { key: u32, value: String },
    /// Error acknowledgement
    Error { code: String },
    /// Limit switch notice
    LimitSwitch(bool),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "status:{}", status),
            Self::Ok => write!(f, "ok"),
            Self::Banner => write!(f, "banner"),
            Self::Setting { key, value } => write!(f, "setting:${}={}", key, value),
            Self::Error { code } => write!(f, "error:{}", code),
            Self::LimitSwitch(on) => write!(f, "limit_switch:{}", on),
        }
    }
}

/// Line classifier for one dialect
#[derive(Debug, Clone)]
pub struct ResponseInterpreter {
    dialect: Dialect,
}

impl ResponseInterpreter {
    /// Create an interpreter for a dialect
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// The dialect this interpreter follows
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Classify a received line
    pub fn interpret(&self, line: &str) -> Vec<Response> {
        let line = line.trim();
        let mut responses = Vec::new();

        if line.is_empty() {
            return responses;
        }

        if let Some(status) = self.parse_status(line) {
            responses.push(Response::Status(status));
        }

        if line == "ok" {
            responses.push(Response::Ok);
        }

        if line == self.dialect.banner {
            responses.push(Response::Banner);
        }

        if let Some((key, value)) = parse_setting(line) {
            responses.push(Response::Setting { key, value });
        }

        if let Some(code) = self.parse_error(line) {
            responses.push(Response::Error { code });
        }

        if self.dialect.limit_switch_on.as_deref() == Some(line) {
            responses.push(Response::LimitSwitch(true));
        } else if self.dialect.limit_switch_off.as_deref() == Some(line) {
            responses.push(Response::LimitSwitch(false));
        }

        responses
    }

    /// Parse a `<...>` status report and return its first field
    fn parse_status(&self, line: &str) -> Option<String> {
        let inner = line.strip_prefix('<')?.strip_suffix('>')?;
        let state = inner.split(self.dialect.status_separator).next()?;
        Some(state.trim().to_string())
    }

    /// Parse an error acknowledgement in either of the dialect's forms
    fn parse_error(&self, line: &str) -> Option<String> {
        if let Some(code) = line.strip_prefix(self.dialect.error_prefix.as_str()) {
            return Some(code.trim().to_string());
        }

        let rest = line.strip_prefix(self.dialect.alt_error_prefix.as_deref()?)?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            None
        } else {
            Some(digits)
        }
    }
}

/// Parse `$<digits>=<number>`, ignoring anything after the number
fn parse_setting(line: &str) -> Option<(u32, String)> {
    let rest = line.strip_prefix('$')?;
    let (key, value) = rest.split_once('=')?;
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let key = key.parse::<u32>().ok()?;

    let mut seen_dot = false;
    let number: String = value
        .chars()
        .take_while(|c| {
            if c.is_ascii_digit() {
                true
            } else if *c == '.' && !seen_dot {
                seen_dot = true;
                true
            } else {
                false
            }
        })
        .collect();

    if !number.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    Some((key, number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting_value_forms() {
        assert_eq!(parse_setting("$0=10"), Some((0, "10".to_string())));
        assert_eq!(
            parse_setting("$110=1000.000"),
            Some((110, "1000.000".to_string()))
        );
        assert_eq!(
            parse_setting("$130=200.000 (x max travel)"),
            Some((130, "200.000".to_string()))
        );
        assert_eq!(parse_setting("$N0=G21"), None);
        assert_eq!(parse_setting("$1=.5"), None);
        assert_eq!(parse_setting("$=5"), None);
    }
}
