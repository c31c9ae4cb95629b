//! Firmware settings map
//!
//! Settings reported by the device in answer to the settings query, keyed by
//! setting number. The map lives for one connection epoch and is cleared
//! whenever the firmware resets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings reported by the device, `$n=value`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    values: BTreeMap<u32, String>,
}

impl DeviceSettings {
    /// Create an empty settings map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a setting
    pub fn upsert(&mut self, key: u32, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Get a setting as reported
    pub fn get(&self, key: u32) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Get a setting parsed as a number
    pub fn get_f64(&self, key: u32) -> Option<f64> {
        self.get(key)?.parse().ok()
    }

    /// Forget every setting
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of settings known
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no settings are known
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of the underlying map
    pub fn to_map(&self) -> BTreeMap<u32, String> {
        self.values.clone()
    }
}
