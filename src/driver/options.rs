//! Loosely typed per-request driver options.
//!
//! Options arrive from model catalogs and admin forms, where numbers are often
//! strings and booleans may be `"true"`. The accessors here accept both.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form driver options backed by a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverOptions(Map<String, Value>);

impl DriverOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds options from a JSON value; non-objects yield an empty set.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// Sets an option, returning the updated set.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets an option in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns true if the option is present and not null.
    pub fn contains(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|v| !v.is_null())
    }

    /// Returns the raw value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Returns a non-empty string option; numbers and booleans are stringified.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Returns an integer option, parsing numeric prefixes of strings.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => parse_int_prefix(s),
            _ => None,
        }
    }

    /// Returns a non-negative integer option that fits in `u32`.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_i64(key).and_then(|v| u32::try_from(v).ok())
    }

    /// Returns a float option, parsing numeric prefixes of strings.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_float_prefix(s),
            _ => None,
        }
    }

    /// Returns a boolean option; accepts `true`/`false` and their string forms.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    /// Returns true only if the option is explicitly false.
    pub fn is_explicitly_false(&self, key: &str) -> bool {
        self.get_bool(key) == Some(false)
    }

    /// Returns true only if the option is explicitly true.
    pub fn is_explicitly_true(&self, key: &str) -> bool {
        self.get_bool(key) == Some(true)
    }

    /// Returns the first positive integer found under any of `keys`.
    pub fn first_u32(&self, keys: &[&str]) -> Option<u32> {
        keys.iter()
            .filter_map(|k| self.get_u32(k))
            .find(|v| *v > 0)
    }

    /// Returns the first non-zero float found under any of `keys`.
    pub fn first_f64(&self, keys: &[&str]) -> Option<f64> {
        keys.iter()
            .filter_map(|k| self.get_f64(k))
            .find(|v| *v != 0.0 && v.is_finite())
    }

    /// Layers these options over `base`; keys set here win.
    pub fn merged_over(&self, base: &DriverOptions) -> DriverOptions {
        let mut merged = base.0.clone();
        for (k, v) in &self.0 {
            merged.insert(k.clone(), v.clone());
        }
        DriverOptions(merged)
    }

    /// Returns true if no options are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the options as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for DriverOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Parses a leading integer the way form inputs are usually read: `"1024px"` is 1024.
fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    s[..end].parse().ok()
}

fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim();
    let mut seen_dot = false;
    let end = s
        .char_indices()
        .take_while(|(i, c)| {
            if c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')) {
                true
            } else if *c == '.' && !seen_dot {
                seen_dot = true;
                true
            } else {
                false
            }
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    s[..end].parse().ok()
}
