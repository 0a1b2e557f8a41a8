//! In-memory configuration options and merge precedence.
//!
//! `ConfigOptions` is deliberately dynamic (`serde_json::Value`-backed)
//! rather than a fixed struct, because adapters attach protocol-specific
//! keys the core has no business knowing about — the same reason the
//! teacher workspace carries adapter config as an opaque JSON blob rather
//! than widening a shared struct per adapter.
//!
//! Loading configuration from a file or environment is out of scope here;
//! callers that want that build it on top of `ConfigOptions::merge`.

use std::time::Duration;

use serde_json::{Map, Value};

/// A resolved (or partially resolved) bag of connection configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOptions(Value);

impl ConfigOptions {
    /// Wraps a raw JSON object. Non-object values are coerced to `{}`.
    pub fn new(value: Value) -> Self {
        match value {
            Value::Object(_) => Self(value),
            _ => Self(Value::Object(Map::new())),
        }
    }

    /// An empty options set.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Borrows the underlying JSON object.
    pub fn as_object(&self) -> &Map<String, Value> {
        match &self.0 {
            Value::Object(map) => map,
            _ => unreachable!("ConfigOptions always wraps an object"),
        }
    }

    fn as_object_mut(&mut self) -> &mut Map<String, Value> {
        match &mut self.0 {
            Value::Object(map) => map,
            _ => unreachable!("ConfigOptions always wraps an object"),
        }
    }

    /// Reads a key as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.as_object().get(key).and_then(Value::as_str)
    }

    /// Reads a key as a `u64`, falling back through any JSON number type.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.as_object().get(key).and_then(Value::as_u64)
    }

    /// Reads a key as an `f64`.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.as_object().get(key).and_then(Value::as_f64)
    }

    /// Reads `host` as a string, if present.
    pub fn host(&self) -> Option<&str> {
        self.get_str("host")
    }

    /// Reads `port` as a `u16`, if present and in range.
    pub fn port(&self) -> Option<u16> {
        self.get_u64("port").and_then(|p| u16::try_from(p).ok())
    }

    /// Reads `path`, if present.
    pub fn path(&self) -> Option<&str> {
        self.get_str("path")
    }

    /// Reads `timeout` (milliseconds) as a [`Duration`], if present.
    pub fn timeout(&self) -> Option<Duration> {
        self.get_u64("timeout").map(Duration::from_millis)
    }

    /// Reads the nested `rate_limit_opts` object, if present.
    pub fn rate_limit_opts(&self) -> Option<ConfigOptions> {
        self.as_object()
            .get("rate_limit_opts")
            .filter(|v| v.is_object())
            .cloned()
            .map(ConfigOptions::new)
    }

    /// Sets a key to an arbitrary JSON value, builder-style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.as_object_mut().insert(key.into(), value.into());
        self
    }

    /// Resolves effective configuration from three layers, in ascending
    /// precedence: `adapter_defaults`, `client_defaults`, `user_opts`.
    ///
    /// - Nested objects are deep-merged key by key.
    /// - Arrays are replaced wholesale by whichever layer sets them last;
    ///   they are never concatenated.
    /// - `credentials` is always replaced wholesale at the top level,
    ///   regardless of whether the incoming value is itself an object —
    ///   session secrets from one layer must never be merged with another
    ///   layer's.
    /// - A `null` in `user_opts` does **not** clear a key set by an earlier
    ///   layer; callers that want to clear a key must omit it rather than
    ///   set it to `null`.
    pub fn merge(
        adapter_defaults: &ConfigOptions,
        client_defaults: &ConfigOptions,
        user_opts: &ConfigOptions,
    ) -> ConfigOptions {
        let mut merged = adapter_defaults.0.clone();
        Self::merge_layer(&mut merged, &client_defaults.0);
        Self::merge_layer(&mut merged, &user_opts.0);
        ConfigOptions(merged)
    }

    fn merge_layer(base: &mut Value, overlay: &Value) {
        let (Value::Object(base_map), Value::Object(overlay_map)) = (base, overlay) else {
            return;
        };
        for (key, overlay_value) in overlay_map {
            if overlay_value.is_null() {
                // nulls never override a present default.
                continue;
            }
            if key == "credentials" {
                base_map.insert(key.clone(), overlay_value.clone());
                continue;
            }
            match base_map.get_mut(key) {
                Some(existing) if existing.is_object() && overlay_value.is_object() => {
                    Self::merge_layer(existing, overlay_value);
                }
                _ => {
                    base_map.insert(key.clone(), overlay_value.clone());
                }
            }
        }
    }

    /// Returns the underlying JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for ConfigOptions {
    fn from(value: Value) -> Self {
        ConfigOptions::new(value)
    }
}
