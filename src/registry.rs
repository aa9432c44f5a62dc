//! Named sinks
//!
//! A [`SinkRegistry`] owns every sink of a process by name. Reconfiguring
//! tears every sink down and builds the new set from scratch.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::SinkConfig;
use crate::error::{Error, Result};
use crate::sink::LogSink;

/// Process-wide collection of named sinks
#[derive(Debug, Default)]
pub struct SinkRegistry {
    sinks: RwLock<Vec<(String, Arc<LogSink>)>>,
}

impl SinkRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from named configurations
    pub fn from_configs(configs: Vec<(String, SinkConfig)>) -> Result<Self> {
        let registry = Self::new();
        registry.reconfigure(configs)?;
        Ok(registry)
    }

    /// Register a sink under `name`, closing any sink it replaces
    pub fn register(&self, name: impl Into<String>, sink: LogSink) -> Arc<LogSink> {
        let name = name.into();
        let sink = Arc::new(sink);

        let replaced = {
            let mut sinks = self.sinks.write();
            match sinks.iter_mut().find(|(existing, _)| *existing == name) {
                Some(entry) => Some(std::mem::replace(&mut entry.1, Arc::clone(&sink))),
                None => {
                    sinks.push((name.clone(), Arc::clone(&sink)));
                    None
                }
            }
        };

        if let Some(old) = replaced {
            tracing::debug!("Replaced sink {}", name);
            old.close();
        }
        sink
    }

    /// Look up a sink by name
    pub fn get(&self, name: &str) -> Option<Arc<LogSink>> {
        self.sinks
            .read()
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, sink)| Arc::clone(sink))
    }

    /// Remove and close a sink
    pub fn remove(&self, name: &str) -> Option<Arc<LogSink>> {
        let removed = {
            let mut sinks = self.sinks.write();
            let position = sinks.iter().position(|(existing, _)| existing == name)?;
            sinks.remove(position).1
        };
        removed.close();
        Some(removed)
    }

    /// Append a record to the named sink.
    ///
    /// Returns `false` if no such sink is registered.
    pub fn append_to(&self, name: &str, record: &[u8]) -> bool {
        match self.get(name) {
            Some(sink) => {
                sink.append(record);
                true
            }
            None => false,
        }
    }

    /// Flush every sink
    pub fn flush_all(&self) {
        for sink in self.snapshot() {
            sink.flush();
        }
    }

    /// Replace every sink with sinks built from `configs`.
    ///
    /// All configurations are validated before any existing sink is closed,
    /// so a rejected reconfiguration leaves the registry untouched.
    pub fn reconfigure(&self, configs: Vec<(String, SinkConfig)>) -> Result<()> {
        for (name, config) in &configs {
            config
                .validate()
                .map_err(|e| Error::config(format!("Sink {}: {}", name, e)))?;
        }

        // Existing sinks release their files and lock files before new ones open them
        self.shutdown();

        let mut built = Vec::with_capacity(configs.len());
        for (name, config) in configs {
            let sink = LogSink::new(config)?;
            built.push((name, Arc::new(sink)));
        }

        tracing::debug!("Reconfigured {} sinks", built.len());
        *self.sinks.write() = built;
        Ok(())
    }

    /// Close and remove every sink
    pub fn shutdown(&self) {
        let sinks = std::mem::take(&mut *self.sinks.write());
        for (_, sink) in sinks {
            sink.close();
        }
    }

    /// Names of all registered sinks in registration order
    pub fn names(&self) -> Vec<String> {
        self.sinks.read().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of registered sinks
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// Check if no sink is registered
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<LogSink>> {
        self.sinks.read().iter().map(|(_, sink)| Arc::clone(sink)).collect()
    }
}

impl Drop for SinkRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
