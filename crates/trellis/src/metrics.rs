//! Shared metrics registry.
//!
//! Collectors own a set of fully qualified metric names and build their
//! instruments from the registry's OpenTelemetry [`Meter`]. Every name can be
//! owned by exactly one collector; a second claim is a fatal composition
//! error.

use crate::{Error, Result};
use opentelemetry::metrics::Meter;
use std::collections::HashSet;
use std::sync::Arc;

/// A set of metric instruments registered as one unit.
pub trait Collector: Send + Sync + 'static {
    /// The fully qualified metric names this collector owns.
    fn names(&self) -> Vec<String>;
}

pub struct MetricsRegistry {
    meter: Meter,
    owned: HashSet<String>,
    collectors: Vec<Arc<dyn Collector>>,
}

impl MetricsRegistry {
    pub fn new(meter: Meter) -> Self {
        Self {
            meter,
            owned: HashSet::new(),
            collectors: Vec::new(),
        }
    }

    /// A registry on the globally installed meter provider.
    pub fn global() -> Self {
        Self::new(opentelemetry::global::meter("trellis"))
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Claims every name `collector` owns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateCollector`] if any name is already owned
    /// (including twice by `collector` itself). The registry is left unchanged.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<()> {
        let names = collector.names();
        for (i, name) in names.iter().enumerate() {
            if self.owned.contains(name) || names[..i].contains(name) {
                tracing::error!(metric = %name, "duplicate metrics collector");
                return Err(Error::DuplicateCollector { name: name.clone() });
            }
        }

        for name in names {
            tracing::debug!(metric = %name, "registered metric");
            self.owned.insert(name);
        }
        self.collectors.push(collector);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.owned.contains(name)
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
