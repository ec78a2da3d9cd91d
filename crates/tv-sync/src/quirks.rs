//! Device-specific write overrides.
//!
//! A [`DeviceQuirks`] hook that reports `true` has handled the write itself
//! and the generic adapter call for that channel is skipped. Quirks are looked
//! up by normalized model id; unknown models get [`NoQuirks`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;
use tv_core::ActuatorId;

use crate::adapter::ActuatorAdapter;
use crate::model::HvacMode;

pub trait DeviceQuirks: Send + Sync {
    fn name(&self) -> &str;

    fn override_set_hvac_mode<'a>(
        &'a self,
        _adapter: &'a dyn ActuatorAdapter,
        _id: &'a ActuatorId,
        _mode: HvacMode,
    ) -> BoxFuture<'a, bool> {
        async { false }.boxed()
    }

    fn override_set_temperature<'a>(
        &'a self,
        _adapter: &'a dyn ActuatorAdapter,
        _id: &'a ActuatorId,
        _value: f64,
    ) -> BoxFuture<'a, bool> {
        async { false }.boxed()
    }

    fn override_set_valve<'a>(
        &'a self,
        _adapter: &'a dyn ActuatorAdapter,
        _id: &'a ActuatorId,
        _percent: f64,
    ) -> BoxFuture<'a, bool> {
        async { false }.boxed()
    }
}

/// Generic behaviour: nothing is overridden.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQuirks;

impl DeviceQuirks for NoQuirks {
    fn name(&self) -> &str {
        "generic"
    }
}

/// Lower-case, trimmed, with spaces and underscores folded to `-`.
pub fn normalize_model(model: &str) -> String {
    model
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Clone)]
pub struct QuirkRegistry {
    entries: HashMap<String, Arc<dyn DeviceQuirks>>,
    fallback: Arc<dyn DeviceQuirks>,
}

impl Default for QuirkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QuirkRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            fallback: Arc::new(NoQuirks),
        }
    }

    pub fn register(&mut self, model: &str, quirks: Arc<dyn DeviceQuirks>) {
        self.entries.insert(normalize_model(model), quirks);
    }

    pub fn with(mut self, model: &str, quirks: Arc<dyn DeviceQuirks>) -> Self {
        self.register(model, quirks);
        self
    }

    pub fn resolve(&self, model: Option<&str>) -> Arc<dyn DeviceQuirks> {
        let Some(model) = model else {
            return Arc::clone(&self.fallback);
        };
        match self.entries.get(&normalize_model(model)) {
            Some(quirks) => Arc::clone(quirks),
            None => {
                debug!(model, "no quirks registered, using generic behaviour");
                Arc::clone(&self.fallback)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
