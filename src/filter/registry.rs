use super::description::CustomFilterDescription;
use super::sink::CustomFilter;
use super::{ContentFilter, ContentFilterSet};
use crate::config::FilterConfig;
use crate::error::Result;
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct RegistryState {
    descriptions: Vec<CustomFilterDescription>,
    registered: Vec<String>,
}

/// Loads custom filter descriptions from [`FilterConfig::path`] and registers
/// one [`CustomFilter`] per description into a shared [`ContentFilterSet`].
///
/// Lifecycle: `attach` loads, `start` registers, `stop` unregisters and
/// `detach` forgets the descriptions. `reload` picks up edited files.
pub struct CustomFilterRegistry {
    config: FilterConfig,
    filters: Arc<ContentFilterSet>,
    state: Mutex<RegistryState>,
}

impl CustomFilterRegistry {
    pub fn new(config: FilterConfig, filters: Arc<ContentFilterSet>) -> Self {
        Self {
            config,
            filters,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn filters(&self) -> &Arc<ContentFilterSet> {
        &self.filters
    }

    /// Loads the descriptions. Returns how many were found.
    pub fn attach(&self) -> Result<usize> {
        let descriptions = CustomFilterDescription::load_dir(&self.config.path)?;
        info!(
            "loaded {} custom filters from {}",
            descriptions.len(),
            self.config.path.display()
        );
        let count = descriptions.len();
        self.state.lock().descriptions = descriptions;
        Ok(count)
    }

    pub fn detach(&self) {
        self.stop();
        self.state.lock().descriptions.clear();
    }

    /// Registers a filter for every loaded description.
    pub fn start(&self) {
        let mut state = self.state.lock();
        for description in state.descriptions.clone() {
            let filter = CustomFilter::new(description, self.config.clone());
            state.registered.push(filter.name().to_string());
            self.filters.add(Arc::new(filter));
        }
    }

    /// Unregisters every filter this registry added.
    pub fn stop(&self) {
        let registered = std::mem::take(&mut self.state.lock().registered);
        for name in registered {
            self.filters.remove(&name);
        }
    }

    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Detaches, loads the descriptions again and registers them.
    pub fn reload(&self) -> Result<usize> {
        self.detach();
        let count = self.attach()?;
        self.start();
        Ok(count)
    }

    pub fn descriptions(&self) -> Vec<CustomFilterDescription> {
        self.state.lock().descriptions.clone()
    }
}
