use crate::error::Result;
use crate::telemetry::runtime_counters;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Binding recorded for handles whose canonical URL is not known yet.
pub const UNRESOLVED_TARGET: &str = "not resolved yet!";

/// Persistent-identifier seam. Real PID infrastructure sits behind this
/// trait; the in-memory implementation backs tests and standalone use.
#[async_trait]
pub trait HandleManager: Send + Sync {
    /// Allocate a handle, optionally bound to a resolvable URL.
    async fn create(&self, url: Option<&str>) -> Result<String>;
    /// Re-bind an existing handle to a new URL.
    async fn edit(&self, handle: &str, url: &str) -> Result<String>;
    async fn resolve(&self, handle: &str) -> Option<String>;
}

pub struct InMemoryHandleManager {
    prefix: String,
    bindings: Mutex<HashMap<String, String>>,
}

impl InMemoryHandleManager {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Current handle/URL bindings, sorted by handle.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let guard = self.bindings.lock().expect("handle bindings lock poisoned");
        let mut entries: Vec<(String, String)> = guard
            .iter()
            .map(|(handle, url)| (handle.clone(), url.clone()))
            .collect();
        entries.sort();
        entries
    }
}

#[async_trait]
impl HandleManager for InMemoryHandleManager {
    async fn create(&self, url: Option<&str>) -> Result<String> {
        let handle = format!("{}/{}", self.prefix, Uuid::new_v4());
        let target = url.unwrap_or(UNRESOLVED_TARGET).to_string();
        {
            let mut guard = self.bindings.lock().expect("handle bindings lock poisoned");
            guard.insert(handle.clone(), target);
        }
        runtime_counters().inc_handles_allocated();
        tracing::debug!(
            target: "turnstone::handle",
            event = "handle_allocated",
            handle = %handle,
        );
        Ok(handle)
    }

    async fn edit(&self, handle: &str, url: &str) -> Result<String> {
        let mut guard = self.bindings.lock().expect("handle bindings lock poisoned");
        match guard.get_mut(handle) {
            Some(target) => {
                *target = url.to_string();
                Ok(handle.to_string())
            }
            None => Err(crate::err!("unknown handle `{handle}`")),
        }
    }

    async fn resolve(&self, handle: &str) -> Option<String> {
        let guard = self.bindings.lock().expect("handle bindings lock poisoned");
        guard.get(handle).cloned()
    }
}
