use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;
use log::{debug, error, warn};

use crate::error::Result;

/// Something the root scope closes once, when the test run ends.
pub trait CloseableResource: Send + Sync {
    fn close(&self) -> Result<()>;
}

struct Entry {
    name: String,
    resource: Arc<dyn CloseableResource>,
}

#[derive(Default)]
struct Registry {
    entries: Vec<Entry>,
    closed: bool,
}

/// Top-level lifetime of a test run.
///
/// Registered resources are closed exactly once, in registration order, on the
/// first call to [`RootScope::close`] or when the scope is dropped.
#[derive(Default)]
pub struct RootScope {
    registry: Mutex<Registry>,
}

static GLOBAL_SCOPE_USED: AtomicBool = AtomicBool::new(false);

lazy_static! {
    static ref GLOBAL_SCOPE: Arc<RootScope> = Arc::new(RootScope::new());
}

impl RootScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide scope, closed when the process exits.
    pub fn global() -> Arc<RootScope> {
        GLOBAL_SCOPE_USED.store(true, Ordering::Release);
        GLOBAL_SCOPE.clone()
    }

    /// Register `resource` under `name`. Returns `false` if the name is already
    /// registered or the scope is closed.
    pub fn register(&self, name: impl ToString, resource: Arc<dyn CloseableResource>) -> bool {
        let name = name.to_string();
        let mut registry = self.lock();

        if registry.closed {
            warn!("Root scope already closed, not registering {}", name);
            return false;
        }
        if registry.entries.iter().any(|e| e.name == name) {
            debug!("{} already registered with the root scope", name);
            return false;
        }

        debug!("Registering {} with the root scope", name);
        registry.entries.push(Entry { name, resource });
        true
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().entries.iter().any(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close every registered resource in registration order. Later calls do nothing.
    pub fn close(&self) {
        // resources are closed outside the lock so they may consult the scope
        let entries = {
            let mut registry = self.lock();
            if registry.closed {
                return;
            }
            registry.closed = true;
            std::mem::take(&mut registry.entries)
        };

        for entry in entries {
            debug!("Closing {}", entry.name);
            if let Err(e) = entry.resource.close() {
                error!("Failed to close {}: {}", entry.name, e);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RootScope {
    fn drop(&mut self) {
        self.close();
    }
}

#[ctor::dtor]
fn close_global_scope() {
    if GLOBAL_SCOPE_USED.load(Ordering::Acquire) {
        GLOBAL_SCOPE.close();
    }
}
