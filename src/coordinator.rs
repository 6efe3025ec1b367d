use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use derive_more::Display;
use log::{debug, error, info, warn};

use crate::config::FixtureConfig;
use crate::error::{Error, Result};
use crate::handle::{ConnectionInfo, ResourceHandle};
use crate::provisioner::{LaunchRequest, Provisioner};
use crate::publish::{PropertyStore, Publisher};
use crate::scope::{CloseableResource, RootScope};

/// Lifecycle of a [`SharedFixture`].
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixtureState {
    Uninitialized,
    Starting,
    Running,
    Stopped,
}

impl FixtureState {
    fn as_u8(self) -> u8 {
        match self {
            FixtureState::Uninitialized => 0,
            FixtureState::Starting => 1,
            FixtureState::Running => 2,
            FixtureState::Stopped => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => FixtureState::Uninitialized,
            1 => FixtureState::Starting,
            2 => FixtureState::Running,
            _ => FixtureState::Stopped,
        }
    }
}

struct Inner {
    name: String,
    config: FixtureConfig,
    request: LaunchRequest,
    provisioner: Arc<dyn Provisioner>,
    publisher: Arc<dyn Publisher>,
    scope: Weak<RootScope>,
    state: AtomicU8,
    // serializes start and stop; the handle is only written while it is held
    gate: Mutex<()>,
    handle: OnceLock<Arc<ResourceHandle>>,
}

impl Inner {
    fn state(&self) -> FixtureState {
        FixtureState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: FixtureState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running_handle(&self) -> Option<Arc<ResourceHandle>> {
        match self.state() {
            FixtureState::Running => self.handle.get().cloned(),
            _ => None,
        }
    }

    fn stop_quietly(&self, handle: &ResourceHandle) {
        if let Err(e) = self.provisioner.stop(handle) {
            error!("Failed to stop shared fixture {} ({}): {}", self.name, handle.id, e);
        }
    }
}

// Stops a freshly launched resource, and withdraws its control string, unless
// the start completes. Also covers a provisioner or publisher that panics.
struct Launched<'a> {
    inner: &'a Inner,
    handle: Arc<ResourceHandle>,
    published: bool,
    armed: bool,
}

impl<'a> Launched<'a> {
    fn new(inner: &'a Inner, handle: ResourceHandle) -> Self {
        Self {
            inner,
            handle: Arc::new(handle),
            published: false,
            armed: true,
        }
    }

    fn complete(mut self) -> Arc<ResourceHandle> {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for Launched<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.published {
            self.inner.publisher.retract(&self.inner.config.property_key);
        }
        self.inner.stop_quietly(&self.handle);
    }
}

/// Starts one shared resource on first demand and keeps it for the whole test run.
///
/// Cloning is cheap and every clone refers to the same resource. The first
/// successful [`ensure_started`](SharedFixture::ensure_started) launches the
/// resource, publishes its control string and registers the fixture with the
/// root scope, whose closing stops it. Concurrent callers wait for that start
/// and then observe the same handle.
///
/// A failed start leaves the fixture uninitialized, so the next call tries again.
#[derive(Clone)]
pub struct SharedFixture {
    inner: Arc<Inner>,
}

pub struct SharedFixtureBuilder {
    name: Option<String>,
    config: FixtureConfig,
    provisioner: Arc<dyn Provisioner>,
    publisher: Option<Arc<dyn Publisher>>,
    scope: Option<Arc<RootScope>>,
}

impl SharedFixtureBuilder {
    pub fn new(provisioner: impl Provisioner + 'static) -> Self {
        Self {
            name: None,
            config: FixtureConfig::default(),
            provisioner: Arc::new(provisioner),
            publisher: None,
            scope: None,
        }
    }

    /// Name under which the fixture registers with the root scope.
    /// Defaults to `shared-fixture:<image>`.
    pub fn name(mut self, s: impl ToString) -> Self {
        self.name = Some(s.to_string());
        self
    }

    pub fn config(mut self, config: FixtureConfig) -> Self {
        self.config = config;
        self
    }

    /// Where the control string goes. Defaults to [`PropertyStore::global`].
    pub fn publisher(mut self, publisher: impl Publisher + 'static) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    /// Scope that owns teardown. Defaults to [`RootScope::global`].
    pub fn scope(mut self, scope: &Arc<RootScope>) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub fn build(self) -> Result<SharedFixture> {
        self.config.validate()?;
        let request = LaunchRequest::from_config(&self.config)?;
        let name = self
            .name
            .unwrap_or_else(|| format!("shared-fixture:{}", request.image));
        let publisher = self
            .publisher
            .unwrap_or_else(|| PropertyStore::global() as Arc<dyn Publisher>);
        let scope = self.scope.unwrap_or_else(RootScope::global);

        Ok(SharedFixture {
            inner: Arc::new(Inner {
                name,
                config: self.config,
                request,
                provisioner: self.provisioner,
                publisher,
                // the scope owns the fixture once registered, not the other way round
                scope: Arc::downgrade(&scope),
                state: AtomicU8::new(FixtureState::Uninitialized.as_u8()),
                gate: Mutex::new(()),
                handle: OnceLock::new(),
            }),
        })
    }
}

impl SharedFixture {
    pub fn builder(provisioner: impl Provisioner + 'static) -> SharedFixtureBuilder {
        SharedFixtureBuilder::new(provisioner)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.inner.config
    }

    pub fn state(&self) -> FixtureState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == FixtureState::Running
    }

    /// Make sure the shared resource is running and return its handle.
    ///
    /// Only the first caller launches the resource, others block until it is up.
    /// After [`teardown`](SharedFixture::teardown) this returns [`Error::Stopped`].
    pub fn ensure_started(&self) -> Result<Arc<ResourceHandle>> {
        if let Some(handle) = self.inner.running_handle() {
            return Ok(handle);
        }

        // Declared before the gate so it is released after it: dropping what may
        // be the last reference to the scope closes it, which tears us down.
        let mut scope = None;
        let _gate = self.inner.lock_gate();
        match self.state() {
            FixtureState::Running => return self.handle(),
            FixtureState::Stopped => return Err(Error::Stopped),
            FixtureState::Uninitialized | FixtureState::Starting => {}
        }

        self.inner.set_state(FixtureState::Starting);
        match self.start(&mut scope) {
            Ok(handle) => {
                let handle = self.inner.handle.get_or_init(|| handle).clone();
                self.inner.set_state(FixtureState::Running);
                info!("Shared fixture {} running as {}", self.inner.name, handle);
                Ok(handle)
            }
            Err(e) => {
                if self.state() == FixtureState::Starting {
                    self.inner.set_state(FixtureState::Uninitialized);
                }
                error!("Failed to start shared fixture {}: {}", self.inner.name, e);
                Err(e)
            }
        }
    }

    /// [`ensure_started`](SharedFixture::ensure_started) for async tests; the
    /// start itself runs on tokio's blocking pool.
    pub async fn ensure_started_async(&self) -> Result<Arc<ResourceHandle>> {
        if let Some(handle) = self.inner.running_handle() {
            return Ok(handle);
        }

        let fixture = self.clone();
        tokio::task::spawn_blocking(move || fixture.ensure_started())
            .await
            .map_err(|e| Error::InternalError(format!("start task failed: {}", e)))?
    }

    // Runs with the gate held. The upgraded scope is parked in `scope_slot`
    // so the caller drops it only after releasing the gate.
    fn start(&self, scope_slot: &mut Option<Arc<RootScope>>) -> Result<Arc<ResourceHandle>> {
        let inner = &self.inner;

        let scope: &Arc<RootScope> = match inner.scope.upgrade() {
            Some(scope) => scope_slot.insert(scope),
            None => {
                inner.set_state(FixtureState::Stopped);
                return Err(Error::Stopped);
            }
        };
        if scope.is_closed() {
            inner.set_state(FixtureState::Stopped);
            return Err(Error::Stopped);
        }

        info!("Starting shared fixture {} from {}", inner.name, inner.request.image);
        let mut launched = Launched::new(inner, inner.provisioner.launch(&inner.request)?);

        let info = ConnectionInfo::new(&launched.handle, &inner.config.control_tag);
        inner
            .publisher
            .publish(&inner.config.property_key, &info.control, &info)?;
        launched.published = true;
        debug!("Published {}={}", inner.config.property_key, info.control);

        if !scope.register(&inner.name, Arc::new(self.clone())) {
            if scope.is_closed() {
                inner.set_state(FixtureState::Stopped);
                return Err(Error::Stopped);
            }
            return Err(Error::InvalidConfig(format!(
                "another fixture is registered as {}",
                inner.name
            )));
        }

        Ok(launched.complete())
    }

    /// Handle of the running resource. Never starts it; before a successful
    /// [`ensure_started`](SharedFixture::ensure_started) this is [`Error::NotStarted`].
    pub fn handle(&self) -> Result<Arc<ResourceHandle>> {
        match self.state() {
            FixtureState::Stopped => Err(Error::Stopped),
            _ => self.inner.running_handle().ok_or(Error::NotStarted),
        }
    }

    pub fn try_handle(&self) -> Option<Arc<ResourceHandle>> {
        self.inner.running_handle()
    }

    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let handle = self.handle()?;
        Ok(ConnectionInfo::new(&handle, &self.inner.config.control_tag))
    }

    /// Stop the resource if it is running. Safe to call any number of times;
    /// stop failures are logged, not returned.
    pub fn teardown(&self) {
        let _gate = self.inner.lock_gate();
        if self.state() != FixtureState::Running {
            debug!("Shared fixture {} not running, nothing to tear down", self.inner.name);
            return;
        }
        self.inner.set_state(FixtureState::Stopped);

        match self.inner.handle.get() {
            Some(handle) => {
                info!("Tearing down shared fixture {} ({})", self.inner.name, handle.id);
                self.inner.stop_quietly(handle);
            }
            None => warn!("Shared fixture {} was running without a handle", self.inner.name),
        }
    }
}

impl CloseableResource for SharedFixture {
    fn close(&self) -> Result<()> {
        self.teardown();
        Ok(())
    }
}

impl fmt::Debug for SharedFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFixture")
            .field("name", &self.inner.name)
            .field("image", &self.inner.request.image)
            .field("state", &self.state())
            .field("handle", &self.inner.handle.get())
            .finish()
    }
}
