use std::{
    collections::{BTreeMap, HashMap},
    process::Child,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, warn};

use crate::config::TunnelSpec;
use crate::error::LaunchError;
use crate::process::{self, Signal};
use crate::shutdown;

/// Position of a tunnel in the configured `ssh` list.
pub type TunnelId = usize;

/// A running tunnel subprocess and the local ports it forwards.
#[derive(Debug)]
pub struct TunnelHandle {
    name: String,
    child: Child,
    ports: Vec<u16>,
}

impl TunnelHandle {
    pub fn new(name: impl Into<String>, child: Child, ports: Vec<u16>) -> Self {
        TunnelHandle { name: name.into(), child, ports }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn into_child(self) -> Child {
        self.child
    }

    /// Non-blocking liveness check. An exited child is reaped by this call.
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(tunnel = %self.name, pid = self.child.id(), %status, "tunnel process exited");
                false
            }
            Err(e) => {
                warn!(tunnel = %self.name, pid = self.child.id(), error = %e, "could not poll tunnel process");
                false
            }
        }
    }
}

/// Result of toggling a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    Connected { pid: u32 },
    Disconnected,
}

/// Live tunnel processes keyed by tunnel id.
///
/// Every compound check-then-mutate runs under the one lock so the menu and
/// the health monitor never disagree about whether a tunnel is up.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<TunnelId, TunnelHandle>>>,
    sweep: Arc<Mutex<()>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TunnelId, TunnelHandle>> {
        // a panic elsewhere must not stop the shutdown sweep from seeing the children
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes shutdown sweeps. Held from drain until every drained
    /// process has exited, so a later sweep returns only once the earlier
    /// one has finished escalating.
    pub fn sweep_lock(&self) -> MutexGuard<'_, ()> {
        self.sweep.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a handle, returning any handle it replaced.
    pub fn register(&self, id: TunnelId, handle: TunnelHandle) -> Option<TunnelHandle> {
        self.lock().insert(id, handle)
    }

    pub fn is_live(&self, id: TunnelId) -> bool {
        self.lock().get_mut(&id).is_some_and(TunnelHandle::is_running)
    }

    pub fn unregister(&self, id: TunnelId) -> Option<TunnelHandle> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forwarded ports of every tunnel whose process is still running.
    pub fn snapshot(&self) -> BTreeMap<TunnelId, Vec<u16>> {
        self.lock()
            .iter_mut()
            .filter_map(|(id, handle)| handle.is_running().then(|| (*id, handle.ports.clone())))
            .collect()
    }

    /// Disconnects a live tunnel, or launches one when none is live.
    ///
    /// `launch` runs with the lock held, so a concurrent reap cannot slip
    /// between the liveness check and the insert.
    pub fn toggle<F>(&self, id: TunnelId, spec: &TunnelSpec, launch: F) -> Result<Toggle, LaunchError>
    where
        F: FnOnce(&TunnelSpec) -> Result<Child, LaunchError>,
    {
        let mut entries = self.lock();

        if let Some(mut handle) = entries.remove(&id) {
            if handle.is_running() {
                if let Err(e) = process::send_signal(handle.pid(), Signal::Term) {
                    if !process::is_already_gone(&e) {
                        warn!(tunnel = %handle.name, pid = handle.pid(), error = %e, "failed to signal tunnel");
                    }
                }
                info!(tunnel = %handle.name, pid = handle.pid(), "tunnel disconnected");
                shutdown::retire(handle);
                return Ok(Toggle::Disconnected);
            }
            debug!(tunnel = %handle.name, "dropping dead entry before reconnect");
        }

        let child = launch(spec)?;
        let pid = child.id();
        entries.insert(id, TunnelHandle::new(spec.name.clone(), child, spec.local_ports()));
        info!(tunnel = %spec.name, pid, "tunnel connected");
        Ok(Toggle::Connected { pid })
    }

    /// Removes every entry whose process has exited and returns what was removed.
    pub fn reap_dead(&self) -> Vec<(TunnelId, String)> {
        let mut entries = self.lock();
        let dead: Vec<TunnelId> = entries
            .iter_mut()
            .filter_map(|(id, handle)| (!handle.is_running()).then_some(*id))
            .collect();

        dead.into_iter()
            .filter_map(|id| entries.remove(&id).map(|handle| (id, handle.name)))
            .collect()
    }

    /// Takes every entry out of the registry.
    pub fn drain(&self) -> Vec<(TunnelId, TunnelHandle)> {
        self.lock().drain().collect()
    }
}
