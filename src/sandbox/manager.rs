//! Sandbox lifecycle manager.
//!
//! Owns at most one active [`RemoteEnvironment`] per process. All lifecycle
//! transitions go through this type; other components only borrow the
//! active handle via [`SandboxLifecycleManager::active_handle`].
//!
//! ```text
//! Idle -> Creating -> Running -> Degraded -> Recovering -> Running
//!                                                     \-> Killed
//! ```
//!
//! A background monitor probes liveness every `health_check_interval_ms`.
//! Each failed probe counts one reconnect attempt and triggers a fresh
//! provision; a successful probe resets the counter. Reaching
//! `max_reconnect_attempts` kills the sandbox and stops the monitor, and only
//! an explicit [`SandboxLifecycleManager::create_sandbox`] starts over.

use super::{
    preview_url, Bootstrapper, CreateOptions, EnvironmentProvider, RemoteEnvironment,
};
use crate::config::SandboxConfig;
use crate::error::LifecycleError;
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Trivial round-trip used as the liveness probe.
const PROBE_COMMAND: &str = "echo ok";

/// Identity and health of the active sandbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub last_health_check: DateTime<Utc>,
    pub is_healthy: bool,
}

impl SandboxInfo {
    fn new(sandbox_id: &str, url: String) -> Self {
        let now = Utc::now();
        Self {
            sandbox_id: sandbox_id.to_string(),
            url,
            created_at: now,
            last_health_check: now,
            is_healthy: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Creating,
    Running,
    Degraded,
    Recovering,
    Killed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxStatus {
    pub active: bool,
    pub healthy: bool,
    pub info: Option<SandboxInfo>,
}

/// Result of one health-monitor iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// No sandbox is active; nothing was probed.
    Inactive,
    Healthy,
    /// Probe failed and a replacement sandbox is now active.
    Recovered,
    /// Probe failed and provisioning a replacement failed too.
    RecoveryFailed,
    /// Attempts exhausted; the sandbox was killed and monitoring stopped.
    Killed,
    /// A create, kill or reconnect replaced the sandbox mid-check; nothing
    /// was recorded.
    Superseded,
}

struct Inner {
    handle: Option<Arc<dyn RemoteEnvironment>>,
    info: Option<SandboxInfo>,
    state: LifecycleState,
    reconnect_attempts: u32,
    /// Bumped whenever the active sandbox is replaced or dropped. A provision
    /// that finishes under a different epoch was superseded and is discarded.
    epoch: u64,
}

impl Inner {
    fn begin(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}

pub struct SandboxLifecycleManager {
    provider: Arc<dyn EnvironmentProvider>,
    bootstrapper: Bootstrapper,
    create_options: CreateOptions,
    health_interval: Duration,
    probe_timeout: Duration,
    max_reconnect_attempts: u32,
    sessions: Option<Arc<SessionStore>>,
    // Never held across an await.
    inner: parking_lot::Mutex<Inner>,
    monitor: parking_lot::Mutex<Option<CancellationToken>>,
}

impl SandboxLifecycleManager {
    pub fn new(
        provider: Arc<dyn EnvironmentProvider>,
        config: &SandboxConfig,
        create_options: CreateOptions,
    ) -> Self {
        Self {
            provider,
            bootstrapper: Bootstrapper::new(config),
            create_options,
            health_interval: Duration::from_millis(config.health_check_interval_ms.max(1)),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            max_reconnect_attempts: config.max_reconnect_attempts.max(1),
            sessions: None,
            inner: parking_lot::Mutex::new(Inner {
                handle: None,
                info: None,
                state: LifecycleState::Idle,
                reconnect_attempts: 0,
                epoch: 0,
            }),
            monitor: parking_lot::Mutex::new(None),
        }
    }

    /// Persist the active sandbox id so [`Self::restore`] can find it later.
    pub fn with_session_store(mut self, store: Arc<SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Absolute project root inside every environment.
    pub fn project_dir(&self) -> &str {
        self.bootstrapper.project_dir()
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub async fn info(&self) -> Option<SandboxInfo> {
        self.inner.lock().info.clone()
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    /// The active environment, if any.
    pub async fn active_handle(&self) -> Option<Arc<dyn RemoteEnvironment>> {
        self.inner.lock().handle.clone()
    }

    /// Tear down whatever is active, provision and bootstrap a new sandbox,
    /// and start health monitoring. On failure nothing is left active.
    ///
    /// A `kill_sandbox` or another `create_sandbox` issued while this one is
    /// provisioning wins; the sandbox built here is then terminated and a
    /// provision error returned.
    pub async fn create_sandbox(self: &Arc<Self>) -> Result<SandboxInfo, LifecycleError> {
        self.stop_monitor();
        let (old, epoch) = {
            let mut inner = self.inner.lock();
            let old = inner.handle.take();
            inner.info = None;
            inner.reconnect_attempts = 0;
            inner.state = LifecycleState::Creating;
            (old, inner.begin())
        };

        if let Some(old) = old {
            terminate(old.as_ref()).await;
            self.forget_session();
        }

        let (handle, info) = match self.provision().await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                let mut inner = self.inner.lock();
                if inner.epoch == epoch {
                    inner.state = LifecycleState::Idle;
                }
                tracing::warn!("Sandbox creation failed: {e}");
                return Err(e);
            }
        };

        let installed = {
            let mut inner = self.inner.lock();
            if inner.epoch == epoch {
                inner.handle = Some(handle.clone());
                inner.info = Some(info.clone());
                inner.state = LifecycleState::Running;
                true
            } else {
                false
            }
        };

        if !installed {
            tracing::info!("Sandbox {} superseded while provisioning", info.sandbox_id);
            terminate(handle.as_ref()).await;
            return Err(LifecycleError::provision(format!(
                "sandbox {} was superseded while provisioning",
                info.sandbox_id
            )));
        }

        self.remember_session(&info);
        self.start_monitor();
        tracing::info!("Sandbox {} ready at {}", info.sandbox_id, info.url);
        Ok(info)
    }

    /// Report whether a sandbox is held and whether it answers a probe.
    /// Only `lastHealthCheck` / `isHealthy` are updated.
    ///
    /// While a sandbox is being created nothing is active yet; during
    /// recovery the degraded sandbox is still the one probed.
    pub async fn get_status(&self) -> SandboxStatus {
        let Some(handle) = self.inner.lock().handle.clone() else {
            return SandboxStatus {
                active: false,
                healthy: false,
                info: None,
            };
        };

        let healthy = self.probe(handle.as_ref()).await;

        let mut inner = self.inner.lock();
        let still_active = inner
            .handle
            .as_ref()
            .is_some_and(|h| h.id() == handle.id());
        if still_active {
            if let Some(info) = inner.info.as_mut() {
                info.last_health_check = Utc::now();
                info.is_healthy = healthy;
            }
        }

        SandboxStatus {
            active: inner.handle.is_some(),
            healthy: still_active && healthy,
            info: inner.info.clone(),
        }
    }

    /// Stop monitoring and terminate the active sandbox. Never fails;
    /// termination errors are logged because the provider expires the
    /// environment on its own. Returns whether anything was active or being
    /// provisioned.
    pub async fn kill_sandbox(&self) -> bool {
        self.stop_monitor();
        let (handle, was_active) = {
            let mut inner = self.inner.lock();
            let provisioning = matches!(
                inner.state,
                LifecycleState::Creating | LifecycleState::Recovering
            );
            let handle = inner.handle.take();
            let was_active = handle.is_some() || provisioning;
            inner.info = None;
            inner.reconnect_attempts = 0;
            inner.begin();
            if was_active {
                inner.state = LifecycleState::Killed;
            }
            (handle, was_active)
        };

        if let Some(handle) = handle {
            terminate(handle.as_ref()).await;
        }
        if was_active {
            self.forget_session();
        }
        was_active
    }

    /// Attach to an existing environment by id instead of creating one.
    /// On failure the current state is left untouched.
    pub async fn reconnect(self: &Arc<Self>, sandbox_id: &str) -> Result<SandboxInfo, LifecycleError> {
        let handle = self
            .provider
            .connect(sandbox_id)
            .await
            .map_err(|e| LifecycleError::connection(format!("{e:#}")))?;

        if !self.probe(handle.as_ref()).await {
            return Err(LifecycleError::Connection(format!(
                "sandbox {sandbox_id} did not answer the liveness probe"
            )));
        }

        self.stop_monitor();
        let info = SandboxInfo::new(
            sandbox_id,
            preview_url(&handle.get_host(self.bootstrapper.port())),
        );
        let old = {
            let mut inner = self.inner.lock();
            let old = inner.handle.replace(handle);
            inner.info = Some(info.clone());
            inner.state = LifecycleState::Running;
            inner.reconnect_attempts = 0;
            inner.begin();
            old
        };

        if let Some(old) = old.filter(|old| old.id() != sandbox_id) {
            terminate(old.as_ref()).await;
        }

        self.remember_session(&info);
        self.start_monitor();
        tracing::info!("Reconnected to sandbox {sandbox_id}");
        Ok(info)
    }

    /// Reconnect to the sandbox persisted by a previous process, if any.
    pub async fn restore(self: &Arc<Self>) -> Option<SandboxInfo> {
        let store = self.sessions.as_ref()?;
        let sandbox_id = match store.load() {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to load persisted sandbox session: {e}");
                return None;
            }
        };

        match self.reconnect(&sandbox_id).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!("Persisted sandbox {sandbox_id} is gone: {e}");
                self.forget_session();
                None
            }
        }
    }

    /// One health-monitor iteration. Public so callers and tests can drive
    /// the state machine without waiting for the timer.
    pub async fn run_health_check(&self) -> HealthOutcome {
        let snapshot = {
            let inner = self.inner.lock();
            let epoch = inner.epoch;
            inner.handle.clone().map(move |h| (h, epoch))
        };
        let Some((handle, epoch)) = snapshot else {
            return HealthOutcome::Inactive;
        };

        let healthy = self.probe(handle.as_ref()).await;

        let (exhausted, attempt) = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return HealthOutcome::Superseded;
            }
            if let Some(info) = inner.info.as_mut() {
                info.last_health_check = Utc::now();
                info.is_healthy = healthy;
            }

            if healthy {
                inner.reconnect_attempts = 0;
                inner.state = LifecycleState::Running;
                return HealthOutcome::Healthy;
            }

            inner.state = LifecycleState::Degraded;
            inner.reconnect_attempts += 1;
            let attempt = inner.reconnect_attempts;
            tracing::warn!(
                "Sandbox {} failed health probe (attempt {attempt}/{})",
                handle.id(),
                self.max_reconnect_attempts
            );

            if attempt >= self.max_reconnect_attempts {
                inner.handle = None;
                inner.info = None;
                inner.state = LifecycleState::Killed;
                inner.reconnect_attempts = 0;
                inner.begin();
                (true, attempt)
            } else {
                inner.state = LifecycleState::Recovering;
                (false, attempt)
            }
        };

        if exhausted {
            terminate(handle.as_ref()).await;
            self.stop_monitor();
            self.forget_session();
            tracing::warn!("Sandbox recovery exhausted, sandbox killed");
            return HealthOutcome::Killed;
        }

        match self.provision().await {
            Ok((replacement, info)) => {
                let installed = {
                    let mut inner = self.inner.lock();
                    if inner.epoch == epoch {
                        inner.handle = Some(replacement.clone());
                        inner.info = Some(info.clone());
                        inner.state = LifecycleState::Running;
                        inner.begin();
                        true
                    } else {
                        false
                    }
                };

                if !installed {
                    tracing::info!("Replacement sandbox {} superseded", info.sandbox_id);
                    terminate(replacement.as_ref()).await;
                    return HealthOutcome::Superseded;
                }

                if let Err(e) = handle.kill().await {
                    tracing::debug!("Failed to terminate unhealthy sandbox {}: {e}", handle.id());
                }
                self.remember_session(&info);
                tracing::info!("Sandbox recovered as {}", info.sandbox_id);
                HealthOutcome::Recovered
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                if inner.epoch == epoch {
                    inner.state = LifecycleState::Degraded;
                }
                tracing::warn!("Sandbox recovery attempt {attempt} failed: {e}");
                HealthOutcome::RecoveryFailed
            }
        }
    }

    async fn provision(&self) -> Result<(Arc<dyn RemoteEnvironment>, SandboxInfo), LifecycleError> {
        let handle = self
            .provider
            .create(&self.create_options)
            .await
            .map_err(|e| LifecycleError::provision(format!("{e:#}")))?;

        if let Err(e) = self.bootstrapper.bootstrap(handle.as_ref()).await {
            if let Err(kill_err) = handle.kill().await {
                tracing::debug!("Failed to terminate half-provisioned sandbox {}: {kill_err}", handle.id());
            }
            return Err(LifecycleError::provision(format!("{e:#}")));
        }

        let url = preview_url(&handle.get_host(self.bootstrapper.port()));
        let info = SandboxInfo::new(handle.id(), url);
        Ok((handle, info))
    }

    async fn probe(&self, env: &dyn RemoteEnvironment) -> bool {
        let timeout_ms = u64::try_from(self.probe_timeout.as_millis()).unwrap_or(u64::MAX);
        match tokio::time::timeout(
            self.probe_timeout,
            env.run_command(PROBE_COMMAND, "/", timeout_ms),
        )
        .await
        {
            Ok(Ok(out)) => out.success(),
            Ok(Err(e)) => {
                tracing::debug!("Probe of sandbox {} failed: {e}", env.id());
                false
            }
            Err(_elapsed) => {
                tracing::debug!("Probe of sandbox {} timed out", env.id());
                false
            }
        }
    }

    fn start_monitor(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.monitor.lock().replace(token.clone()) {
            previous.cancel();
        }

        let manager = Arc::downgrade(self);
        let period = self.health_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        if manager.run_health_check().await == HealthOutcome::Killed {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Health monitor stopped");
        });
    }

    fn stop_monitor(&self) {
        if let Some(token) = self.monitor.lock().take() {
            token.cancel();
        }
    }

    fn remember_session(&self, info: &SandboxInfo) {
        if let Some(store) = &self.sessions {
            if let Err(e) = store.save(&info.sandbox_id, &info.url) {
                tracing::warn!("Failed to persist sandbox session: {e}");
            }
        }
    }

    fn forget_session(&self) {
        if let Some(store) = &self.sessions {
            if let Err(e) = store.clear() {
                tracing::warn!("Failed to clear sandbox session: {e}");
            }
        }
    }
}

async fn terminate(handle: &dyn RemoteEnvironment) {
    if let Err(e) = handle.kill().await {
        tracing::warn!("Failed to terminate sandbox {}: {e}", handle.id());
    } else {
        tracing::info!("Sandbox {} terminated", handle.id());
    }
}
