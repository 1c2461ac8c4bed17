//! Polling hub of one station.
//!
//! A [`Hub`] owns the transport and the snapshot. The first subscriber opens the connection
//! and starts the periodic poller, the last one to leave stops it and closes the connection.
//!
//! Every register request goes through the transport mutex, so the poll cycle and the
//! command path never interleave on the wire. Cycles are serialized by a separate guard
//! which also owns the per-socket session trackers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::RegisterBlock;
use crate::config::HubConfig;
use crate::error::Result;
use crate::registers::{
    ProductBlock, ScnBlock, SocketEnergyBlock, SocketStatusBlock, StationStatusBlock,
};
use crate::registry::{Callback, Registry, SubscriptionId};
use crate::session::{Mode3State, SessionTracker};
use crate::snapshot::{Field, Snapshot, Socket, SocketField, Value};
use crate::transport::{TcpTransport, Transport, UnitId};

/// Connection lifecycle of a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// No subscriber, connection closed, no poller.
    Idle,
    /// At least one subscriber, poller running.
    Active,
}

/// Result of a successful [`Hub::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nobody is subscribed, nothing was read.
    Skipped,
    /// Every sub-read succeeded and update subscribers were notified.
    Completed {
        /// Refresh subscribers were notified as well.
        refresh_requested: bool,
    },
}

enum Lifecycle {
    Idle,
    Active {
        token: CancellationToken,
        poller: JoinHandle<()>,
    },
}

#[derive(Default)]
struct CycleState {
    sessions: [SessionTracker; 2],
}

impl CycleState {
    fn session(&mut self, socket: Socket) -> &mut SessionTracker {
        match socket {
            Socket::One => &mut self.sessions[0],
            Socket::Two => &mut self.sessions[1],
        }
    }
}

pub(crate) struct Inner<T> {
    pub(crate) config: HubConfig,
    /// Exclusive wire lock.
    pub(crate) transport: tokio::sync::Mutex<T>,
    pub(crate) snapshot: RwLock<Snapshot>,
    registry: Mutex<Registry>,
    /// Single active cycle guard.
    cycle: tokio::sync::Mutex<CycleState>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

/// Clonable handle to the polling hub of one station.
pub struct Hub<T: Transport> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Hub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.inner.config.name)
            .field("host", &self.inner.config.host)
            .field("subscribers", &self.inner.registry.lock().len())
            .finish()
    }
}

impl Hub<TcpTransport> {
    /// Hub talking Modbus/TCP to `config.host:config.port`.
    pub fn tcp(config: HubConfig) -> Result<Self> {
        config.validate()?;
        let transport = TcpTransport::new(config.host.clone(), config.port, config.timeout());
        Ok(Self::new(config, transport))
    }
}

impl<T: Transport> Hub<T> {
    pub fn new(config: HubConfig, transport: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport: tokio::sync::Mutex::new(transport),
                snapshot: RwLock::new(Snapshot::default()),
                registry: Mutex::new(Registry::default()),
                cycle: tokio::sync::Mutex::new(CycleState::default()),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn has_second_socket(&self) -> bool {
        self.inner.config.read_socket_2
    }

    pub fn has_scn(&self) -> bool {
        self.inner.config.read_scn
    }

    /// Copy of the last known values.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot.read().clone()
    }

    pub fn subscribers(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub async fn state(&self) -> HubState {
        match *self.inner.lifecycle.lock().await {
            Lifecycle::Idle => HubState::Idle,
            Lifecycle::Active { .. } => HubState::Active,
        }
    }

    /// Register an update callback, invoked after every successful cycle.
    pub async fn subscribe<F>(&self, on_update: F) -> SubscriptionId
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.register(Arc::new(on_update), None).await
    }

    /// Register an update callback and a refresh callback. The latter is invoked after a
    /// successful cycle when a max-current setpoint is close to expiring.
    pub async fn subscribe_with_refresh<F, R>(&self, on_update: F, on_refresh: R) -> SubscriptionId
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
        R: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.register(Arc::new(on_update), Some(Arc::new(on_refresh)))
            .await
    }

    async fn register(&self, on_update: Callback, on_refresh: Option<Callback>) -> SubscriptionId {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let (id, first) = self.inner.registry.lock().subscribe(on_update, on_refresh);
        debug!(hub = %self.name(), subscription = %id, "subscribed");

        if first && matches!(*lifecycle, Lifecycle::Idle) {
            self.activate(&mut lifecycle).await;
        }
        id
    }

    /// Remove a subscription. Returns `false` if `id` was unknown.
    ///
    /// Removing the last subscriber stops the poller, waits for a cycle in flight and
    /// closes the connection.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let removed = self.inner.registry.lock().unsubscribe(id);
        match removed {
            None => false,
            Some(now_empty) => {
                debug!(hub = %self.name(), subscription = %id, "unsubscribed");
                if now_empty {
                    self.deactivate(&mut lifecycle).await;
                }
                true
            }
        }
    }

    async fn activate(&self, lifecycle: &mut Lifecycle) {
        let connected = self.inner.transport.lock().await.connect().await;
        match connected {
            Ok(()) => info!(
                hub = %self.name(),
                "connected to {}:{}", self.inner.config.host, self.inner.config.port
            ),
            // The first cycle retries.
            Err(err) => warn!(hub = %self.name(), "connect failed: {err}"),
        }

        let token = CancellationToken::new();
        let poller = tokio::spawn(run_poller(
            Arc::downgrade(&self.inner),
            token.clone(),
            self.inner.config.scan_interval(),
        ));
        *lifecycle = Lifecycle::Active { token, poller };
        info!(
            hub = %self.name(),
            "polling every {}s", self.inner.config.scan_interval
        );
    }

    async fn deactivate(&self, lifecycle: &mut Lifecycle) {
        if let Lifecycle::Active { token, poller } = std::mem::replace(lifecycle, Lifecycle::Idle) {
            token.cancel();
            if let Err(err) = poller.await {
                warn!(hub = %self.name(), "poller task failed: {err}");
            }
        }
        // A manual cycle may still be running.
        let _cycle = self.inner.cycle.lock().await;
        self.inner.transport.lock().await.close().await;
        info!(hub = %self.name(), "stopped polling, connection closed");
    }

    /// Run one poll cycle now.
    ///
    /// Waits for a cycle in flight instead of overlapping it. On failure the snapshot keeps
    /// the fields of the sub-reads that completed before the failing one.
    pub async fn poll(&self) -> Result<CycleOutcome> {
        let idle = self.inner.registry.lock().is_empty();
        if idle {
            debug!(hub = %self.name(), "no subscribers, skipping cycle");
            return Ok(CycleOutcome::Skipped);
        }

        let mut cycle = self.inner.cycle.lock().await;
        if let Err(err) = self.read_all(&mut cycle).await {
            warn!(hub = %self.name(), "poll cycle failed: {err}");
            return Err(err);
        }

        let snapshot = self.snapshot();
        let on_update = self.inner.registry.lock().update_callbacks();
        for callback in &on_update {
            callback(&snapshot);
        }

        let refresh_requested = self.refresh_due(&snapshot);
        if refresh_requested {
            let on_refresh = self.inner.registry.lock().refresh_callbacks();
            debug!(
                hub = %self.name(),
                subscribers = on_refresh.len(),
                "max current about to expire, requesting refresh"
            );
            for callback in &on_refresh {
                callback(&snapshot);
            }
        }
        Ok(CycleOutcome::Completed { refresh_requested })
    }

    async fn read_all(&self, cycle: &mut CycleState) -> Result<()> {
        self.ensure_connected().await?;
        let unit = self.inner.config.station_address;

        let product: ProductBlock = self.read_block(unit).await?;
        let station_time = product.station_time()?;
        let fields = product.fields()?;
        self.commit(fields);

        let status: StationStatusBlock = self.read_block(unit).await?;
        let sockets = status.number_of_sockets;
        self.commit(status.fields());

        if self.has_scn() {
            let scn: ScnBlock = self.read_block(unit).await?;
            self.commit(scn.fields());
        }

        self.read_socket(Socket::One, cycle, station_time).await?;
        if self.has_second_socket() {
            if sockets >= 2 {
                self.read_socket(Socket::Two, cycle, station_time).await?;
            } else {
                debug!(hub = %self.name(), sockets, "station has no second socket");
            }
        }
        Ok(())
    }

    async fn read_socket(
        &self,
        socket: Socket,
        cycle: &mut CycleState,
        station_time: DateTime<FixedOffset>,
    ) -> Result<()> {
        let energy: SocketEnergyBlock = self.read_block(socket.unit()).await?;
        let status: SocketStatusBlock = self.read_block(socket.unit()).await?;

        let mode3 = Mode3State::parse(&status.mode3_state);
        let session = cycle.session(socket).observe(
            &mode3,
            energy.real_energy_delivered_sum,
            station_time,
        );
        if session.car_charging {
            debug!(
                hub = %self.name(),
                %socket,
                energy = ?session.energy,
                "charging session in progress"
            );
        }

        let mut snapshot = self.inner.snapshot.write();
        snapshot.extend(energy.fields(socket));
        snapshot.extend(status.fields(socket));
        snapshot.extend(session.fields(socket));
        Ok(())
    }

    async fn ensure_connected(&self) -> Result<()> {
        let mut transport = self.inner.transport.lock().await;
        if !transport.is_connected() {
            debug!(hub = %self.name(), "reconnecting");
            transport.connect().await?;
        }
        Ok(())
    }

    async fn read_block<B: RegisterBlock>(&self, unit: UnitId) -> Result<B> {
        let words = self
            .inner
            .transport
            .lock()
            .await
            .read_holding_registers(unit, B::ADDRESS, B::COUNT)
            .await?;
        debug!(
            hub = %self.name(),
            unit,
            address = B::ADDRESS,
            count = B::COUNT,
            "read block"
        );
        Ok(B::decode(&words)?)
    }

    fn commit(&self, fields: Vec<(Field, Value)>) {
        self.inner.snapshot.write().extend(fields);
    }

    fn refresh_due(&self, snapshot: &Snapshot) -> bool {
        let threshold = self.inner.config.refresh_threshold();
        let sockets: &[Socket] = if self.has_second_socket() {
            &[Socket::One, Socket::Two]
        } else {
            &[Socket::One]
        };
        sockets.iter().any(|socket| {
            snapshot
                .socket(*socket, SocketField::MaxCurrentValidTime)
                .and_then(Value::as_i64)
                .is_some_and(|seconds| seconds < threshold)
        })
    }
}

/// Periodic poll loop. The first cycle runs one interval after activation.
async fn run_poller<T: Transport>(
    inner: Weak<Inner<T>>,
    token: CancellationToken,
    period: Duration,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let hub = Hub { inner };
                // Failures are logged by the cycle, the next tick retries.
                let _ = hub.poll().await;
            }
        }
    }
    debug!("poller stopped");
}
