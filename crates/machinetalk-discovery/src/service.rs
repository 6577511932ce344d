//! Discovery session
//!
//! A [`DiscoveryService`] owns one discovery session. Transport events are
//! funneled into a single task that owns the [`DiscoveryEngine`], so engine
//! state is only ever touched from that task. Consumer events leave through a
//! bounded channel and are handled on the consumer's own task. The session
//! never waits on consumers: when the channel is full the oldest queued event
//! is dropped.

use crate::config::DiscoveryConfig;
use crate::engine::DiscoveryEngine;
use crate::error::{DiscoveryError, Result};
use crate::transport::{EventSink, Transport, TransportEvent};
use crate::types::{DiscoveryEvent, Machine, MachineService, MachineTable, TransportFailure};
use async_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callbacks invoked for discovery events
///
/// All methods default to doing nothing.
pub trait DiscoveryHandler: Send + 'static {
    fn machine_discovered(&mut self, _machine: &Machine) {}

    fn service_discovered(&mut self, _machine: &Machine, _service: &MachineService) {}

    fn initial_discovery_finished(&mut self, _machines: &MachineTable) {}

    fn failure(&mut self, _error: &TransportFailure) {}
}

impl DiscoveryEvent {
    /// Invokes the handler method matching this event
    pub fn dispatch<H: DiscoveryHandler + ?Sized>(&self, handler: &mut H) {
        match self {
            DiscoveryEvent::MachineDiscovered { machine } => handler.machine_discovered(machine),
            DiscoveryEvent::ServiceDiscovered { machine, service } => {
                handler.service_discovered(machine, service)
            }
            DiscoveryEvent::InitialDiscoveryFinished { machines } => {
                handler.initial_discovery_finished(machines)
            }
            DiscoveryEvent::Failure { error } => handler.failure(error),
        }
    }
}

/// One machine discovery session
pub struct DiscoveryService {
    config: DiscoveryConfig,

    /// Handed to transport adapters
    sink: EventSink,

    /// Taken by the session task on start
    transport_rx: Mutex<Option<Receiver<TransportEvent>>>,

    event_tx: Sender<DiscoveryEvent>,
    event_rx: Receiver<DiscoveryEvent>,

    /// Snapshot of the machine table, refreshed by the session task
    machines: Arc<RwLock<MachineTable>>,

    /// Machine table as of the end of the initial sweep. The sender moves
    /// into the session task, so the channel closes when the session ends.
    initial: watch::Receiver<Option<MachineTable>>,
    initial_tx: Mutex<Option<watch::Sender<Option<MachineTable>>>>,

    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// Creates a discovery session
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        config.validate().map_err(DiscoveryError::InvalidConfig)?;

        let (sink, transport_rx) = EventSink::channel();
        let (event_tx, event_rx) = async_channel::bounded(config.event_buffer);
        let (initial_tx, initial) = watch::channel(None);

        info!(
            enabled = config.enabled,
            types = config.service_types.len(),
            "Discovery service created"
        );

        Ok(Self {
            config,
            sink,
            transport_rx: Mutex::new(Some(transport_rx)),
            event_tx,
            event_rx,
            machines: Arc::new(RwLock::new(MachineTable::new())),
            initial,
            initial_tx: Mutex::new(Some(initial_tx)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Sink through which a transport adapter delivers its events
    pub fn event_sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Starts the session: browses the configured service types on
    /// `transport` and spawns the task that processes transport events.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start<T: Transport>(&self, transport: T) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyStarted);
        }

        let initial = self
            .initial_tx
            .lock()
            .take()
            .ok_or(DiscoveryError::AlreadyStarted)?;

        if !self.config.enabled {
            // Nothing will be browsed: the initial sweep is trivially over
            info!("Discovery is disabled in configuration");
            initial.send_replace(Some(MachineTable::new()));
            let event = DiscoveryEvent::InitialDiscoveryFinished {
                machines: MachineTable::new(),
            };
            if let Err(e) = self.event_tx.force_send(event) {
                debug!(error = %e, "No consumer for discovery events");
            }
            return Ok(());
        }

        let transport_rx = self
            .transport_rx
            .lock()
            .take()
            .ok_or(DiscoveryError::AlreadyStarted)?;

        info!("Starting discovery session");
        self.running.store(true, Ordering::SeqCst);

        let mut engine = DiscoveryEngine::new(transport);
        let startup = engine.start(self.config.service_strings());

        let session = Session {
            engine,
            transport_rx,
            event_tx: self.event_tx.clone(),
            machines: self.machines.clone(),
            initial,
            running: self.running.clone(),
            cancel: self.cancel.child_token(),
            resolve_timeout: self.config.resolve_timeout(),
            sweep_interval: self.config.sweep_interval(),
        };

        let task = tokio::spawn(session.run(startup));
        self.tasks.lock().push(task);

        info!("Discovery session started");
        Ok(())
    }

    /// Stops the session and shuts the transport down.
    /// Pending resolutions are abandoned.
    pub async fn stop(&self) -> Result<()> {
        // A session that never started will never finish its sweep
        self.initial_tx.lock().take();

        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping discovery session");
        self.cancel.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Discovery task ended abnormally");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Discovery session stopped");
        Ok(())
    }

    /// Returns whether the session task is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of all machines discovered so far
    pub fn machines(&self) -> MachineTable {
        self.machines.read().clone()
    }

    /// Snapshot of one machine
    pub fn machine(&self, uuid: &str) -> Option<Machine> {
        self.machines.read().get(uuid).cloned()
    }

    /// Returns the event receiver for external consumers.
    ///
    /// Receivers share one queue: each event is delivered to exactly one of
    /// them. Once `event_buffer` events are queued, each new event displaces
    /// the oldest one.
    pub fn event_receiver(&self) -> Receiver<DiscoveryEvent> {
        self.event_rx.clone()
    }

    /// Runs `handler` on its own task for every event of this session
    pub fn spawn_handler<H: DiscoveryHandler>(&self, mut handler: H) -> JoinHandle<()> {
        let events = self.event_rx.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                event.dispatch(&mut handler);
            }
            debug!("Discovery handler stopped");
        })
    }

    /// Waits until the initial sweep completes and returns the machine table
    /// as of that moment. Returns immediately if it already completed.
    ///
    /// Fails with [`DiscoveryError::SessionClosed`] if the session ends, or is
    /// stopped, before the sweep completes.
    pub async fn initial_discovery(&self) -> Result<MachineTable> {
        let mut rx = self.initial.clone();
        let table = rx
            .wait_for(|table| table.is_some())
            .await
            .map_err(|_| DiscoveryError::SessionClosed)?;
        table.clone().ok_or(DiscoveryError::SessionClosed)
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("Discovery service dropped while still running");
            self.cancel.cancel();
        }
    }
}

/// State moved into the session task
struct Session<T: Transport> {
    engine: DiscoveryEngine<T>,
    transport_rx: Receiver<TransportEvent>,
    event_tx: Sender<DiscoveryEvent>,
    machines: Arc<RwLock<MachineTable>>,
    initial: watch::Sender<Option<MachineTable>>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    resolve_timeout: Option<Duration>,
    sweep_interval: Duration,
}

impl<T: Transport> Session<T> {
    async fn run(mut self, startup: Vec<DiscoveryEvent>) {
        self.publish(startup);

        // interval() panics on a zero period; the sweep is unused when expiry is off
        let mut sweep = tokio::time::interval(self.sweep_interval.max(Duration::from_millis(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let timeout = self.resolve_timeout.unwrap_or(Duration::MAX);

        loop {
            let events = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.transport_rx.recv() => match event {
                    Ok(event) => self.engine.handle(event),
                    Err(_) => {
                        debug!("Transport event channel closed");
                        break;
                    }
                },
                _ = sweep.tick(), if self.resolve_timeout.is_some() => {
                    self.engine.expire_pending(timeout)
                }
            };
            self.publish(events);
        }

        if let Err(e) = self.engine.transport_mut().shutdown() {
            warn!(error = %e, "Failed to shut down transport");
        }
        self.running.store(false, Ordering::SeqCst);
        debug!("Discovery session task stopped");
    }

    fn publish(&mut self, events: Vec<DiscoveryEvent>) {
        if events.is_empty() {
            return;
        }

        if events
            .iter()
            .any(|e| matches!(e, DiscoveryEvent::ServiceDiscovered { .. }))
        {
            *self.machines.write() = self.engine.machines().clone();
        }

        for event in events {
            if let DiscoveryEvent::InitialDiscoveryFinished { machines } = &event {
                self.initial.send_replace(Some(machines.clone()));
            }

            debug!(event = event.kind(), "Publishing discovery event");
            match self.event_tx.force_send(event) {
                Ok(None) => {}
                Ok(Some(dropped)) => {
                    warn!(dropped = dropped.kind(), "Event buffer full, dropped oldest event");
                }
                Err(e) => warn!(error = %e, "Failed to send discovery event"),
            }
        }
    }
}
