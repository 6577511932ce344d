//! Discovery engine: pending-resolution tracking, machine aggregation and
//! detection of the end of the initial sweep.
//!
//! The engine is synchronous and owned by a single task. Every operation
//! returns the consumer events it produced, in order; the caller decides how
//! to deliver them.
//!
//! The initial sweep is over when every browsed type has reported its first
//! enumeration cycle exhausted *and* no announced instance is still waiting to
//! resolve. Both conditions can become true in either order, so the predicate
//! is re-checked after every transition that could satisfy it, and the
//! `InitialDiscoveryFinished` event is emitted at most once.

use crate::transport::{Transport, TransportEvent};
use crate::txt::ServiceRecord;
use crate::types::{
    DiscoveryEvent, Machine, MachineService, MachineTable, PendingResolution, TransportFailure,
};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Machine discovery state machine over a transport
pub struct DiscoveryEngine<T: Transport> {
    transport: T,

    /// Browsed service types and whether their initial cycle is exhausted
    browsed: BTreeMap<String, bool>,

    /// Announced instances awaiting resolution, with the time they were announced
    pending: HashMap<PendingResolution, Instant>,

    machines: MachineTable,

    /// Set once every browsed type is exhausted; never cleared
    discovery_finished: bool,

    /// Set once `InitialDiscoveryFinished` has been emitted
    initial_reported: bool,
}

impl<T: Transport> DiscoveryEngine<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            browsed: BTreeMap::new(),
            pending: HashMap::new(),
            machines: MachineTable::new(),
            discovery_finished: false,
            initial_reported: false,
        }
    }

    /// Browses each service type not browsed yet.
    ///
    /// A type whose browse cannot be started is reported as a failure and is
    /// not waited on by the completion predicate.
    pub fn start<I, S>(&mut self, service_types: I) -> Vec<DiscoveryEvent>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events = Vec::new();
        for service_type in service_types {
            let service_type = service_type.into();
            if self.browsed.contains_key(&service_type) {
                debug!(service_type = %service_type, "Service type already browsed");
                continue;
            }

            match self.transport.browse(&service_type) {
                Ok(()) => {
                    info!(service_type = %service_type, "Browsing service type");
                    self.browsed.insert(service_type, false);
                }
                Err(e) => {
                    warn!(service_type = %service_type, error = %e, "Failed to start browsing");
                    events.push(DiscoveryEvent::Failure {
                        error: TransportFailure::new(Some(service_type), e.to_string()),
                    });
                }
            }
        }
        events
    }

    /// Dispatches a transport event to the matching handler
    pub fn handle(&mut self, event: TransportEvent) -> Vec<DiscoveryEvent> {
        match event {
            TransportEvent::Added(identity) => self.on_instance_added(identity),
            TransportEvent::Removed(identity) => self.on_instance_removed(&identity),
            TransportEvent::Resolved(resolution) => {
                debug!(
                    instance = %resolution.identity,
                    host = %resolution.host,
                    port = resolution.port,
                    "Instance resolved"
                );
                self.on_resolved(&resolution.identity, &resolution.text_record)
            }
            TransportEvent::ResolveFailed { identity, reason } => {
                debug!(instance = %identity, reason = %reason, "Resolution failed");
                self.on_resolve_failed(&identity)
            }
            TransportEvent::AllForNow(service_type) => self.on_browse_cycle_exhausted(&service_type),
            TransportEvent::Failure(failure) => self.on_transport_failure(failure),
        }
    }

    /// Tracks a newly announced instance and asks the transport to resolve it.
    /// Repeated announcements of a pending instance are ignored.
    pub fn on_instance_added(&mut self, identity: PendingResolution) -> Vec<DiscoveryEvent> {
        if self.pending.contains_key(&identity) {
            debug!(instance = %identity, "Instance already pending");
            return Vec::new();
        }

        debug!(instance = %identity, "Instance added");
        self.pending.insert(identity.clone(), Instant::now());

        if let Err(e) = self.transport.resolve(&identity) {
            warn!(instance = %identity, error = %e, "Failed to start resolution");
            return self.on_resolve_failed(&identity);
        }
        Vec::new()
    }

    /// Drops an instance that disappeared before it resolved.
    ///
    /// Removal of an instance that already resolved is not acted on: the
    /// machine table only grows.
    pub fn on_instance_removed(&mut self, identity: &PendingResolution) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        if self.pending.remove(identity).is_some() {
            debug!(instance = %identity, "Pending instance removed");
            self.check_completion(&mut events);
        } else {
            debug!(instance = %identity, "Ignoring removal of untracked instance");
        }
        events
    }

    /// Applies a resolution. Resolutions for instances that are not pending
    /// (duplicates, or never announced) are discarded.
    pub fn on_resolved<S: AsRef<str>>(
        &mut self,
        identity: &PendingResolution,
        text_record: &[S],
    ) -> Vec<DiscoveryEvent> {
        if self.pending.remove(identity).is_none() {
            debug!(instance = %identity, "Discarding resolution of instance that is not pending");
            return Vec::new();
        }

        let mut events = Vec::new();
        match ServiceRecord::parse(text_record) {
            Some(record) => self.record_service(record, &mut events),
            None => debug!(instance = %identity, "Discarding incomplete TXT record"),
        }
        self.check_completion(&mut events);
        events
    }

    /// Forgets a pending instance whose resolution failed. No retry.
    pub fn on_resolve_failed(&mut self, identity: &PendingResolution) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        if self.pending.remove(identity).is_some() {
            self.check_completion(&mut events);
        }
        events
    }

    /// Marks the initial enumeration of a browsed type as exhausted
    pub fn on_browse_cycle_exhausted(&mut self, service_type: &str) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        match self.browsed.get_mut(service_type) {
            Some(exhausted) => *exhausted = true,
            None => {
                debug!(service_type, "Ignoring exhaustion of a type that is not browsed");
                return events;
            }
        }

        if !self.discovery_finished && self.browsed.values().all(|exhausted| *exhausted) {
            info!(
                types = self.browsed.len(),
                pending = self.pending.len(),
                "All browsed service types enumerated"
            );
            self.discovery_finished = true;
        }

        self.check_completion(&mut events);
        events
    }

    /// Reports a systemic transport failure; nothing is recovered here
    pub fn on_transport_failure(&mut self, failure: TransportFailure) -> Vec<DiscoveryEvent> {
        warn!(
            service_type = failure.service_type.as_deref().unwrap_or("-"),
            reason = %failure.reason,
            "Transport failure"
        );
        vec![DiscoveryEvent::Failure { error: failure }]
    }

    /// Treats every instance pending for at least `timeout` as a failed
    /// resolution, so a lost resolution cannot block the initial sweep forever.
    pub fn expire_pending(&mut self, timeout: Duration) -> Vec<DiscoveryEvent> {
        let expired: Vec<PendingResolution> = self
            .pending
            .iter()
            .filter(|(_, since)| since.elapsed() >= timeout)
            .map(|(identity, _)| identity.clone())
            .collect();

        let mut events = Vec::new();
        if expired.is_empty() {
            return events;
        }

        for identity in &expired {
            warn!(instance = %identity, "Resolution timed out");
            self.pending.remove(identity);
        }
        self.check_completion(&mut events);
        events
    }

    fn record_service(&mut self, record: ServiceRecord, events: &mut Vec<DiscoveryEvent>) {
        let ServiceRecord { uuid, dsn, service } = record;

        let machine = self.machines.entry(uuid.clone()).or_insert_with(|| {
            info!(uuid = %uuid, "Machine discovered");
            let machine = Machine::new(uuid.clone());
            events.push(DiscoveryEvent::MachineDiscovered {
                machine: machine.clone(),
            });
            machine
        });

        let service = MachineService::new(service, dsn);
        if let Some(previous) = machine.upsert(service.clone()) {
            if previous.dsn != service.dsn {
                debug!(
                    uuid = %machine.uuid,
                    service = %service.name,
                    old = %previous.dsn,
                    new = %service.dsn,
                    "Service DSN replaced"
                );
            }
        }
        info!(uuid = %machine.uuid, service = %service.name, dsn = %service.dsn, "Service discovered");

        events.push(DiscoveryEvent::ServiceDiscovered {
            machine: machine.clone(),
            service,
        });
    }

    fn check_completion(&mut self, events: &mut Vec<DiscoveryEvent>) {
        if self.initial_reported || !self.discovery_finished || !self.pending.is_empty() {
            return;
        }

        self.initial_reported = true;
        info!(machines = self.machines.len(), "Initial discovery finished");
        events.push(DiscoveryEvent::InitialDiscoveryFinished {
            machines: self.machines.clone(),
        });
    }

    pub fn machines(&self) -> &MachineTable {
        &self.machines
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, identity: &PendingResolution) -> bool {
        self.pending.contains_key(identity)
    }

    pub fn browsed_types(&self) -> impl Iterator<Item = &str> {
        self.browsed.keys().map(String::as_str)
    }

    pub fn is_discovery_finished(&self) -> bool {
        self.discovery_finished
    }

    pub fn is_initial_discovery_reported(&self) -> bool {
        self.initial_reported
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RecordingTransport, Resolution};

    const MK: &str = "_machinekit._tcp.local.";
    const HTTP: &str = "_http._tcp.local.";

    fn engine(types: &[&str]) -> (DiscoveryEngine<RecordingTransport>, RecordingTransport) {
        let transport = RecordingTransport::new();
        let mut engine = DiscoveryEngine::new(transport.clone());
        assert!(engine.start(types.iter().copied()).is_empty());
        (engine, transport)
    }

    fn record(uuid: &str, service: &str, dsn: &str) -> Vec<String> {
        vec![
            format!("uuid={uuid}"),
            format!("service={service}"),
            format!("dsn={dsn}"),
        ]
    }

    fn finished_count(events: &[DiscoveryEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::InitialDiscoveryFinished { .. }))
            .count()
    }

    #[test]
    fn test_start_is_idempotent() {
        let (mut engine, transport) = engine(&[MK, HTTP]);
        assert!(engine.start([MK, HTTP, MK]).is_empty());
        assert_eq!(transport.browsed(), vec![MK, HTTP]);
        assert_eq!(engine.browsed_types().count(), 2);
    }

    #[test]
    fn test_browse_failure_reported() {
        let transport = RecordingTransport::new();
        transport.fail_browse(HTTP);
        let mut engine = DiscoveryEngine::new(transport);

        let events = engine.start([MK, HTTP]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DiscoveryEvent::Failure { error } => {
                assert_eq!(error.service_type.as_deref(), Some(HTTP));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Only the browsed type gates completion
        let events = engine.on_browse_cycle_exhausted(MK);
        assert_eq!(finished_count(&events), 1);
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let (mut engine, transport) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);

        engine.on_instance_added(id.clone());
        engine.on_instance_added(id.clone());
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(transport.resolve_requests().len(), 1);
    }

    #[test]
    fn test_stale_resolution_is_noop() {
        let (mut engine, _) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);

        let events = engine.on_resolved(&id, &record("m1", "status", "tcp://h:1"));
        assert!(events.is_empty());
        assert!(engine.machines().is_empty());

        engine.on_instance_added(id.clone());
        assert_eq!(engine.on_resolved(&id, &record("m1", "status", "tcp://h:1")).len(), 2);
        // second resolution of the same announcement
        assert!(engine.on_resolved(&id, &record("m1", "status", "tcp://h:2")).is_empty());
        assert_eq!(engine.machines()["m1"].dsn("status"), Some("tcp://h:1"));
    }

    #[test]
    fn test_incomplete_record_emits_nothing() {
        let (mut engine, _) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);
        engine.on_instance_added(id.clone());

        let events = engine.on_resolved(&id, &["uuid=m1", "service=status"]);
        assert!(events.is_empty());
        assert!(engine.machines().is_empty());
        assert!(!engine.is_pending(&id));
    }

    #[test]
    fn test_one_machine_two_services() {
        let (mut engine, _) = engine(&[MK]);
        let status = PendingResolution::new("status", MK);
        let command = PendingResolution::new("command", MK);
        engine.on_instance_added(status.clone());
        engine.on_instance_added(command.clone());

        let mut events = engine.on_resolved(&status, &record("m1", "status", "tcp://h:1"));
        events.extend(engine.on_resolved(&command, &record("m1", "command", "tcp://h:2")));

        let machines = events
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::MachineDiscovered { .. }))
            .count();
        let services: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                DiscoveryEvent::ServiceDiscovered { service, .. } => Some(service.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(machines, 1);
        assert_eq!(services, vec!["status", "command"]);

        match events.last() {
            Some(DiscoveryEvent::ServiceDiscovered { machine, .. }) => {
                assert_eq!(machine.services.len(), 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_reresolution_overwrites_dsn() {
        let (mut engine, _) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);

        engine.on_instance_added(id.clone());
        engine.on_resolved(&id, &record("m1", "status", "tcp://h:1"));

        // announced again (e.g. after a restart on another port)
        engine.on_instance_added(id.clone());
        let events = engine.on_resolved(&id, &record("m1", "status", "tcp://h:5"));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DiscoveryEvent::ServiceDiscovered { .. }));
        assert_eq!(engine.machines()["m1"].dsn("status"), Some("tcp://h:5"));
    }

    #[test]
    fn test_completion_waits_for_all_types() {
        let (mut engine, _) = engine(&[MK, HTTP]);
        assert!(engine.on_browse_cycle_exhausted(MK).is_empty());
        assert!(!engine.is_discovery_finished());

        // repeated or unknown exhaustion changes nothing
        assert!(engine.on_browse_cycle_exhausted(MK).is_empty());
        assert!(engine.on_browse_cycle_exhausted("_ssh._tcp.local.").is_empty());

        let events = engine.on_browse_cycle_exhausted(HTTP);
        assert_eq!(finished_count(&events), 1);
        assert!(engine.is_initial_discovery_reported());

        assert!(engine.on_browse_cycle_exhausted(HTTP).is_empty());
    }

    #[test]
    fn test_completion_waits_for_pending() {
        let (mut engine, _) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);
        engine.on_instance_added(id.clone());

        assert!(engine.on_browse_cycle_exhausted(MK).is_empty());
        assert!(engine.is_discovery_finished());

        let events = engine.on_resolved(&id, &record("m1", "status", "tcp://h:1"));
        assert_eq!(events.len(), 3);
        match &events[2] {
            DiscoveryEvent::InitialDiscoveryFinished { machines } => {
                assert!(machines.contains_key("m1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // later activity never re-fires completion
        let late = PendingResolution::new("error", MK);
        engine.on_instance_added(late.clone());
        let events = engine.on_resolved(&late, &record("m1", "error", "tcp://h:3"));
        assert_eq!(finished_count(&events), 0);
    }

    #[test]
    fn test_resolve_failure_unblocks_completion() {
        let (mut engine, _) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);
        engine.on_instance_added(id.clone());
        engine.on_browse_cycle_exhausted(MK);

        let events = engine.handle(TransportEvent::ResolveFailed {
            identity: id,
            reason: "timeout".to_string(),
        });
        assert_eq!(finished_count(&events), 1);
        assert!(engine.machines().is_empty());
    }

    #[test]
    fn test_resolve_request_error_counts_as_failure() {
        let (mut engine, transport) = engine(&[MK]);
        engine.on_browse_cycle_exhausted(MK);
        transport.fail_resolve(true);

        // completion already fired with an empty table
        let id = PendingResolution::new("status", MK);
        assert!(engine.on_instance_added(id.clone()).is_empty());
        assert!(!engine.is_pending(&id));
    }

    #[test]
    fn test_removal_of_pending_unblocks_completion() {
        let (mut engine, _) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);
        engine.on_instance_added(id.clone());
        engine.on_browse_cycle_exhausted(MK);

        let events = engine.handle(TransportEvent::Removed(id.clone()));
        assert_eq!(finished_count(&events), 1);

        // removal after resolution leaves the table alone
        engine.on_instance_added(id.clone());
        engine.on_resolved(&id, &record("m1", "status", "tcp://h:1"));
        assert!(engine.on_instance_removed(&id).is_empty());
        assert!(engine.machines().contains_key("m1"));
    }

    #[test]
    fn test_expire_pending() {
        let (mut engine, _) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);
        engine.on_instance_added(id.clone());
        engine.on_browse_cycle_exhausted(MK);

        assert!(engine.expire_pending(Duration::from_secs(3600)).is_empty());
        assert!(engine.is_pending(&id));

        let events = engine.expire_pending(Duration::ZERO);
        assert_eq!(finished_count(&events), 1);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_handle_resolved_event() {
        let (mut engine, _) = engine(&[MK]);
        let id = PendingResolution::new("status", MK);
        engine.handle(TransportEvent::Added(id.clone()));

        let events = engine.handle(TransportEvent::Resolved(Resolution {
            identity: id,
            host: "mksocfpga.local.".to_string(),
            port: 6502,
            text_record: record("m1", "status", "tcp://mksocfpga.local:6502"),
        }));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "machine_discovered");
        assert_eq!(events[1].kind(), "service_discovered");
    }

    #[test]
    fn test_transport_failure_passes_through() {
        let (mut engine, _) = engine(&[MK]);
        let events = engine.handle(TransportEvent::Failure(TransportFailure::new(
            None,
            "daemon stopped",
        )));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "failure");
    }
}
