//! `mdns-sd` transport adapter
//!
//! `mdns-sd` resolves every instance it finds on its own, so `resolve` only
//! has to wait for the daemon's `ServiceResolved` event. The daemon has no
//! "all for now" signal either: a browse cycle is reported exhausted once the
//! type's event stream has been quiet for the configured settle period.

use crate::error::{DiscoveryError, Result};
use crate::transport::{EventSink, Resolution, Transport, TransportEvent};
use crate::types::{PendingResolution, TransportFailure};
use mdns_sd::{ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Transport backed by an in-process mDNS daemon
pub struct MdnsTransport {
    daemon: ServiceDaemon,
    sink: EventSink,
    settle_period: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl MdnsTransport {
    /// Creates the mDNS daemon. Events are delivered to `sink`.
    pub fn new(sink: EventSink, settle_period: Duration) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            DiscoveryError::MdnsInitFailed(format!("Failed to create mDNS daemon: {}", e))
        })?;

        Ok(Self {
            daemon,
            sink,
            settle_period,
            tasks: Vec::new(),
        })
    }
}

impl Transport for MdnsTransport {
    /// Spawns the task forwarding this type's daemon events; requires a
    /// tokio runtime.
    fn browse(&mut self, service_type: &str) -> Result<()> {
        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;

        info!(service_type, settle = ?self.settle_period, "Starting mDNS browser");

        let task = tokio::spawn(forward_events(
            service_type.to_string(),
            receiver,
            self.sink.clone(),
            self.settle_period,
        ));
        self.tasks.push(task);
        Ok(())
    }

    fn resolve(&mut self, identity: &PendingResolution) -> Result<()> {
        trace!(instance = %identity, "Resolution handled by the mDNS daemon");
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        // The daemon may already be gone if its thread failed
        self.daemon
            .shutdown()
            .map(|_| ())
            .map_err(|e| DiscoveryError::Internal(format!("Failed to shutdown mDNS daemon: {}", e)))
    }
}

impl Drop for MdnsTransport {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn forward_events(
    service_type: String,
    receiver: mdns_sd::Receiver<MdnsEvent>,
    sink: EventSink,
    settle_period: Duration,
) {
    // Only instance events count as activity; the daemon's periodic
    // SearchStarted re-queries must not postpone settling.
    let mut quiet_until = Some(Instant::now() + settle_period);

    loop {
        let received = match quiet_until {
            None => receiver.recv_async().await,
            Some(deadline) => match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(service_type = %service_type, "Browse cycle settled");
                    quiet_until = None;
                    if !sink.send(TransportEvent::AllForNow(service_type.clone())) {
                        break;
                    }
                    continue;
                }
            },
        };

        match received {
            Ok(MdnsEvent::SearchStopped(ty)) => {
                debug!(service_type = %ty, "Search stopped");
                break;
            }
            Ok(event) => {
                if let Some(event) = translate(event) {
                    if let Some(deadline) = quiet_until.as_mut() {
                        *deadline = Instant::now() + settle_period;
                    }
                    if !sink.send(event) {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(service_type = %service_type, error = %e, "mDNS event channel closed");
                sink.send(TransportEvent::Failure(TransportFailure::new(
                    Some(service_type.clone()),
                    e.to_string(),
                )));
                break;
            }
        }
    }

    debug!(service_type = %service_type, "mDNS browser task stopped");
}

/// Maps a daemon event onto a transport event
fn translate(event: MdnsEvent) -> Option<TransportEvent> {
    match event {
        MdnsEvent::ServiceFound(ty, fullname) => Some(TransportEvent::Added(
            PendingResolution::from_fullname(&ty, &fullname),
        )),
        MdnsEvent::ServiceResolved(info) => Some(TransportEvent::Resolved(resolution(&info))),
        MdnsEvent::ServiceRemoved(ty, fullname) => Some(TransportEvent::Removed(
            PendingResolution::from_fullname(&ty, &fullname),
        )),
        other => {
            trace!(event = ?other, "Ignoring mDNS event");
            None
        }
    }
}

fn resolution(info: &ServiceInfo) -> Resolution {
    let text_record = info
        .get_properties()
        .iter()
        .map(|prop| match prop.val() {
            Some(value) => format!("{}={}", prop.key(), String::from_utf8_lossy(value)),
            None => prop.key().to_string(),
        })
        .collect();

    Resolution {
        identity: PendingResolution::from_fullname(info.get_type(), info.get_fullname()),
        host: info.get_hostname().to_string(),
        port: info.get_port(),
        text_record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MK: &str = "_machinekit._tcp.local.";

    #[test]
    fn test_translate_found_and_removed() {
        let fullname = format!("Status on mksocfpga.{MK}");

        let added = translate(MdnsEvent::ServiceFound(MK.to_string(), fullname.clone()));
        assert_eq!(
            added,
            Some(TransportEvent::Added(PendingResolution::new(
                "Status on mksocfpga",
                MK
            )))
        );

        let removed = translate(MdnsEvent::ServiceRemoved(MK.to_string(), fullname));
        assert!(matches!(removed, Some(TransportEvent::Removed(_))));

        assert!(translate(MdnsEvent::SearchStarted(MK.to_string())).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_restarts_do_not_postpone_settling() {
        let (daemon_tx, daemon_rx) = flume::unbounded();
        let (sink, events) = EventSink::channel();
        let task = tokio::spawn(forward_events(
            MK.to_string(),
            daemon_rx,
            sink,
            Duration::from_secs(2),
        ));

        // Re-queries every 500ms for 3s
        for _ in 0..6 {
            daemon_tx.send(MdnsEvent::SearchStarted(MK.to_string())).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        assert_eq!(
            events.try_recv().unwrap(),
            TransportEvent::AllForNow(MK.to_string())
        );
        assert!(events.try_recv().is_err());

        daemon_tx.send(MdnsEvent::SearchStopped(MK.to_string())).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_events_postpone_settling() {
        let (daemon_tx, daemon_rx) = flume::unbounded();
        let (sink, events) = EventSink::channel();
        let task = tokio::spawn(forward_events(
            MK.to_string(),
            daemon_rx,
            sink,
            Duration::from_secs(2),
        ));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        daemon_tx
            .send(MdnsEvent::ServiceFound(
                MK.to_string(),
                format!("Status on mksocfpga.{MK}"),
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // 2.5s in, but only 1s since the last instance event
        assert!(matches!(events.try_recv(), Ok(TransportEvent::Added(_))));
        assert!(events.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            events.try_recv().unwrap(),
            TransportEvent::AllForNow(MK.to_string())
        );

        drop(daemon_tx);
        task.await.unwrap();
    }

    #[test]
    fn test_resolution_from_service_info() {
        let mut properties = HashMap::new();
        properties.insert("uuid".to_string(), "m1".to_string());
        properties.insert("service".to_string(), "status".to_string());
        properties.insert("dsn".to_string(), "tcp://mksocfpga.local:6502".to_string());

        let info = ServiceInfo::new(
            MK,
            "Status on mksocfpga",
            "mksocfpga.local.",
            "192.168.7.2",
            6502,
            properties,
        )
        .unwrap();

        let resolution = resolution(&info);
        assert_eq!(resolution.identity, PendingResolution::new("Status on mksocfpga", MK));
        assert_eq!(resolution.port, 6502);

        let record = crate::txt::ServiceRecord::parse(&resolution.text_record).unwrap();
        assert_eq!(record.uuid, "m1");
        assert_eq!(record.dsn, "tcp://mksocfpga.local:6502");
    }
}
