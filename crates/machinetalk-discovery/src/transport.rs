//! Transport adapter interface
//!
//! A transport browses service types and resolves announced instances. It
//! reports what it sees as [`TransportEvent`]s through an [`EventSink`]; the
//! discovery engine never calls back into the network directly.

use crate::error::{DiscoveryError, Result};
use crate::types::{PendingResolution, TransportFailure};
use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Lifecycle event produced by a transport adapter
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An instance was announced
    Added(PendingResolution),

    /// An instance went away
    Removed(PendingResolution),

    /// An instance resolved to host, port and TXT record
    Resolved(Resolution),

    /// Resolution of an instance failed
    ResolveFailed {
        identity: PendingResolution,
        reason: String,
    },

    /// The initial enumeration of a service type is exhausted
    AllForNow(String),

    /// Browse or daemon failure
    Failure(TransportFailure),
}

/// Result of resolving an instance
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub identity: PendingResolution,
    pub host: String,
    pub port: u16,
    /// Raw TXT tokens (`key` or `key=value`)
    pub text_record: Vec<String>,
}

/// Capability set the discovery engine needs from a transport
pub trait Transport: Send + 'static {
    /// Starts browsing a service type. Called at most once per type.
    fn browse(&mut self, service_type: &str) -> Result<()>;

    /// Starts resolving an announced instance. The outcome arrives later as
    /// [`TransportEvent::Resolved`] or [`TransportEvent::ResolveFailed`].
    fn resolve(&mut self, identity: &PendingResolution) -> Result<()>;

    /// Releases transport resources. In-flight resolutions are abandoned.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn browse(&mut self, service_type: &str) -> Result<()> {
        (**self).browse(service_type)
    }

    fn resolve(&mut self, identity: &PendingResolution) -> Result<()> {
        (**self).resolve(identity)
    }

    fn shutdown(&mut self) -> Result<()> {
        (**self).shutdown()
    }
}

/// Sending half handed to transport adapters
///
/// Backed by an unbounded channel so delivering an event never blocks the
/// transport's own thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<TransportEvent>,
}

impl EventSink {
    /// Creates a sink and the receiver the discovery session drains
    pub fn channel() -> (Self, Receiver<TransportEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Delivers an event. Returns `false` once the session is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport that records browse/resolve requests and performs no I/O.
///
/// Events are injected through the [`EventSink`] by whoever drives it, which
/// makes it suitable for bridging an external resolver or for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<RecordingState>>,
}

#[derive(Debug, Default)]
struct RecordingState {
    browsed: Vec<String>,
    resolved: Vec<PendingResolution>,
    failing_types: HashSet<String>,
    fail_resolve: bool,
    shut_down: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `browse` fail for the given service type
    pub fn fail_browse(&self, service_type: impl Into<String>) {
        self.state.lock().failing_types.insert(service_type.into());
    }

    /// Makes every `resolve` call fail
    pub fn fail_resolve(&self, fail: bool) {
        self.state.lock().fail_resolve = fail;
    }

    pub fn browsed(&self) -> Vec<String> {
        self.state.lock().browsed.clone()
    }

    pub fn resolve_requests(&self) -> Vec<PendingResolution> {
        self.state.lock().resolved.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl Transport for RecordingTransport {
    fn browse(&mut self, service_type: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_types.contains(service_type) {
            return Err(DiscoveryError::BrowseFailed {
                service_type: service_type.to_string(),
                reason: "browse rejected".to_string(),
            });
        }
        state.browsed.push(service_type.to_string());
        Ok(())
    }

    fn resolve(&mut self, identity: &PendingResolution) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_resolve {
            return Err(DiscoveryError::ResolutionFailed {
                service_name: identity.to_string(),
                reason: "resolver unavailable".to_string(),
            });
        }
        state.resolved.push(identity.clone());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.state.lock().shut_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_delivers_until_closed() {
        let (sink, rx) = EventSink::channel();
        assert!(sink.send(TransportEvent::AllForNow("_http._tcp.local.".to_string())));
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::AllForNow("_http._tcp.local.".to_string())
        );

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.send(TransportEvent::AllForNow("_http._tcp.local.".to_string())));
    }

    #[test]
    fn test_recording_transport() {
        let mut transport = RecordingTransport::new();
        let handle = transport.clone();
        handle.fail_browse("_https._tcp.local.");

        assert!(transport.browse("_http._tcp.local.").is_ok());
        assert!(transport.browse("_https._tcp.local.").is_err());
        assert_eq!(handle.browsed(), vec!["_http._tcp.local."]);

        let id = PendingResolution::new("svc", "_http._tcp.local.");
        assert!(transport.resolve(&id).is_ok());
        handle.fail_resolve(true);
        assert!(transport.resolve(&id).is_err());
        assert_eq!(handle.resolve_requests(), vec![id]);

        transport.shutdown().unwrap();
        assert!(handle.is_shut_down());
    }
}
