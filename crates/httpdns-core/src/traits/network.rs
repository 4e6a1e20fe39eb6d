// # Network Change Signal
//
// Connectivity changes are detected outside the core (platform APIs) and
// delivered as a stream of `NetworkChangeEvent`s. The address a service hands
// out depends on the network the client sits on, so every event invalidates
// the whole domain cache.
//
// ## Usage
//
// ```rust,ignore
// use httpdns_core::traits::{NetworkChangeEvent, NetworkKind};
//
// let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
// let _watch = coordinator.watch_network(Box::pin(
//     tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
// ));
//
// tx.send(NetworkChangeEvent::new(NetworkKind::Wifi).with_ssid("office"))?;
// ```

use std::pin::Pin;
use tokio_stream::Stream;

/// Kind of network the device is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKind {
    /// Wi-Fi
    Wifi,
    /// Mobile data
    Cellular,
    /// Wired
    Ethernet,
    /// No connectivity
    Offline,
}

/// A detected connectivity change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkChangeEvent {
    /// Network the device is now on
    pub kind: NetworkKind,
    /// Wi-Fi SSID, when known
    pub ssid: Option<String>,
}

impl NetworkChangeEvent {
    /// Create an event for a network kind
    pub fn new(kind: NetworkKind) -> Self {
        Self { kind, ssid: None }
    }

    /// Attach an SSID
    pub fn with_ssid(mut self, ssid: impl Into<String>) -> Self {
        self.ssid = Some(ssid.into());
        self
    }
}

/// Boxed stream of network change events
pub type NetworkChangeStream = Pin<Box<dyn Stream<Item = NetworkChangeEvent> + Send + 'static>>;
