/// Collaborators
///
/// The engine never touches sockets, deep links or UI. It talks to a
/// [`Transport`] that moves text to the wallet, reports session changes to a
/// [`Delegate`] and emits telemetry to a [`Tracker`].
///
use std::collections::HashMap;
use std::fmt::{self, Display};

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Bidirectional channel that stays open, e.g. a socket.
    Persistent,
    /// Every message opens the wallet, e.g. a deep link.
    OneShot,
}

/// A send queued until the channel is ready.
pub type RequestJob = Box<dyn FnOnce() + Send + 'static>;

/// The transport hands every inbound frame to
/// [`Ethereum::handle_message`](crate::Ethereum::handle_message).
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    fn connect(&self, initial_message: Option<String>);

    fn disconnect(&self);

    /// Forget any persisted session, unlike a plain [`Transport::disconnect`].
    fn clear_session(&self);

    fn send_message(&self, message: &str, encrypt: bool);

    fn add_request(&self, job: RequestJob);

    fn request_authorisation(&self);
}

/// Notified synchronously, an empty string means the value was cleared.
pub trait Delegate: Send + Sync {
    fn chain_id_changed(&self, chain_id: &str);

    fn account_changed(&self, account: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    ConnectionRequest,
    ConnectionAuthorised,
    ConnectionRejected,
    Disconnected,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConnectionRequest => "sdk_connect_request_started",
            Event::ConnectionAuthorised => "sdk_connection_authorized",
            Event::ConnectionRejected => "sdk_connection_rejected",
            Event::Disconnected => "sdk_disconnected",
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fire and forget telemetry sink.
pub trait Tracker: Send + Sync {
    fn track(&self, event: Event, attributes: HashMap<String, Value>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl Delegate for NoopDelegate {
    fn chain_id_changed(&self, _chain_id: &str) {}

    fn account_changed(&self, _account: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn track(&self, _event: Event, _attributes: HashMap<String, Value>) {}
}
