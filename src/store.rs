/// Request Store
///
/// In-flight requests keyed by id. Each entry owns the sending half of a
/// oneshot channel, so settling removes the entry and a completion can never
/// be settled twice. Late or duplicate responses find nothing and are
/// dropped.
///
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type Completion = oneshot::Sender<Result<Value>>;

#[derive(Debug)]
struct SubmittedRequest {
    method: String,
    sender: Completion,
}

#[derive(Debug, Default)]
pub struct RequestStore {
    pending: Mutex<HashMap<String, SubmittedRequest>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, SubmittedRequest>> {
        // A panic while holding the lock cannot leave the map half updated
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, id: &str, method: &str) -> PendingRequest {
        let (sender, receiver) = oneshot::channel();
        let previous = self.pending().insert(
            id.to_string(),
            SubmittedRequest {
                method: method.to_string(),
                sender,
            },
        );
        if previous.is_some() {
            warn!("request {id} registered twice, dropping the older one");
        }
        PendingRequest::new(id, receiver)
    }

    pub fn method(&self, id: &str) -> Option<String> {
        self.pending().get(id).map(|r| r.method.clone())
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Returns whether an entry was settled.
    pub fn settle(&self, id: &str, result: Value) -> bool {
        self.complete(id, Ok(result))
    }

    pub fn fail(&self, id: &str, error: Error) -> bool {
        self.complete(id, Err(error))
    }

    fn complete(&self, id: &str, outcome: Result<Value>) -> bool {
        let Some(request) = self.pending().remove(id) else {
            debug!("no pending request for id {id}, dropping");
            return false;
        };
        if request.sender.send(outcome).is_err() {
            debug!("caller of {} ({id}) went away", request.method);
        }
        true
    }

    /// Fails everything outstanding with `make_error()` and empties the store.
    pub fn drain_all_with_error(&self, make_error: impl Fn() -> Error) -> usize {
        let drained: Vec<_> = self.pending().drain().collect();
        let count = drained.len();
        for (id, request) in drained {
            debug!("failing {} ({id})", request.method);
            let _ = request.sender.send(Err(make_error()));
        }
        count
    }
}

/// Resolves once the wallet answers the request with this id.
///
/// There is no timeout, a request stays pending until it is answered or the
/// connection is torn down.
#[derive(Debug)]
pub struct PendingRequest {
    id: String,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl PendingRequest {
    fn new(id: &str, receiver: oneshot::Receiver<Result<Value>>) -> Self {
        Self {
            id: id.to_string(),
            receiver,
        }
    }

    /// A request that failed before reaching the transport.
    pub fn failed(id: &str, error: impl Into<Error>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Err(error.into()));
        Self::new(id, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingRequest {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Cancelled)))
    }
}
