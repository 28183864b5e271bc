/// Ethereum
///
/// The connection engine: owns session state, turns requests into frames for
/// the transport and routes whatever comes back either to the pending
/// request with the same id or, for frames without an id, to the event
/// handlers.
///
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use serde_json::{Value, json};

use crate::constants::{
    DISCONNECTED_MESSAGE, NO_ACCOUNTS_MESSAGE, NO_READ_ONLY_RESULT_MESSAGE,
};
use crate::error::{Error, ErrorType, RequestError, Result};
use crate::frame::{Frame, first_str};
use crate::provider::{InfuraProvider, ReadOnlyProvider};
use crate::store::{PendingRequest, RequestStore};
use crate::transport::{
    Delegate, Event, NoopDelegate, NoopTracker, Tracker, Transport,
    TransportMode,
};
use crate::types::{AppMetadata, EthereumMethod, EthereumRequest, SdkOptions};
use crate::utils::IdGenerator;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub connected: bool,
    pub chain_id: String,
    pub account: String,
}

pub struct Ethereum {
    transport: Arc<dyn Transport>,
    metadata: AppMetadata,
    delegate: Arc<dyn Delegate>,
    tracker: Arc<dyn Tracker>,
    read_only_provider: Option<Arc<dyn ReadOnlyProvider>>,
    store: Arc<RequestStore>,
    session: Mutex<Session>,
    notify: Mutex<()>,
    ids: IdGenerator,
    connection_id: String,
    batch_connection_id: String,
}

impl Ethereum {
    pub fn new(transport: Arc<dyn Transport>, metadata: AppMetadata) -> Self {
        let ids = IdGenerator::new();
        let connection_id = ids.next_id();
        let batch_connection_id = ids.next_id();
        Self {
            transport,
            metadata,
            delegate: Arc::new(NoopDelegate),
            tracker: Arc::new(NoopTracker),
            read_only_provider: None,
            store: Arc::new(RequestStore::new()),
            session: Mutex::new(Session::default()),
            notify: Mutex::new(()),
            ids,
            connection_id,
            batch_connection_id,
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_read_only_provider(
        mut self,
        provider: Arc<dyn ReadOnlyProvider>,
    ) -> Self {
        self.read_only_provider = Some(provider);
        self
    }

    /// Sets up the HTTP read-only provider when the options enable it.
    pub fn with_sdk_options(self, options: &SdkOptions) -> Self {
        if options.is_read_only_enabled() {
            self.with_read_only_provider(Arc::new(InfuraProvider::new(options)))
        } else {
            self
        }
    }

    fn state(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session(&self) -> Session {
        self.state().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn chain_id(&self) -> String {
        self.state().chain_id.clone()
    }

    pub fn account(&self) -> String {
        self.state().account.clone()
    }

    pub fn metadata(&self) -> &AppMetadata {
        &self.metadata
    }

    /// Id the implicit connect request is registered under.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn batch_connection_id(&self) -> &str {
        &self.batch_connection_id
    }

    pub fn pending_requests(&self) -> usize {
        self.store.len()
    }

    /// Builds a request with a fresh id.
    pub fn new_request(
        &self,
        method: EthereumMethod,
        params: Vec<Value>,
    ) -> EthereumRequest {
        EthereumRequest::with_method(self.ids.next_id(), method, params)
    }

    fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    /// Session writes and their delegate notifications happen under
    /// `notify`, so the last value a delegate saw is the stored one. The
    /// session lock itself is released before the delegate runs, a delegate
    /// may read the session but must not drive the engine.
    fn notifying(&self) -> MutexGuard<'_, ()> {
        self.notify
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_chain_id(&self, chain_id: &str) {
        let _notify = self.notifying();
        self.state().chain_id = chain_id.to_string();
        debug!("chain id is now {chain_id:?}");
        self.delegate.chain_id_changed(chain_id);
    }

    fn update_account(&self, account: &str) {
        let _notify = self.notifying();
        self.state().account = account.to_string();
        debug!("account is now {account:?}");
        self.delegate.account_changed(account);
    }

    fn reset_session(&self) {
        let _notify = self.notifying();
        *self.state() = Session::default();
        self.delegate.chain_id_changed("");
        self.delegate.account_changed("");
    }

    fn track(&self, event: Event) {
        let mode = match self.transport.mode() {
            TransportMode::Persistent => "persistent",
            TransportMode::OneShot => "one-shot",
        };
        let attributes = HashMap::from([
            ("title".to_string(), json!(self.metadata.name)),
            ("url".to_string(), json!(self.metadata.url)),
            ("transport".to_string(), json!(mode)),
            ("platform".to_string(), json!(std::env::consts::OS)),
        ]);
        self.tracker.track(event, attributes);
    }

    /// Opens the channel to the wallet.
    ///
    /// On a persistent transport this asks for the accounts right away and
    /// resolves with the first one. On a one-shot transport nothing is sent,
    /// the returned request resolves with the first frame that identifies
    /// the account.
    pub fn connect(&self) -> PendingRequest {
        if let Err(e) = self.metadata.validate() {
            return PendingRequest::failed(&self.connection_id, e);
        }
        self.track(Event::ConnectionRequest);
        info!("connecting {} to the wallet", self.metadata.name);

        match self.transport.mode() {
            TransportMode::Persistent => {
                self.set_connected(true);
                self.transport.connect(None);

                let request = EthereumRequest::with_method(
                    self.connection_id.clone(),
                    EthereumMethod::EthRequestAccounts,
                    vec![],
                );
                let pending =
                    self.store.register(&request.id, &request.method);
                self.send_request(&request);
                pending
            }
            TransportMode::OneShot => {
                let pending = self.store.register(
                    &self.connection_id,
                    &EthereumMethod::EthRequestAccounts.to_string(),
                );
                self.set_connected(true);
                self.transport.connect(None);
                pending
            }
        }
    }

    /// Connects and asks for a `personal_sign` style signature of `message`.
    pub fn connect_and_sign(&self, message: &str) -> PendingRequest {
        let request = self.new_request(
            EthereumMethod::MetamaskConnectSign,
            vec![json!(message)],
        );
        self.connect_with_request(request)
    }

    /// Connects and sends `request` as the first call.
    pub fn connect_with(&self, request: EthereumRequest) -> PendingRequest {
        let inner = match serde_json::to_value(&request) {
            Ok(inner) => inner,
            Err(e) => return PendingRequest::failed(&request.id, e),
        };
        let request =
            self.new_request(EthereumMethod::MetamaskConnectWith, vec![inner]);
        self.connect_with_request(request)
    }

    fn connect_with_request(&self, request: EthereumRequest) -> PendingRequest {
        if let Err(e) = self.metadata.validate() {
            return PendingRequest::failed(&request.id, e);
        }

        match self.transport.mode() {
            TransportMode::Persistent => {
                // The accounts request is answered through the session state
                drop(self.connect());
                self.request(request)
            }
            TransportMode::OneShot => {
                let message = match request.to_json() {
                    Ok(message) => message,
                    Err(e) => return PendingRequest::failed(&request.id, e),
                };
                self.track(Event::ConnectionRequest);
                let pending =
                    self.store.register(&request.id, &request.method);
                self.set_connected(true);
                self.transport.connect(Some(message));
                pending
            }
        }
    }

    /// Legacy connect for older wallets: accounts and chain id in a single
    /// `metamask_batch` call.
    ///
    /// A well formed answer only updates the session (watch the delegate),
    /// the returned request resolves when the answer is malformed or the
    /// connection is torn down.
    pub fn batch_connect(&self) -> PendingRequest {
        if let Err(e) = self.metadata.validate() {
            return PendingRequest::failed(&self.batch_connection_id, e);
        }

        let parts = [
            self.new_request(EthereumMethod::EthRequestAccounts, vec![]),
            self.new_request(EthereumMethod::EthChainId, vec![]),
        ]
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>();
        let params = match parts {
            Ok(params) => params,
            Err(e) => {
                return PendingRequest::failed(&self.batch_connection_id, e);
            }
        };

        let request = EthereumRequest::with_method(
            self.batch_connection_id.clone(),
            EthereumMethod::MetamaskBatch,
            params,
        );
        self.track(Event::ConnectionRequest);
        let pending = self.store.register(&request.id, &request.method);
        self.set_connected(true);
        self.transport.connect(None);
        self.send_request(&request);
        pending
    }

    /// Sends `request` to the wallet.
    ///
    /// Calling anything but a connect method before [`Ethereum::connect`]
    /// fails right away, except `eth_requestAccounts` which connects first.
    pub fn request(&self, request: EthereumRequest) -> PendingRequest {
        let method = request.method_type();
        let is_connect_method = method.is_some_and(|m| m.is_connect_method());
        let connected = self.is_connected();

        if !connected && !is_connect_method {
            if method == Some(EthereumMethod::EthRequestAccounts) {
                return self.connect();
            }
            warn!("{} called before connect", request.method);
            return PendingRequest::failed(
                &request.id,
                RequestError::connect_error(),
            );
        }

        let pending = self.store.register(&request.id, &request.method);

        if connected {
            self.send_request(&request);
        } else {
            let message = match request.to_json() {
                Ok(message) => message,
                Err(e) => {
                    self.store.fail(&request.id, e);
                    return pending;
                }
            };
            let authorise = self.transport.mode() == TransportMode::Persistent
                && self.needs_authorisation(method);

            self.set_connected(true);
            self.transport.connect(None);

            let transport = Arc::clone(&self.transport);
            self.transport.add_request(Box::new(move || {
                transport.send_message(&message, true);
                if authorise {
                    transport.request_authorisation();
                }
            }));
        }

        pending
    }

    /// Sends several requests as one `metamask_batch` call.
    ///
    /// Results come back in input order. Anything that does not line up with
    /// the input comes back empty.
    pub fn batch_request(
        &self,
        requests: Vec<EthereumRequest>,
    ) -> impl Future<Output = Result<Vec<Value>>> + Send + use<> {
        let expected = requests.len();
        let params = requests
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>();

        let pending = match params {
            Ok(params) if !params.is_empty() => self.request(
                self.new_request(EthereumMethod::MetamaskBatch, params),
            ),
            Ok(_) => PendingRequest::failed(
                "",
                RequestError::from_type(ErrorType::InvalidBatchRequest),
            ),
            Err(e) => PendingRequest::failed("", e),
        };

        async move {
            match pending.await? {
                Value::Array(results) if results.len() == expected => {
                    Ok(results)
                }
                other => {
                    warn!(
                        "batch of {expected} got a mismatched result: {other}"
                    );
                    Ok(vec![])
                }
            }
        }
    }

    fn needs_authorisation(&self, method: Option<EthereumMethod>) -> bool {
        let Some(method) = method else {
            return false;
        };
        let implicit = method == EthereumMethod::EthRequestAccounts
            && !self.account().is_empty();
        method.requires_authorisation() && !implicit
    }

    fn send_request(&self, request: &EthereumRequest) {
        let method = request.method_type();

        if method.is_some_and(|m| m.is_read_only()) {
            if let Some(provider) = &self.read_only_provider {
                self.send_read_only(Arc::clone(provider), request.clone());
                return;
            }
        }

        let message = match request.to_json() {
            Ok(message) => message,
            Err(e) => {
                self.store.fail(&request.id, e);
                return;
            }
        };

        match self.transport.mode() {
            TransportMode::Persistent => {
                self.transport.send_message(&message, true);
                if self.needs_authorisation(method) {
                    self.transport.request_authorisation();
                }
            }
            TransportMode::OneShot => {
                self.transport.send_message(&message, true);
            }
        }
    }

    fn send_read_only(
        &self,
        provider: Arc<dyn ReadOnlyProvider>,
        request: EthereumRequest,
    ) {
        let store = Arc::clone(&self.store);
        let chain_id = self.chain_id();
        let metadata = self.metadata.clone();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            store.fail(
                &request.id,
                "read-only requests need a tokio runtime".into(),
            );
            return;
        };

        runtime.spawn(async move {
            match provider.send_request(&request, &chain_id, &metadata).await {
                Ok(Some(result)) => {
                    store.settle(&request.id, result);
                }
                Ok(None) => {
                    store.fail(
                        &request.id,
                        RequestError::new(
                            ErrorType::ResourceUnavailable,
                            NO_READ_ONLY_RESULT_MESSAGE,
                        )
                        .into(),
                    );
                }
                Err(e) => {
                    store.fail(&request.id, e);
                }
            }
        });
    }

    /// Closes the channel and forgets the session.
    pub fn disconnect(&self) {
        info!("disconnecting from the wallet");
        self.reset_session();
        self.store.drain_all_with_error(|| {
            RequestError::new(ErrorType::Disconnected, DISCONNECTED_MESSAGE)
                .into()
        });
        self.track(Event::Disconnected);
        self.transport.disconnect();
    }

    /// Like [`Ethereum::disconnect`] but the transport also drops whatever
    /// it persisted, the next connect starts from scratch.
    pub fn clear_session(&self) {
        info!("clearing wallet session");
        self.reset_session();
        self.store.drain_all_with_error(|| {
            RequestError::new(ErrorType::Disconnected, DISCONNECTED_MESSAGE)
                .into()
        });
        self.transport.clear_session();
    }

    /// The wallet closed the connection. Everything still pending fails with
    /// the connection rejected error.
    pub fn terminate_connection(&self) {
        if self.is_connected() {
            self.track(Event::ConnectionRejected);
        }
        let failed = self
            .store
            .drain_all_with_error(|| RequestError::connection_rejected().into());
        warn!("connection terminated by wallet, {failed} requests failed");
        self.disconnect();
    }

    /// Entry point for every frame the transport receives.
    pub fn handle_message(&self, message: impl Into<Frame>) {
        let frame = message.into();
        match frame.id() {
            Some(id) => self.receive_response(&frame, &id),
            None => self.receive_event(&frame),
        }
    }

    pub fn handle_raw_message(&self, text: &str) -> Result<()> {
        self.handle_message(Frame::parse(text)?);
        Ok(())
    }

    pub fn receive_response(&self, frame: &Frame, id: &str) {
        let Some(method) = self.store.method(id) else {
            debug!("response for unknown request {id}, dropping");
            return;
        };
        let method_type = method.parse::<EthereumMethod>().ok();

        if let Some(error) = frame.error() {
            if method_type == Some(EthereumMethod::EthRequestAccounts)
                && error.is_user_rejection()
            {
                self.track(Event::ConnectionRejected);
            }
            info!("{method} ({id}) failed: {error}");
            self.store.fail(id, error.into());

            // Some wallets send the session along with the error
            self.apply_scraped(frame);
            return;
        }

        let Some(method_type) = method_type.filter(|m| m.is_result_method())
        else {
            self.store.settle(id, frame.result_or_frame());
            return;
        };

        match method_type {
            EthereumMethod::MetamaskGetProviderState => {
                self.receive_provider_state(frame, id)
            }
            EthereumMethod::EthRequestAccounts => {
                self.receive_accounts(frame, id)
            }
            EthereumMethod::EthChainId => match frame.result() {
                Some(result) => {
                    match result.as_str() {
                        Some(chain_id) => self.update_chain_id(chain_id),
                        None => warn!("non-string chain id {result}"),
                    }
                    self.store.settle(id, result.clone());
                }
                None => self.fail_malformed(frame, id, &method),
            },
            EthereumMethod::MetamaskBatch => self.receive_batch(frame, id),
            m if m.is_signing_method()
                || m == EthereumMethod::EthSendTransaction =>
            {
                match frame.result() {
                    Some(result) => {
                        self.store.settle(id, result.clone());
                    }
                    None => self.fail_malformed(frame, id, &method),
                }
            }
            _ => {
                self.apply_scraped(frame);
                self.store.settle(id, frame.result_or_frame());
            }
        }
    }

    fn receive_provider_state(&self, frame: &Frame, id: &str) {
        let state = frame.result();
        let account = state
            .and_then(|s| s.get("accounts"))
            .and_then(first_str);
        let chain_id = state
            .and_then(|s| s.get("chainId"))
            .and_then(Value::as_str);

        if let Some(chain_id) = chain_id {
            self.update_chain_id(chain_id);
        }
        if let Some(account) = account {
            self.update_account(account);
        }

        let result = account
            .or(chain_id)
            .map(|v| json!(v))
            .or_else(|| state.cloned())
            .unwrap_or(Value::Null);
        self.store.settle(id, result);
    }

    fn receive_accounts(&self, frame: &Frame, id: &str) {
        let account = frame
            .result()
            .and_then(first_str)
            .or_else(|| frame.first_account());

        let Some(account) = account else {
            error!("eth_requestAccounts ({id}) returned no accounts");
            self.store.fail(
                id,
                RequestError::new(ErrorType::Unknown, NO_ACCOUNTS_MESSAGE)
                    .into(),
            );
            return;
        };

        self.track(Event::ConnectionAuthorised);
        self.update_account(account);
        if let Some(chain_id) = frame.chain_id() {
            self.update_chain_id(chain_id);
        }
        self.store.settle(id, json!(account));
    }

    fn receive_batch(&self, frame: &Frame, id: &str) {
        let result = frame.result().cloned().unwrap_or(Value::Null);

        if id == self.batch_connection_id {
            if let Some([accounts, chain_id]) =
                result.as_array().map(Vec::as_slice)
            {
                if let (Some(account), Some(chain_id)) =
                    (first_str(accounts), chain_id.as_str())
                {
                    self.update_account(account);
                    self.update_chain_id(chain_id);
                    return;
                }
            }
            debug!("batch connect answer is not (accounts, chain id)");
        }

        self.store.settle(id, result);
    }

    fn fail_malformed(&self, frame: &Frame, id: &str, method: &str) {
        error!("malformed {method} response: {}", frame.value());
        self.store.fail(
            id,
            RequestError::new(
                ErrorType::InternalJsonRpcError,
                format!("Unexpected {method} response"),
            )
            .into(),
        );
    }

    /// Applies `chainId` and the first of `accounts` found anywhere in the
    /// frame, returns the account if there was one.
    fn apply_scraped<'a>(&self, frame: &'a Frame) -> Option<&'a str> {
        if let Some(chain_id) = frame.chain_id() {
            self.update_chain_id(chain_id);
        }
        let account = frame.first_account();
        if let Some(account) = account {
            self.update_account(account);
        }
        account
    }

    pub fn receive_event(&self, frame: &Frame) {
        if let Some(error) = frame.error() {
            if error.is_user_rejection() {
                self.track(Event::ConnectionRejected);
            }
            info!("wallet reported {error}");
            self.store.fail(&self.connection_id, Error::Request(error));
        }

        match frame.method_type() {
            Some(EthereumMethod::MetamaskAccountsChanged) => {
                let account = frame
                    .params()
                    .and_then(first_str)
                    .or_else(|| frame.first_account());
                match account {
                    Some(account) => self.update_account(account),
                    None => debug!("accountsChanged without accounts"),
                }
            }
            Some(EthereumMethod::MetamaskChainChanged) => {
                let chain_id = frame
                    .params()
                    .and_then(|p| p.get("chainId"))
                    .and_then(Value::as_str);
                match chain_id {
                    Some(chain_id) => self.update_chain_id(chain_id),
                    None => debug!("chainChanged without chain id"),
                }
            }
            Some(other) => debug!("unhandled event {other}"),
            None => {
                // One-shot transports answer the connect out of band
                if let Some(account) = self.apply_scraped(frame) {
                    if self.store.settle(&self.connection_id, json!(account)) {
                        self.track(Event::ConnectionAuthorised);
                    }
                }
            }
        }
    }

    pub fn get_chain_id(&self) -> PendingRequest {
        self.request(self.new_request(EthereumMethod::EthChainId, vec![]))
    }

    pub fn get_eth_accounts(&self) -> PendingRequest {
        self.request(self.new_request(EthereumMethod::EthAccounts, vec![]))
    }

    pub fn get_provider_state(&self) -> PendingRequest {
        self.request(
            self.new_request(EthereumMethod::MetamaskGetProviderState, vec![]),
        )
    }

    pub fn get_eth_balance(&self, address: &str, block: &str) -> PendingRequest {
        self.request(self.new_request(
            EthereumMethod::EthGetBalance,
            vec![json!(address), json!(block)],
        ))
    }

    pub fn get_eth_gas_price(&self) -> PendingRequest {
        self.request(self.new_request(EthereumMethod::EthGasPrice, vec![]))
    }

    pub fn personal_sign(&self, message: &str, address: &str) -> PendingRequest {
        self.request(self.new_request(
            EthereumMethod::PersonalSign,
            vec![json!(message), json!(address)],
        ))
    }

    pub fn send_transaction(&self, transaction: Value) -> PendingRequest {
        self.request(
            self.new_request(EthereumMethod::EthSendTransaction, vec![transaction]),
        )
    }

    pub fn switch_ethereum_chain(&self, chain_id: &str) -> PendingRequest {
        self.request(self.new_request(
            EthereumMethod::SwitchEthereumChain,
            vec![json!({ "chainId": chain_id })],
        ))
    }

    pub fn add_ethereum_chain(
        &self,
        chain_id: &str,
        chain_name: &str,
        rpc_urls: Vec<String>,
    ) -> PendingRequest {
        self.request(self.new_request(
            EthereumMethod::AddEthereumChain,
            vec![json!({
                "chainId": chain_id,
                "chainName": chain_name,
                "rpcUrls": rpc_urls,
            })],
        ))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::transport::testing::{
        Call, RecordingDelegate, RecordingTracker, RecordingTransport,
    };

    struct Harness {
        transport: Arc<RecordingTransport>,
        delegate: Arc<RecordingDelegate>,
        tracker: Arc<RecordingTracker>,
        eth: Ethereum,
    }

    fn harness(mode: TransportMode) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let transport = Arc::new(RecordingTransport::new(mode));
        let delegate = Arc::new(RecordingDelegate::default());
        let tracker = Arc::new(RecordingTracker::default());
        let eth = Ethereum::new(
            transport.clone(),
            AppMetadata::new("Test Dapp", "https://dapp.example"),
        )
        .with_delegate(delegate.clone())
        .with_tracker(tracker.clone());
        Harness {
            transport,
            delegate,
            tracker,
            eth,
        }
    }

    fn connected(mode: TransportMode) -> Harness {
        let h = harness(mode);
        drop(h.eth.connect());
        h
    }

    #[tokio::test]
    async fn test_request_before_connect_fails_without_transport() {
        let h = harness(TransportMode::Persistent);
        let request = h.eth.new_request(EthereumMethod::PersonalSign, vec![]);
        let err = h.eth.request(request).await.unwrap_err();
        assert_eq!(
            err.request_error().map(|e| e.error_type()),
            Some(ErrorType::ConnectError)
        );
        assert!(h.transport.calls().is_empty());
        assert_eq!(h.eth.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_accounts_connects_on_demand() {
        let h = harness(TransportMode::Persistent);
        let request =
            h.eth.new_request(EthereumMethod::EthRequestAccounts, vec![]);
        let pending = h.eth.request(request);

        assert!(h.eth.is_connected());
        assert_eq!(h.transport.calls()[0], Call::Connect(None));
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "eth_requestAccounts");
        assert_eq!(sent[0]["id"], h.eth.connection_id());
        assert!(h.transport.calls().contains(&Call::RequestAuthorisation));

        h.eth.handle_message(json!({
            "id": h.eth.connection_id(),
            "result": ["0xabc", "0xdef"]
        }));
        assert_eq!(pending.await.unwrap(), json!("0xabc"));
        assert_eq!(h.eth.account(), "0xabc");
        assert_eq!(*h.delegate.accounts.lock().unwrap(), vec!["0xabc"]);
        assert!(h.tracker.names().contains(&Event::ConnectionAuthorised));
    }

    #[tokio::test]
    async fn test_chain_id_response() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.request(EthereumRequest::with_method(
            "42",
            EthereumMethod::EthChainId,
            vec![],
        ));

        h.eth.handle_raw_message(r#"{"id": "42", "result": "0x1"}"#).unwrap();

        assert_eq!(pending.await.unwrap(), json!("0x1"));
        assert_eq!(h.eth.chain_id(), "0x1");
        assert_eq!(*h.delegate.chain_ids.lock().unwrap(), vec!["0x1"]);
    }

    #[tokio::test]
    async fn test_numeric_chain_id_response() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.request(EthereumRequest::with_method(
            "43",
            EthereumMethod::EthChainId,
            vec![],
        ));

        h.eth.handle_message(json!({"id": "43", "result": 137}));

        assert_eq!(pending.await.unwrap(), json!(137));
        assert_eq!(h.eth.chain_id(), "");
        assert!(h.delegate.chain_ids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chain_id_response_without_result_fails() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.get_chain_id();
        let id = pending.id().to_string();

        h.eth.handle_message(json!({"id": id}));

        let err = pending.await.unwrap_err();
        assert_eq!(
            err.request_error().map(|e| e.error_type()),
            Some(ErrorType::InternalJsonRpcError)
        );
    }

    #[test]
    fn test_concurrent_updates_leave_delegate_in_sync() {
        let h = connected(TransportMode::Persistent);
        std::thread::scope(|scope| {
            for n in 0..8 {
                let eth = &h.eth;
                scope.spawn(move || {
                    for i in 0..50 {
                        eth.handle_message(json!({
                            "method": "metamask_chainChanged",
                            "params": {"chainId": format!("0x{n}{i}")}
                        }));
                    }
                });
            }
        });
        let last = h.delegate.chain_ids.lock().unwrap().last().cloned();
        assert_eq!(last, Some(h.eth.chain_id()));
    }

    #[tokio::test]
    async fn test_integer_id_is_normalised() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.request(EthereumRequest::with_method(
            "1743510684985756",
            EthereumMethod::PersonalSign,
            vec![json!("0x68656c6c6f"), json!("0xabc")],
        ));
        h.eth.handle_message(json!({
            "id": 1743510684985756u64,
            "result": "0xsignature"
        }));
        assert_eq!(pending.await.unwrap(), json!("0xsignature"));
    }

    #[tokio::test]
    async fn test_chain_changed_event_leaves_requests_alone() {
        let h = connected(TransportMode::Persistent);
        let _pending = h.eth.get_chain_id();
        let before = h.eth.pending_requests();

        h.eth.handle_message(json!({
            "method": "metamask_chainChanged",
            "params": {"chainId": "0x89"}
        }));

        assert_eq!(h.eth.chain_id(), "0x89");
        assert_eq!(h.eth.pending_requests(), before);
    }

    #[test]
    fn test_accounts_changed_event() {
        let h = connected(TransportMode::Persistent);
        h.eth.handle_message(json!({
            "method": "metamask_accountsChanged",
            "params": ["0x123", "0x456"]
        }));
        assert_eq!(h.eth.account(), "0x123");
    }

    #[test]
    fn test_unknown_event_is_scraped() {
        let h = connected(TransportMode::Persistent);
        h.eth.handle_message(json!({
            "data": {"accounts": ["0x999"], "chainId": "0xa"}
        }));
        assert_eq!(h.eth.account(), "0x999");
        assert_eq!(h.eth.chain_id(), "0xa");
    }

    #[tokio::test]
    async fn test_terminate_connection() {
        let h = harness(TransportMode::Persistent);
        let connect = h.eth.connect();
        let sign = h.eth.personal_sign("0x1234", "0xabc");
        h.eth.handle_message(json!({
            "method": "metamask_chainChanged",
            "params": {"chainId": "0x1"}
        }));

        h.eth.terminate_connection();

        for pending in [connect, sign] {
            let err = pending.await.unwrap_err();
            assert_eq!(
                err.request_error(),
                Some(&RequestError::connection_rejected())
            );
        }
        assert_eq!(h.eth.pending_requests(), 0);
        assert_eq!(h.eth.session(), Session::default());
        assert_eq!(h.delegate.chain_ids.lock().unwrap().last().unwrap(), "");
        assert!(h.tracker.names().contains(&Event::ConnectionRejected));
        assert_eq!(h.transport.calls().last(), Some(&Call::Disconnect));
    }

    #[test]
    fn test_terminate_when_not_connected_does_not_track_rejection() {
        let h = harness(TransportMode::Persistent);
        h.eth.terminate_connection();
        assert!(!h.tracker.names().contains(&Event::ConnectionRejected));
    }

    #[tokio::test]
    async fn test_error_with_session_data_settles_once() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.get_chain_id();
        let id = pending.id().to_string();

        h.eth.handle_message(json!({
            "id": id,
            "error": {"code": 4100, "message": "unauthorised"},
            "accounts": ["0xabc"],
            "chainId": "0x5"
        }));
        // Second frame for the same id is dropped
        h.eth.handle_message(json!({"id": id, "result": "0x1"}));

        let err = pending.await.unwrap_err();
        assert_eq!(
            err.request_error().map(|e| e.error_type()),
            Some(ErrorType::UnauthorisedRequest)
        );
        assert_eq!(h.eth.account(), "0xabc");
        assert_eq!(h.eth.chain_id(), "0x5");
    }

    #[tokio::test]
    async fn test_user_rejects_connect() {
        let h = harness(TransportMode::Persistent);
        let pending = h.eth.connect();
        h.eth.handle_message(json!({
            "id": h.eth.connection_id(),
            "error": {"code": 4001, "message": "User rejected the request."}
        }));
        let err = pending.await.unwrap_err();
        assert!(err.request_error().unwrap().is_user_rejection());
        assert!(h.tracker.names().contains(&Event::ConnectionRejected));
    }

    #[tokio::test]
    async fn test_event_error_fails_connection_request() {
        let h = harness(TransportMode::OneShot);
        let pending = h.eth.connect();
        h.eth.handle_message(json!({
            "error": {"code": 4001, "message": "User rejected the request."}
        }));
        let err = pending.await.unwrap_err();
        assert!(err.request_error().unwrap().is_user_rejection());
        assert_eq!(
            h.tracker.names(),
            vec![Event::ConnectionRequest, Event::ConnectionRejected]
        );
    }

    #[tokio::test]
    async fn test_empty_accounts_fails_request() {
        let h = harness(TransportMode::Persistent);
        let pending = h.eth.connect();
        h.eth.handle_message(json!({
            "id": h.eth.connection_id(),
            "result": []
        }));
        assert!(pending.await.is_err());
        assert_eq!(h.eth.account(), "");
    }

    #[tokio::test]
    async fn test_legacy_batch_connect() {
        let h = harness(TransportMode::Persistent);
        let _pending = h.eth.batch_connect();
        let sent = h.transport.sent();
        assert_eq!(sent[0]["method"], "metamask_batch");
        assert_eq!(sent[0]["params"][0]["method"], "eth_requestAccounts");
        assert_eq!(sent[0]["params"][1]["method"], "eth_chainId");

        h.eth.handle_message(json!({
            "id": h.eth.batch_connection_id(),
            "result": [["0xabc"], "0x1"]
        }));
        assert_eq!(h.eth.account(), "0xabc");
        assert_eq!(h.eth.chain_id(), "0x1");
        // The session is the outcome, the request itself stays open
        assert_eq!(h.eth.pending_requests(), 1);
    }

    #[tokio::test]
    async fn test_legacy_batch_connect_malformed_falls_back() {
        let h = harness(TransportMode::Persistent);
        let pending = h.eth.batch_connect();
        h.eth.handle_message(json!({
            "id": h.eth.batch_connection_id(),
            "result": ["0x1"]
        }));
        assert_eq!(pending.await.unwrap(), json!(["0x1"]));
        assert_eq!(h.eth.account(), "");
    }

    #[tokio::test]
    async fn test_batch_request() {
        let h = connected(TransportMode::Persistent);
        let requests = vec![
            h.eth.new_request(EthereumMethod::EthChainId, vec![]),
            h.eth.new_request(EthereumMethod::EthAccounts, vec![]),
        ];
        let batch = h.eth.batch_request(requests);

        let sent = h.transport.sent();
        let frame = sent.last().unwrap();
        assert_eq!(frame["method"], "metamask_batch");
        assert_eq!(frame["params"].as_array().unwrap().len(), 2);

        h.eth.handle_message(json!({
            "id": frame["id"],
            "result": ["0x1", ["0xabc"]]
        }));
        assert_eq!(batch.await.unwrap(), vec![json!("0x1"), json!(["0xabc"])]);
    }

    #[tokio::test]
    async fn test_batch_request_undersized_result_is_empty() {
        let h = connected(TransportMode::Persistent);
        let requests = vec![
            h.eth.new_request(EthereumMethod::EthChainId, vec![]),
            h.eth.new_request(EthereumMethod::EthAccounts, vec![]),
        ];
        let batch = h.eth.batch_request(requests);
        let id = h.transport.sent().last().unwrap()["id"].clone();

        h.eth.handle_message(json!({"id": id, "result": ["0x1"]}));
        assert!(batch.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let h = connected(TransportMode::Persistent);
        let err = h.eth.batch_request(vec![]).await.unwrap_err();
        assert_eq!(
            err.request_error().map(|e| e.error_type()),
            Some(ErrorType::InvalidBatchRequest)
        );
    }

    #[tokio::test]
    async fn test_one_shot_connect_settles_on_first_frame() {
        let h = harness(TransportMode::OneShot);
        let pending = h.eth.connect();
        assert_eq!(h.transport.calls(), vec![Call::Connect(None)]);
        assert!(h.eth.is_connected());

        h.eth.handle_message(json!({
            "data": {"accounts": ["0xabc"], "chainId": "0x1"}
        }));
        assert_eq!(pending.await.unwrap(), json!("0xabc"));
        assert_eq!(h.eth.chain_id(), "0x1");
    }

    #[tokio::test]
    async fn test_connect_and_sign_one_shot() {
        let h = harness(TransportMode::OneShot);
        let pending = h.eth.connect_and_sign("hello");

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 1);
        let Call::Connect(Some(message)) = &calls[0] else {
            panic!("expected connect with payload, got {calls:?}");
        };
        let message: Value = serde_json::from_str(message).unwrap();
        assert_eq!(message["method"], "metamask_connectSign");
        assert_eq!(message["params"], json!(["hello"]));

        h.eth.handle_message(json!({
            "id": message["id"],
            "result": "0xsigned",
            "accounts": ["0xabc"],
            "chainId": "0x1"
        }));
        assert_eq!(pending.await.unwrap(), json!("0xsigned"));
        assert_eq!(h.eth.account(), "0xabc");
    }

    #[tokio::test]
    async fn test_connect_with_persistent() {
        let h = harness(TransportMode::Persistent);
        let inner = h.eth.new_request(
            EthereumMethod::PersonalSign,
            vec![json!("0x68656c6c6f"), json!("0xabc")],
        );
        let pending = h.eth.connect_with(inner);

        let sent = h.transport.sent();
        assert_eq!(sent[0]["method"], "eth_requestAccounts");
        assert_eq!(sent[1]["method"], "metamask_connectWith");
        assert_eq!(sent[1]["params"][0]["method"], "personal_sign");

        h.eth.handle_message(json!({"id": sent[1]["id"], "result": "0xsig"}));
        assert_eq!(pending.await.unwrap(), json!("0xsig"));
    }

    #[test]
    fn test_connect_method_before_connect_is_deferred() {
        let h = harness(TransportMode::Persistent);
        let request = h.eth.new_request(
            EthereumMethod::MetamaskConnectSign,
            vec![json!("hello")],
        );
        let _pending = h.eth.request(request);

        assert_eq!(
            h.transport.calls(),
            vec![Call::Connect(None), Call::AddRequest]
        );
        h.transport.ready();
        assert_eq!(h.transport.sent()[0]["method"], "metamask_connectSign");
        assert_eq!(h.transport.calls().last(), Some(&Call::RequestAuthorisation));
    }

    #[test]
    fn test_known_account_skips_authorisation_prompt() {
        let h = connected(TransportMode::Persistent);
        h.eth.handle_message(json!({
            "method": "metamask_accountsChanged",
            "params": ["0xabc"]
        }));
        let before = h.transport.calls().len();

        let request =
            h.eth.new_request(EthereumMethod::EthRequestAccounts, vec![]);
        drop(h.eth.request(request));
        let calls = h.transport.calls();
        assert_eq!(calls.len(), before + 1);
        assert!(matches!(calls.last(), Some(Call::Send(_))));
    }

    #[test]
    fn test_one_shot_never_prompts() {
        let h = connected(TransportMode::OneShot);
        drop(h.eth.personal_sign("0x1234", "0xabc"));
        assert!(!h.transport.calls().contains(&Call::RequestAuthorisation));
        assert_eq!(h.transport.sent()[0]["method"], "personal_sign");
    }

    #[tokio::test]
    async fn test_invalid_metadata_fails_before_transport() {
        let transport = Arc::new(RecordingTransport::new(TransportMode::Persistent));
        let eth = Ethereum::new(
            transport.clone(),
            AppMetadata::new("Dapp", "dapp.example"),
        );
        let err = eth.connect().await.unwrap_err();
        assert_eq!(
            err.request_error().map(|e| e.error_type()),
            Some(ErrorType::InvalidUrl)
        );

        let eth = Ethereum::new(
            transport.clone(),
            AppMetadata::new("", "https://dapp.example"),
        );
        let err = eth.connect_and_sign("hi").await.unwrap_err();
        assert_eq!(
            err.request_error().map(|e| e.error_type()),
            Some(ErrorType::InvalidTitle)
        );
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provider_state() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.get_provider_state();
        h.eth.handle_message(json!({
            "id": pending.id(),
            "result": {
                "accounts": ["0xabc"],
                "chainId": "0x89",
                "isUnlocked": true
            }
        }));
        assert_eq!(pending.await.unwrap(), json!("0xabc"));
        assert_eq!(h.eth.chain_id(), "0x89");
        assert_eq!(h.eth.account(), "0xabc");
    }

    #[tokio::test]
    async fn test_generic_result() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.switch_ethereum_chain("0x89");
        h.eth.handle_message(json!({"id": pending.id(), "result": null}));
        assert_eq!(pending.await.unwrap(), Value::Null);

        let pending = h.eth.get_eth_accounts();
        let frame = json!({"id": pending.id(), "accounts": ["0xabc"]});
        h.eth.handle_message(frame.clone());
        assert_eq!(pending.await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_malformed_signature_fails() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.personal_sign("0x1234", "0xabc");
        h.eth.handle_message(json!({"id": pending.id(), "result": 12}));
        assert_eq!(pending.await.unwrap(), json!(12));

        let pending = h.eth.personal_sign("0x1234", "0xabc");
        h.eth.handle_message(json!({"id": pending.id()}));
        let err = pending.await.unwrap_err();
        assert_eq!(
            err.request_error().map(|e| e.error_type()),
            Some(ErrorType::InternalJsonRpcError)
        );
    }

    #[test]
    fn test_late_response_is_dropped() {
        let h = connected(TransportMode::Persistent);
        let before = h.transport.calls();
        h.eth.handle_message(json!({"id": "does-not-exist", "result": "0x1"}));
        assert_eq!(h.eth.chain_id(), "");
        assert_eq!(h.transport.calls(), before);
    }

    #[tokio::test]
    async fn test_disconnect_and_clear_session() {
        let h = connected(TransportMode::Persistent);
        let pending = h.eth.get_chain_id();
        h.eth.disconnect();
        assert!(!h.eth.is_connected());
        assert_eq!(
            pending.await.unwrap_err().request_error().map(|e| e.error_type()),
            Some(ErrorType::Disconnected)
        );
        assert_eq!(h.transport.calls().last(), Some(&Call::Disconnect));

        let h = connected(TransportMode::Persistent);
        h.eth.clear_session();
        assert!(!h.eth.is_connected());
        assert_eq!(h.transport.calls().last(), Some(&Call::ClearSession));
    }

    struct FixedProvider(Option<Value>);

    #[async_trait]
    impl ReadOnlyProvider for FixedProvider {
        async fn send_request(
            &self,
            _request: &EthereumRequest,
            chain_id: &str,
            _metadata: &AppMetadata,
        ) -> Result<Option<Value>> {
            assert_eq!(chain_id, "0x1");
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_read_only_bypasses_wallet() {
        let h = connected(TransportMode::Persistent);
        let eth = h
            .eth
            .with_read_only_provider(Arc::new(FixedProvider(Some(json!("0x10")))));
        eth.handle_message(json!({
            "method": "metamask_chainChanged",
            "params": {"chainId": "0x1"}
        }));
        let before = h.transport.calls().len();

        let balance = eth.get_eth_balance("0xabc", "latest").await.unwrap();
        assert_eq!(balance, json!("0x10"));
        assert_eq!(h.transport.calls().len(), before);

        // Wallet-authorised methods still go through the transport
        drop(eth.personal_sign("0x1234", "0xabc"));
        assert_eq!(h.transport.calls().len(), before + 2);
    }

    #[tokio::test]
    async fn test_read_only_without_result_fails() {
        let h = connected(TransportMode::Persistent);
        let eth = h
            .eth
            .with_read_only_provider(Arc::new(FixedProvider(None)));
        eth.handle_message(json!({
            "method": "metamask_chainChanged",
            "params": {"chainId": "0x1"}
        }));
        let err = eth.get_eth_gas_price().await.unwrap_err();
        assert_eq!(
            err.request_error().map(|e| e.error_type()),
            Some(ErrorType::ResourceUnavailable)
        );
    }

    #[test]
    fn test_with_sdk_options() {
        let h = harness(TransportMode::Persistent);
        let eth = h.eth.with_sdk_options(&SdkOptions::default());
        assert!(eth.read_only_provider.is_none());
        let eth = eth.with_sdk_options(&SdkOptions {
            infura_api_key: Some("key".to_string()),
            ..Default::default()
        });
        assert!(eth.read_only_provider.is_some());
    }
}
