/// Read-only provider
///
/// Methods that do not need the wallet (balances, blocks, gas) can be served
/// by a public node instead of bouncing through the wallet app.
///
use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::constants::{
    INFURA_API_KEY_PLACEHOLDER, INFURA_ENDPOINTS, JSONRPC_VERSION,
    SDK_INFO_HEADER, SDK_VERSION,
};
use crate::error::{ErrorType, RequestError, Result};
use crate::types::{AppMetadata, EthereumRequest, SdkOptions};

#[async_trait]
pub trait ReadOnlyProvider: Send + Sync {
    /// `Ok(None)` when the node answered without a result.
    async fn send_request(
        &self,
        request: &EthereumRequest,
        chain_id: &str,
        metadata: &AppMetadata,
    ) -> Result<Option<Value>>;
}

/// JSON-RPC over HTTPS against Infura or user supplied endpoints.
#[derive(Debug, Clone)]
pub struct InfuraProvider {
    client: Client,
    infura_api_key: Option<String>,
    readonly_rpc_map: HashMap<String, String>,
}

impl InfuraProvider {
    pub fn new(options: &SdkOptions) -> Self {
        Self {
            client: Client::new(),
            infura_api_key: options
                .infura_api_key
                .clone()
                .filter(|k| !k.is_empty()),
            readonly_rpc_map: options
                .readonly_rpc_map
                .iter()
                .map(|(chain, url)| (chain.to_lowercase(), url.clone()))
                .collect(),
        }
    }

    /// Custom endpoints win over Infura ones.
    pub fn endpoint(&self, chain_id: &str) -> Option<String> {
        let chain_id = chain_id.to_lowercase();
        if let Some(url) = self.readonly_rpc_map.get(&chain_id) {
            return Some(url.clone());
        }

        let key = self.infura_api_key.as_ref()?;
        INFURA_ENDPOINTS
            .iter()
            .find(|(chain, _)| *chain == chain_id)
            .map(|(_, url)| url.replace(INFURA_API_KEY_PLACEHOLDER, key))
    }

    fn sdk_info(metadata: &AppMetadata) -> String {
        format!(
            "Sdk/Rust SdkVersion/{SDK_VERSION} Platform/{} dApp/{} dAppTitle/{}",
            std::env::consts::OS,
            metadata.url,
            metadata.name
        )
    }
}

#[async_trait]
impl ReadOnlyProvider for InfuraProvider {
    async fn send_request(
        &self,
        request: &EthereumRequest,
        chain_id: &str,
        metadata: &AppMetadata,
    ) -> Result<Option<Value>> {
        let endpoint = self.endpoint(chain_id).ok_or_else(|| {
            RequestError::new(
                ErrorType::UnrecognizedChainId,
                format!("No read-only RPC endpoint for chain {chain_id:?}"),
            )
        })?;
        let endpoint = Url::parse(&endpoint)?;

        let rpc_request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            method: &request.method,
            params: &request.params,
            id: &request.id,
        };
        debug!("read-only {} via {endpoint}", request.method);

        let response = self
            .client
            .post(endpoint)
            .header(SDK_INFO_HEADER, Self::sdk_info(metadata))
            .json(&rpc_request)
            .send()
            .await?
            .json::<JsonRpcResponse>()
            .await?;

        if let Some(error) = response.error {
            return Err(RequestError::from_value(&error).into());
        }
        Ok(response.result.filter(|r| !r.is_null()))
    }
}

/// A basic JSON-RPC 2.0 request.
#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
    id: &'a str,
}

/// A basic JSON-RPC 2.0 response with either a result or an error.
#[derive(Deserialize, Debug)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}
