/// Types
///
/// Requests sent to the wallet, the catalogue of well known methods with the
/// classification the engine dispatches on, and the app side configuration.
///
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ErrorType, RequestError};
use crate::utils::is_valid_url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EthereumMethod {
    #[serde(rename = "eth_sign")]
    EthSign,
    #[serde(rename = "web3_sha3")]
    Web3Sha,
    #[serde(rename = "eth_call")]
    EthCall,
    #[serde(rename = "eth_chainId")]
    EthChainId,
    #[serde(rename = "eth_getCode")]
    EthGetCode,
    #[serde(rename = "eth_accounts")]
    EthAccounts,
    #[serde(rename = "eth_gasPrice")]
    EthGasPrice,
    #[serde(rename = "personal_sign")]
    PersonalSign,
    #[serde(rename = "personal_ecRecover")]
    PersonalEcRecover,
    #[serde(rename = "eth_getBalance")]
    EthGetBalance,
    #[serde(rename = "wallet_watchAsset")]
    WatchAsset,
    #[serde(rename = "eth_blockNumber")]
    EthBlockNumber,
    #[serde(rename = "eth_estimateGas")]
    EthEstimateGas,
    #[serde(rename = "eth_getStorageAt")]
    EthGetStorageAt,
    #[serde(rename = "eth_getLogs")]
    EthGetLogs,
    #[serde(rename = "eth_getBlockByHash")]
    EthGetBlockByHash,
    #[serde(rename = "eth_getBlockByNumber")]
    EthGetBlockByNumber,
    #[serde(rename = "eth_getTransactionByHash")]
    EthGetTransactionByHash,
    #[serde(rename = "eth_getTransactionCount")]
    EthGetTransactionCount,
    #[serde(rename = "eth_getTransactionReceipt")]
    EthGetTransactionReceipt,
    #[serde(rename = "eth_sendRawTransaction")]
    EthSendRawTransaction,
    #[serde(rename = "eth_signTransaction")]
    EthSignTransaction,
    #[serde(rename = "eth_sendTransaction")]
    EthSendTransaction,
    #[serde(rename = "eth_signTypedData")]
    EthSignTypedData,
    #[serde(rename = "eth_signTypedData_v3")]
    EthSignTypedDataV3,
    #[serde(rename = "eth_signTypedData_v4")]
    EthSignTypedDataV4,
    #[serde(rename = "eth_requestAccounts")]
    EthRequestAccounts,
    #[serde(rename = "net_version")]
    NetVersion,
    #[serde(rename = "web3_clientVersion")]
    Web3ClientVersion,
    #[serde(rename = "wallet_addEthereumChain")]
    AddEthereumChain,
    #[serde(rename = "wallet_switchEthereumChain")]
    SwitchEthereumChain,
    #[serde(rename = "wallet_requestPermissions")]
    WalletRequestPermissions,
    #[serde(rename = "wallet_getPermissions")]
    WalletGetPermissions,
    #[serde(rename = "metamask_batch")]
    MetamaskBatch,
    #[serde(rename = "metamask_connectSign")]
    MetamaskConnectSign,
    #[serde(rename = "metamask_connectWith")]
    MetamaskConnectWith,
    #[serde(rename = "metamask_getProviderState")]
    MetamaskGetProviderState,
    #[serde(rename = "metamask_chainChanged")]
    MetamaskChainChanged,
    #[serde(rename = "metamask_accountsChanged")]
    MetamaskAccountsChanged,
}

impl EthereumMethod {
    /// Methods the wallet only answers after the user approves them.
    pub fn requires_authorisation(&self) -> bool {
        matches!(
            self,
            EthereumMethod::EthSign
                | EthereumMethod::PersonalSign
                | EthereumMethod::WatchAsset
                | EthereumMethod::EthSignTransaction
                | EthereumMethod::EthSendTransaction
                | EthereumMethod::EthSignTypedData
                | EthereumMethod::EthSignTypedDataV3
                | EthereumMethod::EthSignTypedDataV4
                | EthereumMethod::EthRequestAccounts
                | EthereumMethod::AddEthereumChain
                | EthereumMethod::SwitchEthereumChain
                | EthereumMethod::WalletRequestPermissions
                | EthereumMethod::MetamaskBatch
                | EthereumMethod::MetamaskConnectSign
                | EthereumMethod::MetamaskConnectWith
        )
    }

    /// Methods whose response payload gets interpreted per method instead of
    /// the generic `result` extraction.
    pub fn is_result_method(&self) -> bool {
        matches!(
            self,
            EthereumMethod::EthSign
                | EthereumMethod::EthChainId
                | EthereumMethod::PersonalSign
                | EthereumMethod::EthSignTransaction
                | EthereumMethod::EthSendTransaction
                | EthereumMethod::EthSignTypedData
                | EthereumMethod::EthSignTypedDataV3
                | EthereumMethod::EthSignTypedDataV4
                | EthereumMethod::EthRequestAccounts
                | EthereumMethod::MetamaskBatch
                | EthereumMethod::MetamaskConnectSign
                | EthereumMethod::MetamaskConnectWith
                | EthereumMethod::MetamaskGetProviderState
        )
    }

    pub fn is_connect_method(&self) -> bool {
        matches!(
            self,
            EthereumMethod::MetamaskConnectSign
                | EthereumMethod::MetamaskConnectWith
        )
    }

    pub fn is_signing_method(&self) -> bool {
        matches!(
            self,
            EthereumMethod::EthSign
                | EthereumMethod::PersonalSign
                | EthereumMethod::EthSignTransaction
                | EthereumMethod::EthSignTypedData
                | EthereumMethod::EthSignTypedDataV3
                | EthereumMethod::EthSignTypedDataV4
        )
    }

    /// Safe to serve from a public node without involving the wallet.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            EthereumMethod::Web3Sha
                | EthereumMethod::EthCall
                | EthereumMethod::EthGetCode
                | EthereumMethod::EthGasPrice
                | EthereumMethod::EthGetBalance
                | EthereumMethod::EthBlockNumber
                | EthereumMethod::EthEstimateGas
                | EthereumMethod::EthGetStorageAt
                | EthereumMethod::EthGetLogs
                | EthereumMethod::EthGetBlockByHash
                | EthereumMethod::EthGetBlockByNumber
                | EthereumMethod::EthGetTransactionByHash
                | EthereumMethod::EthGetTransactionCount
                | EthereumMethod::EthGetTransactionReceipt
                | EthereumMethod::NetVersion
                | EthereumMethod::Web3ClientVersion
        )
    }
}

impl Display for EthereumMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Unit variants with a rename always serialize to a plain string
        let name = serde_plain::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{name}")
    }
}

impl FromStr for EthereumMethod {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_plain::from_str(s).map_err(|e| {
            crate::Error::InternalError(format!("unknown method {s}: {e}"))
        })
    }
}

/// A JSON-RPC style request addressed to the wallet.
///
/// `method` stays a plain string so that methods the SDK does not know about
/// still round trip, use [`EthereumRequest::method_type`] to classify it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EthereumRequest {
    pub id: String,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Array(vec![])
}

impl EthereumRequest {
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: Value::Array(params),
        }
    }

    pub fn with_method(
        id: impl Into<String>,
        method: EthereumMethod,
        params: Vec<Value>,
    ) -> Self {
        Self::new(id, method.to_string(), params)
    }

    pub fn method_type(&self) -> Option<EthereumMethod> {
        self.method.parse().ok()
    }

    /// The JSON text handed to the transport.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&json!({
            "jsonrpc": crate::constants::JSONRPC_VERSION,
            "id": self.id,
            "method": self.method,
            "params": self.params,
        }))?)
    }
}

/// Identity of the dApp shown to the user by the wallet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub url: String,
    #[serde(rename = "iconUrl", skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(rename = "base64Icon", skip_serializing_if = "Option::is_none")]
    pub base64_icon: Option<String>,
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl AppMetadata {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Checked before any transport interaction.
    pub fn validate(&self) -> Result<(), RequestError> {
        if !is_valid_url(&self.url) {
            return Err(RequestError::from_type(ErrorType::InvalidUrl));
        }
        if self.name.trim().is_empty() {
            return Err(RequestError::from_type(ErrorType::InvalidTitle));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkOptions {
    #[serde(rename = "infuraAPIKey", default)]
    pub infura_api_key: Option<String>,
    /// Chain id (hex) to RPC url, takes precedence over Infura endpoints.
    #[serde(rename = "readonlyRPCMap", default)]
    pub readonly_rpc_map: HashMap<String, String>,
}

impl SdkOptions {
    pub fn is_read_only_enabled(&self) -> bool {
        self.infura_api_key.as_ref().is_some_and(|k| !k.is_empty())
            || !self.readonly_rpc_map.is_empty()
    }
}
