use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    KeysNotExchanged,
    InvalidEnvelope(&'static str),
    Request(RequestError),
    Cancelled,
    Reqwest(reqwest::Error),
    InternalError(String),
    SerdeJsonError(serde_json::Error),
    FromHexError(alloy::hex::FromHexError),
    CryptoError(chacha20poly1305::Error),
    Base64Error(base64ct::Error),
    FromUtf8Error(std::string::FromUtf8Error),
    UrlError(url::ParseError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeysNotExchanged => write!(f, "keys not exchanged"),
            Error::InvalidEnvelope(reason) => {
                write!(f, "invalid envelope: {reason}")
            }
            Error::Request(e) => write!(f, "{e}"),
            Error::Cancelled => write!(f, "request dropped before settlement"),
            Error::Reqwest(e) => write!(f, "{e}"),
            Error::InternalError(e) => write!(f, "{e}"),
            Error::SerdeJsonError(e) => write!(f, "encoding error: {e}"),
            Error::FromHexError(e) => write!(f, "{e}"),
            Error::CryptoError(e) => write!(f, "crypto error: {e}"),
            Error::Base64Error(e) => write!(f, "{e}"),
            Error::FromUtf8Error(e) => write!(f, "{e}"),
            Error::UrlError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// The wallet-facing classification, if this error came from a request.
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            Error::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::InternalError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::InternalError(e)
    }
}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Self {
        Error::Request(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Reqwest(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerdeJsonError(e)
    }
}

impl From<alloy::hex::FromHexError> for Error {
    fn from(e: alloy::hex::FromHexError) -> Self {
        Error::FromHexError(e)
    }
}

impl From<chacha20poly1305::Error> for Error {
    fn from(e: chacha20poly1305::Error) -> Self {
        Error::CryptoError(e)
    }
}

impl From<base64ct::Error> for Error {
    fn from(e: base64ct::Error) -> Self {
        Error::Base64Error(e)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::FromUtf8Error(e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::UrlError(e)
    }
}

/// Classification of wallet and SDK error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    UserRejectedRequest,
    UnauthorisedRequest,
    UnsupportedMethod,
    Disconnected,
    ChainDisconnected,
    UnrecognizedChainId,
    InvalidMethodParameters,
    InternalJsonRpcError,
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidInput,
    ResourceNotFound,
    ResourceUnavailable,
    TransactionRejected,
    MethodNotSupported,
    LimitExceeded,
    JsonRpcVersionNotSupported,
    ConnectError,
    InvalidUrl,
    InvalidTitle,
    InvalidBatchRequest,
    RestrictedMethod,
    Unknown,
}

impl ErrorType {
    pub fn code(&self) -> i64 {
        match self {
            ErrorType::UserRejectedRequest => 4001,
            ErrorType::UnauthorisedRequest => 4100,
            ErrorType::UnsupportedMethod => 4200,
            ErrorType::Disconnected => 4900,
            ErrorType::ChainDisconnected => 4901,
            ErrorType::UnrecognizedChainId => 4902,
            ErrorType::InvalidMethodParameters => -32602,
            ErrorType::InternalJsonRpcError => -32603,
            ErrorType::ParseError => -32700,
            ErrorType::InvalidRequest => -32600,
            ErrorType::MethodNotFound => -32601,
            ErrorType::InvalidInput => -32000,
            ErrorType::ResourceNotFound => -32001,
            ErrorType::ResourceUnavailable => -32002,
            ErrorType::TransactionRejected => -32003,
            ErrorType::MethodNotSupported => -32004,
            ErrorType::LimitExceeded => -32005,
            ErrorType::JsonRpcVersionNotSupported => -32006,
            ErrorType::ConnectError => -101,
            ErrorType::InvalidUrl => -102,
            ErrorType::InvalidTitle => -103,
            ErrorType::InvalidBatchRequest => -104,
            ErrorType::RestrictedMethod => -105,
            ErrorType::Unknown => -1,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            4001 => ErrorType::UserRejectedRequest,
            4100 => ErrorType::UnauthorisedRequest,
            4200 => ErrorType::UnsupportedMethod,
            4900 => ErrorType::Disconnected,
            4901 => ErrorType::ChainDisconnected,
            4902 => ErrorType::UnrecognizedChainId,
            -32602 => ErrorType::InvalidMethodParameters,
            -32603 => ErrorType::InternalJsonRpcError,
            -32700 => ErrorType::ParseError,
            -32600 => ErrorType::InvalidRequest,
            -32601 => ErrorType::MethodNotFound,
            -32000 => ErrorType::InvalidInput,
            -32001 => ErrorType::ResourceNotFound,
            -32002 => ErrorType::ResourceUnavailable,
            -32003 => ErrorType::TransactionRejected,
            -32004 => ErrorType::MethodNotSupported,
            -32005 => ErrorType::LimitExceeded,
            -32006 => ErrorType::JsonRpcVersionNotSupported,
            -101 => ErrorType::ConnectError,
            -102 => ErrorType::InvalidUrl,
            -103 => ErrorType::InvalidTitle,
            -104 => ErrorType::InvalidBatchRequest,
            -105 => ErrorType::RestrictedMethod,
            _ => ErrorType::Unknown,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorType::UserRejectedRequest => "User rejected the request",
            ErrorType::UnauthorisedRequest => {
                "User rejected the request or chain is not authorised"
            }
            ErrorType::UnsupportedMethod => {
                "The requested method is not supported by the wallet"
            }
            ErrorType::Disconnected => "The wallet is disconnected",
            ErrorType::ChainDisconnected => {
                "The wallet is not connected to the requested chain"
            }
            ErrorType::UnrecognizedChainId => "Unrecognized chain id",
            ErrorType::InvalidMethodParameters => "Invalid method parameters",
            ErrorType::InternalJsonRpcError => "Internal JSON-RPC error",
            ErrorType::ParseError => "Invalid JSON",
            ErrorType::InvalidRequest => "Invalid request",
            ErrorType::MethodNotFound => "Method not found",
            ErrorType::InvalidInput => "Invalid input",
            ErrorType::ResourceNotFound => "Resource not found",
            ErrorType::ResourceUnavailable => "Resource unavailable",
            ErrorType::TransactionRejected => "Transaction rejected",
            ErrorType::MethodNotSupported => "Method not supported",
            ErrorType::LimitExceeded => "Request limit exceeded",
            ErrorType::JsonRpcVersionNotSupported => {
                "JSON-RPC version not supported"
            }
            ErrorType::ConnectError => crate::constants::NOT_CONNECTED_MESSAGE,
            ErrorType::InvalidUrl => "Please use a valid app url",
            ErrorType::InvalidTitle => "Please add a valid app title",
            ErrorType::InvalidBatchRequest => "Invalid batch request",
            ErrorType::RestrictedMethod => "This method is restricted",
            ErrorType::Unknown => "Something went wrong",
        }
    }
}

/// Error reported by the wallet or raised by request validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestError {
    pub code: i64,
    pub message: String,
}

impl RequestError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            code: error_type.code(),
            message: message.into(),
        }
    }

    pub fn from_type(error_type: ErrorType) -> Self {
        Self::new(error_type, error_type.default_message())
    }

    /// Builds an error out of whatever the wallet put in an `error` field.
    ///
    /// Codes may arrive as numbers or numeric strings, a bare string payload
    /// is taken as the message.
    pub fn from_value(value: &Value) -> Self {
        if let Some(message) = value.as_str() {
            return Self::new(ErrorType::Unknown, message);
        }

        let code = match value.get("code") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .unwrap_or(ErrorType::Unknown.code());
        let error_type = ErrorType::from_code(code);

        let message = value
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(error_type.default_message());

        Self {
            code,
            message: message.to_string(),
        }
    }

    pub fn error_type(&self) -> ErrorType {
        ErrorType::from_code(self.code)
    }

    pub fn is_user_rejection(&self) -> bool {
        self.error_type() == ErrorType::UserRejectedRequest
    }

    pub fn connect_error() -> Self {
        Self::from_type(ErrorType::ConnectError)
    }

    pub fn connection_rejected() -> Self {
        Self::new(
            ErrorType::UserRejectedRequest,
            crate::constants::CONNECTION_REJECTED_MESSAGE,
        )
    }
}

impl Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}
