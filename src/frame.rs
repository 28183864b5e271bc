/// Frame
///
/// Wallets of different versions disagree on the exact shape of what they
/// send, so inbound frames stay a loose JSON document and every accessor
/// returns `None` instead of failing when a field is missing.
///
use serde_json::Value;

use crate::error::RequestError;
use crate::types::EthereumMethod;
use crate::utils::find_key;

#[derive(Clone, Debug, PartialEq)]
pub struct Frame(Value);

impl From<Value> for Frame {
    fn from(value: Value) -> Self {
        Frame(value)
    }
}

impl Frame {
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(Frame(serde_json::from_str(text)?))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Integer and string ids are both accepted, normalised to a string.
    pub fn id(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.get("method").and_then(Value::as_str)
    }

    pub fn method_type(&self) -> Option<EthereumMethod> {
        self.method().and_then(|m| m.parse().ok())
    }

    pub fn params(&self) -> Option<&Value> {
        self.get("params")
    }

    pub fn result(&self) -> Option<&Value> {
        self.get("result")
    }

    pub fn error(&self) -> Option<RequestError> {
        self.get("error").map(RequestError::from_value)
    }

    /// `result` as sent, `null` included, or the whole frame without one.
    pub fn result_or_frame(&self) -> Value {
        self.0.get("result").unwrap_or(&self.0).clone()
    }

    pub fn result_str(&self) -> Option<&str> {
        self.result().and_then(Value::as_str)
    }

    /// `chainId` anywhere in the frame.
    pub fn chain_id(&self) -> Option<&str> {
        find_key(&self.0, "chainId").and_then(Value::as_str)
    }

    /// First entry of `accounts` anywhere in the frame.
    pub fn first_account(&self) -> Option<&str> {
        find_key(&self.0, "accounts")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
    }
}

pub fn first_str(value: &Value) -> Option<&str> {
    value.as_array()?.first()?.as_str()
}
