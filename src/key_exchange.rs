/// Key Exchange
///
/// Three step handshake that swaps public keys with the wallet before any
/// payload is encrypted.
///
/// ```text
///   initiator                     responder
///       | ---- SYN(pubkey A) -------> |   responder stores A
///       | <--- SYNACK(pubkey B) ----- |
///   stores B, keys exchanged          |
///       | ---- ACK(pubkey A) -------> |   keys exchanged
/// ```
///
/// An instance generates its keypair once, a new connection needs a new
/// instance.
///
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ecies::{Ecies, X25519Ecies};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyExchangeType {
    #[serde(rename = "key_handshake_start")]
    Start,
    #[serde(rename = "key_handshake_SYN")]
    Syn,
    #[serde(rename = "key_handshake_SYNACK")]
    Synack,
    #[serde(rename = "key_handshake_ACK")]
    Ack,
    /// Any type this side does not know about.
    #[serde(other)]
    Unknown,
}

impl KeyExchangeType {
    fn phase(self) -> Option<KeyExchangePhase> {
        match self {
            KeyExchangeType::Start => Some(KeyExchangePhase::Start),
            KeyExchangeType::Syn => Some(KeyExchangePhase::Syn),
            KeyExchangeType::Synack => Some(KeyExchangePhase::Synack),
            KeyExchangeType::Ack => Some(KeyExchangePhase::Ack),
            KeyExchangeType::Unknown => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyExchangePhase {
    #[default]
    None,
    Start,
    Syn,
    Synack,
    Ack,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyExchangeMessage {
    #[serde(rename = "type")]
    pub kind: KeyExchangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
}

pub struct KeyExchange<E: Ecies = X25519Ecies> {
    ecies: E,
    private_key: String,
    public_key: String,
    peer_public_key: Option<String>,
    phase: KeyExchangePhase,
    keys_exchanged: bool,
}

impl KeyExchange<X25519Ecies> {
    pub fn new() -> Result<Self> {
        Self::with_ecies(X25519Ecies)
    }
}

impl<E: Ecies> KeyExchange<E> {
    pub fn with_ecies(ecies: E) -> Result<Self> {
        let private_key = ecies.generate_private_key();
        let public_key = ecies.public_key(&private_key)?;
        Ok(Self {
            ecies,
            private_key,
            public_key,
            peer_public_key: None,
            phase: KeyExchangePhase::None,
            keys_exchanged: false,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn peer_public_key(&self) -> Option<&str> {
        self.peer_public_key.as_deref()
    }

    pub fn set_peer_public_key(&mut self, public_key: impl Into<String>) {
        self.peer_public_key = Some(public_key.into());
    }

    pub fn phase(&self) -> KeyExchangePhase {
        self.phase
    }

    pub fn keys_exchanged(&self) -> bool {
        self.keys_exchanged
    }

    /// A standalone handshake message carrying our public key. The phase
    /// moves to the step being sent.
    pub fn message(&mut self, kind: KeyExchangeType) -> KeyExchangeMessage {
        if let Some(phase) = kind.phase() {
            self.phase = phase;
        }
        KeyExchangeMessage {
            kind,
            pubkey: Some(self.public_key.clone()),
        }
    }

    /// Advances the handshake on `incoming` and returns the reply to send,
    /// if any.
    pub fn next_message(
        &mut self,
        incoming: &KeyExchangeMessage,
    ) -> Option<KeyExchangeMessage> {
        debug!("key exchange: received {:?}", incoming.kind);

        match incoming.kind {
            KeyExchangeType::Syn => {
                let Some(pubkey) = &incoming.pubkey else {
                    warn!("key exchange: SYN without public key");
                    return None;
                };
                self.peer_public_key = Some(pubkey.clone());
                Some(self.message(KeyExchangeType::Synack))
            }
            KeyExchangeType::Synack => {
                let Some(pubkey) = &incoming.pubkey else {
                    warn!("key exchange: SYNACK without public key");
                    return None;
                };
                self.peer_public_key = Some(pubkey.clone());
                self.keys_exchanged = true;
                Some(self.message(KeyExchangeType::Ack))
            }
            KeyExchangeType::Ack => {
                self.keys_exchanged = true;
                self.phase = KeyExchangePhase::Ack;
                None
            }
            other => {
                debug!("key exchange: ignoring {other:?}");
                None
            }
        }
    }

    pub fn encrypt(&self, message: &str) -> Result<String> {
        let peer = self
            .peer_public_key
            .as_deref()
            .ok_or(Error::KeysNotExchanged)?;
        self.ecies.encrypt(message, peer)
    }

    /// The peer key is not needed to open a message, it is still required so
    /// that both directions share the same precondition.
    pub fn decrypt(&self, message: &str) -> Result<String> {
        if self.peer_public_key.is_none() {
            return Err(Error::KeysNotExchanged);
        }
        self.ecies.decrypt(message, &self.private_key)
    }

    pub fn encrypt_message<T: Serialize>(&self, message: &T) -> Result<String> {
        if self.peer_public_key.is_none() {
            return Err(Error::KeysNotExchanged);
        }
        let json = serde_json::to_string(message)?;
        self.encrypt(&json)
    }

    pub fn decrypt_message<T: DeserializeOwned>(
        &self,
        message: &str,
    ) -> Result<T> {
        let json = self.decrypt(message)?;
        Ok(serde_json::from_str(&json)?)
    }
}
