/// ECIES
///
/// The key exchange only needs four operations from the crypto layer, kept
/// behind [`Ecies`] so a platform can bring its own implementation. The
/// default one does x25519 key agreement with an ephemeral sender key,
/// HKDF-SHA256 key derivation and ChaCha20-Poly1305 sealing.
///
use alloy::hex;
use alloy::signers::k256::sha2::Sha256;
use base64ct::{Base64, Encoding};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{IV_LENGTH, KEY_LENGTH};
use crate::error::{Error, Result};
use crate::utils::random_bytes32;

/// Keys travel as hex strings.
pub trait Ecies: Send + Sync {
    fn generate_private_key(&self) -> String;

    fn public_key(&self, private_key: &str) -> Result<String>;

    fn encrypt(&self, message: &str, public_key: &str) -> Result<String>;

    fn decrypt(&self, message: &str, private_key: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Ecies;

impl Ecies for X25519Ecies {
    fn generate_private_key(&self) -> String {
        hex::encode(random_bytes32())
    }

    fn public_key(&self, private_key: &str) -> Result<String> {
        let secret = StaticSecret::from(decode_key(private_key)?);
        Ok(hex::encode(PublicKey::from(&secret).to_bytes()))
    }

    fn encrypt(&self, message: &str, public_key: &str) -> Result<String> {
        let receiver = PublicKey::from(decode_key(public_key)?);

        let ephemeral = StaticSecret::from(random_bytes32());
        let sender = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&receiver);

        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);

        let cipher = ChaCha20Poly1305::new(&derive_key(shared.as_bytes())?);
        let sealed =
            cipher.encrypt(Nonce::from_slice(&iv), message.as_bytes())?;

        Ok(Envelope {
            sender_public_key: sender.to_bytes(),
            iv,
            sealed,
        }
        .serialize())
    }

    fn decrypt(&self, message: &str, private_key: &str) -> Result<String> {
        let envelope = Envelope::deserialize(message)?;
        let secret = StaticSecret::from(decode_key(private_key)?);
        let shared =
            secret.diffie_hellman(&PublicKey::from(envelope.sender_public_key));

        let cipher = ChaCha20Poly1305::new(&derive_key(shared.as_bytes())?);
        let opened = cipher
            .decrypt(Nonce::from_slice(&envelope.iv), envelope.sealed.as_slice())?;
        Ok(String::from_utf8(opened)?)
    }
}

fn decode_key(key: &str) -> Result<[u8; KEY_LENGTH]> {
    Ok(hex::decode_to_array::<&str, KEY_LENGTH>(key)?)
}

fn derive_key(shared: &[u8; 32]) -> Result<Key> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut okm = [0u8; KEY_LENGTH];
    hk.expand(&[], &mut okm)
        .map_err(|_| Error::from("hkdf expand failed"))?;
    Ok(*Key::from_slice(&okm))
}

/// sender public key | iv | sealed, base64 encoded
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender_public_key: [u8; KEY_LENGTH],
    pub iv: [u8; IV_LENGTH],
    pub sealed: Vec<u8>,
}

impl Envelope {
    pub fn serialize(&self) -> String {
        let mut bytes = Vec::with_capacity(
            KEY_LENGTH + IV_LENGTH + self.sealed.len(),
        );
        bytes.extend_from_slice(&self.sender_public_key);
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.sealed);
        Base64::encode_string(&bytes)
    }

    pub fn deserialize(encoded: &str) -> Result<Self> {
        let bytes = Base64::decode_vec(encoded)?;
        if bytes.len() <= KEY_LENGTH + IV_LENGTH {
            return Err(Error::InvalidEnvelope("too short"));
        }

        let (key, rest) = bytes.split_at(KEY_LENGTH);
        let (iv, sealed) = rest.split_at(IV_LENGTH);

        let mut sender_public_key = [0u8; KEY_LENGTH];
        sender_public_key.copy_from_slice(key);
        let mut nonce = [0u8; IV_LENGTH];
        nonce.copy_from_slice(iv);

        Ok(Envelope {
            sender_public_key,
            iv: nonce,
            sealed: sealed.to_vec(),
        })
    }
}
