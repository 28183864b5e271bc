//! # metamask-sdk-core
//!
//! Client side session and messaging engine for connecting a dApp to a
//! MetaMask wallet.
//!
//! ## Features
//! - Connection engine that correlates out of order wallet responses
//! - Key exchange handshake (SYN / SYNACK / ACK) and encrypted payloads
//! - Read-only calls served by a public node instead of the wallet
//!
//! The physical channel (socket, deep link) is yours: implement
//! [`Transport`] and feed every frame it receives back into
//! [`Ethereum::handle_message`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let ethereum = Ethereum::new(
//!     Arc::new(MySocketTransport::new()),
//!     AppMetadata::new("My Dapp", "https://my-dapp.example"),
//! )
//! .with_delegate(Arc::new(MyDelegate));
//!
//! // Resolves with the selected account once the user approves
//! let account = ethereum.connect().await?;
//!
//! let signature = ethereum
//!     .personal_sign("0x48656c6c6f", account.as_str().unwrap())
//!     .await?;
//! ```
//!
//! ## License
//! MIT OR Apache-2.0

pub mod constants;
pub mod ecies;
pub mod error;
pub mod ethereum;
pub mod frame;
pub mod key_exchange;
pub mod provider;
pub mod store;
pub mod transport;
pub mod types;
pub mod utils;

/// Exposed for easy access
pub use error::{Error, ErrorType, RequestError};
pub(crate) use error::Result;
pub use ethereum::{Ethereum, Session};
pub use frame::Frame;
pub use key_exchange::{KeyExchange, KeyExchangeMessage, KeyExchangeType};
pub use provider::{InfuraProvider, ReadOnlyProvider};
pub use store::PendingRequest;
pub use transport::{Delegate, Event, Tracker, Transport, TransportMode};
pub use types::{AppMetadata, EthereumMethod, EthereumRequest, SdkOptions};
