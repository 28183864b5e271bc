pub const JSONRPC_VERSION: &str = "2.0";

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SDK_INFO_HEADER: &str = "Metamask-Sdk-Info";

pub const CONNECTION_REJECTED_MESSAGE: &str =
    "The connection request was rejected";
pub const NOT_CONNECTED_MESSAGE: &str =
    "Not connected. Please call connect() first";
pub const DISCONNECTED_MESSAGE: &str = "The wallet connection was closed";
pub const NO_ACCOUNTS_MESSAGE: &str = "No accounts were returned";
pub const NO_READ_ONLY_RESULT_MESSAGE: &str =
    "Read-only RPC provider returned no result";

// Envelope layout used by the ECIES capability
pub const KEY_LENGTH: usize = 32;
pub const IV_LENGTH: usize = 12;

pub const INFURA_API_KEY_PLACEHOLDER: &str = "{infura_api_key}";

/// Chain id to Infura endpoint, `{infura_api_key}` is replaced on lookup.
pub const INFURA_ENDPOINTS: &[(&str, &str)] = &[
    ("0x1", "https://mainnet.infura.io/v3/{infura_api_key}"),
    ("0xaa36a7", "https://sepolia.infura.io/v3/{infura_api_key}"),
    ("0xe708", "https://linea-mainnet.infura.io/v3/{infura_api_key}"),
    ("0xe705", "https://linea-sepolia.infura.io/v3/{infura_api_key}"),
    ("0x89", "https://polygon-mainnet.infura.io/v3/{infura_api_key}"),
    ("0x13882", "https://polygon-amoy.infura.io/v3/{infura_api_key}"),
    ("0xa", "https://optimism-mainnet.infura.io/v3/{infura_api_key}"),
    ("0xaa37dc", "https://optimism-sepolia.infura.io/v3/{infura_api_key}"),
    ("0xa4b1", "https://arbitrum-mainnet.infura.io/v3/{infura_api_key}"),
    ("0x66eee", "https://arbitrum-sepolia.infura.io/v3/{infura_api_key}"),
    ("0xa86a", "https://avalanche-mainnet.infura.io/v3/{infura_api_key}"),
    ("0xa869", "https://avalanche-fuji.infura.io/v3/{infura_api_key}"),
    ("0x2105", "https://base-mainnet.infura.io/v3/{infura_api_key}"),
    ("0x14a34", "https://base-sepolia.infura.io/v3/{infura_api_key}"),
    ("0x38", "https://bsc-mainnet.infura.io/v3/{infura_api_key}"),
    ("0xa4ec", "https://celo-mainnet.infura.io/v3/{infura_api_key}"),
    ("0x144", "https://zksync-mainnet.infura.io/v3/{infura_api_key}"),
];
