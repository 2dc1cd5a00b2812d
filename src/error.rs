use ethers::providers::ProviderError;
use ethers::signers::WalletError;
use ethers::types::{Address, U256};

/// An enum of all possible errors that could be encountered during the
/// execution of the Trestle Relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ProviderError),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWallet(#[from] WalletError),
    /// ABI encoding or decoding error.
    #[error(transparent)]
    Abi(#[from] ethers::abi::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// EVM Chain not found.
    #[error("Chain Not Found: {}", chain_id)]
    ChainNotFound {
        /// The chain id of the chain.
        chain_id: String,
    },
    /// Missing Secrets in the config, either private key, ...etc.
    #[error("Missing required private-key in the config")]
    MissingSecrets,
    /// A deposit log that could not be decoded into a message.
    #[error("Invalid deposit log: {}", reason)]
    InvalidDepositLog {
        /// Why the log could not be decoded.
        reason: String,
    },
    /// A deposit routed through a handler contract this relayer does not know.
    #[error("No handler registered for contract {:?}", address)]
    UnknownHandler {
        /// The handler contract address resolved from the bridge.
        address: Address,
    },
    /// The configured gas ceiling cannot produce a valid fee pair.
    #[error(
        "Gas policy violation: maxFee {} < tip {} (ceiling {})",
        max_fee,
        tip,
        max_gas_price
    )]
    GasPolicy {
        /// Computed maximum fee per gas.
        max_fee: U256,
        /// Computed priority fee per gas.
        tip: U256,
        /// The configured ceiling.
        max_gas_price: U256,
    },
    /// A vote transaction reverted on-chain for a reason other than
    /// the proposal being already voted.
    #[error("Vote rejected: {}", reason)]
    VoteRejected {
        /// The revert reason reported by the node.
        reason: String,
    },
    /// A background task failed and force restarted.
    #[error("Task Force Restarted from an error")]
    ForceRestart,
}

/// A type alias for the result for the trestle relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
