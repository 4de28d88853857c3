use thiserror::Error;

/// Submission failure kinds carried by a transfer's `Errored` state.
///
/// The client-derived kinds mirror the client error taxonomy one to one;
/// the remaining kinds are chain-specific reasons reported by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitErrorKind {
    Unknown,
    ClientBadRequest,
    ClientPermission,
    ClientResource,
    ClientBadResponse,
    ClientUnavailable,
    LostConnectivity,
    // Chain-specific submit reasons.
    AccountUnknown,
    InsufficientBalance,
    InsufficientNetworkFee,
    SignatureInvalid,
    TransactionExpired,
    TransactionDuplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("submit failed: {kind:?}")]
pub struct SubmitError {
    pub kind: SubmitErrorKind,
    pub details: Option<String>,
}

impl SubmitError {
    pub fn new(kind: SubmitErrorKind, details: Option<String>) -> Self {
        SubmitError { kind, details }
    }
}

/// Error categories reported by the remote-indexer client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    BadRequest,
    Permission,
    Resource,
    BadResponse,
    Submission(SubmitErrorKind),
    Unavailable,
    LostConnectivity,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("client error: {kind:?}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub details: Option<String>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, details: Option<String>) -> Self {
        ClientError { kind, details }
    }

    pub fn submission(kind: SubmitErrorKind, details: Option<String>) -> Self {
        ClientError { kind: ClientErrorKind::Submission(kind), details }
    }

    /// Map a client error onto the submit-error kind recorded in a transfer's
    /// `Errored` state.
    pub fn to_submit_error(&self) -> SubmitError {
        let kind = match self.kind {
            ClientErrorKind::BadRequest => SubmitErrorKind::ClientBadRequest,
            ClientErrorKind::Permission => SubmitErrorKind::ClientPermission,
            ClientErrorKind::Resource => SubmitErrorKind::ClientResource,
            ClientErrorKind::BadResponse => SubmitErrorKind::ClientBadResponse,
            ClientErrorKind::Submission(kind) => kind,
            ClientErrorKind::Unavailable => SubmitErrorKind::ClientUnavailable,
            ClientErrorKind::LostConnectivity => SubmitErrorKind::LostConnectivity,
        };
        SubmitError::new(kind, self.details.clone())
    }
}

/// Typed-data (EIP-712) coder errors. Constructors return these; no partially
/// initialized coder is ever observable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("typed data is not a JSON object")]
    MalformedTypedData,

    #[error("typed data is missing the `{0}` member")]
    MissingMember(&'static str),

    #[error("invalid type name `{0}`")]
    InvalidTypeName(String),

    #[error("referenced struct type `{0}` is not declared")]
    UnknownType(String),

    #[error("primary type `{0}` is not declared")]
    MissingPrimaryType(String),

    #[error("invalid message value for field `{0}`")]
    InvalidMessageValue(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt bundle at {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("transaction exceeds the maximum standard size")]
    TransactionTooLarge,

    #[error("transaction could not be fully signed")]
    IncompleteSignature,

    #[error("transaction is not attributable to this wallet")]
    NotAttributable,

    #[error("transfer is missing its serialized payload")]
    MissingSerialization,

    #[error("invalid serialization: {0}")]
    InvalidSerialization(String),

    #[error("account deserialization failed: {0}")]
    InvalidAccount(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Client(#[from] ClientError),
}
