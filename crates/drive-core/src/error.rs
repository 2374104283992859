use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("password must not be empty")]
    EmptyPassword,

    #[error("salt must be {expected} bytes long, got {actual}")]
    InvalidSaltLength { expected: usize, actual: usize },

    #[error("iterations must be greater than 0")]
    InvalidIterations,

    #[error("encryption key must be {expected} bytes long, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("AEAD encryption failed")]
    Encrypt,

    /// Wrong key, truncated input and tampered ciphertext all land here.
    #[error("decryption failed (incorrect key or corrupted data)")]
    Authentication,

    #[error("key derivation task failed: {0}")]
    Task(String),

    #[error("cache file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("no escrowed key for {account}")]
    NotFound { account: String },

    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    #[error("access to the secret store was denied: {0}")]
    AccessDenied(String),

    #[error("escrowed key for {account} is malformed")]
    Malformed { account: String },

    #[error("escrowed key for {account} no longer decrypts its data and was removed")]
    Stale { account: String },

    #[error("secret store error: {0}")]
    Backend(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file not found")]
    NotFound,

    #[error("session file could not be decrypted")]
    Decrypt,

    #[error("unsupported session format version {0}")]
    UnsupportedFormat(u32),

    #[error("session payload is malformed: {0}")]
    Malformed(String),

    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<CryptoError> for SessionError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Authentication => SessionError::Decrypt,
            other => SessionError::Crypto(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata store could not be opened (incorrect key or not an encrypted store)")]
    WrongKeyOrCorrupt,

    #[error("file with ID {0} not found")]
    NotFound(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot determine {0} directory")]
    MissingDirectory(&'static str),

    #[error("kdf_iterations {configured} is below the minimum {minimum}")]
    WeakKdf { configured: u32, minimum: u32 },

    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}
