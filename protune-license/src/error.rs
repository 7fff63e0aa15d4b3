use crate::session::SessionState;
use thiserror::Error;

/// The errors that may occur during a license exchange.
#[derive(Debug, Error)]
pub enum Error {
    /// Initialization data is neither a `pssh` box nor raw protection system data.
    #[error("invalid init data: {0}")]
    InitData(String),

    /// The device identity has no private key to sign requests or unwrap session keys.
    #[error("device identity has no private key")]
    NoPrivateKey,

    #[error("invalid device identity: {0}")]
    DeviceIdentity(String),

    /// The license response could not be decoded.
    #[error("cannot parse license response: {0}")]
    LicenseParse(String),

    /// Only returned when the session verifies license signatures strictly.
    #[error("license signature does not match the derived authentication key")]
    SignatureMismatch,

    #[error("invalid service certificate: {0}")]
    ServiceCertificate(String),

    #[error("session is {found} but must be {expected}")]
    InvalidState {
        expected: SessionState,
        found: SessionState,
    },

    #[error("crypto operation failed: {0}")]
    Crypto(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if repeating the whole exchange could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LicenseParse(_))
    }
}

impl From<rsa::Error> for Error {
    fn from(value: rsa::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

/// A `Result` alias where the `Err` case is `protune_license::Error`.
pub type Result<T> = std::result::Result<T, Error>;
