use thiserror::Error;

/// The errors that may occur while parsing, decrypting or writing mp4 data.
#[derive(Debug, Error)]
pub enum Error {
    /// A bounds-checked read ran past the end of the available bytes.
    #[error("cannot read {0}")]
    Read(String),

    /// Bytes were read but could not be decoded into a value.
    #[error("cannot decode {0}")]
    Decode(String),

    /// The container structure is malformed or truncated.
    #[error("invalid mp4 format: {0}")]
    Format(String),

    /// Protection scheme other than cenc/cbcs.
    #[error("unsupported protection scheme: {0} (supported: cenc, cbcs)")]
    UnsupportedScheme(String),

    /// A protected sample has no key for its sample description.
    #[error("no key available for sample description index {description_index}")]
    UnmappedKey { description_index: u32 },

    /// A protected sample carries neither a per-sample nor a constant IV.
    #[error("sample {index} is protected but has no initialization vector")]
    MissingIv { index: usize },

    /// Invalid key size (must be 16 bytes for AES-128).
    #[error("invalid key size: expected 16 bytes for AES-128, got {0} bytes")]
    InvalidKeySize(usize),

    /// Invalid hex string.
    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn format<T: Into<String>>(reason: T) -> Self {
        Self::Format(reason.into())
    }

    /// Returns true if the error comes from malformed or truncated container data.
    pub fn is_format_err(&self) -> bool {
        matches!(self, Self::Read(_) | Self::Decode(_) | Self::Format(_))
    }
}

/// A `Result` alias where the `Err` case is `protune_mp4::Error`.
pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Format(format!($($arg)*)))
    };
}
