//! Data structures shared across the API and monitor binaries.

mod chain;
mod cursor;
mod intent;

use std::fmt;
use std::str::FromStr;

use hex::encode as hex_encode;
use sha3::{Digest, Sha3_256};
use thiserror::Error;

pub use chain::*;
pub use cursor::*;
pub use intent::*;

/// Maximum length of an externally supplied intent identifier.
pub const INTENT_ID_MAX_LENGTH: usize = 64;

/// Errors emitted when user- or RPC-supplied identifiers fail validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("intent id must be 1..={INTENT_ID_MAX_LENGTH} characters of [A-Za-z0-9_-]")]
    IntentId,
    #[error("chain id must be 1..=32 characters of [a-z0-9_-]")]
    Chain,
    #[error("address must be 20 bytes hex encoded with 0x prefix, got `{0}`")]
    Address(String),
    #[error("hash must be 32 bytes hex encoded with 0x prefix, got `{0}`")]
    Hash(String),
    #[error("asset symbol must be 1..=16 alphanumeric characters")]
    Asset,
    #[error("amount must be a non-negative integer in atomic units, got `{0}`")]
    Amount(String),
    #[error("amount must be a non-negative decimal with at most {decimals} fractional digits, got `{value}`")]
    DecimalAmount { value: String, decimals: u8 },
    #[error("unknown amount policy `{0}`")]
    Policy(String),
}

/// Deterministically fingerprints a raw RPC payload so events can reference
/// the exact bytes they were derived from.
pub fn derive_payload_ref(raw: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(raw);
    hex_encode(hasher.finalize())
}

fn is_prefixed_hex(value: &str, hex_len: usize) -> bool {
    value.len() == hex_len + 2
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Caller-chosen identifier of a transfer intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntentId(String);

impl IntentId {
    pub fn parse(value: &str) -> Result<Self, FormatError> {
        let valid = !value.is_empty()
            && value.len() <= INTENT_ID_MAX_LENGTH
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(value.to_owned()))
        } else {
            Err(FormatError::IntentId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-case slug naming a monitored chain, e.g. `ethereum` or `polygon`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(String);

impl ChainId {
    pub fn parse(value: &str) -> Result<Self, FormatError> {
        let lower = value.trim().to_ascii_lowercase();
        let valid = !lower.is_empty()
            && lower.len() <= 32
            && lower
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(Self(lower))
        } else {
            Err(FormatError::Chain)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-case form used as environment variable prefix.
    pub fn env_prefix(&self) -> String {
        self.0.replace('-', "_").to_ascii_uppercase()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 20-byte account address, stored lower-case so comparisons are plain
/// string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn parse(value: &str) -> Result<Self, FormatError> {
        let trimmed = value.trim();
        if !is_prefixed_hex(trimmed, 40) {
            return Err(FormatError::Address(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! hash32 {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn parse(value: &str) -> Result<Self, FormatError> {
                let trimmed = value.trim();
                if !is_prefixed_hex(trimmed, 64) {
                    return Err(FormatError::Hash(trimmed.to_owned()));
                }
                Ok(Self(trimmed.to_ascii_lowercase()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

hash32!(
    /// Hash of a block on a monitored chain.
    BlockHash
);
hash32!(
    /// Hash of a transaction on a monitored chain.
    TxHash
);

/// Upper-case asset symbol (`ETH`, `USDC`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asset(String);

impl Asset {
    pub fn parse(value: &str) -> Result<Self, FormatError> {
        let trimmed = value.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= 16
            && trimmed.chars().all(|c| c.is_ascii_alphanumeric());
        if valid {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(FormatError::Asset)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Amount in the asset's atomic units (wei, micro-USDC, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(atomic: u128) -> Self {
        Self(atomic)
    }

    pub const fn atomic(&self) -> u128 {
        self.0
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn abs_diff(self, other: Amount) -> Amount {
        Amount(self.0.abs_diff(other.0))
    }

    /// Inverse of [`Amount::from_decimal`], without trailing zeros.
    pub fn to_decimal_string(&self, decimals: u8) -> String {
        if decimals == 0 {
            return self.0.to_string();
        }
        let width = decimals as usize;
        let digits = format!("{:0>pad$}", self.0, pad = width + 1);
        let (whole, fraction) = digits.split_at(digits.len() - width);
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            whole.to_owned()
        } else {
            format!("{whole}.{fraction}")
        }
    }

    /// Scales a human-readable amount such as `1.5` by `10^decimals`.
    pub fn from_decimal(value: &str, decimals: u8) -> Result<Self, FormatError> {
        let trimmed = value.trim();
        let invalid = || FormatError::DecimalAmount {
            value: trimmed.to_owned(),
            decimals,
        };
        let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if whole.is_empty()
            || !digits(whole)
            || !digits(fraction)
            || (trimmed.contains('.') && fraction.is_empty())
            || fraction.len() > decimals as usize
        {
            return Err(invalid());
        }

        let scale = 10u128.checked_pow(u32::from(decimals)).ok_or_else(invalid)?;
        let whole: u128 = whole.parse().map_err(|_| invalid())?;
        let fraction: u128 = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{fraction:0<width$}", width = decimals as usize);
            padded.parse().map_err(|_| invalid())?
        };
        whole
            .checked_mul(scale)
            .and_then(|atomic| atomic.checked_add(fraction))
            .map(Amount)
            .ok_or_else(invalid)
    }
}

impl FromStr for Amount {
    type Err = FormatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(FormatError::Amount(trimmed.to_owned()));
        }
        trimmed
            .parse::<u128>()
            .map(Amount)
            .map_err(|_| FormatError::Amount(trimmed.to_owned()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
