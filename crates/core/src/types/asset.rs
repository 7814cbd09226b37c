use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HlError;

/// Spot asset indices are shifted by this amount so they never collide with perp indices.
pub const SPOT_INDEX_OFFSET: u32 = 10_000;

/// Suffix carried by every perpetual internal symbol.
pub const PERP_SUFFIX: &str = "-PERP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Perp,
    Spot,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Perp => write!(f, "perp"),
            AssetClass::Spot => write!(f, "spot"),
        }
    }
}

impl FromStr for AssetClass {
    type Err = HlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "perp" | "perps" | "perpetual" => Ok(AssetClass::Perp),
            "spot" => Ok(AssetClass::Spot),
            other => Err(HlError::InvalidData(format!("Unknown asset class: {}", other))),
        }
    }
}

/// One tradable instrument as the venue knows it and as the library exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Name used on the wire, e.g. `BTC` or `PURR/USDC` or `@107`.
    pub exchange_name: String,
    /// Stable library symbol, e.g. `BTC-PERP` or `PURR-USDC`.
    pub internal_symbol: String,
    /// Asset index used in signed actions.
    pub index: u32,
    pub class: AssetClass,
    pub sz_decimals: Option<u32>,
    pub is_delisted: bool,
}

impl AssetRecord {
    pub fn perp(exchange_name: impl Into<String>, position: u32) -> Self {
        let exchange_name = exchange_name.into();
        Self {
            internal_symbol: perp_symbol(&exchange_name),
            exchange_name,
            index: position,
            class: AssetClass::Perp,
            sz_decimals: None,
            is_delisted: false,
        }
    }

    /// `None` when the offset index does not fit in a `u32`.
    pub fn spot(exchange_name: impl Into<String>, base: &str, quote: &str, market_index: u32) -> Option<Self> {
        Some(Self {
            index: SPOT_INDEX_OFFSET.checked_add(market_index)?,
            exchange_name: exchange_name.into(),
            internal_symbol: spot_symbol(base, quote),
            class: AssetClass::Spot,
            sz_decimals: None,
            is_delisted: false,
        })
    }

    pub fn with_sz_decimals(mut self, sz_decimals: u32) -> Self {
        self.sz_decimals = Some(sz_decimals);
        self
    }

    pub fn delisted(mut self, is_delisted: bool) -> Self {
        self.is_delisted = is_delisted;
        self
    }
}

pub fn perp_symbol(exchange_name: &str) -> String {
    format!("{}{}", exchange_name, PERP_SUFFIX)
}

pub fn spot_symbol(base: &str, quote: &str) -> String {
    format!("{}-{}", base, quote)
}

/// Governs how a bare symbol is disambiguated between the perp and spot spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NormalizationMode {
    #[default]
    Perp,
    Spot,
}

impl fmt::Display for NormalizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationMode::Perp => write!(f, "PERP"),
            NormalizationMode::Spot => write!(f, "SPOT"),
        }
    }
}

/// Outcome of a cache lookup; distinguishes "unknown" from an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }

    /// Converts a miss into `UnknownAsset` for operations that cannot proceed without a value.
    pub fn or_unknown(self, symbol: &str) -> crate::Result<T> {
        match self {
            Lookup::Found(value) => Ok(value),
            Lookup::NotFound => Err(HlError::UnknownAsset(symbol.to_string())),
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotFound,
        }
    }
}
