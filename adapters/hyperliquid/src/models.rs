use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Payloads reach listeners after normalization, so prices arrive either as the venue's
/// decimal strings or as JSON numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn parse_decimal(raw: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(raw).or_else(|_| Decimal::from_scientific(raw))
}

pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    };
    parse_decimal(&raw).map_err(serde::de::Error::custom)
}

pub fn deserialize_optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::String(s)) => parse_decimal(&s).map(Some).map_err(serde::de::Error::custom),
        Some(StringOrNumber::Number(n)) => parse_decimal(&n.to_string())
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_decimal_map<'de, D>(deserializer: D) -> Result<HashMap<String, Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize_decimal")] Decimal);

    let raw = HashMap::<String, Wrapped>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, Wrapped(v))| (k, v)).collect())
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpAsset {
    pub name: String,
    #[serde(default)]
    pub sz_decimals: u32,
    #[serde(default)]
    pub max_leverage: Option<u32>,
    #[serde(default)]
    pub only_isolated: bool,
    #[serde(default)]
    pub is_delisted: bool,
}

/// Perp universe. Position in `universe` is the asset index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpMeta {
    pub universe: Vec<PerpAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotToken {
    pub name: String,
    pub index: u32,
    #[serde(default)]
    pub sz_decimals: u32,
    #[serde(default)]
    pub wei_decimals: u32,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub is_canonical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotPair {
    #[serde(default)]
    pub name: Option<String>,
    /// `[base, quote]` token indices.
    pub tokens: [u32; 2],
    pub index: u32,
    #[serde(default)]
    pub is_canonical: bool,
}

impl SpotPair {
    /// Wire name of the market. Non-canonical pairs are addressed as `@<index>`.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("@{}", self.index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotMeta {
    pub tokens: Vec<SpotToken>,
    pub universe: Vec<SpotPair>,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AllMids {
    #[serde(deserialize_with = "deserialize_decimal_map")]
    pub mids: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BookLevel {
    #[serde(deserialize_with = "deserialize_decimal")]
    pub px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub sz: Decimal,
    /// Number of resting orders at this level.
    pub n: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct L2Book {
    pub coin: String,
    pub time: u64,
    /// `[bids, asks]`, best level first.
    pub levels: Vec<Vec<BookLevel>>,
}

impl L2Book {
    pub fn bids(&self) -> &[BookLevel] {
        self.levels.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn asks(&self) -> &[BookLevel] {
        self.levels.get(1).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids().first().map(|level| level.px)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks().first().map(|level| level.px)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trade {
    pub coin: String,
    /// `B` for buy aggressor, `A` for sell.
    pub side: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub sz: Decimal,
    pub time: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub tid: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candle {
    #[serde(rename = "t")]
    pub open_time: u64,
    #[serde(rename = "T")]
    pub close_time: u64,
    #[serde(rename = "s")]
    pub coin: String,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o", deserialize_with = "deserialize_decimal")]
    pub open: Decimal,
    #[serde(rename = "c", deserialize_with = "deserialize_decimal")]
    pub close: Decimal,
    #[serde(rename = "h", deserialize_with = "deserialize_decimal")]
    pub high: Decimal,
    #[serde(rename = "l", deserialize_with = "deserialize_decimal")]
    pub low: Decimal,
    #[serde(rename = "v", deserialize_with = "deserialize_decimal")]
    pub volume: Decimal,
    #[serde(rename = "n", default)]
    pub trades: u64,
}

// ---------------------------------------------------------------------------
// Account data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub coin: String,
    pub side: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub limit_px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub sz: Decimal,
    pub oid: u64,
    pub timestamp: u64,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub orig_sz: Option<Decimal>,
    #[serde(default)]
    pub cloid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order: OpenOrder,
    pub status: String,
    pub status_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFill {
    pub coin: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub sz: Decimal,
    pub side: String,
    pub time: u64,
    pub oid: u64,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub closed_pnl: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub crossed: bool,
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFills {
    #[serde(default)]
    pub is_snapshot: bool,
    pub user: String,
    pub fills: Vec<UserFill>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_from_string_or_number() {
        let level: BookLevel = serde_json::from_value(json!({"px": "50000.5", "sz": 1.25, "n": 2})).unwrap();
        assert_eq!(level.px, dec!(50000.5));
        assert_eq!(level.sz, dec!(1.25));

        let tiny: BookLevel = serde_json::from_value(json!({"px": 1e-7, "sz": 3, "n": 1})).unwrap();
        assert_eq!(tiny.px, dec!(0.0000001));
        assert_eq!(tiny.sz, dec!(3));

        assert!(serde_json::from_value::<BookLevel>(json!({"px": "abc", "sz": "1", "n": 1})).is_err());
    }

    #[test]
    fn test_spot_pair_display_name() {
        let named: SpotPair = serde_json::from_value(json!({"name": "PURR/USDC", "tokens": [0, 1], "index": 0})).unwrap();
        assert_eq!(named.display_name(), "PURR/USDC");

        let unnamed: SpotPair = serde_json::from_value(json!({"tokens": [2, 1], "index": 7})).unwrap();
        assert_eq!(unnamed.display_name(), "@7");
    }

    #[test]
    fn test_l2_book_sides() {
        let book: L2Book = serde_json::from_value(json!({
            "coin": "BTC-PERP",
            "time": 1700000000000u64,
            "levels": [
                [{"px": 100, "sz": "1", "n": 1}, {"px": "99.5", "sz": "2", "n": 3}],
                [{"px": "100.5", "sz": "0.1", "n": 1}]
            ]
        }))
        .unwrap();

        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.best_ask(), Some(dec!(100.5)));
        assert_eq!(book.bids().len(), 2);

        let empty = L2Book { coin: "X".to_string(), time: 0, levels: vec![] };
        assert!(empty.best_bid().is_none());
        assert!(empty.asks().is_empty());
    }

    #[test]
    fn test_user_fills_optional_fields() {
        let fills: UserFills = serde_json::from_value(json!({
            "user": "0x0000000000000000000000000000000000000001",
            "fills": [{"coin": "ETH-PERP", "px": 3000.1, "sz": "0.5", "side": "B", "time": 1, "oid": 9, "fee": "0.01"}]
        }))
        .unwrap();

        assert!(!fills.is_snapshot);
        assert_eq!(fills.fills[0].fee, Some(dec!(0.01)));
        assert_eq!(fills.fills[0].closed_pnl, None);
    }
}
