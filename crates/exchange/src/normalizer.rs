use hlkit_core::{Lookup, NormalizationMode};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::traits::{MessageTransform, SymbolResolver};

lazy_static! {
    static ref INTEGER_PATTERN: Regex = Regex::new(r"^-?\d+$").unwrap();
    static ref DECIMAL_PATTERN: Regex = Regex::new(r"^-?\d*\.\d+$").unwrap();
}

/// Converts a strictly numeric string to a JSON number; anything else is returned as a string.
///
/// Integers that do not fit in 64 bits stay strings rather than losing precision.
pub fn convert_to_number(raw: &str) -> Value {
    if INTEGER_PATTERN.is_match(raw) {
        if let Ok(value) = raw.parse::<i64>() {
            return Value::from(value);
        }
        if let Ok(value) = raw.parse::<u64>() {
            return Value::from(value);
        }
    } else if DECIMAL_PATTERN.is_match(raw) {
        if let Some(number) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}

/// Rewrites venue payloads into library form: symbol fields become internal symbols and
/// numeric strings become numbers.
#[derive(Clone)]
pub struct ResponseNormalizer {
    resolver: Arc<dyn SymbolResolver>,
    mode: NormalizationMode,
    symbol_fields: HashSet<String>,
    /// Objects under these fields are keyed by symbol, e.g. `allMids`.
    symbol_keyed_fields: HashSet<String>,
}

impl ResponseNormalizer {
    pub fn new(resolver: Arc<dyn SymbolResolver>) -> Self {
        Self {
            resolver,
            mode: NormalizationMode::Perp,
            symbol_fields: ["coin".to_string()].into_iter().collect(),
            symbol_keyed_fields: ["mids".to_string()].into_iter().collect(),
        }
    }

    pub fn with_mode(mut self, mode: NormalizationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_symbol_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbol_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_symbol_keyed_field(mut self, field: impl Into<String>) -> Self {
        self.symbol_keyed_fields.insert(field.into());
        self
    }

    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    pub fn normalize(&self, payload: &Value) -> Value {
        self.normalize_value(payload, None)
    }

    fn normalize_value(&self, value: &Value, field: Option<&str>) -> Value {
        match value {
            Value::String(raw) => match field {
                Some(name) if self.symbol_fields.contains(name) => Value::String(self.resolve_symbol(raw)),
                _ => convert_to_number(raw),
            },
            // Array elements inherit the field they sit under.
            Value::Array(items) => Value::Array(
                items.iter().map(|item| self.normalize_value(item, field)).collect(),
            ),
            Value::Object(map) => {
                let keyed_by_symbol = field.map_or(false, |name| self.symbol_keyed_fields.contains(name));
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    let out_key = if keyed_by_symbol {
                        self.resolve_symbol(key)
                    } else {
                        key.clone()
                    };
                    out.insert(out_key, self.normalize_value(child, Some(key.as_str())));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Exchange name to internal symbol; unresolvable names pass through unchanged.
    pub fn resolve_symbol(&self, raw: &str) -> String {
        if self.mode == NormalizationMode::Spot && self.resolver.is_spot_token(raw) {
            return raw.to_string();
        }

        match self.resolver.resolve_internal_name(raw) {
            Ok(Lookup::Found(symbol)) => symbol,
            Ok(Lookup::NotFound) | Err(_) => raw.to_string(),
        }
    }
}

impl MessageTransform for ResponseNormalizer {
    fn transform(&self, message: &Value) -> Value {
        self.normalize(message)
    }
}

impl std::fmt::Debug for ResponseNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseNormalizer")
            .field("mode", &self.mode)
            .field("symbol_fields", &self.symbol_fields)
            .finish()
    }
}
