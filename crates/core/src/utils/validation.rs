use rust_decimal::Decimal;

use crate::error::{HlError, Result};

/// Accepts `0x`-prefixed, 20-byte hex account addresses.
pub fn validate_address(address: &str) -> Result<()> {
    let hex = address
        .strip_prefix("0x")
        .ok_or_else(|| HlError::InvalidData(format!("Address must start with 0x: {}", address)))?;

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(HlError::InvalidData(format!("Invalid address: {}", address)));
    }

    Ok(())
}

pub fn validate_price(price: Decimal) -> Result<()> {
    if price <= Decimal::ZERO {
        return Err(HlError::InvalidData("Price must be positive".to_string()));
    }

    Ok(())
}

pub fn validate_size(size: Decimal) -> Result<()> {
    if size <= Decimal::ZERO {
        return Err(HlError::InvalidData("Size must be positive".to_string()));
    }

    Ok(())
}

pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= 32
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | '@' | ':' | '_'))
}
