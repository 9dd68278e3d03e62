use serde::{Serialize, Deserialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Character used to overwrite masked digits
pub const MASK_CHAR: char = 'X';

/// Request field holding the card account number
pub const CARD_NUMBER_FIELD: &str = "ACCT";

/// Request field holding the card verification value
pub const CARD_CVV_FIELD: &str = "CVV2";

/// A wrapper for sensitive data that masks its value in Debug output and can be customized for Serialization.
#[derive(Clone, Deserialize)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Wire payloads need the real value; only log output is masked.
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Keep the last `visible` characters and left-pad with the mask character to the original length.
pub fn mask_keep_last(value: &str, visible: usize) -> String {
    let len = value.chars().count();
    let keep = visible.min(len);
    let tail: String = value.chars().skip(len - keep).collect();
    let mut masked: String = std::iter::repeat(MASK_CHAR).take(len - keep).collect();
    masked.push_str(&tail);
    masked
}

/// Replace every character with the mask character.
pub fn mask_all(value: &str) -> String {
    std::iter::repeat(MASK_CHAR).take(value.chars().count()).collect()
}

/// Mask card data inside a gateway request payload in place.
///
/// Masking an already-masked payload leaves it unchanged.
pub fn mask_sensitive_fields(data: &mut Map<String, Value>) {
    if let Some(raw) = data.get(CARD_NUMBER_FIELD).and_then(field_text) {
        data.insert(CARD_NUMBER_FIELD.to_string(), Value::String(mask_keep_last(&raw, 4)));
    }

    if let Some(raw) = data.get(CARD_CVV_FIELD).and_then(field_text) {
        data.insert(CARD_CVV_FIELD.to_string(), Value::String(mask_all(&raw)));
    }
}

// Non-empty scalar as text; null, empty strings and containers are left alone.
fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
