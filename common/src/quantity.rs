//! Serde helpers for JSON-RPC quantities (`"0x1a"`).
//!
//! Numbers are accepted on input as well, some clients answer with them.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Hex(String),
    Number(u64),
}

fn parse(raw: Raw) -> Result<u64, String> {
    match raw {
        Raw::Number(value) => Ok(value),
        Raw::Hex(text) => {
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .ok_or_else(|| format!("quantity '{text}' is missing the 0x prefix"))?;
            if digits.is_empty() {
                return Err(format!("quantity '{text}' has no digits"));
            }
            u64::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity '{text}': {e}"))
        }
    }
}

pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:#x}"))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    parse(Raw::deserialize(deserializer)?).map_err(de::Error::custom)
}

/// A bare quantity, for results such as `eth_blockNumber`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(#[serde(with = "crate::quantity")] pub u64);

/// `Option<u64>` variant: `None` maps to `null` (or to an absent field when
/// combined with `skip_serializing_if`)
pub mod opt {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => super::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        Option::<Raw>::deserialize(deserializer)?
            .map(parse)
            .transpose()
            .map_err(de::Error::custom)
    }
}
