use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize, Serializer};

pub const JSON_RPC_VERSION: &str = "2.0";

/// Block selector for `eth_getBlockByNumber`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Earliest,
    Latest,
    Pending,
    Number(u64),
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Earliest => serializer.serialize_str("earliest"),
            Self::Latest => serializer.serialize_str("latest"),
            Self::Pending => serializer.serialize_str("pending"),
            Self::Number(number) => serializer.serialize_str(&format!("{number:#x}")),
        }
    }
}

/// The header fields the simulator reads back from `eth_getBlockByNumber`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(with = "crate::quantity")]
    pub number: u64,
    #[serde(with = "crate::quantity")]
    pub timestamp: u64,
    #[serde(default)]
    pub base_fee_per_gas: Option<U256>,
    #[serde(default, with = "crate::quantity::opt")]
    pub blob_gas_used: Option<u64>,
    #[serde(default, with = "crate::quantity::opt")]
    pub excess_blob_gas: Option<u64>,
    #[serde(default)]
    pub parent_beacon_block_root: Option<B256>,
    /// Hashes only; full transaction objects are never requested
    #[serde(default)]
    pub transactions: Vec<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default, with = "crate::quantity::opt")]
    pub block_number: Option<u64>,
    #[serde(default, with = "crate::quantity::opt")]
    pub status: Option<u64>,
    #[serde(default, with = "crate::quantity::opt")]
    pub blob_gas_used: Option<u64>,
    #[serde(default)]
    pub blob_gas_price: Option<U256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_tag_serialization() {
        assert_eq!(serde_json::to_string(&BlockTag::Latest).unwrap(), r#""latest""#);
        assert_eq!(serde_json::to_string(&BlockTag::Number(255)).unwrap(), r#""0xff""#);
    }

    #[test]
    fn test_receipt_without_blob_fields() {
        let receipt: TransactionReceipt = serde_json::from_str(
            r#"{"transactionHash":"0x0000000000000000000000000000000000000000000000000000000000000001","blockNumber":"0x2","status":"0x1"}"#,
        )
        .unwrap();
        assert_eq!(receipt.block_number, Some(2));
        assert_eq!(receipt.blob_gas_used, None);
        assert_eq!(receipt.block_hash, None);
    }
}
