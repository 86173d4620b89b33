use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use engine_common::payload::{
    BuiltPayload, EngineVersion, ExecutionPayload, ForkchoiceState, ForkchoiceUpdatedResponse,
    PayloadAttributes, PayloadId, PayloadStatus,
};
use engine_common::quantity::Quantity;
use engine_common::rpc::{
    BlockHeader, BlockTag, EngineClientConfig, RpcClient, RpcError, TransactionReceipt,
};
use log::debug;
use serde_json::{json, Value};

use super::ExecutionClient;

/// [`ExecutionClient`] over two JSON-RPC endpoints: the authenticated Engine
/// API port and the public data API port
pub struct HttpExecutionClient {
    id: String,
    engine: RpcClient,
    eth: RpcClient,
}

impl HttpExecutionClient {
    pub fn new(
        id: impl Into<String>,
        engine_endpoint: &str,
        eth_endpoint: &str,
        config: EngineClientConfig,
    ) -> Result<Self, RpcError> {
        let mut eth_config = config.clone();
        eth_config.jwt_secret = None;
        Ok(Self {
            id: id.into(),
            engine: RpcClient::new(engine_endpoint, config)?,
            eth: RpcClient::new(eth_endpoint, eth_config)?,
        })
    }

    fn new_payload_params(
        version: EngineVersion,
        payload: &ExecutionPayload,
        versioned_hashes: Option<&[B256]>,
        parent_beacon_root: Option<B256>,
    ) -> Result<Value, RpcError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| RpcError::InvalidResponse(format!("cannot encode payload: {e}")))?;
        Ok(match version {
            EngineVersion::V1 | EngineVersion::V2 => json!([payload]),
            EngineVersion::V3 => json!([payload, versioned_hashes, parent_beacon_root]),
        })
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn forkchoice_updated(
        &self,
        version: EngineVersion,
        state: &ForkchoiceState,
        attributes: Option<&PayloadAttributes>,
    ) -> Result<ForkchoiceUpdatedResponse, RpcError> {
        debug!(
            "{}: {} head={} attributes={}",
            self.id,
            version.forkchoice_updated_method(),
            state.head_block_hash,
            attributes.is_some()
        );
        self.engine
            .request(&version.forkchoice_updated_method(), (state, attributes))
            .await
    }

    async fn get_payload(
        &self,
        version: EngineVersion,
        payload_id: PayloadId,
    ) -> Result<BuiltPayload, RpcError> {
        debug!("{}: {} id={}", self.id, version.get_payload_method(), payload_id);
        let method = version.get_payload_method();
        match version {
            EngineVersion::V1 => {
                let execution_payload: ExecutionPayload =
                    self.engine.request(&method, [payload_id]).await?;
                Ok(BuiltPayload {
                    execution_payload,
                    block_value: Default::default(),
                    blobs_bundle: None,
                    should_override_builder: None,
                })
            }
            EngineVersion::V2 | EngineVersion::V3 => self.engine.request(&method, [payload_id]).await,
        }
    }

    async fn new_payload(
        &self,
        version: EngineVersion,
        payload: &ExecutionPayload,
        versioned_hashes: Option<&[B256]>,
        parent_beacon_root: Option<B256>,
    ) -> Result<PayloadStatus, RpcError> {
        debug!(
            "{}: {} number={} hash={}",
            self.id,
            version.new_payload_method(),
            payload.block_number,
            payload.block_hash
        );
        let params =
            Self::new_payload_params(version, payload, versioned_hashes, parent_beacon_root)?;
        self.engine
            .request(&version.new_payload_method(), params)
            .await
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError> {
        self.eth.request("eth_sendRawTransaction", [raw]).await
    }

    async fn block_by_number(&self, tag: BlockTag) -> Result<Option<BlockHeader>, RpcError> {
        self.eth
            .request("eth_getBlockByNumber", (tag, false))
            .await
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.eth.request("eth_getTransactionReceipt", [hash]).await
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        let id: Quantity = self.eth.request("eth_chainId", Value::Array(vec![])).await?;
        Ok(id.0)
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let number: Quantity = self
            .eth
            .request("eth_blockNumber", Value::Array(vec![]))
            .await?;
        Ok(number.0)
    }
}
