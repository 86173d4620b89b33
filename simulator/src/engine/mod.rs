//! Engine API client adapter and the seams to the client-under-test.
//!
//! Every call the simulator makes against a client goes through
//! [`ExecutionClient`]; [`HttpExecutionClient`] speaks JSON-RPC to a real
//! node, tests substitute an in-process implementation. Starting, peering and
//! stopping client processes is the [`ClientLauncher`]'s job.

mod http;

pub use http::HttpExecutionClient;

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use engine_common::config::ForkConfig;
use engine_common::payload::{
    BuiltPayload, EngineVersion, ExecutionPayload, ForkchoiceState, ForkchoiceUpdatedResponse,
    PayloadAttributes, PayloadId, PayloadStatus,
};
use engine_common::rpc::{BlockHeader, BlockTag, RpcError, TransactionReceipt};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::devp2p::{PeerConnection, ProbeError, Status};

/// Engine API and data API surface of one execution client
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Name used in logs and by the launcher to find the process
    fn id(&self) -> &str;

    async fn forkchoice_updated(
        &self,
        version: EngineVersion,
        state: &ForkchoiceState,
        attributes: Option<&PayloadAttributes>,
    ) -> Result<ForkchoiceUpdatedResponse, RpcError>;

    /// `engine_getPayloadV1` answers the bare payload; it is wrapped into a
    /// [`BuiltPayload`] without a bundle.
    async fn get_payload(
        &self,
        version: EngineVersion,
        payload_id: PayloadId,
    ) -> Result<BuiltPayload, RpcError>;

    /// `versioned_hashes` and `parent_beacon_root` are only sent from V3 on,
    /// where `None` goes out as JSON `null`.
    async fn new_payload(
        &self,
        version: EngineVersion,
        payload: &ExecutionPayload,
        versioned_hashes: Option<&[B256]>,
        parent_beacon_root: Option<B256>,
    ) -> Result<PayloadStatus, RpcError>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError>;

    async fn block_by_number(&self, tag: BlockTag) -> Result<Option<BlockHeader>, RpcError>;

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError>;

    async fn chain_id(&self) -> Result<u64, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;
}

/// How an attached client takes part in block production
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum ClientRole {
    /// Builds every payload and must accept it
    Primary,
    /// Receives every payload and forkchoice update
    Mirrored,
    /// Receives nothing from the CL mock; addressed by steps only
    Detached,
    /// Receives forkchoice updates only, so it has to sync the chain itself
    Syncing,
}

impl ClientRole {
    /// Whether built payloads are sent to this client
    pub fn receives_payloads(&self) -> bool {
        matches!(self, Self::Primary | Self::Mirrored)
    }

    pub fn receives_forkchoice(&self) -> bool {
        matches!(self, Self::Primary | Self::Mirrored | Self::Syncing)
    }
}

/// A client attached to a scenario, addressed by `index` in steps
#[derive(Clone)]
pub struct ClientHandle {
    pub index: usize,
    pub role: ClientRole,
    pub client: Arc<dyn ExecutionClient>,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("index", &self.index)
            .field("role", &self.role)
            .field("id", &self.client.id())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub role: ClientRole,
    pub forks: ForkConfig,
    /// Start without connecting to the scenario's other clients
    pub skip_bootnode: bool,
}

impl LaunchOptions {
    pub fn new(role: ClientRole, forks: ForkConfig) -> Self {
        Self {
            role,
            forks,
            skip_bootnode: false,
        }
    }

    pub fn with_skip_bootnode(mut self, skip: bool) -> Self {
        self.skip_bootnode = skip;
        self
    }
}

/// Lifecycle of client processes, owned by the surrounding test environment
#[async_trait]
pub trait ClientLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> anyhow::Result<Arc<dyn ExecutionClient>>;

    /// Opens an eth/68 session to the client, performing the RLPx and
    /// `Status` handshake with `local` as our status.
    async fn connect_peer(
        &self,
        client: &dyn ExecutionClient,
        local: &Status,
    ) -> Result<Box<dyn PeerConnection>, ProbeError>;

    async fn stop(&self, client: &dyn ExecutionClient) -> anyhow::Result<()>;
}
