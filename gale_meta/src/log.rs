//! The catalog command set.
//!
//! The consensus layer serializes one [`MetaOp`] per log entry and feeds the
//! ordered entries to [`Catalog::apply`](crate::catalog::Catalog::apply).
//! Commands that need wall-clock input (soft-delete stamps) carry it as a
//! payload field so replay stays deterministic.

use gale_id::{IndexGroupId, NodeId, ShardGroupId, ShardId};
use serde::{Deserialize, Serialize};

use crate::catalog::database::{ObsOptions, RetentionPolicyInfo, RetentionPolicyUpdate};
use crate::catalog::measurement::{
    ColStoreInfo, FieldSchema, IndexRelation, MeasurementOptions, ShardKeyInfo,
};
use crate::catalog::migrate::MigrateEventInfo;
use crate::catalog::node::{NodeRole, NodeStatus, SegregateStatus};
use crate::catalog::ptview::{Peer, PtInfo, PtStatus, RGStatus};
use crate::catalog::shard::{
    EngineType, ReShardingInfo, ShardIdentifier, Tier,
};
use crate::catalog::stream::{DownSamplePolicyInfo, StreamInfo};
use crate::catalog::user::Privilege;

/// A single mutating catalog command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaOp {
    // Node membership
    CreateDataNode {
        host: String,
        tcp_host: String,
        role: NodeRole,
    },
    SetDataNode {
        id: NodeId,
        host: String,
        tcp_host: String,
    },
    CreateMetaNode {
        http_addr: String,
        rpc_addr: String,
        tcp_addr: String,
    },
    SetMetaNode {
        http_addr: String,
        rpc_addr: String,
        tcp_addr: String,
    },
    DeleteMetaNode {
        id: NodeId,
    },
    ClusterChangeState {
        node_id: NodeId,
        status: NodeStatus,
    },
    UpdateNodeStatus {
        id: NodeId,
        status: NodeStatus,
        logical_time: u64,
        gossip_port: String,
    },
    SetSegregateStatus {
        status: Vec<SegregateStatus>,
        node_ids: Vec<NodeId>,
    },
    RemoveNode {
        node_ids: Vec<NodeId>,
    },
    MarkTakeover {
        enable: bool,
    },
    MarkBalancer {
        enable: bool,
    },

    // Pt view and replication
    UpdatePtInfo {
        db: String,
        observed: PtInfo,
        owner: NodeId,
        status: PtStatus,
    },
    UpdatePtVersion {
        db: String,
        pt_id: u32,
    },
    UpdateReplication {
        db: String,
        rg_id: u32,
        master_id: u32,
        peers: Vec<Peer>,
        status: RGStatus,
    },

    // Databases and retention policies
    CreateDatabase {
        name: String,
        rp: Option<RetentionPolicyInfo>,
        shard_key: Option<ShardKeyInfo>,
        enable_tag_array: bool,
        replica_n: u32,
        options: Option<ObsOptions>,
    },
    MarkDatabaseDelete {
        name: String,
    },
    DropDatabase {
        name: String,
    },
    CreateRetentionPolicy {
        database: String,
        rp: RetentionPolicyInfo,
        make_default: bool,
    },
    UpdateRetentionPolicy {
        database: String,
        name: String,
        update: RetentionPolicyUpdate,
        make_default: bool,
    },
    MarkRetentionPolicyDelete {
        database: String,
        name: String,
    },
    DropRetentionPolicy {
        database: String,
        name: String,
    },
    SetDefaultRetentionPolicy {
        database: String,
        name: String,
    },

    // Measurements
    CreateMeasurement {
        database: String,
        rp: String,
        mst: String,
        shard_key: Option<ShardKeyInfo>,
        index_relation: Option<IndexRelation>,
        engine_type: EngineType,
        col_store_info: Option<ColStoreInfo>,
        fields: Vec<FieldSchema>,
        options: Option<MeasurementOptions>,
    },
    AlterShardKey {
        database: String,
        rp: String,
        mst: String,
        shard_key: ShardKeyInfo,
    },
    UpdateSchema {
        database: String,
        rp: String,
        mst: String,
        fields: Vec<FieldSchema>,
    },
    MarkMeasurementDelete {
        database: String,
        rp: String,
        mst: String,
    },
    DropMeasurement {
        database: String,
        rp: String,
        name_with_ver: String,
    },
    UpdateMeasurement {
        database: String,
        rp: String,
        mst: String,
        options: MeasurementOptions,
    },

    // Shard and index groups
    CreateShardGroup {
        database: String,
        rp: String,
        timestamp: i64,
        tier: Tier,
        engine_type: EngineType,
        version: u32,
    },
    DeleteShardGroup {
        database: String,
        rp: String,
        id: ShardGroupId,
        deleted_at: i64,
    },
    DeleteIndexGroup {
        database: String,
        rp: String,
        id: IndexGroupId,
        deleted_at: i64,
    },
    PruneGroups {
        shard_group: bool,
        id: u64,
    },
    DropShard {
        id: ShardId,
        deleted_at: i64,
    },
    ReSharding(ReShardingInfo),
    UpdateShardTier {
        shard_id: ShardId,
        tier: Tier,
        database: String,
        rp: String,
    },
    UpdateShardDownSampleInfo {
        ident: ShardIdentifier,
    },

    // Migration events
    CreateMigrateEvent(MigrateEventInfo),
    UpdateMigrateEvent(MigrateEventInfo),
    RemoveEvent {
        event_id: String,
    },

    // Users
    CreateUser {
        name: String,
        hash: String,
        admin: bool,
        rwuser: bool,
    },
    DropUser {
        name: String,
    },
    UpdateUser {
        name: String,
        hash: String,
    },
    SetPrivilege {
        name: String,
        database: String,
        privilege: Privilege,
    },
    SetAdminPrivilege {
        name: String,
        admin: bool,
    },

    // Streams
    CreateStream(StreamInfo),
    DropStream {
        name: String,
    },

    // Subscriptions
    CreateSubscription {
        database: String,
        rp: String,
        name: String,
        mode: String,
        destinations: Vec<String>,
    },
    DropSubscription {
        database: String,
        rp: String,
        name: String,
    },

    // Downsampling
    CreateDownSamplePolicy {
        database: String,
        rp: String,
        info: DownSamplePolicyInfo,
    },
    DropDownSamplePolicy {
        database: String,
        rp: String,
        drop_all: bool,
    },

    // Query id ranges
    RegisterQueryIdOffset {
        host: String,
    },
}

/// The value a successfully applied command hands back to the consensus
/// layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    None,
    /// Id of the node a `CreateDataNode` registered or refreshed.
    NodeId(NodeId),
    /// Whether a `ClusterChangeState` found its node.
    Changed(bool),
}
