use gale_id::NodeId;

/// Errors surfaced by the catalog apply and query paths.
///
/// Every failed command maps to exactly one of these variants; the consensus
/// layer is responsible for logging them and surfacing them to users. The
/// catalog itself never panics on validated input.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    // Not found
    #[error("database {0} not found")]
    DatabaseNotFound(String),

    #[error("retention policy {0} not found")]
    RetentionPolicyNotFound(String),

    #[error("measurement {0} not found")]
    MeasurementNotFound(String),

    #[error("no measurement in database {db} retention policy {rp}")]
    MeasurementsNotFound { db: String, rp: String },

    #[error("shard group not found")]
    ShardGroupNotFound,

    #[error("shard {shard_id} not found for retention policy {rp} on database {db}")]
    ShardNotFound {
        shard_id: u64,
        db: String,
        rp: String,
    },

    #[error("user not found")]
    UserNotFound,

    #[error("stream not found")]
    StreamNotFound,

    #[error("subscription not found")]
    SubscriptionNotFound,

    #[error("migrate event {0} not found")]
    EventNotFound(String),

    #[error("pt not found")]
    PtNotFound,

    #[error("data node {0} not found")]
    DataNodeNotFound(NodeId),

    // Already exists / conflict
    #[error("database already exists")]
    DatabaseExists,

    #[error("retention policy already exists")]
    RetentionPolicyExists,

    #[error("retention policy conflicts with an existing policy")]
    RetentionPolicyConflict,

    #[error("measurement already exists")]
    MeasurementExists,

    #[error("subscription already exists")]
    SubscriptionExists,

    #[error("stream already exists")]
    StreamHasExist,

    #[error("stream task exists, drop it first")]
    StreamBlocksDelete,

    #[error("pt event is already exist")]
    PtEventIsAlreadyExist,

    #[error("retention policy replication factor conflicts with database replica number")]
    ReplicaNConflict,

    #[error("operation conflicts with replication: range shard key and column store require replica number 1")]
    ConflictWithRep,

    #[error("operation conflicts with an in-flight pt migration event")]
    ConflictWithEvent,

    #[error("sharding type of retention policy {rp} can not change from {old} to {new}")]
    ShardingTypeNotEqual {
        rp: String,
        old: &'static str,
        new: &'static str,
    },

    #[error("field type conflict")]
    FieldTypeConflict,

    #[error("shard group {0} is not the newest, already re-sharding")]
    ShardGroupAlreadyReSharding(u64),

    // Validation
    #[error("database name required")]
    DatabaseNameRequired,

    #[error("retention policy required")]
    RetentionPolicyRequired,

    #[error("retention policy name required")]
    RetentionPolicyNameRequired,

    #[error("retention policy duration must be at least {0}ns")]
    RetentionPolicyDurationTooLow(i64),

    #[error("retention policy shard group duration must be greater than 0")]
    ShardGroupDurationRequired,

    #[error("retention policy duration must be greater than the shard group duration")]
    IncompatibleDurations,

    #[error("replication factor must be greater than 0")]
    ReplicationFactorTooLow,

    #[error("invalid shard key")]
    InvalidShardKey,

    #[error("duplicate shard key")]
    DuplicateShardKey,

    #[error("downsample policy exists, the duration of retention policy can not be changed")]
    DownSamplePolicyExists,

    #[error("the password is the same as the previous one")]
    PwdUsed,

    #[error("there is already an admin user, only one admin user is allowed")]
    UserForbidden,

    #[error("username required")]
    UsernameRequired,

    #[error("user already exists")]
    UserExists,

    #[error("an admin user can not drop itself")]
    UserDropSelf,

    #[error("granting or revoking admin privilege at runtime is not allowed")]
    GrantOrRevokeAdmin,

    // Lifecycle
    #[error("database {0} is being deleted")]
    DatabaseIsBeingDelete(String),

    #[error("retention policy is being deleted")]
    RpIsBeingDelete,

    #[error("measurement is being deleted")]
    MstIsBeingDelete,

    #[error("storage node is not ready, no pt has been allocated")]
    StorageNodeNotReady,

    // Membership
    #[error("no alive data node available")]
    DataNoAlive,

    #[error("node already exists")]
    NodeExists,

    #[error("node not found")]
    NodeNotFound,

    #[error("node id required")]
    NodeIDRequired,

    #[error("node status event is older than the recorded logical time")]
    OlderEvent,

    #[error("data node is still connected, refusing alive event to avoid split brain")]
    DataNodeSplitBrain,

    #[error("pt changed since the caller observed it")]
    PtChanged,

    #[error("node num {node_num} is not a multiple of replica num {replica_n}")]
    ReplicaNodeNumIncorrect { node_num: u32, replica_n: u32 },

    #[error("invalid node id {0}")]
    InValidNodeID(u64),

    #[error("node {node_id} is segregated, segregate status {status}")]
    NodeSegregated { node_id: NodeId, status: u64 },

    #[error("can not set meta node when there are more than 1 in the metastore")]
    TooManyMetaNodes,

    #[error("some limit node ip is not correct: {0}")]
    NodeIpNotFound(String),

    // Import / codec
    #[error("imported metadata does not have database named {0}")]
    ImportDatabaseNotFound(String),

    #[error("retention policy not found in meta backup: {db}.{rp}")]
    ImportRetentionPolicyNotFound { db: String, rp: String },

    #[error(transparent)]
    Codec(#[from] anyhow::Error),
}

impl MetaError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Codec(anyhow::anyhow!(message.into()))
    }
}
