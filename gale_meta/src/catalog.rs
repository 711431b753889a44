//! The catalog state machine.
//!
//! [`MetaData`] is the whole catalog as one value: nodes, databases, the
//! pt view, replica groups, users, streams, migration events and every id
//! counter. An external consensus layer feeds [`Catalog::apply`] an ordered
//! log of [`MetaOp`] commands; each is applied deterministically, so two
//! replicas replaying the same log arrive at identical state. Readers take a
//! deep-clone snapshot and never observe partial mutation.

use gale_id::{
    ConnId, DownSampleId, EventOpId, IdCounter, IndexGroupId, IndexId, NodeId, SerdeVecMap,
    ShardGroupId, ShardId, StreamId, SubscriptionId,
};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::MetaError;
use crate::log::{ApplyResult, MetaOp};
use crate::Result;

pub mod database;
pub mod measurement;
pub mod migrate;
pub mod node;
pub mod ptview;
pub mod shard;
pub mod show;
pub mod stream;
pub mod user;

use database::DatabaseInfo;
use migrate::MigrateEventInfo;
use node::{DataNode, NodeInfo};
use ptview::{PtInfo, ReplicaGroup};
use stream::StreamInfo;
use user::UserInfo;

/// Query id range handed to each sql host.
pub const QUERY_ID_SPAN: u64 = 100_000_000;

/// Placement policy for pts, fixed at deployment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HaPolicy {
    #[default]
    WriteAvailableFirst,
    SharedStorage,
    Replication,
}

/// Deployment-time configuration captured into the state on construction.
#[derive(Debug, Clone, Copy)]
pub struct CatalogConfig {
    pub ha_policy: HaPolicy,
    pub pt_num_per_node: u32,
    pub expand_shards_enable: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ha_policy: HaPolicy::WriteAvailableFirst,
            pt_num_per_node: 1,
            expand_shards_enable: false,
        }
    }
}

/// The top level collection of all cluster metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetaData {
    /// Raft term and index of the last delivered command.
    pub term: u64,
    pub index: u64,
    pub cluster_id: u64,
    pub cluster_pt_num: u32,
    pub pt_num_per_node: u32,
    pub ha_policy: HaPolicy,

    pub meta_nodes: Vec<NodeInfo>,
    pub data_nodes: Vec<DataNode>,
    /// Keyed by database name; one dense entry per pt id.
    pub pt_view: SerdeVecMap<String, Vec<PtInfo>>,
    pub replica_groups: SerdeVecMap<String, Vec<ReplicaGroup>>,

    pub databases: SerdeVecMap<String, DatabaseInfo>,
    pub streams: SerdeVecMap<String, StreamInfo>,
    pub users: Vec<UserInfo>,
    pub migrate_events: SerdeVecMap<String, MigrateEventInfo>,

    /// Query id range offsets already handed out, keyed by sql host.
    pub query_id_init: SerdeVecMap<String, u64>,

    /// Mirrors "does any admin user exist" for constant-time checks.
    pub admin_user_exists: bool,
    pub take_over_enabled: bool,
    pub balancer_enabled: bool,
    pub expand_shards_enable: bool,

    pub max_node_id: NodeId,
    pub max_shard_group_id: ShardGroupId,
    pub max_shard_id: ShardId,
    pub max_index_group_id: IndexGroupId,
    pub max_index_id: IndexId,
    pub max_event_op_id: EventOpId,
    pub max_down_sample_id: DownSampleId,
    pub max_stream_id: StreamId,
    pub max_conn_id: ConnId,
    pub max_subscription_id: SubscriptionId,
}

impl MetaData {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            ha_policy: config.ha_policy,
            pt_num_per_node: config.pt_num_per_node,
            expand_shards_enable: config.expand_shards_enable,
            ..Default::default()
        }
    }

    /// The replication factor of a database, never less than 1.
    pub fn db_replica_n(&self, db: &str) -> u32 {
        self.databases
            .get(db)
            .map(|d| d.replica_n)
            .filter(|n| *n > 0)
            .unwrap_or(1)
    }

    /// The number of pts a database effectively writes into: the whole
    /// cluster pt space without replication, otherwise `replica_n` pts per
    /// replica group.
    pub fn effective_pt_num(&self, db: &str) -> u32 {
        let replica_n = self.db_replica_n(db);
        if replica_n == 1 {
            self.cluster_pt_num
        } else {
            replica_n * self.db_rep_groups(db).len() as u32
        }
    }

    /// Applies one command at the given log position. The term and index are
    /// recorded for every delivered command; all other state is unmodified
    /// when the command fails validation.
    pub fn apply(&mut self, op: &MetaOp, term: u64, index: u64) -> Result<ApplyResult> {
        self.term = term;
        self.index = index;

        match op {
            MetaOp::CreateDataNode { host, tcp_host, role } => self
                .create_data_node(host, tcp_host, *role)
                .map(ApplyResult::NodeId),
            MetaOp::SetDataNode { id, host, tcp_host } => self
                .set_data_node(*id, host, tcp_host)
                .map(|_| ApplyResult::None),
            MetaOp::CreateMetaNode {
                http_addr,
                rpc_addr,
                tcp_addr,
            } => self
                .create_meta_node(http_addr, rpc_addr, tcp_addr)
                .map(|_| ApplyResult::None),
            MetaOp::SetMetaNode {
                http_addr,
                rpc_addr,
                tcp_addr,
            } => self
                .set_meta_node(http_addr, rpc_addr, tcp_addr)
                .map(|_| ApplyResult::None),
            MetaOp::DeleteMetaNode { id } => {
                self.delete_meta_node(*id).map(|_| ApplyResult::None)
            }
            MetaOp::ClusterChangeState { node_id, status } => {
                Ok(ApplyResult::Changed(self.cluster_change_state(*node_id, *status)))
            }
            MetaOp::UpdateNodeStatus {
                id,
                status,
                logical_time,
                gossip_port,
            } => self
                .update_node_status(*id, *status, *logical_time, gossip_port)
                .map(|_| ApplyResult::None),
            MetaOp::SetSegregateStatus { status, node_ids } => {
                self.set_segregate_node_status(status, node_ids);
                Ok(ApplyResult::None)
            }
            MetaOp::RemoveNode { node_ids } => {
                self.remove_node(node_ids);
                Ok(ApplyResult::None)
            }
            MetaOp::MarkTakeover { enable } => {
                self.mark_takeover(*enable);
                Ok(ApplyResult::None)
            }
            MetaOp::MarkBalancer { enable } => {
                self.mark_balancer(*enable);
                Ok(ApplyResult::None)
            }

            MetaOp::UpdatePtInfo {
                db,
                observed,
                owner,
                status,
            } => self
                .update_pt_info(db, observed, *owner, *status)
                .map(|_| ApplyResult::None),
            MetaOp::UpdatePtVersion { db, pt_id } => {
                self.update_pt_version(db, *pt_id).map(|_| ApplyResult::None)
            }
            MetaOp::UpdateReplication {
                db,
                rg_id,
                master_id,
                peers,
                status,
            } => self
                .update_replication(db, *rg_id, *master_id, peers, *status)
                .map(|_| ApplyResult::None),

            MetaOp::CreateDatabase {
                name,
                rp,
                shard_key,
                enable_tag_array,
                replica_n,
                options,
            } => self
                .apply_create_database(
                    name,
                    rp.clone(),
                    shard_key.clone(),
                    *enable_tag_array,
                    *replica_n,
                    options.clone(),
                )
                .map(|_| ApplyResult::None),
            MetaOp::MarkDatabaseDelete { name } => {
                self.mark_database_delete(name).map(|_| ApplyResult::None)
            }
            MetaOp::DropDatabase { name } => {
                self.drop_database(name);
                Ok(ApplyResult::None)
            }
            MetaOp::CreateRetentionPolicy {
                database,
                rp,
                make_default,
            } => self
                .create_retention_policy(database, rp.clone(), *make_default)
                .map(|_| ApplyResult::None),
            MetaOp::UpdateRetentionPolicy {
                database,
                name,
                update,
                make_default,
            } => self
                .update_retention_policy(database, name, update, *make_default)
                .map(|_| ApplyResult::None),
            MetaOp::MarkRetentionPolicyDelete { database, name } => self
                .mark_retention_policy_delete(database, name)
                .map(|_| ApplyResult::None),
            MetaOp::DropRetentionPolicy { database, name } => self
                .drop_retention_policy(database, name)
                .map(|_| ApplyResult::None),
            MetaOp::SetDefaultRetentionPolicy { database, name } => self
                .set_default_retention_policy(database, name)
                .map(|_| ApplyResult::None),

            MetaOp::CreateMeasurement {
                database,
                rp,
                mst,
                shard_key,
                index_relation,
                engine_type,
                col_store_info,
                fields,
                options,
            } => self
                .create_measurement(
                    database,
                    rp,
                    mst,
                    shard_key.clone(),
                    index_relation.clone(),
                    *engine_type,
                    col_store_info.clone(),
                    fields,
                    options.clone(),
                )
                .map(|_| ApplyResult::None),
            MetaOp::AlterShardKey {
                database,
                rp,
                mst,
                shard_key,
            } => self
                .alter_shard_key(database, rp, mst, shard_key)
                .map(|_| ApplyResult::None),
            MetaOp::UpdateSchema {
                database,
                rp,
                mst,
                fields,
            } => self
                .update_schema(database, rp, mst, fields)
                .map(|_| ApplyResult::None),
            MetaOp::MarkMeasurementDelete { database, rp, mst } => self
                .mark_measurement_delete(database, rp, mst)
                .map(|_| ApplyResult::None),
            MetaOp::DropMeasurement {
                database,
                rp,
                name_with_ver,
            } => self
                .drop_measurement(database, rp, name_with_ver)
                .map(|_| ApplyResult::None),
            MetaOp::UpdateMeasurement {
                database,
                rp,
                mst,
                options,
            } => self
                .update_measurement(database, rp, mst, options)
                .map(|_| ApplyResult::None),

            MetaOp::CreateShardGroup {
                database,
                rp,
                timestamp,
                tier,
                engine_type,
                version,
            } => self
                .create_shard_group(database, rp, *timestamp, *tier, *engine_type, *version)
                .map(|_| ApplyResult::None),
            MetaOp::DeleteShardGroup {
                database,
                rp,
                id,
                deleted_at,
            } => self
                .delete_shard_group(database, rp, *id, *deleted_at)
                .map(|_| ApplyResult::None),
            MetaOp::DeleteIndexGroup {
                database,
                rp,
                id,
                deleted_at,
            } => self
                .delete_index_group(database, rp, *id, *deleted_at)
                .map(|_| ApplyResult::None),
            MetaOp::PruneGroups { shard_group, id } => {
                self.prune_groups(*shard_group, *id);
                Ok(ApplyResult::None)
            }
            MetaOp::DropShard { id, deleted_at } => {
                self.drop_shard(*id, *deleted_at);
                Ok(ApplyResult::None)
            }
            MetaOp::ReSharding(info) => self.re_sharding(info).map(|_| ApplyResult::None),
            MetaOp::UpdateShardTier {
                shard_id,
                tier,
                database,
                rp,
            } => self
                .update_shard_tier(*shard_id, *tier, database, rp)
                .map(|_| ApplyResult::None),
            MetaOp::UpdateShardDownSampleInfo { ident } => self
                .update_shard_down_sample_info(ident)
                .map(|_| ApplyResult::None),

            MetaOp::CreateMigrateEvent(event) => {
                self.create_migrate_event(event).map(|_| ApplyResult::None)
            }
            MetaOp::UpdateMigrateEvent(event) => {
                self.update_migrate_event(event).map(|_| ApplyResult::None)
            }
            MetaOp::RemoveEvent { event_id } => {
                self.remove_event(event_id);
                Ok(ApplyResult::None)
            }

            MetaOp::CreateUser {
                name,
                hash,
                admin,
                rwuser,
            } => self
                .create_user(name, hash, *admin, *rwuser)
                .map(|_| ApplyResult::None),
            MetaOp::DropUser { name } => self.drop_user(name).map(|_| ApplyResult::None),
            MetaOp::UpdateUser { name, hash } => {
                self.update_user(name, hash).map(|_| ApplyResult::None)
            }
            MetaOp::SetPrivilege {
                name,
                database,
                privilege,
            } => self
                .set_privilege(name, database, *privilege)
                .map(|_| ApplyResult::None),
            MetaOp::SetAdminPrivilege { name, admin } => self
                .set_admin_privilege(name, *admin)
                .map(|_| ApplyResult::None),

            MetaOp::CreateStream(info) => self.create_stream(info).map(|_| ApplyResult::None),
            MetaOp::DropStream { name } => self.drop_stream(name).map(|_| ApplyResult::None),

            MetaOp::CreateSubscription {
                database,
                rp,
                name,
                mode,
                destinations,
            } => self
                .create_subscription(database, rp, name, mode, destinations)
                .map(|_| ApplyResult::None),
            MetaOp::DropSubscription { database, rp, name } => self
                .drop_subscription(database, rp, name)
                .map(|_| ApplyResult::None),

            MetaOp::CreateDownSamplePolicy { database, rp, info } => self
                .create_down_sample_policy(database, rp, info)
                .map(|_| ApplyResult::None),
            MetaOp::DropDownSamplePolicy {
                database,
                rp,
                drop_all,
            } => self
                .drop_down_sample_policy(database, rp, *drop_all)
                .map(|_| ApplyResult::None),

            MetaOp::RegisterQueryIdOffset { host } => {
                self.register_query_id_offset(host);
                Ok(ApplyResult::None)
            }
        }
    }

    /// `CreateDatabase` is a composite: pt view, database record and replica
    /// groups. Everything is validated before the first mutation so a failed
    /// command leaves no partial state behind.
    fn apply_create_database(
        &mut self,
        name: &str,
        rp: Option<database::RetentionPolicyInfo>,
        shard_key: Option<measurement::ShardKeyInfo>,
        enable_tag_array: bool,
        replica_n: u32,
        options: Option<database::ObsOptions>,
    ) -> Result<()> {
        match self.check_can_create_database(name) {
            // re-creating an existing database wins, whatever the arguments
            Err(MetaError::DatabaseExists) => return Ok(()),
            other => other?,
        }
        if let Some(rpi) = &rp {
            match self.check_can_create_retention_policy(&DatabaseInfo::new(name), rpi, true) {
                Ok(()) | Err(MetaError::RetentionPolicyExists) => {}
                Err(e) => return Err(e),
            }
        }
        if replica_n > 1 {
            let node_num = self.cluster_pt_num / self.pt_num_per_node;
            if node_num % replica_n != 0 {
                return Err(MetaError::ReplicaNodeNumIncorrect { node_num, replica_n });
            }
        }

        self.create_db_pt_view(name)?;
        self.create_database(name, rp, shard_key, enable_tag_array, replica_n, options)?;
        self.create_replication(name, replica_n)
    }

    /// Assigns (idempotently) the query id range offset for a sql host.
    pub fn register_query_id_offset(&mut self, host: &str) {
        if self.query_id_init.contains_key(host) {
            return;
        }
        let offset = self.query_id_init.len() as u64 * QUERY_ID_SPAN;
        self.query_id_init.insert(host.to_string(), offset);
    }

    /// Clones one database (or all of them) out of a foreign catalog,
    /// renumbering every imported shard group and shard through this
    /// catalog's counters. Returns the old→new shard id map and the names of
    /// the databases created.
    pub fn import_data(
        &mut self,
        other: &MetaData,
        backup_db: &str,
        restore_db: &str,
        backup_rp: &str,
        restore_rp: &str,
    ) -> Result<(HashMap<u64, u64>, Vec<String>)> {
        let mut shard_id_map = HashMap::new();
        if !backup_db.is_empty() {
            let name =
                self.import_one_db(other, backup_db, restore_db, backup_rp, restore_rp, &mut shard_id_map)?;
            return Ok((shard_id_map, vec![name]));
        }

        let mut new_dbs = Vec::new();
        for db_name in other.database_names() {
            if db_name == "_internal" {
                continue;
            }
            let name = self.import_one_db(other, &db_name, "", "", "", &mut shard_id_map)?;
            new_dbs.push(name);
        }
        Ok((shard_id_map, new_dbs))
    }

    fn import_one_db(
        &mut self,
        other: &MetaData,
        backup_db: &str,
        restore_db: &str,
        backup_rp: &str,
        restore_rp: &str,
        shard_id_map: &mut HashMap<u64, u64>,
    ) -> Result<String> {
        let source = other
            .database(backup_db)
            .filter(|dbi| !dbi.mark_deleted)
            .ok_or_else(|| MetaError::ImportDatabaseNotFound(backup_db.to_string()))?;

        let restore_db = if restore_db.is_empty() { backup_db } else { restore_db };
        if self.database(restore_db).is_some() {
            return Err(MetaError::DatabaseExists);
        }
        self.create_database(restore_db, None, None, false, 1, None)?;

        let imported = self.databases.get_mut(restore_db).expect("database present");
        if !backup_rp.is_empty() {
            let source_rp = source
                .retention_policies
                .get(backup_rp)
                .filter(|rp| !rp.mark_deleted)
                .ok_or_else(|| MetaError::ImportRetentionPolicyNotFound {
                    db: backup_db.to_string(),
                    rp: backup_rp.to_string(),
                })?;
            let restore_rp = if restore_rp.is_empty() { backup_rp } else { restore_rp };
            let mut rp_import = source_rp.clone();
            rp_import.name = restore_rp.to_string();
            imported
                .retention_policies
                .insert(restore_rp.to_string(), rp_import);
            imported.default_retention_policy = restore_rp.to_string();
        } else {
            imported.default_retention_policy = source.default_retention_policy.clone();
            for (name, rp) in source.retention_policies.iter() {
                imported.retention_policies.insert(name.clone(), rp.clone());
            }
        }

        // renumber imported shard groups and shards through our counters
        let mut rp_names: Vec<String> = imported.retention_policies.keys().cloned().collect();
        rp_names.sort();
        for rp_name in rp_names {
            let rpi = self
                .databases
                .get_mut(restore_db)
                .expect("database present")
                .retention_policies
                .get_mut(&rp_name)
                .expect("retention policy present");
            for sg_idx in 0..rpi.shard_groups.len() {
                let sg = &mut rpi.shard_groups[sg_idx];
                sg.id = self.max_shard_group_id.alloc();
                for shard in sg.shards.iter_mut() {
                    let old = shard.id.get();
                    shard.id = self.max_shard_id.alloc();
                    shard_id_map.insert(old, shard.id.get());
                }
            }
        }

        Ok(restore_db.to_string())
    }
}

/// Thread-safe handle around the catalog state.
///
/// Writers serialize through [`Catalog::apply`] under the exclusive lock;
/// readers obtain a full deep-clone [`Catalog::snapshot`] under the shared
/// lock and operate on it lock-free thereafter.
#[derive(Debug)]
pub struct Catalog {
    inner: RwLock<MetaData>,
}

impl Catalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            inner: RwLock::new(MetaData::new(config)),
        }
    }

    /// Rehydrates a catalog from a decoded snapshot.
    pub fn from_data(data: MetaData) -> Self {
        Self {
            inner: RwLock::new(data),
        }
    }

    pub fn apply(&self, op: &MetaOp, term: u64, index: u64) -> Result<ApplyResult> {
        self.inner.write().apply(op, term, index)
    }

    /// A deep clone of the whole state; readers never block writers beyond
    /// the duration of the clone.
    pub fn snapshot(&self) -> MetaData {
        self.inner.read().clone()
    }

    /// Term and index of the last delivered command.
    pub fn position(&self) -> (u64, u64) {
        let data = self.inner.read();
        (data.term, data.index)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::database::{RetentionPolicyInfo, NANOS_PER_DAY, NANOS_PER_HOUR};
    use super::measurement::{FieldDataType, FieldSchema, ShardKeyInfo, ShardKeyType};
    use super::node::{NodeRole, NodeStatus};
    use super::ptview::{Peer, PtStatus, Role};
    use super::shard::{EngineType, Tier};
    use super::*;
    use gale_id::IdCounter;
    use pretty_assertions::assert_eq;

    /// 2024-01-01T00:00:00Z
    const T0: i64 = 1_704_067_200 * 1_000_000_000;

    pub(crate) fn meta_with_config(ha_policy: HaPolicy, pt_num_per_node: u32) -> MetaData {
        MetaData::new(CatalogConfig {
            ha_policy,
            pt_num_per_node,
            expand_shards_enable: false,
        })
    }

    pub(crate) fn bootstrap_cluster(nodes: u32, pt_num_per_node: u32) -> MetaData {
        let mut data = meta_with_config(HaPolicy::WriteAvailableFirst, pt_num_per_node);
        for i in 1..=nodes {
            data.create_data_node(
                &format!("h{i}:8086"),
                &format!("h{i}:8400"),
                NodeRole::Writer,
            )
            .unwrap();
        }
        data
    }

    pub(crate) fn rp_spec(
        name: &str,
        duration: i64,
        shard_group_duration: i64,
        index_group_duration: i64,
        replica_n: u32,
    ) -> RetentionPolicyInfo {
        RetentionPolicyInfo {
            name: name.to_string(),
            duration,
            shard_group_duration,
            index_group_duration,
            replica_n,
            ..RetentionPolicyInfo::new(name)
        }
    }

    pub(crate) fn hash_key(keys: &[&str]) -> ShardKeyInfo {
        ShardKeyInfo {
            shard_key: keys.iter().map(|k| k.to_string()).collect(),
            key_type: ShardKeyType::Hash,
            shard_group: 0,
        }
    }

    fn create_database_op(name: &str, replica_n: u32) -> MetaOp {
        MetaOp::CreateDatabase {
            name: name.to_string(),
            rp: Some(rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, replica_n)),
            shard_key: None,
            enable_tag_array: false,
            replica_n,
            options: None,
        }
    }

    fn bootstrap_ops() -> Vec<MetaOp> {
        vec![
            MetaOp::CreateDataNode {
                host: "h1:8086".to_string(),
                tcp_host: "h1:8400".to_string(),
                role: NodeRole::Writer,
            },
            create_database_op("db0", 1),
            MetaOp::CreateMeasurement {
                database: "db0".to_string(),
                rp: "autogen".to_string(),
                mst: "cpu".to_string(),
                shard_key: Some(hash_key(&["host"])),
                index_relation: None,
                engine_type: EngineType::TsStore,
                col_store_info: None,
                fields: vec![FieldSchema {
                    field_name: "host".to_string(),
                    field_type: FieldDataType::String,
                }],
                options: None,
            },
            MetaOp::CreateShardGroup {
                database: "db0".to_string(),
                rp: "autogen".to_string(),
                timestamp: T0 + 30 * 60 * 1_000_000_000,
                tier: Tier::Hot,
                engine_type: EngineType::TsStore,
                version: 0,
            },
        ]
    }

    fn apply_all(catalog: &Catalog, ops: &[MetaOp]) {
        for (i, op) in ops.iter().enumerate() {
            catalog.apply(op, 1, i as u64 + 1).unwrap();
        }
    }

    #[test]
    fn bootstrap_create_db_and_shard_group() {
        let catalog = Catalog::new(CatalogConfig {
            pt_num_per_node: 2,
            ..Default::default()
        });
        apply_all(&catalog, &bootstrap_ops());

        let data = catalog.snapshot();
        assert_eq!(data.cluster_pt_num, 2);
        assert_eq!(data.db_pt_view("db0").unwrap().len(), 2);

        let rpi = data.retention_policy("db0", "autogen").unwrap();
        assert_eq!(rpi.shard_groups.len(), 1);
        let sg = &rpi.shard_groups[0];
        assert_eq!(sg.start_time, T0);
        assert_eq!(sg.end_time, T0 + NANOS_PER_HOUR);
        assert_eq!(sg.shards.len(), 2);
        assert_eq!(sg.shards[0].owners, vec![0]);
        assert_eq!(sg.shards[1].owners, vec![1]);

        assert_eq!(rpi.index_groups.len(), 1);
        let ig = &rpi.index_groups[0];
        assert_eq!(ig.start_time, T0);
        assert_eq!(ig.end_time, T0 + NANOS_PER_DAY);
        assert_eq!(ig.indexes.len(), 2);
        assert_eq!(ig.indexes[0].id, gale_id::IndexId::new(1));
        assert_eq!(ig.indexes[0].owners, vec![0]);
        assert_eq!(ig.indexes[1].id, gale_id::IndexId::new(2));
        assert_eq!(ig.indexes[1].owners, vec![1]);
        for (i, shard) in sg.shards.iter().enumerate() {
            assert_eq!(shard.index_id, ig.indexes[i].id);
        }

        assert_eq!(data.index, 4);
    }

    #[test]
    fn node_failure_offlines_all_owned_pts() {
        let catalog = Catalog::new(CatalogConfig {
            pt_num_per_node: 2,
            ..Default::default()
        });
        apply_all(&catalog, &bootstrap_ops());
        catalog
            .apply(&MetaOp::MarkTakeover { enable: true }, 1, 10)
            .unwrap();

        // bring both pts online first
        let data = catalog.snapshot();
        for pt in data.db_pt_view("db0").unwrap() {
            catalog
                .apply(
                    &MetaOp::UpdatePtInfo {
                        db: "db0".to_string(),
                        observed: pt.clone(),
                        owner: pt.owner.node_id,
                        status: PtStatus::Online,
                    },
                    1,
                    11,
                )
                .unwrap();
        }

        catalog
            .apply(
                &MetaOp::UpdateNodeStatus {
                    id: NodeId::new(1),
                    status: NodeStatus::Failed,
                    logical_time: 10,
                    gossip_port: "8401".to_string(),
                },
                1,
                12,
            )
            .unwrap();

        let data = catalog.snapshot();
        for pt in data.db_pt_view("db0").unwrap() {
            assert_eq!(pt.status, PtStatus::Offline);
            assert_eq!(pt.ver, 2);
        }
        assert_eq!(
            data.data_node(NodeId::new(1)).unwrap().status,
            NodeStatus::Failed
        );
    }

    #[test]
    fn create_database_is_idempotent_and_existing_wins() {
        let catalog = Catalog::new(CatalogConfig::default());
        catalog
            .apply(
                &MetaOp::CreateDataNode {
                    host: "h1:8086".to_string(),
                    tcp_host: "h1:8400".to_string(),
                    role: NodeRole::Writer,
                },
                1,
                1,
            )
            .unwrap();

        catalog.apply(&create_database_op("db0", 1), 1, 2).unwrap();
        catalog.apply(&create_database_op("db0", 1), 1, 3).unwrap();
        // differing arguments: the existing database wins, still Ok
        catalog.apply(&create_database_op("db0", 2), 1, 4).unwrap();

        let data = catalog.snapshot();
        assert_eq!(data.database("db0").unwrap().replica_n, 1);
    }

    #[test]
    fn replica_groups_created_with_database() {
        let catalog = Catalog::new(CatalogConfig {
            ha_policy: HaPolicy::Replication,
            pt_num_per_node: 1,
            expand_shards_enable: false,
        });
        for i in 1..=4u32 {
            catalog
                .apply(
                    &MetaOp::CreateDataNode {
                        host: format!("h{i}:8086"),
                        tcp_host: format!("h{i}:8400"),
                        role: NodeRole::Writer,
                    },
                    1,
                    i as u64,
                )
                .unwrap();
        }
        catalog.apply(&create_database_op("dbR", 2), 1, 5).unwrap();

        let data = catalog.snapshot();
        assert_eq!(data.db_pt_view("dbR").unwrap().len(), 4);
        assert_eq!(data.effective_pt_num("dbR"), 4);

        let groups = data.db_rep_groups("dbR");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].master_pt_id, 0);
        assert_eq!(groups[0].peers, vec![Peer { id: 2, role: Role::Slave }]);
        assert_eq!(groups[1].master_pt_id, 1);
        assert_eq!(groups[1].peers, vec![Peer { id: 3, role: Role::Slave }]);

        let view = data.db_pt_view("dbR").unwrap();
        for (pt, rg) in [(0u32, 0u32), (1, 1), (2, 0), (3, 1)] {
            assert_eq!(view[pt as usize].rg_id, rg);
            // master and peer live on distinct nodes
        }
        assert_ne!(view[0].owner.node_id, view[2].owner.node_id);
        assert_ne!(view[1].owner.node_id, view[3].owner.node_id);
    }

    #[test]
    fn failed_commands_leave_state_unmodified_except_position() {
        let catalog = Catalog::new(CatalogConfig::default());
        // no data node yet: storage not ready
        let err = catalog.apply(&create_database_op("db0", 1), 3, 7);
        assert!(matches!(err, Err(MetaError::StorageNodeNotReady)));

        let data = catalog.snapshot();
        assert!(data.databases.is_empty());
        assert!(data.pt_view.is_empty());
        assert_eq!((data.term, data.index), (3, 7));
    }

    #[test]
    fn replaying_the_same_log_yields_equal_state() {
        let mut ops = bootstrap_ops();
        ops.push(MetaOp::CreateUser {
            name: "root".to_string(),
            hash: "h".to_string(),
            admin: true,
            rwuser: false,
        });
        ops.push(MetaOp::RegisterQueryIdOffset {
            host: "sql1:8086".to_string(),
        });
        ops.push(MetaOp::CreateShardGroup {
            database: "db0".to_string(),
            rp: "autogen".to_string(),
            timestamp: T0 + 2 * NANOS_PER_HOUR,
            tier: Tier::Hot,
            engine_type: EngineType::TsStore,
            version: 0,
        });

        let a = Catalog::new(CatalogConfig { pt_num_per_node: 2, ..Default::default() });
        let b = Catalog::new(CatalogConfig { pt_num_per_node: 2, ..Default::default() });
        apply_all(&a, &ops);
        apply_all(&b, &ops);
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn counters_bound_all_emitted_ids() {
        let catalog = Catalog::new(CatalogConfig { pt_num_per_node: 2, ..Default::default() });
        apply_all(&catalog, &bootstrap_ops());
        let data = catalog.snapshot();

        let rpi = data.retention_policy("db0", "autogen").unwrap();
        for sg in &rpi.shard_groups {
            assert!(sg.id <= data.max_shard_group_id);
            for shard in &sg.shards {
                assert!(shard.id <= data.max_shard_id);
            }
        }
        for ig in &rpi.index_groups {
            assert!(ig.id <= data.max_index_group_id);
            for index in &ig.indexes {
                assert!(index.id <= data.max_index_id);
            }
        }
        for node in &data.data_nodes {
            assert!(node.id <= data.max_node_id);
        }
    }

    #[test]
    fn admin_cache_tracks_users_across_commands() {
        let catalog = Catalog::new(CatalogConfig::default());
        let ops = [
            MetaOp::CreateUser {
                name: "root".to_string(),
                hash: "h1".to_string(),
                admin: true,
                rwuser: false,
            },
            MetaOp::CreateUser {
                name: "bob".to_string(),
                hash: "h2".to_string(),
                admin: false,
                rwuser: true,
            },
            MetaOp::DropUser {
                name: "bob".to_string(),
            },
        ];
        for (i, op) in ops.iter().enumerate() {
            catalog.apply(op, 1, i as u64 + 1).unwrap();
            let data = catalog.snapshot();
            assert_eq!(data.admin_user_exists, data.has_admin_user());
        }
    }

    #[test]
    fn query_id_offsets_are_idempotent_and_disjoint() {
        let mut data = meta_with_config(HaPolicy::WriteAvailableFirst, 1);
        data.register_query_id_offset("sql1:8086");
        data.register_query_id_offset("sql2:8086");
        data.register_query_id_offset("sql1:8086");
        assert_eq!(data.query_id_init.len(), 2);

        let a = data.query_id_init["sql1:8086"];
        let b = data.query_id_init["sql2:8086"];
        assert_ne!(a, b);
        assert_eq!(a % QUERY_ID_SPAN, 0);
        assert_eq!(b % QUERY_ID_SPAN, 0);
    }

    #[test]
    fn import_renumbers_shards() {
        let backup = Catalog::new(CatalogConfig { pt_num_per_node: 2, ..Default::default() });
        apply_all(&backup, &bootstrap_ops());
        let backup = backup.snapshot();
        let old_ids: Vec<u64> = backup.retention_policy("db0", "autogen").unwrap().shard_groups
            [0]
        .shards
        .iter()
        .map(|s| s.id.get())
        .collect();

        let mut data = bootstrap_cluster(1, 2);
        // burn some ids so the imported ones cannot collide
        for _ in 0..10 {
            data.max_shard_id.alloc();
            data.max_shard_group_id.alloc();
        }

        let (shard_id_map, new_dbs) = data.import_data(&backup, "", "", "", "").unwrap();
        assert_eq!(new_dbs, vec!["db0".to_string()]);
        assert_eq!(shard_id_map.len(), 2);
        for old in &old_ids {
            let new = shard_id_map[old];
            assert!(new > 10);
            assert_ne!(new, *old);
        }

        // importing over an existing database is refused
        assert!(matches!(
            data.import_data(&backup, "db0", "", "", ""),
            Err(MetaError::DatabaseExists)
        ));
    }

    #[test]
    fn import_single_rp_renames() {
        let backup = Catalog::new(CatalogConfig { pt_num_per_node: 2, ..Default::default() });
        apply_all(&backup, &bootstrap_ops());
        let backup = backup.snapshot();

        let mut data = bootstrap_cluster(1, 2);
        let (_, dbs) = data
            .import_data(&backup, "db0", "db0_restored", "autogen", "restored")
            .unwrap();
        assert_eq!(dbs, vec!["db0_restored".to_string()]);
        let dbi = data.database("db0_restored").unwrap();
        assert_eq!(dbi.default_retention_policy, "restored");
        assert_eq!(
            data.retention_policy("db0_restored", "restored").unwrap().name,
            "restored"
        );
    }
}
