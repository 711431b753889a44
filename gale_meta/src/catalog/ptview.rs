//! Per-database partition view and replica groups.
//!
//! Each database maps to a dense vector of [`PtInfo`] indexed by pt id. The
//! view only ever grows: cluster expansion appends pts, and shrinking is a
//! bug. With `replica_n > 1` the view is overlaid with [`ReplicaGroup`]s that
//! tie one master pt to `replica_n - 1` slave pts on distinct data nodes.

use gale_id::{NodeId, SerdeVecMap};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::shard::ShardDurationInfo;
use crate::catalog::{HaPolicy, MetaData};
use crate::error::MetaError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PtStatus {
    #[default]
    Offline = 0,
    Online = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PtOwner {
    pub node_id: NodeId,
}

/// One entry of a database's pt view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PtInfo {
    pub owner: PtOwner,
    pub status: PtStatus,
    pub pt_id: u32,
    pub ver: u64,
    pub rg_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Master = 0,
    Slave = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: u32,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RGStatus {
    #[default]
    Health = 0,
    SubHealth = 1,
    UnHealth = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroup {
    pub id: u32,
    pub master_pt_id: u32,
    pub peers: Vec<Peer>,
    pub status: RGStatus,
    pub term: u64,
}

impl ReplicaGroup {
    pub fn new(id: u32, master_pt_id: u32, peers: Vec<Peer>, status: RGStatus, term: u64) -> Self {
        Self {
            id,
            master_pt_id,
            peers,
            status,
            term,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatabaseBriefInfo {
    pub name: String,
    pub enable_tag_array: bool,
}

/// A pt together with the shard durations it owns; handed to data nodes when
/// they pick up or offload a pt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbPtInfo {
    pub db: String,
    pub pt_info: PtInfo,
    pub shards: SerdeVecMap<u64, ShardDurationInfo>,
    pub db_brief_info: DatabaseBriefInfo,
}

impl MetaData {
    pub fn db_pt_view(&self, db: &str) -> Option<&Vec<PtInfo>> {
        self.pt_view.get(db)
    }

    pub fn db_rep_groups(&self, db: &str) -> &[ReplicaGroup] {
        self.replica_groups.get(db).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_replica_group(&self, db: &str, group_id: u32) -> Option<&ReplicaGroup> {
        self.replica_groups
            .get(db)?
            .iter()
            .find(|rg| rg.id == group_id)
    }

    pub fn get_pt_info(&self, db: &str, pt_id: u32) -> Option<&PtInfo> {
        self.pt_view.get(db)?.iter().find(|pt| pt.pt_id == pt_id)
    }

    pub fn get_db_brief_info(&self, db: &str) -> DatabaseBriefInfo {
        DatabaseBriefInfo {
            name: db.to_string(),
            enable_tag_array: self
                .databases
                .get(db)
                .map(|d| d.enable_tag_array)
                .unwrap_or_default(),
        }
    }

    /// Node ids currently owning the given pts of a database.
    pub fn get_db_pt_owners(&self, db: &str, pt_ids: &[u32]) -> Vec<NodeId> {
        let Some(view) = self.pt_view.get(db) else {
            return Vec::new();
        };
        pt_ids
            .iter()
            .filter_map(|pt| view.get(*pt as usize).map(|pi| pi.owner.node_id))
            .collect()
    }

    /// Sets owner and status of one pt, growing the view to `cluster_pt_num`
    /// if needed. The version is forced to at least 1.
    pub(crate) fn update_pt_status(
        &mut self,
        db: &str,
        pt_id: u32,
        node_id: NodeId,
        status: PtStatus,
    ) {
        let pt_num = self.cluster_pt_num as usize;
        let view = self.pt_view.entry(db.to_string()).or_default();
        if view.len() < pt_num {
            view.resize_with(pt_num, PtInfo::default);
        }
        let pi = &mut view[pt_id as usize];
        pi.owner.node_id = node_id;
        pi.status = status;
        pi.pt_id = pt_id;
        if pi.ver == 0 {
            pi.ver = 1;
        }
    }

    /// Marks every pt owned by `node_id` with `status` and bumps its version.
    pub(crate) fn update_pt_view_status(&mut self, node_id: NodeId, status: PtStatus) {
        for (_, view) in self.pt_view.iter_mut() {
            for pt in view.iter_mut() {
                if pt.owner.node_id == node_id {
                    pt.status = status;
                    pt.ver += 1;
                }
            }
        }
    }

    /// Creates the pt view for a fresh database according to the configured
    /// placement policy. Idempotent if the view already exists.
    pub fn create_db_pt_view(&mut self, db: &str) -> Result<()> {
        if self.pt_view.get(db).is_some() {
            return Ok(());
        }
        match self.ha_policy {
            // pts may not migrate under these policies, so spread them over
            // every writer regardless of liveness
            HaPolicy::WriteAvailableFirst | HaPolicy::Replication => {
                let nodes: Vec<NodeId> = self.write_nodes().iter().map(|n| n.id).collect();
                if nodes.is_empty() {
                    return Err(MetaError::DataNoAlive);
                }
                for pt_id in 0..self.cluster_pt_num {
                    let owner = nodes[pt_id as usize % nodes.len()];
                    self.update_pt_status(db, pt_id, owner, PtStatus::Offline);
                }
            }
            // the background balancer can move pts, so only alive writers
            // are eligible
            HaPolicy::SharedStorage => {
                let nodes: Vec<NodeId> = self.alive_write_nodes().iter().map(|n| n.id).collect();
                if nodes.is_empty() {
                    return Err(MetaError::DataNoAlive);
                }
                for pt_id in 0..self.cluster_pt_num {
                    let owner = nodes[pt_id as usize % nodes.len()];
                    self.update_pt_status(db, pt_id, owner, PtStatus::Offline);
                }
            }
        }
        Ok(())
    }

    /// Grows a database's pt view to `pt_num`, placing the new pts on the
    /// node that just joined. Shrinking the view is impossible by
    /// construction and asserts.
    pub(crate) fn expand_db_pt_view(&mut self, db: &str, pt_num: u32, new_node_id: NodeId) {
        let old_pt_num = self.pt_view.get(db).map(|v| v.len() as u32).unwrap_or(0);
        if pt_num == old_pt_num {
            return;
        }
        assert!(
            pt_num > old_pt_num,
            "expand db pt view {db} from {old_pt_num} to {pt_num}"
        );

        let replica_n = self.db_replica_n(db);
        info!(
            db,
            old_pt_num,
            new_pt_num = pt_num,
            replica_n,
            node_num = self.data_nodes.len(),
            "expand db pt view"
        );

        for pt_id in old_pt_num..pt_num {
            // offline until the owner reports a successful assignment
            self.update_pt_status(db, pt_id, new_node_id, PtStatus::Offline);
        }

        let node_num = self.data_nodes.len() as u32;
        if replica_n > 1 && node_num % replica_n == 0 {
            let rep_start = self.db_rep_groups(db).len() as u32;
            let pt_start = self.pt_view.get(db).map(|v| v.len() as u32).unwrap_or(0)
                - replica_n * self.pt_num_per_node;
            self.create_replication_inner(
                db,
                replica_n,
                rep_start,
                rep_start + self.pt_num_per_node,
                pt_start,
            );
        }
    }

    pub fn update_pt_version(&mut self, db: &str, pt_id: u32) -> Result<()> {
        let view = self
            .pt_view
            .get_mut(db)
            .ok_or_else(|| MetaError::DatabaseNotFound(db.to_string()))?;
        let pt = view
            .get_mut(pt_id as usize)
            .filter(|pt| pt.pt_id == pt_id)
            .ok_or(MetaError::PtNotFound)?;
        pt.ver += 1;
        Ok(())
    }

    /// Optimistic pt update: fails if the pt's `(owner, status)` no longer
    /// match the snapshot the caller observed. This is how the migration
    /// protocol avoids lost updates.
    pub fn update_pt_info(
        &mut self,
        db: &str,
        observed: &PtInfo,
        new_owner: NodeId,
        new_status: PtStatus,
    ) -> Result<()> {
        let view = self.pt_view.get(db).map(Vec::as_slice).unwrap_or(&[]);
        let current = view
            .get(observed.pt_id as usize)
            .ok_or(MetaError::PtNotFound)?;
        if current.owner.node_id != observed.owner.node_id || current.status != observed.status {
            return Err(MetaError::PtChanged);
        }
        self.update_pt_status(db, observed.pt_id, new_owner, new_status);
        Ok(())
    }

    pub fn get_pt_infos_by_node_id(&self, id: NodeId) -> Vec<DbPtInfo> {
        let mut res = Vec::with_capacity(self.cluster_pt_num as usize);
        for (db, view) in self.pt_view.iter() {
            let brief = self.get_db_brief_info(db);
            for pt in view {
                if pt.owner.node_id == id {
                    res.push(DbPtInfo {
                        db: db.clone(),
                        pt_info: pt.clone(),
                        shards: self.get_shard_durations_by_db_pt(db, pt.pt_id),
                        db_brief_info: brief.clone(),
                    });
                }
            }
        }
        res
    }

    /// Pts of `node_id` currently in `status`, excluding databases that are
    /// being deleted.
    pub fn get_failed_pt_infos(&self, node_id: NodeId, status: PtStatus) -> Vec<DbPtInfo> {
        let mut res = Vec::with_capacity(self.cluster_pt_num as usize);
        for (db, view) in self.pt_view.iter() {
            let Some(dbi) = self.databases.get(db) else {
                continue;
            };
            if dbi.mark_deleted {
                continue;
            }
            let brief = self.get_db_brief_info(db);
            for pt in view {
                if pt.owner.node_id == node_id && pt.status == status {
                    res.push(DbPtInfo {
                        db: db.clone(),
                        pt_info: pt.clone(),
                        shards: self.get_shard_durations_by_db_pt(db, pt.pt_id),
                        db_brief_info: brief.clone(),
                    });
                }
            }
        }
        res
    }

    /// Offline pts of one database, without shard payloads.
    pub fn get_pt_infos_by_db_name(&self, db: &str) -> Result<Vec<DbPtInfo>> {
        if let Some(dbi) = self.databases.get(db) {
            if dbi.mark_deleted {
                return Err(MetaError::DatabaseIsBeingDelete(db.to_string()));
            }
        }
        let brief = self.get_db_brief_info(db);
        Ok(self
            .pt_view
            .get(db)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter(|pt| pt.status == PtStatus::Offline)
            .map(|pt| DbPtInfo {
                db: db.to_string(),
                pt_info: pt.clone(),
                shards: SerdeVecMap::new(),
                db_brief_info: brief.clone(),
            })
            .collect())
    }

    fn expand_rep_groups(&mut self, db: &str, count: u32) {
        let groups = self.replica_groups.entry(db.to_string()).or_default();
        let start = groups.len() as u32;
        for id in start..start + count {
            groups.push(ReplicaGroup::new(id, 0, Vec::new(), RGStatus::Health, 0));
        }
    }

    /// Lays out one creation batch of replica groups.
    ///
    /// The batch covers pts `[pt_start, pt_start + batch_groups * replica_n)`
    /// where `batch_groups = rep_end - rep_start`: group `rep_start + k` gets
    /// master pt `pt_start + k` and slave pts offset by `batch_groups` per
    /// replica index, which keeps master and slaves on distinct data nodes
    /// under round-robin placement.
    pub(crate) fn create_replication_inner(
        &mut self,
        db: &str,
        replica_n: u32,
        rep_start: u32,
        rep_end: u32,
        pt_start: u32,
    ) {
        let batch_groups = rep_end - rep_start;
        self.expand_rep_groups(db, batch_groups);

        for k in 0..batch_groups {
            let rg_id = rep_start + k;
            let master_pt_id = pt_start + k;
            let mut peers = Vec::with_capacity(replica_n as usize - 1);
            for i in 0..replica_n - 1 {
                let slave_pt_id = pt_start + k + batch_groups * (i + 1);
                peers.push(Peer {
                    id: slave_pt_id,
                    role: Role::Slave,
                });
                if let Some(view) = self.pt_view.get_mut(db) {
                    view[slave_pt_id as usize].rg_id = rg_id;
                }
            }

            let groups = self.replica_groups.get_mut(db).expect("groups expanded");
            groups[rg_id as usize] =
                ReplicaGroup::new(rg_id, master_pt_id, peers, RGStatus::Health, 0);
            if let Some(view) = self.pt_view.get_mut(db) {
                view[master_pt_id as usize].rg_id = rg_id;
            }
        }

        info!(
            db,
            rep_start, rep_end, pt_start, replica_n, "create replication groups"
        );
    }

    /// Creates the full set of replica groups for a fresh database. The
    /// writer fleet must divide evenly into groups of `replica_n` nodes.
    pub fn create_replication(&mut self, db: &str, replica_n: u32) -> Result<()> {
        if replica_n <= 1 {
            return Ok(());
        }
        let pt_num = self.pt_view.get(db).map(|v| v.len() as u32).unwrap_or(0);
        let node_num = pt_num / self.pt_num_per_node;
        if node_num % replica_n != 0 {
            return Err(MetaError::ReplicaNodeNumIncorrect {
                node_num,
                replica_n,
            });
        }
        self.create_replication_inner(db, replica_n, 0, pt_num / replica_n, 0);
        Ok(())
    }

    /// Replaces master, peers and status of one replica group atomically.
    pub fn update_replication(
        &mut self,
        db: &str,
        rg_id: u32,
        master_id: u32,
        peers: &[Peer],
        status: RGStatus,
    ) -> Result<()> {
        let groups = self
            .replica_groups
            .get_mut(db)
            .ok_or_else(|| MetaError::DatabaseNotFound(db.to_string()))?;
        let rg = groups
            .iter_mut()
            .find(|rg| rg.id == rg_id)
            .ok_or(MetaError::PtNotFound)?;
        rg.master_pt_id = master_id;
        if !peers.is_empty() {
            rg.peers = peers.to_vec();
        }
        rg.status = status;
        Ok(())
    }
}
