//! Data node and meta node registry.
//!
//! Data nodes own pts; meta nodes only serve the catalog itself. The two
//! share the id space when they co-locate on the same TCP host. Node liveness
//! arrives from the gossip layer as [`NodeStatus`] transitions carried by
//! `UpdateNodeStatus` commands.

use gale_id::{ConnId, IdCounter, NodeId};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::catalog::ptview::PtStatus;
use crate::catalog::{HaPolicy, MetaData};
use crate::error::MetaError;
use crate::Result;

/// Membership status as supplied by the gossip layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    #[default]
    None = 0,
    Alive = 1,
    Leaving = 2,
    Left = 3,
    Failed = 4,
    Reaping = 5,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::None => "none",
            NodeStatus::Alive => "alive",
            NodeStatus::Leaving => "leaving",
            NodeStatus::Left => "left",
            NodeStatus::Failed => "failed",
            NodeStatus::Reaping => "reaping",
        };
        f.write_str(s)
    }
}

/// A node with role `Reader` participates in queries but is excluded from pt
/// placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeRole {
    #[default]
    Writer,
    Reader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SegregateStatus {
    #[default]
    Normal = 0,
    Segregating = 1,
    Segregated = 2,
}

/// A meta node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub host: String,
    pub rpc_addr: String,
    pub tcp_host: String,
    pub status: NodeStatus,
}

/// A data node. `conn_id` is refreshed on every (re-)registration;
/// `alive_conn_id` records the connection generation that last reported
/// alive, which is what the shared-storage split-brain check compares
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataNode {
    pub id: NodeId,
    pub host: String,
    pub tcp_host: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub segregate_status: SegregateStatus,
    pub conn_id: ConnId,
    pub alive_conn_id: ConnId,
    pub logical_time: u64,
    pub gossip_addr: String,
}

impl MetaData {
    pub fn data_node(&self, id: NodeId) -> Option<&DataNode> {
        self.data_nodes.iter().find(|n| n.id == id)
    }

    pub(crate) fn data_node_mut(&mut self, id: NodeId) -> Option<&mut DataNode> {
        self.data_nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn data_node_by_http_host(&self, http_addr: &str) -> Option<&DataNode> {
        self.data_nodes.iter().find(|n| n.host == http_addr)
    }

    pub fn data_node_by_ip(&self, node_ip: &str) -> Option<&DataNode> {
        self.data_nodes
            .iter()
            .find(|n| n.tcp_host.split(':').next() == Some(node_ip))
    }

    /// Ids of all data nodes, sorted ascending.
    pub fn data_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.data_nodes.iter().map(|n| n.id).collect();
        ids.sort();
        ids
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.data_nodes.iter().map(|n| n.id).collect()
    }

    pub fn write_node_count(&self) -> u32 {
        self.data_nodes
            .iter()
            .filter(|n| n.role == NodeRole::Writer)
            .count() as u32
    }

    pub(crate) fn write_nodes(&self) -> Vec<&DataNode> {
        self.data_nodes
            .iter()
            .filter(|n| n.role == NodeRole::Writer)
            .collect()
    }

    pub(crate) fn alive_write_nodes(&self) -> Vec<&DataNode> {
        self.data_nodes
            .iter()
            .filter(|n| {
                n.role == NodeRole::Writer
                    && n.status == NodeStatus::Alive
                    && n.segregate_status == SegregateStatus::Normal
            })
            .collect()
    }

    pub fn alive_data_node_count(&self) -> usize {
        self.data_nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Alive)
            .count()
    }

    pub fn check_data_node_alive(&self, id: NodeId) -> Result<()> {
        let node = self
            .data_node(id)
            .ok_or(MetaError::DataNodeNotFound(id))?;
        if node.segregate_status != SegregateStatus::Normal {
            return Err(MetaError::NodeSegregated {
                node_id: id,
                status: node.segregate_status as u64,
            });
        }
        if node.status != NodeStatus::Alive {
            return Err(MetaError::DataNoAlive);
        }
        Ok(())
    }

    /// Adds a data node to the catalog and returns its id.
    ///
    /// Re-registration of a known TCP host refreshes the node's connection
    /// generation and returns the existing id. A meta node on the same TCP
    /// host shares its id. A successful first registration grows
    /// `cluster_pt_num` to cover the writer fleet and expands every existing
    /// database's pt-view onto the new node.
    pub fn create_data_node(
        &mut self,
        host: &str,
        tcp_host: &str,
        role: NodeRole,
    ) -> Result<NodeId> {
        let conn_id = self.max_conn_id.alloc();
        if let Some(node) = self.data_nodes.iter_mut().find(|n| n.tcp_host == tcp_host) {
            node.conn_id = conn_id;
            return Ok(node.id);
        }

        // A meta node on the same TCP host is the same process, so re-use its
        // id rather than allocating a fresh one.
        let existing = self
            .meta_nodes
            .iter()
            .find(|n| n.tcp_host == tcp_host)
            .map(|n| n.id);
        let id = match existing {
            Some(id) => id,
            None => self.max_node_id.alloc(),
        };

        self.data_nodes.push(DataNode {
            id,
            host: host.to_string(),
            tcp_host: tcp_host.to_string(),
            role,
            conn_id,
            ..Default::default()
        });
        self.data_nodes.sort_by_key(|n| n.id);

        let pt_num = self.pt_num_per_node * self.write_node_count();
        if self.cluster_pt_num < pt_num {
            self.cluster_pt_num = pt_num;
        }

        if role == NodeRole::Reader {
            return Ok(id);
        }

        let db_names = self.database_names();
        for db in db_names {
            self.expand_db_pt_view(&db, self.cluster_pt_num, id);
        }
        if self.expand_shards_enable {
            self.expand_groups();
        }
        Ok(id)
    }

    /// Adds a data node with a pre-specified id; used only when importing an
    /// existing deployment.
    pub fn set_data_node(&mut self, id: NodeId, host: &str, tcp_host: &str) -> Result<()> {
        if self.data_nodes.iter().any(|n| n.host == host) {
            return Err(MetaError::NodeExists);
        }
        self.data_nodes.push(DataNode {
            id,
            host: host.to_string(),
            tcp_host: tcp_host.to_string(),
            ..Default::default()
        });
        Ok(())
    }

    pub fn create_meta_node(
        &mut self,
        http_addr: &str,
        rpc_addr: &str,
        tcp_addr: &str,
    ) -> Result<()> {
        if self.meta_nodes.iter().any(|n| n.host == http_addr) {
            return Ok(());
        }

        let existing = self
            .data_nodes
            .iter()
            .find(|n| n.tcp_host == tcp_addr)
            .map(|n| n.id);
        let id = match existing {
            Some(id) => id,
            None => self.max_node_id.alloc(),
        };

        self.meta_nodes.push(NodeInfo {
            id,
            host: http_addr.to_string(),
            rpc_addr: rpc_addr.to_string(),
            tcp_host: tcp_addr.to_string(),
            status: NodeStatus::default(),
        });
        self.meta_nodes.sort_by_key(|n| n.id);
        Ok(())
    }

    /// Updates the single meta node, or creates it if none exists yet.
    pub fn set_meta_node(
        &mut self,
        http_addr: &str,
        rpc_addr: &str,
        tcp_addr: &str,
    ) -> Result<()> {
        if self.meta_nodes.len() > 1 {
            return Err(MetaError::TooManyMetaNodes);
        }
        if self.meta_nodes.is_empty() {
            return self.create_meta_node(http_addr, rpc_addr, tcp_addr);
        }
        self.meta_nodes[0].host = http_addr.to_string();
        self.meta_nodes[0].tcp_host = tcp_addr.to_string();
        Ok(())
    }

    pub fn delete_meta_node(&mut self, id: NodeId) -> Result<()> {
        if id == NodeId::default() {
            return Err(MetaError::NodeIDRequired);
        }
        let before = self.meta_nodes.len();
        self.meta_nodes.retain(|n| n.id != id);
        if self.meta_nodes.len() == before {
            return Err(MetaError::NodeNotFound);
        }
        Ok(())
    }

    /// Changes a data node's membership state; returns whether the node was
    /// found.
    pub fn cluster_change_state(&mut self, node_id: NodeId, new_state: NodeStatus) -> bool {
        match self.data_node_mut(node_id) {
            Some(node) => {
                node.status = new_state;
                true
            }
            None => false,
        }
    }

    /// Applies a gossip liveness event to a data node.
    ///
    /// No-op while take-over is disabled. Rejects events older than the
    /// node's recorded logical time. Under the shared-storage policy an
    /// `Alive` event for a connection generation that never went away is a
    /// split brain and is rejected. Acceptance marks every pt owned by the
    /// node offline and bumps the pt versions.
    pub fn update_node_status(
        &mut self,
        id: NodeId,
        status: NodeStatus,
        logical_time: u64,
        gossip_port: &str,
    ) -> Result<()> {
        if !self.take_over_enabled {
            return Ok(());
        }
        let ha_policy = self.ha_policy;
        let node = self
            .data_node_mut(id)
            .ok_or(MetaError::DataNodeNotFound(id))?;

        if logical_time < node.logical_time {
            error!(
                node_id = %id,
                ?status,
                logical_time,
                node_logical_time = node.logical_time,
                "node status event is older"
            );
            return Err(MetaError::OlderEvent);
        }

        if ha_policy == HaPolicy::SharedStorage
            && status == NodeStatus::Alive
            && node.conn_id == node.alive_conn_id
        {
            return Err(MetaError::DataNodeSplitBrain);
        }

        node.status = status;
        node.logical_time = logical_time;
        if status == NodeStatus::Alive {
            node.alive_conn_id = node.conn_id;
        }
        if node.gossip_addr.is_empty() {
            let host = node.host.rsplit_once(':').map_or(node.host.as_str(), |(h, _)| h);
            node.gossip_addr = format!("{host}:{gossip_port}");
        }

        self.update_pt_view_status(id, PtStatus::Offline);
        Ok(())
    }

    pub fn get_segregate_status_by_node_id(&self, node_id: NodeId) -> SegregateStatus {
        self.data_node(node_id)
            .map(|n| n.segregate_status)
            .unwrap_or_default()
    }

    pub fn get_node_segregate_status(&self, node_ids: &[NodeId]) -> Result<Vec<SegregateStatus>> {
        node_ids
            .iter()
            .map(|id| {
                self.data_node(*id)
                    .map(|n| n.segregate_status)
                    .ok_or(MetaError::DataNodeNotFound(*id))
            })
            .collect()
    }

    pub fn get_all_node_segregate_status(&self) -> Vec<SegregateStatus> {
        self.data_nodes.iter().map(|n| n.segregate_status).collect()
    }

    pub fn set_segregate_node_status(
        &mut self,
        status: &[SegregateStatus],
        node_ids: &[NodeId],
    ) {
        for (flag, id) in status.iter().zip(node_ids) {
            if let Some(node) = self.data_node_mut(*id) {
                node.segregate_status = *flag;
                info!(node_id = %id, ?flag, "set segregate status");
            }
        }
    }

    /// Resolves a list of node ip addresses to node ids and TCP addresses.
    pub fn get_node_ids_by_host_list(&self, hosts: &[String]) -> Result<(Vec<NodeId>, Vec<String>)> {
        let mut node_ids = Vec::with_capacity(hosts.len());
        let mut addrs = Vec::with_capacity(hosts.len());
        for host in hosts {
            let node = self
                .data_nodes
                .iter()
                .find(|n| n.tcp_host.split(':').next() == Some(host.as_str()))
                .ok_or_else(|| MetaError::NodeIpNotFound(host.clone()))?;
            node_ids.push(node.id);
            addrs.push(node.tcp_host.clone());
        }
        Ok((node_ids, addrs))
    }

    pub fn remove_node(&mut self, node_ids: &[NodeId]) {
        self.data_nodes.retain(|n| !node_ids.contains(&n.id));
    }

    pub fn mark_takeover(&mut self, enable: bool) {
        self.take_over_enabled = enable;
    }

    pub fn mark_balancer(&mut self, enable: bool) {
        self.balancer_enabled = enable;
    }
}
