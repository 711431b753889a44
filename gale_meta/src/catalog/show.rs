//! Human-readable renderings of catalog state, one row set per `SHOW`
//! surface.

use std::time::{Duration, UNIX_EPOCH};

use gale_id::NodeId;
use serde::{Deserialize, Serialize};

use crate::catalog::MetaData;
use crate::error::MetaError;
use crate::Result;

pub const DATA_NODE: &str = "data";
pub const META_NODE: &str = "meta";

/// One tabular result, named after the entity it describes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row {
    pub name: String,
    pub columns: Vec<String>,
    pub values: Vec<Vec<String>>,
}

impl Row {
    fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            values: Vec::new(),
        }
    }
}

fn format_time_ns(ns: i64) -> String {
    let ns = ns.max(0) as u64;
    humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_nanos(ns)).to_string()
}

fn format_duration_ns(ns: i64) -> String {
    humantime::format_duration(Duration::from_nanos(ns.max(0) as u64)).to_string()
}

fn join_pts(pts: &[NodeId]) -> String {
    pts.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl MetaData {
    /// One row set per database listing every live shard.
    pub fn show_shards(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        for db in self.database_names() {
            let dbi = self.databases.get(&db).expect("database present");
            let mut row = Row::new(
                &db,
                &[
                    "id",
                    "database",
                    "retention_policy",
                    "shard_group",
                    "start_time",
                    "end_time",
                    "expiry_time",
                    "owners",
                    "tier",
                    "downSample_level",
                ],
            );
            let mut rp_names: Vec<&String> = dbi.retention_policies.keys().collect();
            rp_names.sort();
            for rp_name in rp_names {
                let rpi = &dbi.retention_policies[rp_name];
                for sg in &rpi.shard_groups {
                    if sg.deleted() {
                        continue;
                    }
                    for shard in &sg.shards {
                        row.values.push(vec![
                            shard.id.to_string(),
                            db.clone(),
                            rpi.name.clone(),
                            sg.id.to_string(),
                            format_time_ns(sg.start_time),
                            format_time_ns(sg.end_time),
                            format_time_ns(sg.end_time.saturating_add(rpi.duration)),
                            join_pts(&self.get_db_pt_owners(&db, &shard.owners)),
                            shard.tier.as_str().to_string(),
                            shard.down_sample_level.to_string(),
                        ]);
                    }
                }
            }
            rows.push(row);
        }
        rows
    }

    pub fn show_shard_groups(&self) -> Vec<Row> {
        let mut row = Row::new(
            "shard groups",
            &[
                "id",
                "database",
                "retention_policy",
                "start_time",
                "end_time",
                "expiry_time",
            ],
        );
        for db in self.database_names() {
            let dbi = self.databases.get(&db).expect("database present");
            let mut rp_names: Vec<&String> = dbi.retention_policies.keys().collect();
            rp_names.sort();
            for rp_name in rp_names {
                let rpi = &dbi.retention_policies[rp_name];
                for sg in &rpi.shard_groups {
                    if sg.deleted() {
                        continue;
                    }
                    row.values.push(vec![
                        sg.id.to_string(),
                        db.clone(),
                        rpi.name.clone(),
                        format_time_ns(sg.start_time),
                        format_time_ns(sg.end_time),
                        format_time_ns(sg.end_time.saturating_add(rpi.duration)),
                    ]);
                }
            }
        }
        vec![row]
    }

    pub fn show_subscriptions(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        for db in self.database_names() {
            let dbi = self.databases.get(&db).expect("database present");
            let mut row = Row::new(&db, &["retention_policy", "name", "mode", "destinations"]);
            let mut rp_names: Vec<&String> = dbi.retention_policies.keys().collect();
            rp_names.sort();
            for rp_name in rp_names {
                let rpi = &dbi.retention_policies[rp_name];
                for sub in &rpi.subscriptions {
                    row.values.push(vec![
                        rpi.name.clone(),
                        sub.name.clone(),
                        sub.mode.clone(),
                        sub.destinations.join(","),
                    ]);
                }
            }
            if !row.values.is_empty() {
                rows.push(row);
            }
        }
        rows
    }

    pub fn show_retention_policies(&self, database: &str) -> Result<Vec<Row>> {
        let dbi = self
            .database(database)
            .ok_or_else(|| MetaError::DatabaseNotFound(database.to_string()))?;

        let mut row = Row::new(
            "",
            &[
                "name",
                "duration",
                "shardGroupDuration",
                "hot duration",
                "warm duration",
                "index duration",
                "replicaN",
                "default",
            ],
        );
        for (_, rpi) in dbi.retention_policies.iter() {
            row.values.push(vec![
                rpi.name.clone(),
                format_duration_ns(rpi.duration),
                format_duration_ns(rpi.shard_group_duration),
                format_duration_ns(rpi.hot_duration),
                format_duration_ns(rpi.warm_duration),
                format_duration_ns(rpi.index_group_duration),
                rpi.replica_n.to_string(),
                (dbi.default_retention_policy == rpi.name).to_string(),
            ]);
        }
        row.values.sort_by(|a, b| a[0].cmp(&b[0]));
        Ok(vec![row])
    }

    pub fn show_cluster(&self, now_ns: i64) -> Vec<Row> {
        let mut row = Row::new("", &["time", "status", "hostname", "nodeID", "nodeType"]);
        for node in &self.meta_nodes {
            row.values.push(vec![
                now_ns.to_string(),
                node.status.to_string(),
                node.host.clone(),
                node.id.to_string(),
                META_NODE.to_string(),
            ]);
        }
        for node in &self.data_nodes {
            row.values.push(vec![
                now_ns.to_string(),
                node.status.to_string(),
                node.host.clone(),
                node.id.to_string(),
                DATA_NODE.to_string(),
            ]);
        }
        vec![row]
    }

    /// Like [`Self::show_cluster`] restricted to one node type and/or node
    /// id; an id of zero matches every node.
    pub fn show_cluster_filtered(&self, node_type: &str, id: u64, now_ns: i64) -> Result<Vec<Row>> {
        let mut row = Row::new("", &["time", "status", "hostname", "nodeID", "nodeType"]);
        let want = |node_id: NodeId| id == 0 || node_id.get() == id;

        if node_type != DATA_NODE {
            for node in &self.meta_nodes {
                if want(node.id) {
                    row.values.push(vec![
                        now_ns.to_string(),
                        node.status.to_string(),
                        node.host.clone(),
                        node.id.to_string(),
                        META_NODE.to_string(),
                    ]);
                }
            }
        }
        if node_type != META_NODE {
            for node in &self.data_nodes {
                if want(node.id) {
                    row.values.push(vec![
                        now_ns.to_string(),
                        node.status.to_string(),
                        node.host.clone(),
                        node.id.to_string(),
                        DATA_NODE.to_string(),
                    ]);
                }
            }
        }
        if row.values.is_empty() {
            return Err(MetaError::InValidNodeID(id));
        }
        Ok(vec![row])
    }

    pub fn show_down_sample_policies(&self, database: &str) -> Result<Vec<Row>> {
        let dbi = self.get_database(database)?;
        let mut row = Row::new(
            "",
            &[
                "rpName",
                "field_operator",
                "duration",
                "sampleInterval",
                "timeInterval",
            ],
        );
        for (_, rpi) in dbi.retention_policies.iter() {
            let Some(info) = &rpi.down_sample_policy else {
                continue;
            };
            if info.is_nil() {
                continue;
            }
            let ops = info
                .calls
                .iter()
                .flat_map(|c| c.agg_ops.iter().cloned())
                .collect::<Vec<_>>()
                .join(",");
            let samples = info
                .down_sample_policies
                .iter()
                .map(|p| format_duration_ns(p.sample_interval))
                .collect::<Vec<_>>()
                .join(",");
            let times = info
                .down_sample_policies
                .iter()
                .map(|p| format_duration_ns(p.time_interval))
                .collect::<Vec<_>>()
                .join(",");
            row.values.push(vec![
                rpi.name.clone(),
                ops,
                format_duration_ns(info.duration),
                samples,
                times,
            ]);
        }
        row.values.sort_by(|a, b| a[0].cmp(&b[0]));
        Ok(vec![row])
    }

    pub fn show_streams(&self, database: &str, show_all: bool) -> Result<Vec<Row>> {
        if !show_all {
            self.get_database(database)?;
        }
        let mut row = Row::new(
            "",
            &[
                "database",
                "retention",
                "measurement",
                "name",
                "source measurement",
                "dimensions",
                "calls",
                "interval",
                "delay",
            ],
        );
        for (_, stream) in self.streams.iter() {
            if !show_all && stream.des_mst.database != database {
                continue;
            }
            let calls = stream
                .calls
                .iter()
                .map(|c| c.call.clone())
                .collect::<Vec<_>>()
                .join(",");
            row.values.push(vec![
                stream.des_mst.database.clone(),
                stream.des_mst.retention_policy.clone(),
                stream.des_mst.name.clone(),
                stream.name.clone(),
                format!(
                    "{}.{}.{}",
                    stream.src_mst.database, stream.src_mst.retention_policy, stream.src_mst.name
                ),
                stream.dims.join(","),
                calls,
                format_duration_ns(stream.interval),
                format_duration_ns(stream.delay),
            ]);
        }
        row.values.sort_by(|a, b| a[0].cmp(&b[0]));
        Ok(vec![row])
    }
}
