//! Streams, subscriptions and downsample policies.
//!
//! Streams are continuous transformations between measurements; their
//! existence blocks soft deletion of anything they read from or write to.
//! Subscriptions forward writes of a retention policy to external
//! destinations; every change bumps `max_subscription_id` so forwarders can
//! cheaply detect configuration changes.

use gale_id::{IdCounter, StreamId};
use serde::{Deserialize, Serialize};

use crate::catalog::database::SubscriptionInfo;
use crate::catalog::measurement::FieldDataType;
use crate::catalog::MetaData;
use crate::error::MetaError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamMeasurementInfo {
    pub name: String,
    pub database: String,
    pub retention_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamCall {
    pub call: String,
    pub field: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: String,
    pub id: StreamId,
    pub src_mst: StreamMeasurementInfo,
    pub des_mst: StreamMeasurementInfo,
    pub dims: Vec<String>,
    pub calls: Vec<StreamCall>,
    /// Nanoseconds.
    pub interval: i64,
    pub delay: i64,
}

impl StreamInfo {
    /// Equality ignoring the catalog-assigned id.
    fn same_content(&self, other: &StreamInfo) -> bool {
        self.name == other.name
            && self.src_mst == other.src_mst
            && self.des_mst == other.des_mst
            && self.dims == other.dims
            && self.calls == other.calls
            && self.interval == other.interval
            && self.delay == other.delay
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownSampleOperators {
    pub agg_ops: Vec<String>,
    pub data_type: Option<FieldDataType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownSamplePolicy {
    pub sample_interval: i64,
    pub time_interval: i64,
    pub water_mark: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownSamplePolicyInfo {
    pub calls: Vec<DownSampleOperators>,
    pub down_sample_policies: Vec<DownSamplePolicy>,
    /// Nanoseconds; overwrites the retention policy duration on creation.
    pub duration: i64,
    pub task_id: u64,
}

impl DownSamplePolicyInfo {
    pub fn is_nil(&self) -> bool {
        self.calls.is_empty() && self.down_sample_policies.is_empty()
    }
}

impl MetaData {
    /// Registers a stream; re-creating a stream with identical content is a
    /// successful no-op.
    pub fn create_stream(&mut self, info: &StreamInfo) -> Result<()> {
        if let Some(existing) = self.streams.get(&info.name) {
            if !existing.same_content(info) {
                return Err(MetaError::StreamHasExist);
            }
            return Ok(());
        }
        let mut info = info.clone();
        info.id = self.max_stream_id;
        self.max_stream_id.alloc();
        self.streams.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn drop_stream(&mut self, name: &str) -> Result<()> {
        if self.streams.remove(name).is_none() {
            return Err(MetaError::StreamNotFound);
        }
        Ok(())
    }

    pub(crate) fn check_stream_exist_in_database(&self, database: &str) -> Result<()> {
        for (_, stream) in self.streams.iter() {
            if stream.src_mst.database == database || stream.des_mst.database == database {
                return Err(MetaError::StreamBlocksDelete);
            }
        }
        Ok(())
    }

    pub(crate) fn check_stream_exist_in_retention(&self, database: &str, rp: &str) -> Result<()> {
        for (_, stream) in self.streams.iter() {
            if (stream.src_mst.database == database && stream.src_mst.retention_policy == rp)
                || (stream.des_mst.database == database && stream.des_mst.retention_policy == rp)
            {
                return Err(MetaError::StreamBlocksDelete);
            }
        }
        Ok(())
    }

    pub(crate) fn check_stream_exist_in_measurement(
        &self,
        database: &str,
        rp: &str,
        mst: &str,
    ) -> Result<()> {
        for (_, stream) in self.streams.iter() {
            if (stream.src_mst.database == database
                && stream.src_mst.retention_policy == rp
                && stream.src_mst.name == mst)
                || (stream.des_mst.database == database
                    && stream.des_mst.retention_policy == rp
                    && stream.des_mst.name == mst)
            {
                return Err(MetaError::StreamBlocksDelete);
            }
        }
        Ok(())
    }

    /// Adds a subscription to a retention policy; names are unique within
    /// the policy.
    pub fn create_subscription(
        &mut self,
        database: &str,
        rp: &str,
        name: &str,
        mode: &str,
        destinations: &[String],
    ) -> Result<()> {
        let rpi = self.retention_policy(database, rp)?;
        if rpi.subscriptions.iter().any(|s| s.name == name) {
            return Err(MetaError::SubscriptionExists);
        }
        let rpi = self.retention_policy_mut(database, rp)?;
        rpi.subscriptions.push(SubscriptionInfo {
            name: name.to_string(),
            mode: mode.to_string(),
            destinations: destinations.to_vec(),
        });
        self.max_subscription_id.alloc();
        Ok(())
    }

    /// Drops subscriptions at three scopes: everything (`database` empty),
    /// everything in one database (`name` empty), or one subscription by
    /// name (searching all policies when `rp` is empty).
    pub fn drop_subscription(&mut self, database: &str, rp: &str, name: &str) -> Result<()> {
        if database.is_empty() {
            for (_, dbi) in self.databases.iter_mut() {
                for (_, rpi) in dbi.retention_policies.iter_mut() {
                    rpi.subscriptions.clear();
                }
            }
            self.max_subscription_id.alloc();
            return Ok(());
        }

        if name.is_empty() {
            let dbi = self
                .databases
                .get_mut(database)
                .ok_or_else(|| MetaError::DatabaseNotFound(database.to_string()))?;
            for (_, rpi) in dbi.retention_policies.iter_mut() {
                rpi.subscriptions.clear();
            }
            self.max_subscription_id.alloc();
            return Ok(());
        }

        if rp.is_empty() {
            let dbi = self
                .databases
                .get_mut(database)
                .ok_or_else(|| MetaError::DatabaseNotFound(database.to_string()))?;
            for (_, rpi) in dbi.retention_policies.iter_mut() {
                if let Some(pos) = rpi.subscriptions.iter().position(|s| s.name == name) {
                    rpi.subscriptions.remove(pos);
                    self.max_subscription_id.alloc();
                    return Ok(());
                }
            }
            return Err(MetaError::SubscriptionNotFound);
        }

        self.retention_policy(database, rp)?;
        let rpi = self.retention_policy_mut(database, rp)?;
        if let Some(pos) = rpi.subscriptions.iter().position(|s| s.name == name) {
            rpi.subscriptions.remove(pos);
            self.max_subscription_id.alloc();
            return Ok(());
        }
        Err(MetaError::SubscriptionNotFound)
    }

    /// Attaches a downsample policy to a retention policy, overwriting any
    /// previous one, and pins the policy duration to the downsample horizon.
    pub fn create_down_sample_policy(
        &mut self,
        database: &str,
        rp: &str,
        info: &DownSamplePolicyInfo,
    ) -> Result<()> {
        self.retention_policy(database, rp)?;
        let task_id = self.max_down_sample_id;
        self.max_down_sample_id.alloc();

        let mut info = info.clone();
        info.task_id = task_id.get();
        let rpi = self.retention_policy_mut(database, rp)?;
        rpi.duration = info.duration;
        rpi.down_sample_policy = Some(info);
        Ok(())
    }

    /// Drops the downsample configuration of one policy, or of every policy
    /// in the database.
    pub fn drop_down_sample_policy(&mut self, database: &str, rp: &str, drop_all: bool) -> Result<()> {
        if !drop_all {
            let rpi = self.retention_policy_mut(database, rp)?;
            if let Some(info) = rpi.down_sample_policy.as_mut() {
                info.calls.clear();
                info.down_sample_policies.clear();
            }
            return Ok(());
        }
        let dbi = self
            .databases
            .get_mut(database)
            .ok_or_else(|| MetaError::DatabaseNotFound(database.to_string()))?;
        for (_, rpi) in dbi.retention_policies.iter_mut() {
            rpi.down_sample_policy = None;
        }
        Ok(())
    }
}
