//! Database and retention policy registry.
//!
//! Databases own retention policies; retention policies own measurements,
//! shard groups, index groups, subscriptions and an optional downsample
//! policy. Deletion is two-phase: a `mark_*_delete` command flags the entity
//! and a later `drop_*` command physically removes it once the storage nodes
//! have released it.

use gale_id::SerdeVecMap;
use serde::{Deserialize, Serialize};

use crate::catalog::measurement::{MeasurementInfo, ShardKeyInfo, ShardKeyType};
use crate::catalog::shard::{IndexGroupInfo, ShardGroupInfo, Tier};
use crate::catalog::stream::DownSamplePolicyInfo;
use crate::catalog::MetaData;
use crate::error::MetaError;
use crate::Result;

/// The default name for auto generated retention policies.
pub const DEFAULT_RETENTION_POLICY_NAME: &str = "autogen";

pub const NANOS_PER_HOUR: i64 = 3_600_000_000_000;
pub const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// The minimum finite duration for a retention policy.
pub const MIN_RETENTION_POLICY_DURATION: i64 = NANOS_PER_HOUR;

/// Object-storage placement options, carried by databases and measurements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObsOptions {
    pub enabled: bool,
    pub bucket_name: String,
    pub endpoint: String,
    pub base_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub default_retention_policy: String,
    pub retention_policies: SerdeVecMap<String, RetentionPolicyInfo>,
    pub shard_key: ShardKeyInfo,
    pub enable_tag_array: bool,
    pub replica_n: u32,
    pub options: Option<ObsOptions>,
    pub mark_deleted: bool,
}

impl DatabaseInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Looks up a retention policy; an empty name resolves to the database
    /// default.
    pub fn retention_policy(&self, name: &str) -> Option<&RetentionPolicyInfo> {
        let name = if name.is_empty() {
            self.default_retention_policy.as_str()
        } else {
            name
        };
        self.retention_policies.get(name)
    }

    pub fn get_retention_policy(&self, name: &str) -> Result<&RetentionPolicyInfo> {
        let rpi = self
            .retention_policy(name)
            .ok_or_else(|| MetaError::RetentionPolicyNotFound(name.to_string()))?;
        if rpi.mark_deleted {
            return Err(MetaError::RpIsBeingDelete);
        }
        Ok(rpi)
    }

    pub(crate) fn retention_policy_mut(&mut self, name: &str) -> Option<&mut RetentionPolicyInfo> {
        let name = if name.is_empty() {
            self.default_retention_policy.as_str()
        } else {
            name
        };
        // resolve the default name first so the map borrow is unambiguous
        let name = name.to_string();
        self.retention_policies.get_mut(&name)
    }

    fn check_update_retention_policy_name(&self, name: &str, new_name: Option<&str>) -> Result<()> {
        match new_name {
            None => Ok(()),
            Some(n) if n == name => Ok(()),
            Some(n) => {
                if self.retention_policies.contains_key(n) {
                    Err(MetaError::RetentionPolicyExists)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// A measurement name bound to its current version number.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeasurementVer {
    pub name_with_version: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub name: String,
    pub mode: String,
    pub destinations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetentionPolicyInfo {
    pub name: String,
    pub replica_n: u32,
    /// All durations are nanoseconds; a `duration` of zero keeps data
    /// forever.
    pub duration: i64,
    pub shard_group_duration: i64,
    pub hot_duration: i64,
    pub warm_duration: i64,
    pub index_group_duration: i64,
    pub measurements: SerdeVecMap<String, MeasurementInfo>,
    pub mst_versions: SerdeVecMap<String, MeasurementVer>,
    pub shard_groups: Vec<ShardGroupInfo>,
    pub index_groups: Vec<IndexGroupInfo>,
    pub subscriptions: Vec<SubscriptionInfo>,
    pub down_sample_policy: Option<DownSamplePolicyInfo>,
    pub mark_deleted: bool,
}

impl RetentionPolicyInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replica_n: 1,
            ..Default::default()
        }
    }

    /// Validates the duration lattice of this policy.
    pub fn check_spec_valid(&self) -> Result<()> {
        if self.shard_group_duration <= 0 {
            return Err(MetaError::ShardGroupDurationRequired);
        }
        if self.duration != 0 && self.duration < MIN_RETENTION_POLICY_DURATION {
            return Err(MetaError::RetentionPolicyDurationTooLow(
                MIN_RETENTION_POLICY_DURATION,
            ));
        }
        if self.duration != 0 && self.duration < self.shard_group_duration {
            return Err(MetaError::IncompatibleDurations);
        }
        if self.index_group_duration < self.shard_group_duration {
            return Err(MetaError::IncompatibleDurations);
        }
        if self.hot_duration != 0 && self.hot_duration < MIN_RETENTION_POLICY_DURATION {
            return Err(MetaError::RetentionPolicyDurationTooLow(
                MIN_RETENTION_POLICY_DURATION,
            ));
        }
        if self.warm_duration != 0 && self.warm_duration < MIN_RETENTION_POLICY_DURATION {
            return Err(MetaError::RetentionPolicyDurationTooLow(
                MIN_RETENTION_POLICY_DURATION,
            ));
        }
        Ok(())
    }

    pub fn equals_another_rp(&self, other: &RetentionPolicyInfo) -> bool {
        self.name == other.name
            && self.replica_n == other.replica_n
            && self.duration == other.duration
            && self.shard_group_duration == other.shard_group_duration
            && self.hot_duration == other.hot_duration
            && self.warm_duration == other.warm_duration
            && self.index_group_duration == other.index_group_duration
    }

    /// Resolves a measurement by its original (unversioned) name.
    pub fn measurement(&self, mst: &str) -> Option<&MeasurementInfo> {
        let ver = self.mst_versions.get(mst)?;
        self.measurements.get(&ver.name_with_version)
    }

    pub(crate) fn measurement_mut(&mut self, mst: &str) -> Option<&mut MeasurementInfo> {
        let name = self.mst_versions.get(mst)?.name_with_version.clone();
        self.measurements.get_mut(&name)
    }

    pub fn get_measurement(&self, mst: &str) -> Result<&MeasurementInfo> {
        self.measurement(mst)
            .filter(|m| !m.mark_deleted)
            .ok_or_else(|| MetaError::MeasurementNotFound(mst.to_string()))
    }

    /// The sharding type of this policy's measurements; policies never mix
    /// hash and range measurements.
    pub fn sharding_type(&self) -> ShardKeyType {
        for (_, mst) in self.measurements.iter() {
            if let Some(ski) = mst.shard_keys.first() {
                return ski.key_type;
            }
        }
        ShardKeyType::Hash
    }

    pub fn max_shard_group_id(&self) -> u64 {
        self.shard_groups
            .iter()
            .map(|sg| sg.id.get())
            .max()
            .unwrap_or(0)
    }

    pub fn shard_group_by_timestamp_and_engine_type(
        &self,
        timestamp: i64,
        engine_type: crate::catalog::shard::EngineType,
    ) -> Option<&ShardGroupInfo> {
        self.shard_groups
            .iter()
            .find(|sg| !sg.deleted() && sg.engine_type == engine_type && sg.contains(timestamp))
    }

    /// The duration after which a shard of `tier` ages out of that tier.
    pub fn tier_duration(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Hot => self.hot_duration,
            Tier::Warm => self.warm_duration,
            Tier::Cold => 0,
        }
    }

    pub fn has_down_sample_policy(&self) -> bool {
        self.down_sample_policy.is_some()
    }

    fn update_with(&mut self, other: &RetentionPolicyInfo) {
        self.name = other.name.clone();
        self.duration = other.duration;
        self.shard_group_duration = other.shard_group_duration;
        self.hot_duration = other.hot_duration;
        self.warm_duration = other.warm_duration;
        self.index_group_duration = other.index_group_duration;
    }
}

/// Fields of a retention policy that `UpdateRetentionPolicy` may change;
/// absent fields keep their current values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetentionPolicyUpdate {
    pub name: Option<String>,
    pub duration: Option<i64>,
    pub shard_group_duration: Option<i64>,
    pub hot_duration: Option<i64>,
    pub warm_duration: Option<i64>,
    pub index_group_duration: Option<i64>,
}

/// Checks that a name is usable as a database or retention policy name.
pub fn valid_name(name: &str) -> bool {
    valid_name_impl(name, r#",:;./\"#)
}

pub fn valid_measurement_name(name: &str) -> bool {
    if name == "." || name == ".." {
        return false;
    }
    valid_name_impl(name, r#",;/\"#)
}

fn valid_name_impl(name: &str, unsupported: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| !c.is_control())
        && !name.chars().any(|c| unsupported.contains(c))
}

impl MetaData {
    pub fn database(&self, name: &str) -> Option<&DatabaseInfo> {
        self.databases.get(name)
    }

    /// Like [`Self::database`] but fails on missing or soft-deleted
    /// databases.
    pub fn get_database(&self, name: &str) -> Result<&DatabaseInfo> {
        let dbi = self
            .database(name)
            .ok_or_else(|| MetaError::DatabaseNotFound(name.to_string()))?;
        if dbi.mark_deleted {
            return Err(MetaError::DatabaseIsBeingDelete(name.to_string()));
        }
        Ok(dbi)
    }

    /// Database names in sorted order, for deterministic walks.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn check_store_ready(&self) -> Result<()> {
        if self.cluster_pt_num == 0 {
            return Err(MetaError::StorageNodeNotReady);
        }
        Ok(())
    }

    pub(crate) fn check_can_create_database(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(MetaError::DatabaseNameRequired);
        }
        self.check_store_ready()?;
        match self.database(name) {
            None => Ok(()),
            Some(dbi) if dbi.mark_deleted => {
                Err(MetaError::DatabaseIsBeingDelete(name.to_string()))
            }
            Some(_) => Err(MetaError::DatabaseExists),
        }
    }

    /// Creates a new database. The caller (the apply dispatcher) has already
    /// run [`Self::check_can_create_database`] and handled the idempotent
    /// re-create case.
    pub(crate) fn create_database(
        &mut self,
        name: &str,
        rpi: Option<RetentionPolicyInfo>,
        shard_key: Option<ShardKeyInfo>,
        enable_tag_array: bool,
        replica_n: u32,
        options: Option<ObsOptions>,
    ) -> Result<()> {
        let mut dbi = DatabaseInfo::new(name);
        if let Some(rpi) = rpi {
            match self.check_can_create_retention_policy(&dbi, &rpi, true) {
                Ok(()) | Err(MetaError::RetentionPolicyExists) => {}
                Err(e) => return Err(e),
            }
            set_retention_policy(&mut dbi, rpi, true);
        }
        if let Some(sk) = shard_key {
            dbi.shard_key = sk;
        }
        dbi.enable_tag_array = enable_tag_array;
        dbi.replica_n = replica_n;
        dbi.options = options;
        self.databases.insert(name.to_string(), dbi);
        Ok(())
    }

    pub fn mark_database_delete(&mut self, name: &str) -> Result<()> {
        let dbi = self
            .databases
            .get(name)
            .ok_or_else(|| MetaError::DatabaseNotFound(name.to_string()))?;
        if dbi.mark_deleted {
            return Err(MetaError::DatabaseIsBeingDelete(name.to_string()));
        }
        self.check_stream_exist_in_database(name)?;
        self.check_migrate_conflict(name)?;
        self.databases
            .get_mut(name)
            .expect("database present")
            .mark_deleted = true;
        Ok(())
    }

    /// Physically removes a database and everything hanging off it. Safe to
    /// re-run; a missing database is not an error.
    pub fn drop_database(&mut self, name: &str) {
        self.databases.remove(name);
        self.replica_groups.remove(name);
        for user in self.users.iter_mut() {
            user.privileges.remove(name);
        }
        self.pt_view.remove(name);
    }

    pub fn retention_policy(&self, database: &str, name: &str) -> Result<&RetentionPolicyInfo> {
        self.get_database(database)?.get_retention_policy(name)
    }

    pub(crate) fn retention_policy_mut(
        &mut self,
        database: &str,
        name: &str,
    ) -> Result<&mut RetentionPolicyInfo> {
        // validate through the read path first so error cases are uniform
        self.retention_policy(database, name)?;
        Ok(self
            .databases
            .get_mut(database)
            .expect("database present")
            .retention_policy_mut(name)
            .expect("retention policy present"))
    }

    pub(crate) fn check_can_create_retention_policy(
        &self,
        dbi: &DatabaseInfo,
        rpi: &RetentionPolicyInfo,
        make_default: bool,
    ) -> Result<()> {
        if rpi.name.is_empty() {
            return Err(MetaError::RetentionPolicyNameRequired);
        }
        if rpi.replica_n < 1 {
            return Err(MetaError::ReplicationFactorTooLow);
        }
        rpi.check_spec_valid()?;

        match dbi.retention_policies.get(&rpi.name) {
            None => {
                if dbi.replica_n != 0 && rpi.replica_n != dbi.replica_n {
                    return Err(MetaError::ReplicaNConflict);
                }
                Ok(())
            }
            Some(existing) => {
                if !existing.equals_another_rp(rpi) {
                    return Err(MetaError::RetentionPolicyConflict);
                }
                if make_default && dbi.default_retention_policy != rpi.name {
                    return Err(MetaError::RetentionPolicyConflict);
                }
                Err(MetaError::RetentionPolicyExists)
            }
        }
    }

    /// Creates a retention policy; re-creating an identical policy is a
    /// successful no-op.
    pub fn create_retention_policy(
        &mut self,
        database: &str,
        rpi: RetentionPolicyInfo,
        make_default: bool,
    ) -> Result<()> {
        let dbi = self.get_database(database)?;
        match self.check_can_create_retention_policy(dbi, &rpi, make_default) {
            Ok(()) => {}
            Err(MetaError::RetentionPolicyExists) => return Ok(()),
            Err(e) => return Err(e),
        }
        let dbi = self.databases.get_mut(database).expect("database present");
        set_retention_policy(dbi, rpi, make_default);
        Ok(())
    }

    /// Updates an existing retention policy. The duration may not change
    /// while a downsample policy is attached.
    pub fn update_retention_policy(
        &mut self,
        database: &str,
        name: &str,
        rpu: &RetentionPolicyUpdate,
        make_default: bool,
    ) -> Result<()> {
        let dbi = self.get_database(database)?;
        let rpi = dbi.get_retention_policy(name)?;

        if rpi.has_down_sample_policy()
            && rpu.duration.is_some_and(|d| d != rpi.duration)
        {
            return Err(MetaError::DownSamplePolicyExists);
        }
        dbi.check_update_retention_policy_name(name, rpu.name.as_deref())?;

        // stage the merged policy and validate it before touching state
        let mut check_rpi = RetentionPolicyInfo {
            name: rpu.name.clone().unwrap_or_else(|| rpi.name.clone()),
            duration: rpu.duration.unwrap_or(rpi.duration),
            shard_group_duration: rpu.shard_group_duration.unwrap_or(rpi.shard_group_duration),
            index_group_duration: rpu.index_group_duration.unwrap_or(rpi.index_group_duration),
            hot_duration: rpu.hot_duration.unwrap_or(rpi.hot_duration),
            warm_duration: rpu.warm_duration.unwrap_or(rpi.warm_duration),
            ..Default::default()
        };
        check_rpi.replica_n = rpi.replica_n;
        check_rpi.check_spec_valid()?;

        let new_name = check_rpi.name.clone();
        let dbi = self.databases.get_mut(database).expect("database present");
        let old_name = if name.is_empty() {
            dbi.default_retention_policy.clone()
        } else {
            name.to_string()
        };
        let mut rpi = dbi
            .retention_policies
            .remove(&old_name)
            .expect("retention policy present");
        rpi.update_with(&check_rpi);
        dbi.retention_policies.insert(new_name.clone(), rpi);
        if dbi.default_retention_policy == old_name {
            dbi.default_retention_policy = new_name.clone();
        }
        if make_default {
            dbi.default_retention_policy = new_name;
        }
        Ok(())
    }

    pub fn mark_retention_policy_delete(&mut self, database: &str, name: &str) -> Result<()> {
        self.retention_policy(database, name)?;
        self.check_stream_exist_in_retention(database, name)?;
        self.check_migrate_conflict(database)?;
        self.retention_policy_mut(database, name)?.mark_deleted = true;
        Ok(())
    }

    /// Removes a retention policy by name; missing policies are ignored.
    pub fn drop_retention_policy(&mut self, database: &str, name: &str) -> Result<()> {
        self.get_database(database)?;
        self.databases
            .get_mut(database)
            .expect("database present")
            .retention_policies
            .remove(name);
        Ok(())
    }

    pub fn set_default_retention_policy(&mut self, database: &str, name: &str) -> Result<()> {
        self.retention_policy(database, name)?;
        self.databases
            .get_mut(database)
            .expect("database present")
            .default_retention_policy = name.to_string();
        Ok(())
    }
}

fn set_retention_policy(dbi: &mut DatabaseInfo, rpi: RetentionPolicyInfo, make_default: bool) {
    let name = rpi.name.clone();
    dbi.retention_policies.insert(name.clone(), rpi);
    if make_default {
        dbi.default_retention_policy = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{bootstrap_cluster, rp_spec};
    use crate::catalog::HaPolicy;

    #[test]
    fn rp_spec_validation() {
        let mut rpi = rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1);
        rpi.check_spec_valid().unwrap();

        rpi.shard_group_duration = 0;
        assert!(matches!(
            rpi.check_spec_valid(),
            Err(MetaError::ShardGroupDurationRequired)
        ));

        rpi.shard_group_duration = NANOS_PER_HOUR;
        rpi.duration = NANOS_PER_HOUR / 2;
        assert!(matches!(
            rpi.check_spec_valid(),
            Err(MetaError::RetentionPolicyDurationTooLow(_))
        ));

        rpi.duration = 0;
        rpi.index_group_duration = NANOS_PER_HOUR / 2;
        assert!(matches!(
            rpi.check_spec_valid(),
            Err(MetaError::IncompatibleDurations)
        ));
    }

    #[test]
    fn create_database_requires_storage() {
        let mut data = crate::catalog::tests::meta_with_config(HaPolicy::WriteAvailableFirst, 1);
        assert!(matches!(
            data.check_can_create_database("db0"),
            Err(MetaError::StorageNodeNotReady)
        ));
        assert!(matches!(
            data.check_can_create_database(""),
            Err(MetaError::DatabaseNameRequired)
        ));
    }

    #[test]
    fn mark_then_drop_database() {
        let mut data = bootstrap_cluster(1, 1);
        data.create_database("db0", Some(rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1)), None, false, 1, None)
            .unwrap();
        data.create_db_pt_view("db0").unwrap();

        data.mark_database_delete("db0").unwrap();
        assert!(matches!(
            data.get_database("db0"),
            Err(MetaError::DatabaseIsBeingDelete(_))
        ));
        // marking twice reports the in-flight deletion
        assert!(matches!(
            data.mark_database_delete("db0"),
            Err(MetaError::DatabaseIsBeingDelete(_))
        ));

        data.drop_database("db0");
        assert!(data.database("db0").is_none());
        assert!(data.db_pt_view("db0").is_none());
    }

    #[test]
    fn create_retention_policy_is_idempotent_on_identical_spec() {
        let mut data = bootstrap_cluster(1, 1);
        data.create_database("db0", None, None, false, 1, None).unwrap();

        let rpi = rp_spec("rp1", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1);
        data.create_retention_policy("db0", rpi.clone(), true).unwrap();
        data.create_retention_policy("db0", rpi.clone(), true).unwrap();

        let mut differing = rpi.clone();
        differing.duration = NANOS_PER_DAY;
        assert!(matches!(
            data.create_retention_policy("db0", differing, true),
            Err(MetaError::RetentionPolicyConflict)
        ));
    }

    #[test]
    fn update_retention_policy_rejects_duration_change_with_downsample() {
        let mut data = bootstrap_cluster(1, 1);
        data.create_database("db0", Some(rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1)), None, false, 1, None)
            .unwrap();
        data.retention_policy_mut("db0", "autogen").unwrap().down_sample_policy =
            Some(Default::default());

        let rpu = RetentionPolicyUpdate {
            duration: Some(NANOS_PER_DAY),
            ..Default::default()
        };
        assert!(matches!(
            data.update_retention_policy("db0", "autogen", &rpu, false),
            Err(MetaError::DownSamplePolicyExists)
        ));
    }

    #[test]
    fn update_retention_policy_renames() {
        let mut data = bootstrap_cluster(1, 1);
        data.create_database("db0", Some(rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1)), None, false, 1, None)
            .unwrap();
        let rpu = RetentionPolicyUpdate {
            name: Some("renamed".to_string()),
            hot_duration: Some(2 * NANOS_PER_HOUR),
            ..Default::default()
        };
        data.update_retention_policy("db0", "autogen", &rpu, false).unwrap();
        let rpi = data.retention_policy("db0", "renamed").unwrap();
        assert_eq!(rpi.hot_duration, 2 * NANOS_PER_HOUR);
        assert_eq!(data.database("db0").unwrap().default_retention_policy, "renamed");
        assert!(data.retention_policy("db0", "autogen").is_err());
    }

    #[test]
    fn empty_rp_name_resolves_default() {
        let mut data = bootstrap_cluster(1, 1);
        data.create_database("db0", Some(rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1)), None, false, 1, None)
            .unwrap();
        assert_eq!(data.retention_policy("db0", "").unwrap().name, "autogen");
    }

    #[test]
    fn name_validation() {
        assert!(valid_name("db0"));
        assert!(!valid_name(""));
        assert!(!valid_name("a/b"));
        assert!(!valid_name("a:b"));
        assert!(valid_measurement_name("cpu"));
        assert!(!valid_measurement_name(".."));
        assert!(!valid_measurement_name("a\\b"));
    }
}
