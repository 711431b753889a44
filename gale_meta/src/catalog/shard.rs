//! Shard groups and index groups.
//!
//! Both are time buckets inside a retention policy, kept sorted by start
//! time, usually on different cadences (`shard_group_duration` vs
//! `index_group_duration`). A shard group holds one shard per pt (hash
//! sharding) or one shard per key range (range sharding); every shard is
//! bound to the index of its pt inside the covering index group.

use gale_id::{DownSampleId, IdCounter, IndexGroupId, IndexId, SerdeVecMap, ShardGroupId, ShardId};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::database::RetentionPolicyInfo;
use crate::catalog::measurement::ShardKeyType;
use crate::catalog::MetaData;
use crate::error::MetaError;
use crate::Result;

/// The largest representable point in time, in nanoseconds since the epoch.
/// Shard group ranges are half-open, so a group covering the end of time has
/// `end_time == MAX_NANO_TIME + 1`, which still fits in an `i64`.
pub const MAX_NANO_TIME: i64 = i64::MAX - 1;

/// Floors `ts` to a multiple of `duration` since the epoch.
pub(crate) fn truncate_nanos(ts: i64, duration: i64) -> i64 {
    ts - ts.rem_euclid(duration)
}

fn clamp_end_time(start: i64, duration: i64) -> i64 {
    let end = start.saturating_add(duration);
    if end > MAX_NANO_TIME {
        MAX_NANO_TIME + 1
    } else {
        end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineType {
    #[default]
    TsStore = 0,
    ColumnStore = 1,
}

/// Storage class of a shard's data, chosen by age at shard group creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tier {
    #[default]
    Hot = 1,
    Warm = 2,
    Cold = 3,
}

impl Tier {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: ShardId,
    /// Owning pt ids, ordered ascending.
    pub owners: Vec<u32>,
    /// The index serving this shard inside the covering index group.
    pub index_id: IndexId,
    pub tier: Tier,
    /// Range bounds; empty for hash-sharded measurements. An empty `min` is
    /// unbounded below, an empty `max` unbounded above.
    pub min: String,
    pub max: String,
    pub down_sample_level: i64,
    pub down_sample_id: DownSampleId,
    pub read_only: bool,
    pub mark_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardGroupInfo {
    pub id: ShardGroupId,
    pub start_time: i64,
    pub end_time: i64,
    /// Shards ordered by pt index (hash) or range position.
    pub shards: Vec<ShardInfo>,
    /// Soft-delete timestamp; zero while live.
    pub deleted_at: i64,
    pub engine_type: EngineType,
    pub version: u32,
}

impl ShardGroupInfo {
    pub fn deleted(&self) -> bool {
        self.deleted_at != 0
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start_time <= ts && ts < self.end_time
    }

    pub fn overlaps(&self, tmin: i64, tmax: i64) -> bool {
        self.start_time <= tmax && self.end_time > tmin
    }

    pub fn shard(&mut self, id: ShardId) -> Option<&mut ShardInfo> {
        self.shards.iter_mut().find(|s| s.id == id)
    }

    pub fn contains_shard_id(&self, id: ShardId) -> bool {
        match (self.shards.first(), self.shards.last()) {
            (Some(first), Some(last)) => first.id <= id && id <= last.id,
            _ => false,
        }
    }

    fn can_delete(&self) -> bool {
        self.shards.iter().all(|s| s.mark_delete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexInfo {
    pub id: IndexId,
    pub owners: Vec<u32>,
    pub mark_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexGroupInfo {
    pub id: IndexGroupId,
    pub start_time: i64,
    pub end_time: i64,
    /// One index per pt id.
    pub indexes: Vec<IndexInfo>,
    pub deleted_at: i64,
    pub engine_type: EngineType,
}

impl IndexGroupInfo {
    pub fn deleted(&self) -> bool {
        self.deleted_at != 0
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start_time <= ts && ts < self.end_time
    }

    pub fn overlaps(&self, tmin: i64, tmax: i64) -> bool {
        self.start_time <= tmax && self.end_time > tmin
    }

    fn can_delete(&self) -> bool {
        self.indexes.iter().all(|i| i.mark_delete)
    }
}

/// Everything a data node needs to address one shard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardIdentifier {
    pub shard_id: u64,
    pub shard_group_id: u64,
    pub owner_db: String,
    pub owner_pt: u32,
    pub policy: String,
    pub shard_type: String,
    pub down_sample_level: i64,
    pub down_sample_id: u64,
    pub read_only: bool,
    pub engine_type: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DurationDescriptor {
    pub tier: Tier,
    pub tier_duration: i64,
    pub duration: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardDurationInfo {
    pub ident: ShardIdentifier,
    pub duration_info: DurationDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardDurationResponse {
    pub data_index: u64,
    pub durations: Vec<ShardDurationInfo>,
}

/// Parameters of a `ReSharding` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReShardingInfo {
    pub database: String,
    pub rp: String,
    pub shard_group_id: ShardGroupId,
    pub split_time: i64,
    pub bounds: Vec<String>,
}

/// Outcome of tier selection for a prospective shard group.
#[derive(Debug, Clone, PartialEq)]
pub enum TierDecision {
    /// A covering group already exists; the caller keeps its tiers.
    Existing(Box<ShardGroupInfo>),
    /// No covering group; a new one should be created at this tier.
    New(Tier),
}

/// Creates an index group with explicit bounds and one index per pt.
fn create_index_group(
    index_groups: &mut Vec<IndexGroupInfo>,
    start_time: i64,
    end_time: i64,
    engine_type: EngineType,
    pt_num: u32,
    max_index_group_id: &mut IndexGroupId,
    max_index_id: &mut IndexId,
) -> IndexGroupId {
    let id = max_index_group_id.alloc();
    let mut igi = IndexGroupInfo {
        id,
        start_time,
        end_time,
        engine_type,
        ..Default::default()
    };
    igi.indexes = (0..pt_num)
        .map(|i| IndexInfo {
            id: max_index_id.alloc(),
            owners: vec![i],
            mark_delete: false,
        })
        .collect();
    index_groups.push(igi);
    index_groups.sort_by_key(|ig| ig.start_time);
    id
}

/// Returns the position of an index group able to cover `(timestamp,
/// engine_type)` with at least `pt_num` indexes, creating a fresh aligned
/// group when none qualifies.
fn create_index_group_if_needed(
    index_groups: &mut Vec<IndexGroupInfo>,
    timestamp: i64,
    index_group_duration: i64,
    engine_type: EngineType,
    pt_num: u32,
    max_index_group_id: &mut IndexGroupId,
    max_index_id: &mut IndexId,
) -> usize {
    if !index_groups.is_empty() {
        let found = index_groups
            .iter()
            .position(|ig| ig.engine_type == engine_type && ig.contains(timestamp));
        if let Some(pos) = found {
            if index_groups[pos].indexes.len() >= pt_num as usize {
                return pos;
            }
        }
    }

    let start = truncate_nanos(timestamp, index_group_duration);
    let end = clamp_end_time(start, index_group_duration);
    let id = create_index_group(
        index_groups,
        start,
        end,
        engine_type,
        pt_num,
        max_index_group_id,
        max_index_id,
    );
    index_groups
        .iter()
        .position(|ig| ig.id == id)
        .expect("created index group present")
}

impl MetaData {
    /// Creates a shard group covering `timestamp` on a retention policy.
    /// A group already covering `(timestamp, engine_type)` makes this a
    /// successful no-op.
    pub fn create_shard_group(
        &mut self,
        database: &str,
        policy: &str,
        timestamp: i64,
        tier: Tier,
        engine_type: EngineType,
        version: u32,
    ) -> Result<()> {
        self.check_store_ready()?;
        let rpi = self.retention_policy(database, policy)?;
        if rpi
            .shard_group_by_timestamp_and_engine_type(timestamp, engine_type)
            .is_some()
        {
            return Ok(());
        }

        // the first measurement decides between hash and range sharding
        let mut mst_names: Vec<&String> = rpi.measurements.keys().collect();
        mst_names.sort();
        let msti = mst_names
            .first()
            .and_then(|name| rpi.measurements.get(*name))
            .ok_or_else(|| MetaError::MeasurementsNotFound {
                db: database.to_string(),
                rp: policy.to_string(),
            })?;
        let range_sharded = msti
            .shard_keys
            .first()
            .is_some_and(|ski| ski.key_type == ShardKeyType::Range);

        let shard_group_duration = rpi.shard_group_duration;
        let index_group_duration = rpi.index_group_duration;
        let pt_num = self.effective_pt_num(database);

        let dbi = self.databases.get_mut(database).expect("database present");
        let rpi = dbi
            .retention_policy_mut(policy)
            .expect("retention policy present");

        let ig_pos = create_index_group_if_needed(
            &mut rpi.index_groups,
            timestamp,
            index_group_duration,
            engine_type,
            pt_num,
            &mut self.max_index_group_id,
            &mut self.max_index_id,
        );

        let start_time = truncate_nanos(timestamp, shard_group_duration);
        let mut sgi = ShardGroupInfo {
            id: self.max_shard_group_id.alloc(),
            start_time,
            end_time: clamp_end_time(start_time, shard_group_duration),
            engine_type,
            version,
            ..Default::default()
        };

        let shard_n = if range_sharded {
            match rpi.shard_groups.last() {
                Some(last) => last.shards.len(),
                None => 1,
            }
        } else {
            pt_num as usize
        };
        let last_range_shards: Option<Vec<(String, String)>> = if range_sharded {
            rpi.shard_groups
                .last()
                .map(|sg| sg.shards.iter().map(|s| (s.min.clone(), s.max.clone())).collect())
        } else {
            None
        };

        let igi = &rpi.index_groups[ig_pos];
        for i in 0..shard_n {
            let mut shard = ShardInfo {
                id: self.max_shard_id.alloc(),
                tier,
                ..Default::default()
            };
            if i < igi.indexes.len() {
                shard.owners = vec![i as u32];
                shard.index_id = igi.indexes[i].id;
            }
            if let Some(bounds) = &last_range_shards {
                shard.min = bounds[i].0.clone();
                shard.max = bounds[i].1.clone();
            }
            sgi.shards.push(shard);
        }

        rpi.shard_groups.push(sgi);
        rpi.shard_groups.sort_by_key(|sg| sg.start_time);
        Ok(())
    }

    /// Splits the newest shard group of a retention policy at `split_time`
    /// into range shards delimited by `bounds`.
    pub fn re_sharding(&mut self, rsi: &ReShardingInfo) -> Result<()> {
        let rpi = self.retention_policy(&rsi.database, &rsi.rp)?;
        let last = rpi.shard_groups.last().ok_or(MetaError::ShardGroupNotFound)?;
        if last.id != rsi.shard_group_id {
            return Err(MetaError::ShardGroupAlreadyReSharding(
                rsi.shard_group_id.get(),
            ));
        }
        let engine_type = last.engine_type;

        let start_time = rsi.split_time + 1;
        self.create_resharding_index_group(&rsi.database, &rsi.rp, start_time, engine_type);
        info!(
            split_time = start_time,
            bounds = ?rsi.bounds,
            "re-sharding"
        );
        self.create_shard_group_with_bounds(
            &rsi.database,
            &rsi.rp,
            start_time,
            &rsi.bounds,
            engine_type,
        )
    }

    /// Appends an index group covering `[start_time, last_end]`, extending
    /// the end over any overlapping predecessor.
    fn create_resharding_index_group(
        &mut self,
        database: &str,
        policy: &str,
        start_time: i64,
        engine_type: EngineType,
    ) {
        let pt_num = self.effective_pt_num(database);

        let dbi = self.databases.get_mut(database).expect("database present");
        let rpi = dbi
            .retention_policy_mut(policy)
            .expect("retention policy present");

        let mut end_time = rpi
            .shard_groups
            .last()
            .map(|sg| sg.end_time)
            .expect("re-sharding checked the shard groups");
        for ig in rpi.index_groups.iter().rev() {
            if ig.overlaps(start_time, end_time) {
                end_time = ig.end_time;
                break;
            }
        }

        create_index_group(
            &mut rpi.index_groups,
            start_time,
            end_time,
            engine_type,
            pt_num,
            &mut self.max_index_group_id,
            &mut self.max_index_id,
        );
    }

    fn create_shard_group_with_bounds(
        &mut self,
        database: &str,
        policy: &str,
        start_time: i64,
        bounds: &[String],
        engine_type: EngineType,
    ) -> Result<()> {
        let pt_num = self.effective_pt_num(database);

        let dbi = self.databases.get_mut(database).expect("database present");
        let rpi = dbi
            .retention_policy_mut(policy)
            .expect("retention policy present");

        let last = rpi.shard_groups.last().expect("shard group present");
        let end_time = last.end_time;
        let last_tier = last.shards.first().map(|s| s.tier).unwrap_or_default();

        let mut sgi = ShardGroupInfo {
            id: self.max_shard_group_id.alloc(),
            start_time,
            end_time,
            engine_type,
            ..Default::default()
        };

        let igi = rpi.index_groups.last().expect("index group present");
        let shard_n = bounds.len() + 1;
        for i in 0..shard_n {
            let mut shard = ShardInfo {
                id: self.max_shard_id.alloc(),
                tier: last_tier,
                ..Default::default()
            };
            for pt_id in 0..pt_num {
                if pt_id as usize % shard_n == i {
                    shard.owners.push(pt_id);
                    shard.index_id = igi.indexes[pt_id as usize].id;
                    break;
                }
            }
            if i != shard_n - 1 {
                shard.max = bounds[i].clone();
            }
            if i > 0 {
                shard.min = bounds[i - 1].clone();
            }
            sgi.shards.push(shard);
        }

        rpi.shard_groups.push(sgi);
        rpi.shard_groups.sort_by_key(|sg| sg.start_time);
        Ok(())
    }

    /// Selects the tier for a prospective shard group at `timestamp`, given
    /// the caller's clock.
    pub fn tier_of_shard_group(
        &self,
        database: &str,
        policy: &str,
        timestamp: i64,
        default_tier: Tier,
        engine_type: EngineType,
        now_ns: i64,
    ) -> Result<TierDecision> {
        let rpi = self.retention_policy(database, policy)?;

        if let Some(sgi) = rpi.shard_group_by_timestamp_and_engine_type(timestamp, engine_type) {
            return Ok(TierDecision::Existing(Box::new(sgi.clone())));
        }

        let start = truncate_nanos(timestamp, rpi.shard_group_duration);
        let end = clamp_end_time(start, rpi.shard_group_duration);

        let mut tier = default_tier;
        if rpi.hot_duration > 0 && end.saturating_add(rpi.hot_duration) < now_ns {
            tier = Tier::Warm;
        }
        if rpi.warm_duration > 0 && end.saturating_add(rpi.warm_duration) < now_ns {
            tier = Tier::Cold;
        }
        Ok(TierDecision::New(tier))
    }

    /// All live shard groups of a retention policy.
    pub fn shard_groups(&self, database: &str, policy: &str) -> Result<Vec<ShardGroupInfo>> {
        let rpi = self.retention_policy(database, policy)?;
        Ok(rpi
            .shard_groups
            .iter()
            .filter(|sg| !sg.deleted())
            .cloned()
            .collect())
    }

    /// Live shard groups that may contain data in `[tmin, tmax]`, ordered by
    /// start time.
    pub fn shard_groups_by_time_range(
        &self,
        database: &str,
        policy: &str,
        tmin: i64,
        tmax: i64,
    ) -> Result<Vec<ShardGroupInfo>> {
        let rpi = self.retention_policy(database, policy)?;
        Ok(rpi
            .shard_groups
            .iter()
            .filter(|sg| !sg.deleted() && sg.overlaps(tmin, tmax))
            .cloned()
            .collect())
    }

    pub fn shard_group_by_timestamp_and_engine_type(
        &self,
        database: &str,
        policy: &str,
        timestamp: i64,
        engine_type: EngineType,
    ) -> Result<Option<ShardGroupInfo>> {
        let rpi = self.retention_policy(database, policy)?;
        Ok(rpi
            .shard_group_by_timestamp_and_engine_type(timestamp, engine_type)
            .cloned())
    }

    /// The newest shard group of a range-sharded retention policy; hash
    /// sharded policies re-shard by pt count instead and return `None`.
    pub fn newest_shard_group(&self, database: &str, policy: &str) -> Option<ShardGroupInfo> {
        let rpi = self.retention_policy(database, policy).ok()?;
        if rpi.sharding_type() != ShardKeyType::Range {
            return None;
        }
        rpi.shard_groups.last().cloned()
    }

    /// Soft-deletes a shard group.
    pub fn delete_shard_group(
        &mut self,
        database: &str,
        policy: &str,
        id: ShardGroupId,
        deleted_at: i64,
    ) -> Result<()> {
        let rpi = self.retention_policy_mut(database, policy)?;
        if let Some(sg) = rpi.shard_groups.iter_mut().find(|sg| sg.id == id) {
            sg.deleted_at = deleted_at;
        }
        Ok(())
    }

    /// Soft-deletes an index group.
    pub fn delete_index_group(
        &mut self,
        database: &str,
        policy: &str,
        id: IndexGroupId,
        deleted_at: i64,
    ) -> Result<()> {
        let rpi = self.retention_policy_mut(database, policy)?;
        if let Some(ig) = rpi.index_groups.iter_mut().find(|ig| ig.id == id) {
            ig.deleted_at = deleted_at;
        }
        Ok(())
    }

    pub fn prune_groups(&mut self, shard_group: bool, id: u64) {
        if shard_group {
            self.prune_shard_groups(ShardId::new(id));
        } else {
            self.prune_index_groups(IndexId::new(id));
        }
    }

    /// Marks shards with id at most `id` for delete and removes soft-deleted
    /// groups whose shards have all been released.
    fn prune_shard_groups(&mut self, id: ShardId) {
        for (_, dbi) in self.databases.iter_mut() {
            for (_, rpi) in dbi.retention_policies.iter_mut() {
                for sg in rpi.shard_groups.iter_mut() {
                    for shard in sg.shards.iter_mut() {
                        if shard.id <= id {
                            shard.mark_delete = true;
                        }
                    }
                }
                rpi.shard_groups
                    .retain(|sg| !(sg.deleted() && sg.can_delete()));
            }
        }
    }

    fn prune_index_groups(&mut self, id: IndexId) {
        for (_, dbi) in self.databases.iter_mut() {
            for (_, rpi) in dbi.retention_policies.iter_mut() {
                for ig in rpi.index_groups.iter_mut() {
                    for index in ig.indexes.iter_mut() {
                        if index.id <= id {
                            index.mark_delete = true;
                        }
                    }
                }
                rpi.index_groups
                    .retain(|ig| !(ig.deleted() && ig.can_delete()));
            }
        }
    }

    /// Removes a shard wherever it lives. Re-running after a partial failure
    /// is safe; a missing shard is not an error. Removing the last shard of
    /// a group soft-deletes the group.
    pub fn drop_shard(&mut self, id: ShardId, deleted_at: i64) {
        for (_, dbi) in self.databases.iter_mut() {
            for (_, rpi) in dbi.retention_policies.iter_mut() {
                for sg in rpi.shard_groups.iter_mut() {
                    if let Some(pos) = sg.shards.iter().position(|s| s.id == id) {
                        sg.shards.remove(pos);
                        if sg.shards.is_empty() {
                            sg.deleted_at = deleted_at;
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Grows every hash-sharded retention policy's index and shard groups to
    /// the database's current effective pt count. Appended shards inherit
    /// the tier of their left neighbour.
    pub fn expand_groups(&mut self) {
        for db in self.database_names() {
            let pt_num = self.effective_pt_num(&db);
            let dbi = self.databases.get_mut(&db).expect("database present");

            let mut rp_names: Vec<String> = dbi.retention_policies.keys().cloned().collect();
            rp_names.sort();

            for rp_name in rp_names {
                let rpi = dbi
                    .retention_policies
                    .get_mut(&rp_name)
                    .expect("retention policy present");
                if rpi.sharding_type() == ShardKeyType::Range {
                    continue;
                }

                for ig in rpi.index_groups.iter_mut() {
                    for i in ig.indexes.len()..pt_num as usize {
                        ig.indexes.push(IndexInfo {
                            id: self.max_index_id.alloc(),
                            owners: vec![i as u32],
                            mark_delete: false,
                        });
                    }
                }

                let index_group_duration = rpi.index_group_duration;
                for sg_idx in 0..rpi.shard_groups.len() {
                    let (start_time, engine_type, cur_len) = {
                        let sg = &rpi.shard_groups[sg_idx];
                        (sg.start_time, sg.engine_type, sg.shards.len())
                    };
                    for i in cur_len..pt_num as usize {
                        let ig_pos = create_index_group_if_needed(
                            &mut rpi.index_groups,
                            start_time,
                            index_group_duration,
                            engine_type,
                            pt_num,
                            &mut self.max_index_group_id,
                            &mut self.max_index_id,
                        );
                        let index_id = rpi.index_groups[ig_pos].indexes[i].id;
                        let sg = &mut rpi.shard_groups[sg_idx];
                        let tier = sg.shards[i - 1].tier;
                        sg.shards.push(ShardInfo {
                            id: self.max_shard_id.alloc(),
                            owners: vec![i as u32],
                            index_id,
                            tier,
                            ..Default::default()
                        });
                    }
                }
            }
        }
    }

    /// Moves one shard to a different storage tier.
    pub fn update_shard_tier(
        &mut self,
        shard_id: ShardId,
        tier: Tier,
        database: &str,
        policy: &str,
    ) -> Result<()> {
        let rpi = self.retention_policy_mut(database, policy)?;
        for sg in rpi.shard_groups.iter_mut() {
            if let Some(shard) = sg.shard(shard_id) {
                shard.tier = tier;
                return Ok(());
            }
        }
        Err(MetaError::ShardNotFound {
            shard_id: shard_id.get(),
            db: database.to_string(),
            rp: policy.to_string(),
        })
    }

    /// Records the downsample progress a data node reports for a shard.
    /// Unknown databases and policies are ignored so the command can be
    /// replayed after a drop.
    pub fn update_shard_down_sample_info(&mut self, ident: &ShardIdentifier) -> Result<()> {
        let Some(dbi) = self.databases.get_mut(&ident.owner_db) else {
            return Ok(());
        };
        let Some(rpi) = dbi.retention_policies.get_mut(&ident.policy) else {
            return Ok(());
        };
        let shard_id = ShardId::new(ident.shard_id);
        for sg in rpi.shard_groups.iter_mut() {
            if sg.contains_shard_id(shard_id) {
                if let Some(shard) = sg.shard(shard_id) {
                    if ident.down_sample_level > shard.down_sample_level {
                        shard.down_sample_level = ident.down_sample_level;
                    }
                    shard.read_only = ident.read_only;
                    shard.down_sample_id = DownSampleId::new(ident.down_sample_id);
                }
            }
        }
        Ok(())
    }

    /// Shard durations for one pt of a database, keyed by shard id.
    pub fn get_shard_durations_by_db_pt(&self, db: &str, pt: u32) -> SerdeVecMap<u64, ShardDurationInfo> {
        let mut res = SerdeVecMap::new();
        let Some(dbi) = self.databases.get(db) else {
            return res;
        };
        for (_, rpi) in dbi.retention_policies.iter() {
            if rpi.mark_deleted {
                continue;
            }
            for sg in &rpi.shard_groups {
                if sg.deleted() {
                    continue;
                }
                if let Some(shard) = sg.shards.get(pt as usize) {
                    res.insert(
                        shard.id.get(),
                        shard_duration_info(db, rpi, sg, shard, pt, Some(rpi.sharding_type())),
                    );
                }
            }
        }
        res
    }

    /// Shard durations for the requested pts of each database.
    pub fn duration_infos(&self, db_pt_ids: &HashMap<String, Vec<u32>>) -> ShardDurationResponse {
        let mut response = ShardDurationResponse {
            data_index: self.index,
            durations: Vec::new(),
        };
        for db in self.database_names() {
            let Some(pt_ids) = db_pt_ids.get(&db) else {
                continue;
            };
            let dbi = self.databases.get(&db).expect("database present");
            let mut rp_names: Vec<&String> = dbi.retention_policies.keys().collect();
            rp_names.sort();
            for rp_name in rp_names {
                let rpi = &dbi.retention_policies[rp_name];
                for sg in &rpi.shard_groups {
                    for shard in &sg.shards {
                        if let Some(pt) = pt_ids
                            .iter()
                            .find(|pt| shard.owners.first() == Some(*pt))
                        {
                            response
                                .durations
                                .push(shard_duration_info(&db, rpi, sg, shard, *pt, None));
                        }
                    }
                }
            }
        }
        response
    }
}

fn shard_duration_info(
    db: &str,
    rpi: &RetentionPolicyInfo,
    sg: &ShardGroupInfo,
    shard: &ShardInfo,
    pt: u32,
    shard_type: Option<ShardKeyType>,
) -> ShardDurationInfo {
    ShardDurationInfo {
        ident: ShardIdentifier {
            shard_id: shard.id.get(),
            shard_group_id: sg.id.get(),
            owner_db: db.to_string(),
            owner_pt: pt,
            policy: rpi.name.clone(),
            shard_type: shard_type.map(|t| t.as_str().to_string()).unwrap_or_default(),
            down_sample_level: shard.down_sample_level,
            down_sample_id: shard.down_sample_id.get(),
            read_only: shard.read_only,
            engine_type: sg.engine_type as u32,
        },
        duration_info: DurationDescriptor {
            tier: shard.tier,
            tier_duration: rpi.tier_duration(shard.tier),
            duration: rpi.duration,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::database::{NANOS_PER_DAY, NANOS_PER_HOUR};
    use crate::catalog::measurement::ShardKeyInfo;
    use crate::catalog::tests::{bootstrap_cluster, hash_key, rp_spec};

    /// 2024-01-01T00:00:00Z
    const T0: i64 = 1_704_067_200 * 1_000_000_000;

    fn with_measurement(nodes: u32, pt_per_node: u32) -> MetaData {
        let mut data = bootstrap_cluster(nodes, pt_per_node);
        data.create_database(
            "db0",
            Some(rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1)),
            None,
            false,
            1,
            None,
        )
        .unwrap();
        data.create_db_pt_view("db0").unwrap();
        data.create_measurement(
            "db0",
            "autogen",
            "cpu",
            Some(hash_key(&["host"])),
            None,
            EngineType::TsStore,
            None,
            &[],
            None,
        )
        .unwrap();
        data
    }

    #[test]
    fn truncation_floors_to_epoch_multiples() {
        assert_eq!(truncate_nanos(T0 + 30 * 60 * 1_000_000_000, NANOS_PER_HOUR), T0);
        assert_eq!(truncate_nanos(T0, NANOS_PER_DAY), T0);
    }

    #[test]
    fn create_shard_group_pairs_shards_with_indexes() {
        // pt_num_per_node = 2 on a single node: two pts, two shards
        let mut data = with_measurement(1, 2);
        data.create_shard_group(
            "db0",
            "autogen",
            T0 + 30 * 60 * 1_000_000_000,
            Tier::Hot,
            EngineType::TsStore,
            0,
        )
        .unwrap();

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
        assert_eq!(ig.indexes[0].owners, vec![0]);
        assert_eq!(ig.indexes[1].owners, vec![1]);

        // every shard is bound to its pt's index
        for (i, shard) in sg.shards.iter().enumerate() {
            assert_eq!(shard.index_id, ig.indexes[i].id);
            assert_eq!(shard.tier, Tier::Hot);
        }

        // same timestamp again: idempotent, nothing new
        data.create_shard_group(
            "db0", "autogen",
            T0 + 30 * 60 * 1_000_000_000,
            Tier::Hot, EngineType::TsStore, 0,
        )
        .unwrap();
        let rpi = data.retention_policy("db0", "autogen").unwrap();
        assert_eq!(rpi.shard_groups.len(), 1);
        assert_eq!(rpi.index_groups.len(), 1);
    }

    #[test]
    fn second_hour_reuses_the_day_index_group() {
        let mut data = with_measurement(1, 2);
        data.create_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, 0)
            .unwrap();
        data.create_shard_group(
            "db0", "autogen",
            T0 + 90 * 60 * 1_000_000_000,
            Tier::Hot, EngineType::TsStore, 0,
        )
        .unwrap();

        let rpi = data.retention_policy("db0", "autogen").unwrap();
        assert_eq!(rpi.shard_groups.len(), 2);
        assert_eq!(rpi.index_groups.len(), 1);
        let ig = &rpi.index_groups[0];
        for sg in &rpi.shard_groups {
            for (i, shard) in sg.shards.iter().enumerate() {
                assert_eq!(shard.index_id, ig.indexes[i].id);
            }
        }
    }

    #[test]
    fn create_shard_group_requires_a_measurement() {
        let mut data = bootstrap_cluster(1, 1);
        data.create_database(
            "db0",
            Some(rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1)),
            None, false, 1, None,
        )
        .unwrap();
        data.create_db_pt_view("db0").unwrap();
        assert!(matches!(
            data.create_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, 0),
            Err(MetaError::MeasurementsNotFound { .. })
        ));
    }

    #[test]
    fn re_sharding_splits_the_newest_group() {
        let mut data = with_measurement(1, 2);
        data.create_shard_group(
            "db0", "autogen",
            T0 + 30 * 60 * 1_000_000_000,
            Tier::Hot, EngineType::TsStore, 0,
        )
        .unwrap();
        let sg1_id = data.retention_policy("db0", "autogen").unwrap().shard_groups[0].id;
        let split_time = T0 + 45 * 60 * 1_000_000_000;

        data.re_sharding(&ReShardingInfo {
            database: "db0".to_string(),
            rp: "autogen".to_string(),
            shard_group_id: sg1_id,
            split_time,
            bounds: vec!["m".to_string()],
        })
        .unwrap();

        let rpi = data.retention_policy("db0", "autogen").unwrap();
        assert_eq!(rpi.shard_groups.len(), 2);
        let sg2 = &rpi.shard_groups[1];
        assert_eq!(sg2.start_time, split_time + 1);
        assert_eq!(sg2.end_time, T0 + NANOS_PER_HOUR);
        assert_eq!(sg2.shards.len(), 2);
        assert_eq!(sg2.shards[0].max, "m");
        assert_eq!(sg2.shards[0].min, "");
        assert_eq!(sg2.shards[1].min, "m");
        assert_eq!(sg2.shards[1].max, "");
        assert_eq!(sg2.shards[0].owners, vec![0]);
        assert_eq!(sg2.shards[1].owners, vec![1]);

        assert_eq!(rpi.index_groups.len(), 2);
        let ig2 = &rpi.index_groups[1];
        assert_eq!(ig2.start_time, split_time + 1);
        assert_eq!(sg2.shards[0].index_id, ig2.indexes[0].id);
        assert_eq!(sg2.shards[1].index_id, ig2.indexes[1].id);

        // only the newest group may be split
        assert!(matches!(
            data.re_sharding(&ReShardingInfo {
                database: "db0".to_string(),
                rp: "autogen".to_string(),
                shard_group_id: sg1_id,
                split_time,
                bounds: vec!["m".to_string()],
            }),
            Err(MetaError::ShardGroupAlreadyReSharding(_))
        ));
    }

    #[test]
    fn tier_selection_uses_group_age() {
        let mut data = with_measurement(1, 1);
        {
            let rpi = data.retention_policy_mut("db0", "autogen").unwrap();
            rpi.hot_duration = NANOS_PER_HOUR;
            rpi.warm_duration = 3 * NANOS_PER_HOUR;
        }

        // fresh group: default tier
        let now = T0 + NANOS_PER_HOUR;
        match data
            .tier_of_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, now)
            .unwrap()
        {
            TierDecision::New(tier) => assert_eq!(tier, Tier::Hot),
            other => panic!("unexpected decision: {other:?}"),
        }

        // end + hot < now: warm
        let now = T0 + 3 * NANOS_PER_HOUR;
        match data
            .tier_of_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, now)
            .unwrap()
        {
            TierDecision::New(tier) => assert_eq!(tier, Tier::Warm),
            other => panic!("unexpected decision: {other:?}"),
        }

        // end + warm < now as well: cold
        let now = T0 + 5 * NANOS_PER_HOUR;
        match data
            .tier_of_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, now)
            .unwrap()
        {
            TierDecision::New(tier) => assert_eq!(tier, Tier::Cold),
            other => panic!("unexpected decision: {other:?}"),
        }

        // an existing group wins regardless of age
        data.create_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, 0)
            .unwrap();
        match data
            .tier_of_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, now)
            .unwrap()
        {
            TierDecision::Existing(sg) => assert_eq!(sg.start_time, T0),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn group_end_clamps_at_the_end_of_time() {
        let mut data = with_measurement(1, 1);
        data.create_shard_group(
            "db0", "autogen",
            MAX_NANO_TIME - 1,
            Tier::Hot, EngineType::TsStore, 0,
        )
        .unwrap();
        let rpi = data.retention_policy("db0", "autogen").unwrap();
        assert_eq!(rpi.shard_groups[0].end_time, MAX_NANO_TIME + 1);
        assert!(rpi.shard_groups[0].contains(MAX_NANO_TIME));
    }

    #[test]
    fn expand_groups_appends_shards_and_indexes() {
        let mut data = with_measurement(1, 1);
        data.create_shard_group("db0", "autogen", T0, Tier::Warm, EngineType::TsStore, 0)
            .unwrap();

        // a second node doubles the pt space
        data.cluster_pt_num = 2;
        data.expand_db_pt_view("db0", 2, gale_id::NodeId::new(1));
        data.expand_groups();

        let rpi = data.retention_policy("db0", "autogen").unwrap();
        let ig = &rpi.index_groups[0];
        let sg = &rpi.shard_groups[0];
        assert_eq!(ig.indexes.len(), 2);
        assert_eq!(sg.shards.len(), 2);
        assert_eq!(sg.shards[1].owners, vec![1]);
        assert_eq!(sg.shards[1].index_id, ig.indexes[1].id);
        // inherited from the left neighbour
        assert_eq!(sg.shards[1].tier, Tier::Warm);
    }

    #[test]
    fn prune_removes_only_released_groups() {
        let mut data = with_measurement(1, 1);
        data.create_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, 0)
            .unwrap();
        let (sg_id, max_shard) = {
            let rpi = data.retention_policy("db0", "autogen").unwrap();
            let sg = &rpi.shard_groups[0];
            (sg.id, sg.shards.last().unwrap().id)
        };

        // marking alone does not remove: the group is not soft-deleted yet
        data.prune_groups(true, max_shard.get());
        assert_eq!(
            data.retention_policy("db0", "autogen").unwrap().shard_groups.len(),
            1
        );

        data.delete_shard_group("db0", "autogen", sg_id, T0).unwrap();
        data.prune_groups(true, max_shard.get());
        assert!(data
            .retention_policy("db0", "autogen")
            .unwrap()
            .shard_groups
            .is_empty());
    }

    #[test]
    fn drop_shard_soft_deletes_emptied_groups() {
        let mut data = with_measurement(1, 2);
        data.create_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, 0)
            .unwrap();
        let ids: Vec<ShardId> = data
            .retention_policy("db0", "autogen")
            .unwrap()
            .shard_groups[0]
            .shards
            .iter()
            .map(|s| s.id)
            .collect();

        data.drop_shard(ids[0], T0);
        {
            let rpi = data.retention_policy("db0", "autogen").unwrap();
            assert_eq!(rpi.shard_groups[0].shards.len(), 1);
            assert!(!rpi.shard_groups[0].deleted());
        }
        data.drop_shard(ids[1], T0 + 1);
        let rpi = data.retention_policy("db0", "autogen").unwrap();
        assert!(rpi.shard_groups[0].shards.is_empty());
        assert_eq!(rpi.shard_groups[0].deleted_at, T0 + 1);
    }

    #[test]
    fn range_sharded_groups_inherit_bounds_and_counts() {
        let mut data = bootstrap_cluster(1, 2);
        data.create_database(
            "db0",
            Some(rp_spec("autogen", 0, NANOS_PER_HOUR, NANOS_PER_DAY, 1)),
            None, false, 1, None,
        )
        .unwrap();
        data.create_db_pt_view("db0").unwrap();
        data.create_measurement(
            "db0", "autogen", "cpu",
            Some(ShardKeyInfo {
                shard_key: vec!["region".to_string()],
                key_type: ShardKeyType::Range,
                shard_group: 0,
            }),
            None, EngineType::TsStore, None, &[], None,
        )
        .unwrap();

        // first group of a range measurement has a single unbounded shard
        data.create_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, 0)
            .unwrap();
        {
            let rpi = data.retention_policy("db0", "autogen").unwrap();
            assert_eq!(rpi.shard_groups[0].shards.len(), 1);
        }

        // newest_shard_group only reports range-sharded policies
        assert!(data.newest_shard_group("db0", "autogen").is_some());

        let sg1 = data.newest_shard_group("db0", "autogen").unwrap();
        data.re_sharding(&ReShardingInfo {
            database: "db0".to_string(),
            rp: "autogen".to_string(),
            shard_group_id: sg1.id,
            split_time: T0 + 30 * 60 * 1_000_000_000,
            bounds: vec!["m".to_string()],
        })
        .unwrap();

        // the next time bucket inherits the split layout
        data.create_shard_group(
            "db0", "autogen",
            T0 + NANOS_PER_HOUR,
            Tier::Hot, EngineType::TsStore, 0,
        )
        .unwrap();
        let rpi = data.retention_policy("db0", "autogen").unwrap();
        let sg3 = rpi.shard_groups.last().unwrap();
        assert_eq!(sg3.shards.len(), 2);
        assert_eq!(sg3.shards[0].max, "m");
        assert_eq!(sg3.shards[1].min, "m");
    }

    #[test]
    fn shard_durations_by_db_pt() {
        let mut data = with_measurement(1, 2);
        data.create_shard_group("db0", "autogen", T0, Tier::Hot, EngineType::TsStore, 0)
            .unwrap();
        let durations = data.get_shard_durations_by_db_pt("db0", 1);
        assert_eq!(durations.len(), 1);
        let info = durations.values().next().unwrap();
        assert_eq!(info.ident.owner_pt, 1);
        assert_eq!(info.ident.owner_db, "db0");
        assert_eq!(info.duration_info.tier, Tier::Hot);
    }
}
