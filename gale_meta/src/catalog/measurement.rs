//! Versioned measurements, shard keys and field schemas.
//!
//! A measurement lives in the catalog under `"{name}_{version}"`; dropping
//! and re-creating a measurement bumps the version (wrapping at `0xffff`)
//! while `mst_versions` tracks the live version per original name. Shard
//! keys keep their full history: each entry records the shard group id at
//! which it became effective.

use serde::{Deserialize, Serialize};

use gale_id::{IdCounter, SerdeVecMap};

use crate::catalog::database::{MeasurementVer, ObsOptions, NANOS_PER_DAY};
use crate::catalog::shard::EngineType;
use crate::catalog::MetaData;
use crate::error::MetaError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShardKeyType {
    #[default]
    Hash,
    Range,
}

impl ShardKeyType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ShardKeyType::Hash => "hash",
            ShardKeyType::Range => "range",
        }
    }
}

impl std::fmt::Display for ShardKeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shard key with the shard group id at which it takes effect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardKeyInfo {
    pub shard_key: Vec<String>,
    pub key_type: ShardKeyType,
    pub shard_group: u64,
}

impl ShardKeyInfo {
    pub fn equals_to_another(&self, other: &ShardKeyInfo) -> bool {
        self.key_type == other.key_type && self.shard_key == other.shard_key
    }
}

/// Column-store layout of a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColStoreInfo {
    pub primary_key: Vec<String>,
    pub sort_key: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexRelation {
    pub oids: Vec<u32>,
    pub index_names: Vec<String>,
    pub index_lists: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldDataType {
    String,
    Integer,
    UInteger,
    Float,
    Boolean,
    Timestamp,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_name: String,
    pub field_type: FieldDataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeasurementOptions {
    /// Time to live; values of at least one day are nanoseconds, smaller
    /// values are days (compatibility with clients predating nanosecond
    /// TTLs).
    pub ttl: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementInfo {
    /// Versioned name, `"{origin_name}_{version}"`.
    pub name: String,
    pub origin_name: String,
    pub engine_type: EngineType,
    /// Shard key history, ordered by the shard group at which each entry
    /// became effective.
    pub shard_keys: Vec<ShardKeyInfo>,
    pub index_relation: Option<IndexRelation>,
    pub col_store_info: Option<ColStoreInfo>,
    pub schema: SerdeVecMap<String, FieldDataType>,
    pub options: Option<MeasurementOptions>,
    pub obs_options: Option<ObsOptions>,
    pub mark_deleted: bool,
}

/// Rejects empty and duplicated shard key entries.
pub fn valid_shard_key(shard_keys: &[String]) -> Result<()> {
    if shard_keys.iter().any(String::is_empty) {
        return Err(MetaError::InvalidShardKey);
    }
    for pair in shard_keys.windows(2) {
        if pair[0] == pair[1] {
            return Err(MetaError::DuplicateShardKey);
        }
    }
    Ok(())
}

impl MetaData {
    /// Resolves a live measurement, overlaying the database's object-store
    /// options when the measurement carries none.
    pub fn measurement(&self, database: &str, rp: &str, mst: &str) -> Result<MeasurementInfo> {
        let dbi = self.get_database(database)?;
        let rpi = dbi.get_retention_policy(rp)?;
        let mut msti = rpi.get_measurement(mst)?.clone();
        if msti.obs_options.is_none() {
            msti.obs_options = dbi.options.clone();
        }
        Ok(msti)
    }

    /// All live measurements of a retention policy.
    pub fn measurements(&self, database: &str, rp: &str) -> Result<Vec<MeasurementInfo>> {
        let dbi = self.get_database(database)?;
        let rpi = dbi.get_retention_policy(rp)?;
        let mut msts: Vec<MeasurementInfo> = rpi
            .measurements
            .values()
            .filter(|m| !m.mark_deleted)
            .cloned()
            .map(|mut m| {
                if m.obs_options.is_none() {
                    m.obs_options = dbi.options.clone();
                }
                m
            })
            .collect();
        if msts.is_empty() {
            return Err(MetaError::MeasurementsNotFound {
                db: database.to_string(),
                rp: rp.to_string(),
            });
        }
        msts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(msts)
    }

    /// Creates a measurement, or re-creates a dropped one under the next
    /// version. Re-creating a live measurement with its current shard key is
    /// a successful no-op.
    pub fn create_measurement(
        &mut self,
        database: &str,
        rp_name: &str,
        mst: &str,
        shard_key: Option<ShardKeyInfo>,
        index_relation: Option<IndexRelation>,
        engine_type: EngineType,
        col_store_info: Option<ColStoreInfo>,
        fields: &[FieldSchema],
        options: Option<MeasurementOptions>,
    ) -> Result<()> {
        let rpi = self.retention_policy(database, rp_name)?;

        let mut ski = shard_key.clone().unwrap_or_default();
        if shard_key.is_some() {
            valid_measurement_shard_type(rpi, ski.key_type)?;
            if rpi.replica_n > 1 && ski.key_type == ShardKeyType::Range {
                return Err(MetaError::ConflictWithRep);
            }
        }
        if col_store_info.is_some() && rpi.replica_n > 1 {
            return Err(MetaError::ConflictWithRep);
        }

        match rpi.measurement(mst) {
            Some(msti) if !msti.mark_deleted => {
                match msti.shard_keys.last() {
                    Some(last) if ski.equals_to_another(last) => Ok(()),
                    _ => Err(MetaError::MeasurementExists),
                }
            }
            _ => {
                // the new shard key takes effect at the next shard group,
                // unless no group exists yet
                ski.shard_group = if rpi.shard_groups.is_empty() {
                    self.max_shard_group_id.peek_next().get()
                } else {
                    0
                };
                let version = rpi
                    .mst_versions
                    .get(mst)
                    .map(|v| (v.version + 1) & 0xffff)
                    .unwrap_or(0);
                let name_with_ver = format!("{mst}_{version}");

                let msti = MeasurementInfo {
                    name: name_with_ver.clone(),
                    origin_name: mst.to_string(),
                    engine_type,
                    shard_keys: if shard_key.is_some() { vec![ski] } else { Vec::new() },
                    index_relation,
                    col_store_info,
                    options,
                    ..Default::default()
                };

                let rpi = self.retention_policy_mut(database, rp_name)?;
                rpi.mst_versions.insert(
                    mst.to_string(),
                    MeasurementVer {
                        name_with_version: name_with_ver.clone(),
                        version,
                    },
                );
                rpi.measurements.insert(name_with_ver, msti);

                if !fields.is_empty() {
                    return self.update_schema(database, rp_name, mst, fields);
                }
                Ok(())
            }
        }
    }

    /// Changes a measurement's shard key. The key type is frozen for the
    /// life of the measurement. If no shard group has been created since the
    /// previous change, the previous entry never took effect and is
    /// overwritten in place; otherwise the new key is appended to the
    /// history.
    pub fn alter_shard_key(
        &mut self,
        database: &str,
        rp_name: &str,
        mst: &str,
        shard_key: &ShardKeyInfo,
    ) -> Result<()> {
        let rpi = self.retention_policy(database, rp_name)?;
        let msti = rpi.get_measurement(mst)?;

        let last = msti
            .shard_keys
            .last()
            .ok_or_else(|| MetaError::MeasurementNotFound(mst.to_string()))?;

        let mut ski = shard_key.clone();
        if ski.key_type != last.key_type {
            return Err(MetaError::ShardingTypeNotEqual {
                rp: rp_name.to_string(),
                old: last.key_type.as_str(),
                new: ski.key_type.as_str(),
            });
        }
        if ski.equals_to_another(last) {
            return Ok(());
        }
        valid_measurement_shard_type(rpi, ski.key_type)?;
        ski.shard_group = self.max_shard_group_id.peek_next().get();

        let overwrite =
            rpi.shard_groups.is_empty() || rpi.max_shard_group_id() < last.shard_group;

        let rpi = self.retention_policy_mut(database, rp_name)?;
        let msti = rpi.measurement_mut(mst).expect("measurement present");
        if overwrite {
            *msti.shard_keys.last_mut().expect("shard key present") = ski;
        } else {
            msti.shard_keys.push(ski);
        }
        Ok(())
    }

    /// Adds fields to a measurement's schema. A type mismatch on any field
    /// fails the whole command and leaves the schema untouched.
    pub fn update_schema(
        &mut self,
        database: &str,
        rp_name: &str,
        mst: &str,
        fields: &[FieldSchema],
    ) -> Result<()> {
        let rpi = self.retention_policy(database, rp_name)?;
        let msti = rpi.get_measurement(mst)?;

        let mut schema = msti.schema.clone();
        for field in fields {
            match schema.get(&field.field_name) {
                None => {
                    schema.insert(field.field_name.clone(), field.field_type);
                }
                Some(existing) if *existing != field.field_type => {
                    return Err(MetaError::FieldTypeConflict);
                }
                Some(_) => {}
            }
        }

        self.retention_policy_mut(database, rp_name)?
            .measurement_mut(mst)
            .expect("measurement present")
            .schema = schema;
        Ok(())
    }

    pub fn mark_measurement_delete(&mut self, database: &str, rp_name: &str, mst: &str) -> Result<()> {
        self.measurement(database, rp_name, mst)?;
        self.check_stream_exist_in_measurement(database, rp_name, mst)?;
        self.check_migrate_conflict(database)?;
        self.retention_policy_mut(database, rp_name)?
            .measurement_mut(mst)
            .expect("measurement present")
            .mark_deleted = true;
        Ok(())
    }

    /// Physically removes a measurement by its versioned name, but only once
    /// it has been soft-deleted.
    pub fn drop_measurement(&mut self, database: &str, rp_name: &str, name_with_ver: &str) -> Result<()> {
        let rpi = self.retention_policy_mut(database, rp_name)?;
        if rpi
            .measurements
            .get(name_with_ver)
            .is_some_and(|m| m.mark_deleted)
        {
            rpi.measurements.remove(name_with_ver);
        }
        Ok(())
    }

    /// Replaces a measurement's options and propagates a TTL change into the
    /// retention policy duration.
    pub fn update_measurement(
        &mut self,
        database: &str,
        rp_name: &str,
        mst: &str,
        options: &MeasurementOptions,
    ) -> Result<()> {
        let rpi = self.retention_policy(database, rp_name)?;
        rpi.get_measurement(mst)?;
        let duration = rpi.duration;

        // TTLs of at least one day are already nanoseconds, older clients
        // send days
        let new_duration = if options.ttl >= NANOS_PER_DAY {
            options.ttl
        } else {
            options.ttl * NANOS_PER_DAY
        };

        let rpi = self.retention_policy_mut(database, rp_name)?;
        rpi.measurement_mut(mst)
            .expect("measurement present")
            .options = Some(options.clone());
        if new_duration != duration {
            rpi.duration = new_duration;
        }
        Ok(())
    }
}

fn valid_measurement_shard_type(
    rpi: &crate::catalog::database::RetentionPolicyInfo,
    key_type: ShardKeyType,
) -> Result<()> {
    for (_, msti) in rpi.measurements.iter() {
        if msti.mark_deleted {
            continue;
        }
        if let Some(ski) = msti.shard_keys.first() {
            if ski.key_type != key_type {
                return Err(MetaError::ShardingTypeNotEqual {
                    rp: rpi.name.clone(),
                    old: ski.key_type.as_str(),
                    new: key_type.as_str(),
                });
            }
        }
    }
    Ok(())
}
