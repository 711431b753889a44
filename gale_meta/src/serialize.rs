//! Framed binary encoding of snapshots and log entries.
//!
//! Every frame is a 10-byte file type identifier, a big-endian CRC32 of the
//! payload, then the bitcode-encoded payload. Map-valued state serializes in
//! key order (see `gale_id::SerdeVecMap`), so encoding the same logical
//! state always produces the same bytes.

use std::io::Cursor;

use anyhow::Context;
use byteorder::{BigEndian, ReadBytesExt};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::catalog::user::UserInfo;
use crate::catalog::MetaData;
use crate::log::MetaOp;
use crate::{MetaError, Result};

const SNAPSHOT_FILE_TYPE_IDENTIFIER: &[u8] = b"gale.001.s";
const LOG_FILE_TYPE_IDENTIFIER: &[u8] = b"gale.001.l";
const USERS_FILE_TYPE_IDENTIFIER: &[u8] = b"gale.001.u";

const CHECKSUM_LEN: usize = size_of::<u32>();

/// The user subset of a snapshot, for nodes that only authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersSnapshot {
    pub term: u64,
    pub index: u64,
    pub admin_user_exists: bool,
    pub users: Vec<UserInfo>,
}

/// A decoded catalog file.
#[derive(Debug)]
pub enum CatalogFile {
    Snapshot(Box<MetaData>),
    Log(MetaOp),
    Users(UsersSnapshot),
}

pub fn serialize_snapshot(data: &MetaData) -> Result<Bytes> {
    let payload = bitcode::serialize(data).context("failed to serialize catalog snapshot")?;
    Ok(frame(SNAPSHOT_FILE_TYPE_IDENTIFIER, payload))
}

pub fn serialize_log(op: &MetaOp) -> Result<Bytes> {
    let payload = bitcode::serialize(op).context("failed to serialize catalog log entry")?;
    Ok(frame(LOG_FILE_TYPE_IDENTIFIER, payload))
}

/// Encodes only the user subset of the state.
pub fn serialize_users(data: &MetaData) -> Result<Bytes> {
    let users = UsersSnapshot {
        term: data.term,
        index: data.index,
        admin_user_exists: data.admin_user_exists,
        users: data.users.clone(),
    };
    let payload = bitcode::serialize(&users).context("failed to serialize catalog users")?;
    Ok(frame(USERS_FILE_TYPE_IDENTIFIER, payload))
}

/// Checks the type identifier and checksum, then decodes the payload.
pub fn verify_and_deserialize(bytes: Bytes) -> Result<CatalogFile> {
    if bytes.starts_with(SNAPSHOT_FILE_TYPE_IDENTIFIER) {
        let data = verified_payload(&bytes, SNAPSHOT_FILE_TYPE_IDENTIFIER.len())?;
        let snapshot =
            bitcode::deserialize(&data).context("failed to deserialize catalog snapshot")?;
        Ok(CatalogFile::Snapshot(Box::new(snapshot)))
    } else if bytes.starts_with(LOG_FILE_TYPE_IDENTIFIER) {
        let data = verified_payload(&bytes, LOG_FILE_TYPE_IDENTIFIER.len())?;
        let op = bitcode::deserialize(&data).context("failed to deserialize catalog log entry")?;
        Ok(CatalogFile::Log(op))
    } else if bytes.starts_with(USERS_FILE_TYPE_IDENTIFIER) {
        let data = verified_payload(&bytes, USERS_FILE_TYPE_IDENTIFIER.len())?;
        let users = bitcode::deserialize(&data).context("failed to deserialize catalog users")?;
        Ok(CatalogFile::Users(users))
    } else {
        Err(MetaError::unexpected("unrecognized catalog file format"))
    }
}

fn verified_payload(bytes: &Bytes, id_len: usize) -> Result<Bytes> {
    if bytes.len() < id_len + CHECKSUM_LEN {
        return Err(MetaError::unexpected("catalog file truncated"));
    }
    let checksum = bytes.slice(id_len..id_len + CHECKSUM_LEN);
    let data = bytes.slice(id_len + CHECKSUM_LEN..);
    verify_checksum(&checksum, &data)?;
    Ok(data)
}

fn verify_checksum(checksum: &[u8], data: &[u8]) -> Result<()> {
    let mut cursor = Cursor::new(checksum);
    let expected = cursor
        .read_u32::<BigEndian>()
        .expect("read big endian u32 checksum");
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    if hasher.finalize() != expected {
        return Err(MetaError::unexpected(
            "crc32 checksum mismatch when deserializing catalog file",
        ));
    }
    Ok(())
}

fn frame(identifier: &[u8], payload: Vec<u8>) -> Bytes {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let mut buf = BytesMut::with_capacity(identifier.len() + CHECKSUM_LEN + payload.len());
    buf.extend_from_slice(identifier);
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(&payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::database::{NANOS_PER_DAY, NANOS_PER_HOUR};
    use crate::catalog::measurement::{FieldDataType, FieldSchema};
    use crate::catalog::shard::{EngineType, Tier};
    use crate::catalog::tests::{bootstrap_cluster, hash_key, rp_spec};
    use pretty_assertions::assert_eq;

    fn populated_state() -> MetaData {
        let mut data = bootstrap_cluster(2, 2);
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
            &[FieldSchema {
                field_name: "host".to_string(),
                field_type: FieldDataType::String,
            }],
            None,
        )
        .unwrap();
        data.create_shard_group(
            "db0",
            "autogen",
            1_704_067_200 * 1_000_000_000,
            Tier::Hot,
            EngineType::TsStore,
            0,
        )
        .unwrap();
        data.create_user("root", "hash", true, false).unwrap();
        data.register_query_id_offset("sql1:8086");
        data
    }

    #[test]
    fn snapshot_round_trips() {
        let data = populated_state();
        let bytes = serialize_snapshot(&data).unwrap();
        match verify_and_deserialize(bytes).unwrap() {
            CatalogFile::Snapshot(decoded) => assert_eq!(*decoded, data),
            other => panic!("unexpected file type: {other:?}"),
        }
    }

    #[test]
    fn snapshot_encoding_is_canonical() {
        // two states built through different interleavings encode equal
        let mut a = bootstrap_cluster(1, 1);
        a.create_database("db_a", None, None, false, 1, None).unwrap();
        a.create_database("db_b", None, None, false, 1, None).unwrap();
        let mut b = bootstrap_cluster(1, 1);
        b.create_database("db_b", None, None, false, 1, None).unwrap();
        b.create_database("db_a", None, None, false, 1, None).unwrap();

        assert_eq!(
            serialize_snapshot(&a).unwrap(),
            serialize_snapshot(&b).unwrap()
        );
    }

    #[test]
    fn log_entries_round_trip() {
        let op = MetaOp::CreateShardGroup {
            database: "db0".to_string(),
            rp: "autogen".to_string(),
            timestamp: 42,
            tier: Tier::Warm,
            engine_type: EngineType::ColumnStore,
            version: 7,
        };
        let bytes = serialize_log(&op).unwrap();
        match verify_and_deserialize(bytes).unwrap() {
            CatalogFile::Log(decoded) => assert_eq!(decoded, op),
            other => panic!("unexpected file type: {other:?}"),
        }
    }

    #[test]
    fn users_subset_round_trips() {
        let data = populated_state();
        let bytes = serialize_users(&data).unwrap();
        match verify_and_deserialize(bytes).unwrap() {
            CatalogFile::Users(users) => {
                assert_eq!(users.users, data.users);
                assert!(users.admin_user_exists);
            }
            other => panic!("unexpected file type: {other:?}"),
        }
    }

    #[test]
    fn corrupt_payloads_are_rejected() {
        let data = populated_state();
        let bytes = serialize_snapshot(&data).unwrap();
        let mut corrupted = bytes.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;
        assert!(verify_and_deserialize(Bytes::from(corrupted)).is_err());

        assert!(verify_and_deserialize(Bytes::from_static(b"not a catalog")).is_err());
    }
}
