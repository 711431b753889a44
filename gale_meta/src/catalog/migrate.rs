//! In-flight pt migration events.
//!
//! A migration event serializes DDL against data movement: while a pt of a
//! database has an active event, the database, its retention policies and
//! its measurements refuse soft deletion, and vice versa an event refuses to
//! start while any of those are being deleted.

use gale_id::{EventOpId, IdCounter, NodeId};
use serde::{Deserialize, Serialize};

use crate::catalog::MetaData;
use crate::error::MetaError;
use crate::Result;

const SEPARATOR_CHAR: char = '$';

/// The event key for a pt of a database.
pub fn migrate_event_id(db: &str, pt_id: u32) -> String {
    format!("{db}{SEPARATOR_CHAR}{pt_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MigrateEventInfo {
    pub event_id: String,
    /// Allocated by the catalog when the event is created; updates must
    /// quote it.
    pub op_id: EventOpId,
    pub db: String,
    pub pt_id: u32,
    pub src: NodeId,
    pub dest: NodeId,
    pub curr_state: i32,
    pub pre_state: i32,
    pub check_conflict: bool,
}

impl MetaData {
    /// Records a migration event. Re-creating an event with identical
    /// endpoints and states is a successful no-op; anything else on the same
    /// key is a conflict.
    pub fn create_migrate_event(&mut self, event: &MigrateEventInfo) -> Result<()> {
        if let Some(existing) = self.migrate_events.get(&event.event_id) {
            if existing.src != event.src
                || existing.dest != event.dest
                || existing.curr_state != event.curr_state
                || existing.pre_state != event.pre_state
            {
                return Err(MetaError::PtEventIsAlreadyExist);
            }
            return Ok(());
        }
        self.check_ddl_conflict(event)?;
        let mut event = event.clone();
        event.op_id = self.max_event_op_id.alloc();
        self.migrate_events.insert(event.event_id.clone(), event);
        Ok(())
    }

    /// Advances an event's state pair; the caller must hold the current
    /// `op_id`.
    pub fn update_migrate_event(&mut self, event: &MigrateEventInfo) -> Result<()> {
        let existing = self
            .migrate_events
            .get_mut(&event.event_id)
            .filter(|e| e.op_id == event.op_id)
            .ok_or_else(|| MetaError::EventNotFound(event.event_id.clone()))?;
        existing.curr_state = event.curr_state;
        existing.pre_state = event.pre_state;
        Ok(())
    }

    pub fn remove_event(&mut self, event_id: &str) {
        self.migrate_events.remove(event_id);
    }

    /// Refuses DDL deletion while any pt of `database` has an active event.
    pub(crate) fn check_migrate_conflict(&self, database: &str) -> Result<()> {
        let pt_count = self
            .pt_view
            .get(database)
            .map(|v| v.len())
            .unwrap_or_default();
        for pt_id in 0..pt_count {
            if self
                .migrate_events
                .contains_key(&migrate_event_id(database, pt_id as u32))
            {
                return Err(MetaError::ConflictWithEvent);
            }
        }
        Ok(())
    }

    /// Refuses a new event while the target database or anything inside it
    /// is being deleted.
    fn check_ddl_conflict(&self, event: &MigrateEventInfo) -> Result<()> {
        if !event.check_conflict {
            return Ok(());
        }
        let dbi = self
            .databases
            .get(&event.db)
            .ok_or_else(|| MetaError::DatabaseNotFound(event.db.clone()))?;
        if dbi.mark_deleted {
            return Err(MetaError::DatabaseIsBeingDelete(event.db.clone()));
        }
        for (_, rpi) in dbi.retention_policies.iter() {
            if rpi.mark_deleted {
                return Err(MetaError::RpIsBeingDelete);
            }
            for (_, msti) in rpi.measurements.iter() {
                if msti.mark_deleted {
                    return Err(MetaError::MstIsBeingDelete);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::database::{NANOS_PER_DAY, NANOS_PER_HOUR};
    use crate::catalog::tests::{bootstrap_cluster, rp_spec};

    fn event(db: &str, pt_id: u32) -> MigrateEventInfo {
        MigrateEventInfo {
            event_id: migrate_event_id(db, pt_id),
            db: db.to_string(),
            pt_id,
            src: NodeId::new(1),
            dest: NodeId::new(2),
            curr_state: 1,
            pre_state: 0,
            check_conflict: true,
            ..Default::default()
        }
    }

    fn with_db() -> MetaData {
        let mut data = bootstrap_cluster(2, 1);
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
        data
    }

    #[test]
    fn create_is_idempotent_on_identical_events() {
        let mut data = with_db();
        data.create_migrate_event(&event("db0", 0)).unwrap();
        assert_eq!(
            data.migrate_events[&migrate_event_id("db0", 0)].op_id,
            EventOpId::new(1)
        );

        // identical: fine; differing destination: conflict
        data.create_migrate_event(&event("db0", 0)).unwrap();
        let mut other = event("db0", 0);
        other.dest = NodeId::new(3);
        assert!(matches!(
            data.create_migrate_event(&other),
            Err(MetaError::PtEventIsAlreadyExist)
        ));
    }

    #[test]
    fn update_requires_matching_op_id() {
        let mut data = with_db();
        data.create_migrate_event(&event("db0", 0)).unwrap();

        let mut update = event("db0", 0);
        update.op_id = EventOpId::new(1);
        update.curr_state = 2;
        update.pre_state = 1;
        data.update_migrate_event(&update).unwrap();
        let stored = &data.migrate_events[&migrate_event_id("db0", 0)];
        assert_eq!(stored.curr_state, 2);
        assert_eq!(stored.pre_state, 1);

        update.op_id = EventOpId::new(42);
        assert!(matches!(
            data.update_migrate_event(&update),
            Err(MetaError::EventNotFound(_))
        ));

        data.remove_event(&migrate_event_id("db0", 0));
        assert!(data.migrate_events.is_empty());
    }

    #[test]
    fn events_block_ddl_and_ddl_blocks_events() {
        let mut data = with_db();
        data.create_migrate_event(&event("db0", 1)).unwrap();
        assert!(matches!(
            data.mark_database_delete("db0"),
            Err(MetaError::ConflictWithEvent)
        ));

        data.remove_event(&migrate_event_id("db0", 1));
        data.mark_database_delete("db0").unwrap();
        assert!(matches!(
            data.create_migrate_event(&event("db0", 0)),
            Err(MetaError::DatabaseIsBeingDelete(_))
        ));
    }
}
