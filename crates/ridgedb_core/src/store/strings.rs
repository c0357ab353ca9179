//! Overflow value store.
//!
//! Chains are written to the dynamic record file only when their branch
//! commits. Until then the block ids are reserved so no other transaction
//! can claim them.

use crate::dynamic::DynamicStore;
use crate::error::{CoreError, CoreResult};
use crate::log::{put_bytes, PayloadReader};
use crate::resource::{JournaledResource, StoreState};
use crate::types::{RecordId, Xid};
use std::fmt;
use std::sync::Arc;

/// A staged chain mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringChange {
    /// Write `data` across the reserved blocks `ids`.
    Write {
        /// Reserved blocks in chain order.
        ids: Vec<RecordId>,
        /// Payload.
        data: Vec<u8>,
    },
    /// Return the blocks of a replaced or removed chain.
    Free {
        /// Blocks of the chain.
        ids: Vec<RecordId>,
    },
}

fn put_ids(buf: &mut Vec<u8>, ids: &[RecordId]) {
    buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
    for id in ids {
        buf.extend_from_slice(&id.0.to_le_bytes());
    }
}

fn read_ids(reader: &mut PayloadReader<'_>) -> CoreResult<Vec<RecordId>> {
    let count = reader.u32()? as usize;
    let mut ids = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        ids.push(RecordId(reader.u64()?));
    }
    Ok(ids)
}

/// Dynamic record chains of one store file.
pub struct StringState {
    store: Arc<DynamicStore>,
}

impl StringState {
    /// Wraps a dynamic record store.
    #[must_use]
    pub fn new(store: Arc<DynamicStore>) -> Self {
        Self { store }
    }

    /// The underlying block store.
    #[must_use]
    pub fn store(&self) -> &Arc<DynamicStore> {
        &self.store
    }
}

impl fmt::Debug for StringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringState")
            .field("store", &self.store)
            .finish()
    }
}

impl StoreState for StringState {
    type Change = StringChange;

    fn encode_change(change: &StringChange, buf: &mut Vec<u8>) {
        match change {
            StringChange::Write { ids, data } => {
                buf.push(1);
                put_ids(buf, ids);
                put_bytes(buf, data);
            }
            StringChange::Free { ids } => {
                buf.push(2);
                put_ids(buf, ids);
            }
        }
    }

    fn decode_change(reader: &mut PayloadReader<'_>) -> CoreResult<StringChange> {
        match reader.u8()? {
            1 => Ok(StringChange::Write {
                ids: read_ids(reader)?,
                data: reader.bytes()?,
            }),
            2 => Ok(StringChange::Free {
                ids: read_ids(reader)?,
            }),
            other => Err(CoreError::log_corruption(format!(
                "unknown string change tag: {other}"
            ))),
        }
    }

    fn check(&self, _xid: Xid, changes: &[StringChange]) -> CoreResult<()> {
        for change in changes {
            if let StringChange::Write { ids, data } = change {
                let needed = self.store.blocks_needed(data.len());
                if ids.len() != needed {
                    return Err(CoreError::invalid_operation(format!(
                        "{} bytes need {needed} blocks, {} reserved",
                        data.len(),
                        ids.len()
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: &[StringChange]) -> CoreResult<()> {
        for change in changes {
            match change {
                StringChange::Write { ids, data } => {
                    self.store.write_chain(ids, data)?;
                }
                StringChange::Free { ids } => self.store.free(ids)?,
            }
        }
        self.store.flush()
    }

    /// Chains live in the block file, so the journal needs nothing once
    /// the file is on disk.
    fn snapshot(&mut self) -> CoreResult<Vec<StringChange>> {
        self.store.sync()?;
        Ok(Vec::new())
    }

    fn discard(&mut self, changes: &[StringChange]) {
        for change in changes {
            if let StringChange::Write { ids, .. } = change {
                self.store.release(ids);
            }
        }
    }

    fn restore_in_doubt(&mut self, changes: &[StringChange]) -> CoreResult<()> {
        for change in changes {
            if let StringChange::Write { ids, .. } = change {
                self.store.withhold(ids)?;
            }
        }
        Ok(())
    }
}

/// The overflow store participant.
pub type StringStore = JournaledResource<StringState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{EndFlags, ResourceManager, StartFlags};
    use crate::types::TransactionId;
    use ridgedb_storage::InMemoryBackend;

    struct Fixture {
        blocks: InMemoryBackend,
        journal: InMemoryBackend,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                blocks: InMemoryBackend::new(),
                journal: InMemoryBackend::new(),
            }
        }

        fn open(&self) -> (Arc<DynamicStore>, StringStore) {
            let dynamic = Arc::new(DynamicStore::open(Box::new(self.blocks.clone()), 32).unwrap());
            let strings = StringStore::open(
                "strings",
                Box::new(self.journal.clone()),
                StringState::new(Arc::clone(&dynamic)),
                false,
            )
            .unwrap();
            (dynamic, strings)
        }
    }

    fn staged(rm: &StringStore, tx: u64, change: StringChange) -> Xid {
        let xid = Xid::new(TransactionId::new(tx), 0);
        rm.start(xid, StartFlags::New).unwrap();
        rm.stage(xid, change).unwrap();
        rm.end(xid, EndFlags::Success).unwrap();
        xid
    }

    #[test]
    fn write_happens_at_commit() {
        let f = Fixture::new();
        let (dynamic, strings) = f.open();
        let data = vec![7u8; 50];
        let ids = dynamic.reserve(dynamic.blocks_needed(data.len())).unwrap();
        let head = ids[0];

        let xid = staged(&strings, 1, StringChange::Write { ids, data: data.clone() });
        assert!(!dynamic.read_block(head).unwrap().in_use);
        strings.commit(xid, true).unwrap();
        assert_eq!(dynamic.read_chain(head).unwrap(), data);
    }

    #[test]
    fn rollback_releases_reserved_blocks() {
        let f = Fixture::new();
        let (dynamic, strings) = f.open();
        let ids = dynamic.reserve(2).unwrap();
        let free_before = dynamic.free_count();

        let xid = staged(
            &strings,
            1,
            StringChange::Write {
                ids,
                data: vec![1; 30],
            },
        );
        strings.rollback(xid).unwrap();
        assert_eq!(dynamic.free_count(), free_before + 2);
    }

    #[test]
    fn in_doubt_blocks_are_withheld_after_reopen() {
        let f = Fixture::new();
        let ids = {
            let (dynamic, strings) = f.open();
            let ids = dynamic.reserve(2).unwrap();
            let xid = staged(
                &strings,
                1,
                StringChange::Write {
                    ids: ids.clone(),
                    data: vec![3; 30],
                },
            );
            strings.prepare(xid).unwrap();
            ids
        };

        let (dynamic, strings) = f.open();
        let fresh = dynamic.reserve(2).unwrap();
        assert!(fresh.iter().all(|id| !ids.contains(id)));

        let xid = strings.recover(crate::resource::RecoverFlags::Full).unwrap()[0];
        strings.commit(xid, false).unwrap();
        assert_eq!(dynamic.read_chain(ids[0]).unwrap(), vec![3; 30]);
    }

    #[test]
    fn replay_restores_chains_and_frees() {
        let f = Fixture::new();
        let (kept, freed) = {
            let (dynamic, strings) = f.open();
            let a = dynamic.reserve(1).unwrap();
            let b = dynamic.reserve(1).unwrap();
            let xid = staged(&strings, 1, StringChange::Write { ids: a.clone(), data: b"a".to_vec() });
            strings.commit(xid, true).unwrap();
            let xid = staged(&strings, 2, StringChange::Write { ids: b.clone(), data: b"b".to_vec() });
            strings.commit(xid, true).unwrap();
            let xid = staged(&strings, 3, StringChange::Free { ids: a.clone() });
            strings.commit(xid, true).unwrap();
            (b[0], a[0])
        };

        let (dynamic, _strings) = f.open();
        assert_eq!(dynamic.read_chain(kept).unwrap(), b"b");
        assert!(!dynamic.read_block(freed).unwrap().in_use);
    }

    #[test]
    fn mismatched_reservation_is_vetoed() {
        let f = Fixture::new();
        let (dynamic, strings) = f.open();
        let ids = dynamic.reserve(1).unwrap();
        let xid = staged(
            &strings,
            1,
            StringChange::Write {
                ids,
                data: vec![0; 100],
            },
        );
        assert!(strings.prepare(xid).is_err());
    }
}
