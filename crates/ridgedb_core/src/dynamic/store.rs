//! Block allocation, chain I/O and integrity checks.

use crate::dynamic::record::{DynamicRecord, BLOCK_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::types::RecordId;
use parking_lot::Mutex;
use ridgedb_storage::StorageBackend;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Blocks read per backend call while scanning.
const SCAN_BATCH: u64 = 512;

#[derive(Debug, Default)]
struct IdAllocator {
    /// Ids of blocks that are neither in use nor reserved.
    free: BTreeSet<u64>,
    /// One past the highest block id in the file.
    high: u64,
}

/// Result of [`DynamicStore::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Number of chain heads walked.
    pub chains: usize,
    /// Blocks with the in-use flag set.
    pub blocks_in_use: u64,
    /// Blocks on the free list.
    pub free_blocks: usize,
    /// In-use blocks no chain reaches.
    pub orphans: Vec<RecordId>,
    /// Blocks reached from more than one chain.
    pub shared: Vec<RecordId>,
    /// Chains that could not be walked to the end, with the reason.
    pub broken: Vec<(RecordId, String)>,
}

impl VerifyReport {
    /// Whether no problem was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.shared.is_empty() && self.broken.is_empty()
    }
}

/// Fixed-block overflow storage with a free list.
///
/// # Example
///
/// ```rust
/// use ridgedb_core::DynamicStore;
/// use ridgedb_storage::InMemoryBackend;
///
/// let store = DynamicStore::open(Box::new(InMemoryBackend::new()), 32).unwrap();
/// let head = store.allocate_chain(b"a value that spans several blocks").unwrap();
/// assert_eq!(store.read_chain(head).unwrap(), b"a value that spans several blocks");
/// store.free_chain(head).unwrap();
/// ```
pub struct DynamicStore {
    backend: Mutex<Box<dyn StorageBackend>>,
    ids: Mutex<IdAllocator>,
    block_size: usize,
}

impl DynamicStore {
    /// Opens the store and rebuilds the free list from the in-use flags.
    ///
    /// A partial block at the end of the file is a torn write and is cut off.
    ///
    /// # Errors
    ///
    /// Returns an error if a block is malformed or the backend fails.
    pub fn open(mut backend: Box<dyn StorageBackend>, block_size: usize) -> CoreResult<Self> {
        if block_size <= BLOCK_HEADER_SIZE || block_size > u16::MAX as usize + BLOCK_HEADER_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "unusable block size {block_size}"
            )));
        }

        let size = backend.size()?;
        let bs = block_size as u64;
        if size % bs != 0 {
            warn!(size, block_size, "discarding partial block at end of dynamic store");
            backend.truncate(size - size % bs)?;
        }

        let high = backend.size()? / bs;
        let mut free = BTreeSet::new();
        let mut first = 0;
        while first < high {
            let count = SCAN_BATCH.min(high - first);
            let data = backend.read_at(first * bs, (count * bs) as usize)?;
            for (i, block) in data.chunks(block_size).enumerate() {
                let id = first + i as u64;
                let record = DynamicRecord::decode(RecordId(id), block)?;
                if !record.in_use {
                    free.insert(id);
                }
            }
            first += count;
        }

        debug!(blocks = high, free = free.len(), "dynamic store free list rebuilt");

        Ok(Self {
            backend: Mutex::new(backend),
            ids: Mutex::new(IdAllocator { free, high }),
            block_size,
        })
    }

    /// Size of one block in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Payload bytes one block holds.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        DynamicRecord::capacity(self.block_size)
    }

    /// Number of blocks a chain for `len` payload bytes occupies.
    ///
    /// An empty payload still takes one block.
    #[must_use]
    pub fn blocks_needed(&self, len: usize) -> usize {
        len.div_ceil(self.block_capacity()).max(1)
    }

    /// Store size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size_bytes(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// One past the highest block id.
    #[must_use]
    pub fn high_id(&self) -> u64 {
        self.ids.lock().high
    }

    /// Number of blocks on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.ids.lock().free.len()
    }

    /// Appends empty blocks until `high` reaches `new_high`.
    ///
    /// The new ids are added to the free list; callers take what they need.
    fn grow(&self, ids: &mut IdAllocator, new_high: u64) -> CoreResult<()> {
        if new_high <= ids.high {
            return Ok(());
        }
        let bs = self.block_size as u64;
        let empty = DynamicRecord::free().encode(self.block_size);
        let mut data = Vec::with_capacity(((new_high - ids.high) * bs) as usize);
        for _ in ids.high..new_high {
            data.extend_from_slice(&empty);
        }
        self.backend.lock().write_at(ids.high * bs, &data)?;
        ids.free.extend(ids.high..new_high);
        ids.high = new_high;
        Ok(())
    }

    /// Takes `n` block ids off the free list, lowest first, growing the
    /// file only for the shortfall.
    ///
    /// Reserved blocks stay empty until [`write_chain`](Self::write_chain)
    /// and must be handed back with [`release`](Self::release) if unused.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be extended.
    pub fn reserve(&self, n: usize) -> CoreResult<Vec<RecordId>> {
        let mut ids = self.ids.lock();
        let shortfall = n.saturating_sub(ids.free.len()) as u64;
        if shortfall > 0 {
            let new_high = ids.high + shortfall;
            self.grow(&mut ids, new_high)?;
        }
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match ids.free.pop_first() {
                Some(id) => out.push(RecordId(id)),
                None => return Err(CoreError::invalid_operation("free list exhausted")),
            }
        }
        Ok(out)
    }

    /// Returns reserved, never-written ids to the free list.
    pub fn release(&self, released: &[RecordId]) {
        let mut ids = self.ids.lock();
        for id in released {
            if id.0 < ids.high {
                ids.free.insert(id.0);
            }
        }
    }

    /// Keeps ids off the free list, growing the file if they lie past its end.
    ///
    /// Used after a restart for blocks reserved by a branch that is still
    /// in doubt.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be extended.
    pub fn withhold(&self, withheld: &[RecordId]) -> CoreResult<()> {
        let mut ids = self.ids.lock();
        if let Some(max) = withheld.iter().map(|id| id.0).max() {
            self.grow(&mut ids, max + 1)?;
        }
        for id in withheld {
            ids.free.remove(&id.0);
        }
        Ok(())
    }

    /// Writes `data` across the given blocks, linking them in order.
    ///
    /// Rewriting the same chain with the same data is harmless, which lets
    /// journal replay re-apply committed writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the id count does not match the payload size or
    /// the write fails.
    pub fn write_chain(&self, chain: &[RecordId], data: &[u8]) -> CoreResult<RecordId> {
        let needed = self.blocks_needed(data.len());
        if chain.len() != needed {
            return Err(CoreError::invalid_operation(format!(
                "{} bytes need {needed} blocks, got {}",
                data.len(),
                chain.len()
            )));
        }

        let mut ids = self.ids.lock();
        if let Some(max) = chain.iter().map(|id| id.0).max() {
            self.grow(&mut ids, max + 1)?;
        }
        for id in chain {
            ids.free.remove(&id.0);
        }

        let mut backend = self.backend.lock();
        let capacity = self.block_capacity();
        for (i, id) in chain.iter().enumerate() {
            let start = (i * capacity).min(data.len());
            let end = ((i + 1) * capacity).min(data.len());
            let record = DynamicRecord {
                in_use: true,
                data: data[start..end].to_vec(),
                next: chain.get(i + 1).copied(),
            };
            backend.write_at(id.0 * self.block_size as u64, &record.encode(self.block_size))?;
        }

        Ok(chain[0])
    }

    /// Claims enough blocks for `data` and writes the chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the blocks are released.
    pub fn allocate_chain(&self, data: &[u8]) -> CoreResult<RecordId> {
        let chain = self.reserve(self.blocks_needed(data.len()))?;
        match self.write_chain(&chain, data) {
            Ok(head) => Ok(head),
            Err(e) => {
                self.release(&chain);
                Err(e)
            }
        }
    }

    /// Reads one block.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` for ids past the end of the store.
    pub fn read_block(&self, id: RecordId) -> CoreResult<DynamicRecord> {
        let high = self.ids.lock().high;
        if id.0 >= high {
            return Err(CoreError::invalid_record(format!(
                "{id} is past the end of the store ({high} blocks)"
            )));
        }
        let buf = self
            .backend
            .lock()
            .read_at(id.0 * self.block_size as u64, self.block_size)?;
        DynamicRecord::decode(id, &buf)
    }

    /// Walks a chain, calling `visit` for each block.
    fn walk(
        &self,
        head: RecordId,
        mut visit: impl FnMut(RecordId, DynamicRecord),
    ) -> CoreResult<()> {
        let limit = self.high_id();
        let mut current = Some(head);
        let mut steps = 0u64;
        while let Some(id) = current {
            if steps >= limit {
                return Err(CoreError::invalid_record(format!(
                    "chain starting at {head} has a cycle"
                )));
            }
            let record = self.read_block(id)?;
            if !record.in_use {
                return Err(CoreError::invalid_record(format!(
                    "chain starting at {head} reaches unused {id}"
                )));
            }
            current = record.next;
            visit(id, record);
            steps += 1;
        }
        Ok(())
    }

    /// Reassembles the payload of a chain.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the chain is broken or cyclic.
    pub fn read_chain(&self, head: RecordId) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.walk(head, |_, record| out.extend_from_slice(&record.data))?;
        Ok(out)
    }

    /// Lists the block ids of a chain in order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the chain is broken or cyclic.
    pub fn chain_ids(&self, head: RecordId) -> CoreResult<Vec<RecordId>> {
        let mut out = Vec::new();
        self.walk(head, |id, _| out.push(id))?;
        Ok(out)
    }

    /// Clears the in-use flag of each block and returns it to the free list.
    ///
    /// Freeing an already-free block is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn free(&self, blocks: &[RecordId]) -> CoreResult<()> {
        let mut ids = self.ids.lock();
        let mut backend = self.backend.lock();
        let empty = DynamicRecord::free().encode(self.block_size);
        for id in blocks {
            if id.0 >= ids.high {
                continue;
            }
            backend.write_at(id.0 * self.block_size as u64, &empty)?;
            ids.free.insert(id.0);
        }
        Ok(())
    }

    /// Frees every block of a chain and returns their ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is broken or a write fails.
    pub fn free_chain(&self, head: RecordId) -> CoreResult<Vec<RecordId>> {
        let chain = self.chain_ids(head)?;
        self.free(&chain)?;
        Ok(chain)
    }

    /// Checks that every in-use block belongs to exactly one of `heads`.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures; integrity problems are
    /// reported in the [`VerifyReport`].
    pub fn verify(&self, heads: &[RecordId]) -> CoreResult<VerifyReport> {
        let mut report = VerifyReport {
            chains: heads.len(),
            free_blocks: self.free_count(),
            ..VerifyReport::default()
        };
        let mut owners: HashMap<u64, RecordId> = HashMap::new();

        for head in heads {
            let mut seen = HashSet::new();
            let mut current = Some(*head);
            while let Some(id) = current {
                if !seen.insert(id) {
                    report.broken.push((*head, format!("cycle at {id}")));
                    break;
                }
                let record = match self.read_block(id) {
                    Ok(record) => record,
                    Err(CoreError::InvalidRecord { message }) => {
                        report.broken.push((*head, message));
                        break;
                    }
                    Err(e) => return Err(e),
                };
                if !record.in_use {
                    report.broken.push((*head, format!("reaches unused {id}")));
                    break;
                }
                if owners.insert(id.0, *head).is_some() {
                    report.shared.push(id);
                }
                current = record.next;
            }
        }

        for id in 0..self.high_id() {
            match self.read_block(RecordId(id)) {
                Ok(record) if record.in_use => {
                    report.blocks_in_use += 1;
                    if !owners.contains_key(&id) {
                        report.orphans.push(RecordId(id));
                    }
                }
                Ok(_) => {}
                Err(CoreError::InvalidRecord { message }) => {
                    report.broken.push((RecordId(id), message));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Flushes block writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot flush.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Flushes block writes and waits for them to reach the disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot sync.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for DynamicStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = self.ids.lock();
        f.debug_struct("DynamicStore")
            .field("block_size", &self.block_size)
            .field("high", &ids.high)
            .field("free", &ids.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ridgedb_storage::InMemoryBackend;
    use std::sync::Arc;

    const BS: usize = 32; // 21 data bytes per block

    fn store() -> (DynamicStore, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let store = DynamicStore::open(Box::new(backend.clone()), BS).unwrap();
        (store, backend)
    }

    #[test]
    fn chain_roundtrip_across_blocks() {
        let (store, _) = store();
        let data: Vec<u8> = (0..100).collect();
        let head = store.allocate_chain(&data).unwrap();
        assert_eq!(store.read_chain(head).unwrap(), data);
        assert_eq!(store.chain_ids(head).unwrap().len(), 5);
        assert_eq!(store.size_bytes().unwrap(), 5 * BS as u64);
    }

    #[test]
    fn empty_payload_takes_one_block() {
        let (store, _) = store();
        let head = store.allocate_chain(&[]).unwrap();
        assert_eq!(store.read_chain(head).unwrap(), Vec::<u8>::new());
        assert_eq!(store.high_id(), 1);
    }

    #[test]
    fn freed_blocks_are_reused_before_growing() {
        let (store, _) = store();
        let a = store.allocate_chain(&[1u8; 60]).unwrap();
        let _b = store.allocate_chain(&[2u8; 10]).unwrap();
        let size = store.size_bytes().unwrap();

        let freed = store.free_chain(a).unwrap();
        assert_eq!(freed.len(), 3);

        let c = store.allocate_chain(&[3u8; 40]).unwrap();
        assert_eq!(store.size_bytes().unwrap(), size);
        assert_eq!(c, RecordId(0));
        assert_eq!(store.read_chain(c).unwrap(), vec![3u8; 40]);
        assert_eq!(store.free_count(), 1);
    }

    #[test]
    fn reserve_takes_lowest_ids() {
        let (store, _) = store();
        let ids = store.reserve(4).unwrap();
        store.release(&[ids[1], ids[3]]);
        assert_eq!(store.reserve(1).unwrap(), vec![RecordId(1)]);
    }

    #[test]
    fn reserved_blocks_are_not_reissued() {
        let (store, _) = store();
        let first = store.reserve(2).unwrap();
        let second = store.reserve(2).unwrap();
        assert!(first.iter().all(|id| !second.contains(id)));
    }

    #[test]
    fn reopen_rebuilds_free_list() {
        let (store, backend) = store();
        let a = store.allocate_chain(&[1u8; 30]).unwrap();
        let b = store.allocate_chain(&[2u8; 30]).unwrap();
        store.free_chain(a).unwrap();
        drop(store);

        let store = DynamicStore::open(Box::new(backend), BS).unwrap();
        assert_eq!(store.high_id(), 4);
        assert_eq!(store.free_count(), 2);
        assert_eq!(store.read_chain(b).unwrap(), vec![2u8; 30]);
    }

    #[test]
    fn reserved_but_unwritten_blocks_are_free_after_reopen() {
        let (store, backend) = store();
        store.reserve(3).unwrap();
        drop(store);
        let store = DynamicStore::open(Box::new(backend), BS).unwrap();
        assert_eq!(store.free_count(), 3);
    }

    #[test]
    fn withhold_keeps_ids_off_free_list() {
        let (store, _) = store();
        store.withhold(&[RecordId(2)]).unwrap();
        assert_eq!(store.high_id(), 3);
        assert_eq!(store.reserve(3).unwrap(), vec![RecordId(0), RecordId(1), RecordId(3)]);
    }

    #[test]
    fn torn_tail_is_trimmed() {
        let mut backend = InMemoryBackend::new();
        backend.append(&DynamicRecord::free().encode(BS)).unwrap();
        backend.append(&[1, 2, 3]).unwrap();
        let store = DynamicStore::open(Box::new(backend.clone()), BS).unwrap();
        assert_eq!(store.high_id(), 1);
        assert_eq!(backend.size().unwrap(), BS as u64);
    }

    #[test]
    fn write_chain_checks_block_count() {
        let (store, _) = store();
        let ids = store.reserve(1).unwrap();
        assert!(store.write_chain(&ids, &[0u8; 50]).is_err());
    }

    #[test]
    fn rewriting_a_chain_is_idempotent() {
        let (store, _) = store();
        let ids = store.reserve(2).unwrap();
        store.write_chain(&ids, &[7u8; 30]).unwrap();
        store.write_chain(&ids, &[7u8; 30]).unwrap();
        assert_eq!(store.read_chain(ids[0]).unwrap(), vec![7u8; 30]);
        assert_eq!(store.free_count(), 0);
    }

    #[test]
    fn cycles_are_detected() {
        let (store, backend) = store();
        let ids = store.reserve(2).unwrap();
        store.write_chain(&ids, &[1u8; 30]).unwrap();
        let looped = DynamicRecord {
            in_use: true,
            data: vec![1u8; 9],
            next: Some(ids[0]),
        };
        let mut raw = backend.clone();
        raw.write_at(ids[1].0 * BS as u64, &looped.encode(BS)).unwrap();

        assert!(matches!(
            store.read_chain(ids[0]),
            Err(CoreError::InvalidRecord { .. })
        ));
        let report = store.verify(&[ids[0]]).unwrap();
        assert!(!report.broken.is_empty());
    }

    #[test]
    fn verify_reports_orphans_and_sharing() {
        let (store, _) = store();
        let a = store.allocate_chain(&[1u8; 30]).unwrap();
        let b = store.allocate_chain(&[2u8; 5]).unwrap();
        let clean = store.verify(&[a, b]).unwrap();
        assert!(clean.is_clean());
        assert_eq!(clean.blocks_in_use, 3);

        let orphaned = store.verify(&[a]).unwrap();
        assert_eq!(orphaned.orphans, vec![b]);

        let tail = store.chain_ids(a).unwrap()[1];
        let shared = store.verify(&[a, b, tail]).unwrap();
        assert_eq!(shared.shared, vec![tail]);
    }

    #[test]
    fn concurrent_allocations_get_distinct_blocks() {
        let (store, _) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..20)
                        .map(|_| store.allocate_chain(&[t as u8; 45]).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let heads: Vec<RecordId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        let report = store.verify(&heads).unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.blocks_in_use, 8 * 20 * 3);
    }

    proptest! {
        #[test]
        fn chains_never_share_blocks(ops in prop::collection::vec((any::<bool>(), 0usize..80), 1..40)) {
            let (store, _) = store();
            let mut live: Vec<(RecordId, Vec<u8>)> = Vec::new();
            for (i, (free, len)) in ops.into_iter().enumerate() {
                if free && !live.is_empty() {
                    let (head, data) = live.remove(i % live.len());
                    let size = store.size_bytes().unwrap();
                    store.free_chain(head).unwrap();
                    // Reallocating no more than was freed must not grow the store.
                    let again = store.allocate_chain(&data[..data.len() / 2]).unwrap();
                    prop_assert_eq!(store.size_bytes().unwrap(), size);
                    live.push((again, data[..data.len() / 2].to_vec()));
                } else {
                    let data = vec![i as u8; len];
                    let head = store.allocate_chain(&data).unwrap();
                    live.push((head, data));
                }
            }
            let heads: Vec<RecordId> = live.iter().map(|(h, _)| *h).collect();
            let report = store.verify(&heads).unwrap();
            prop_assert!(report.is_clean());
            for (head, data) in &live {
                prop_assert_eq!(&store.read_chain(*head).unwrap(), data);
            }
        }
    }
}
