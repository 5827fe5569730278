//! Vector index over message embeddings
//!
//! A flat squared-L2 index with a JSON metadata side table. Slots are dense
//! ordinals assigned on insert and never reused. Deleting a message tombstones its
//! slots: the vector row stays in the index file, but only `Live` slots are ever
//! search candidates. There is no compaction; dropping tombstoned rows means
//! re-embedding every surviving message into a fresh index.
//!
//! Both files are rewritten after every mutation with write-temp-then-rename.
//! The pair is not atomic as a whole: a crash between the two renames can leave
//! index rows without metadata, and those rows are simply invisible.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::message::MessageId;
use crate::core::paths::{INDEX_FILE, METADATA_FILE};
use crate::error::{Error, Result};

/// Dense ordinal of a row in the index
pub type SlotId = usize;

const MAGIC: &[u8; 4] = b"MVIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Summary stored next to each vector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorMetadata {
    pub subject: String,
    pub sender: String,
    pub timestamp: String,
}

/// Per-slot state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotEntry {
    Live {
        message_id: MessageId,
        inserted_at: DateTime<Utc>,
        metadata: VectorMetadata,
    },
    Tombstoned {
        message_id: MessageId,
        tombstoned_at: DateTime<Utc>,
    },
}

impl SlotEntry {
    pub fn message_id(&self) -> MessageId {
        match self {
            SlotEntry::Live { message_id, .. } | SlotEntry::Tombstoned { message_id, .. } => {
                *message_id
            }
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SlotEntry::Live { .. })
    }
}

#[derive(Serialize)]
struct MetadataOut<'a> {
    dimension: usize,
    slots: &'a BTreeMap<SlotId, SlotEntry>,
}

#[derive(Deserialize)]
struct MetadataIn {
    dimension: usize,
    #[serde(default)]
    slots: BTreeMap<SlotId, SlotEntry>,
}

/// Index statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub dimension: usize,
    /// Raw row count, tombstones included
    pub size: usize,
    pub live: usize,
    pub tombstoned: usize,
}

pub struct VectorIndex {
    dimension: usize,
    /// Row-major, `size * dimension` values
    data: Vec<f32>,
    slots: BTreeMap<SlotId, SlotEntry>,
    files: Option<IndexFiles>,
}

struct IndexFiles {
    index: PathBuf,
    metadata: PathBuf,
}

impl VectorIndex {
    /// Index that never touches disk (for testing)
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
            slots: BTreeMap::new(),
            files: None,
        }
    }

    /// Open the index stored in `dir`, or start empty
    pub fn open(dir: &Path, dimension: usize) -> Self {
        Self::open_files(&dir.join(INDEX_FILE), &dir.join(METADATA_FILE), dimension)
    }

    /// Load both files if present. Missing or unreadable files give a fresh empty
    /// index; previously stored embeddings are then lost until re-indexed.
    pub fn open_files(index_path: &Path, metadata_path: &Path, dimension: usize) -> Self {
        let mut index = Self::in_memory(dimension);
        index.files = Some(IndexFiles {
            index: index_path.to_path_buf(),
            metadata: metadata_path.to_path_buf(),
        });

        match (index_path.exists(), metadata_path.exists()) {
            (true, true) => match index.load() {
                Ok(()) => info!(
                    "Loaded vector index: {} slots ({} live)",
                    index.len(),
                    index.live_count()
                ),
                Err(e) => {
                    warn!("Vector index unreadable, starting empty: {}", e);
                    index.data.clear();
                    index.slots.clear();
                }
            },
            (false, false) => debug!("No vector index at {}", index_path.display()),
            _ => warn!(
                "Vector index files incomplete in {}, starting empty",
                index_path.parent().unwrap_or(index_path).display()
            ),
        }

        index
    }

    fn load(&mut self) -> Result<()> {
        let Some(files) = &self.files else {
            return Ok(());
        };

        let bytes = std::fs::read(&files.index)?;
        let (stored_dim, rows) = decode_index(&bytes)?;
        let meta: MetadataIn = serde_json::from_slice(&std::fs::read(&files.metadata)?)?;
        if meta.dimension != stored_dim {
            debug!(
                "Metadata dimension {} differs from index dimension {}",
                meta.dimension, stored_dim
            );
        }

        let row_count = rows.len().checked_div(stored_dim).unwrap_or(0);
        if stored_dim == self.dimension {
            self.data = rows;
        } else {
            warn!(
                "Repairing vector index dimension {} -> {}",
                stored_dim, self.dimension
            );
            self.data = Vec::with_capacity(row_count * self.dimension);
            for row in rows.chunks_exact(stored_dim.max(1)).take(row_count) {
                self.data.extend(conform_vector(row, self.dimension));
            }
        }

        let before = meta.slots.len();
        self.slots = meta
            .slots
            .into_iter()
            .filter(|(slot, _)| *slot < row_count)
            .collect();
        if self.slots.len() < before {
            warn!(
                "Dropped {} metadata entries pointing past the index",
                before - self.slots.len()
            );
        }

        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Raw row count, tombstones included
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn live_count(&self) -> usize {
        self.slots.values().filter(|e| e.is_live()).count()
    }

    /// Whether any live slot still points at `message_id`
    pub fn has_live(&self, message_id: MessageId) -> bool {
        self.slots
            .values()
            .any(|e| e.is_live() && e.message_id() == message_id)
    }

    pub fn entry(&self, slot: SlotId) -> Option<&SlotEntry> {
        self.slots.get(&slot)
    }

    /// Stored (conformed) vector of a slot
    pub fn vector(&self, slot: SlotId) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn stats(&self) -> IndexStats {
        let live = self.live_count();
        IndexStats {
            dimension: self.dimension,
            size: self.len(),
            live,
            tombstoned: self.slots.len() - live,
        }
    }

    /// Append a vector for `message_id` and persist.
    ///
    /// Non-finite components become 0, the vector is padded or truncated to the
    /// index dimension and unit-normalized. If persisting fails the append is
    /// undone and the error returned; the message itself is unaffected.
    pub fn insert(
        &mut self,
        message_id: MessageId,
        vector: &[f32],
        metadata: VectorMetadata,
    ) -> Result<SlotId> {
        if vector.is_empty() {
            return Err(Error::EmptyVector);
        }

        let conformed = conform_vector(vector, self.dimension);
        let slot = self.len();
        self.data.extend_from_slice(&conformed);
        self.slots.insert(
            slot,
            SlotEntry::Live {
                message_id,
                inserted_at: Utc::now(),
                metadata,
            },
        );

        if let Err(e) = self.persist() {
            self.data.truncate(slot * self.dimension);
            self.slots.remove(&slot);
            return Err(e);
        }

        debug!("Indexed message {} at slot {}", message_id, slot);
        Ok(slot)
    }

    /// The `k` nearest live slots as `(message_id, squared L2 distance)`, closest
    /// first. Errors are logged and yield an empty list.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(MessageId, f32)> {
        match self.try_search(query, k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Vector search failed: {}", e);
                Vec::new()
            }
        }
    }

    fn try_search(&self, query: &[f32], k: usize) -> Result<Vec<(MessageId, f32)>> {
        if query.is_empty() {
            return Err(Error::EmptyVector);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = conform_vector(query, self.dimension);
        let mut candidates: Vec<(SlotId, MessageId, f32)> = Vec::new();

        for (&slot, entry) in &self.slots {
            let SlotEntry::Live { message_id, .. } = entry else {
                continue;
            };
            let Some(row) = self.vector(slot) else {
                return Err(Error::IndexCorrupt(format!("slot {} has no vector", slot)));
            };
            candidates.push((slot, *message_id, squared_l2(&query, row)));
        }

        // Ties go to the older slot
        candidates.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)));
        candidates.truncate(k);

        Ok(candidates
            .into_iter()
            .map(|(_, message_id, distance)| (message_id, distance))
            .collect())
    }

    /// Tombstone every live slot of `message_id`; returns how many were affected.
    /// Vector rows stay in place.
    pub fn delete(&mut self, message_id: MessageId) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        for entry in self.slots.values_mut() {
            if entry.is_live() && entry.message_id() == message_id {
                *entry = SlotEntry::Tombstoned {
                    message_id,
                    tombstoned_at: now,
                };
                removed += 1;
            }
        }

        if removed > 0 {
            if let Err(e) = self.persist_metadata() {
                warn!("Failed to persist tombstones for {}: {}", message_id, e);
            }
        }

        removed
    }

    fn persist(&self) -> Result<()> {
        let Some(files) = &self.files else {
            return Ok(());
        };
        write_atomic(&files.index, &encode_index(self.dimension, &self.data))?;
        self.persist_metadata()
    }

    fn persist_metadata(&self) -> Result<()> {
        let Some(files) = &self.files else {
            return Ok(());
        };
        let meta = MetadataOut {
            dimension: self.dimension,
            slots: &self.slots,
        };
        write_atomic(&files.metadata, &serde_json::to_vec(&meta)?)
    }
}

/// Replace non-finite values with 0, pad or truncate to `dimension`, scale to
/// unit length. A zero vector stays zero.
pub fn conform_vector(vector: &[f32], dimension: usize) -> Vec<f32> {
    let mut out: Vec<f32> = vector
        .iter()
        .take(dimension)
        .map(|&x| if x.is_finite() { x } else { 0.0 })
        .collect();

    if vector.iter().any(|x| !x.is_finite()) {
        warn!("Vector contains NaN or Inf values, replaced with 0");
    }
    if vector.len() != dimension {
        debug!("Resizing vector from {} to {}", vector.len(), dimension);
        out.resize(dimension, 0.0);
    }

    let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn encode_index(dimension: usize, data: &[f32]) -> Vec<u8> {
    let rows = data.len().checked_div(dimension).unwrap_or(0);
    let mut bytes = Vec::with_capacity(HEADER_LEN + data.len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dimension as u32).to_le_bytes());
    bytes.extend_from_slice(&(rows as u64).to_le_bytes());
    for &val in data {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Returns (dimension, row-major values)
fn decode_index(bytes: &[u8]) -> Result<(usize, Vec<f32>)> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(Error::IndexCorrupt("bad header".to_string()));
    }

    let read_u32 = |at: usize| {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    };
    let version = read_u32(4);
    if version != FORMAT_VERSION {
        return Err(Error::IndexCorrupt(format!("bad version {}", version)));
    }
    let dimension = read_u32(8) as usize;
    let mut row_bytes = [0u8; 8];
    row_bytes.copy_from_slice(&bytes[12..20]);
    let rows = u64::from_le_bytes(row_bytes) as usize;

    let expected = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::IndexCorrupt("size overflow".to_string()))?;
    let body = &bytes[HEADER_LEN..];
    if body.len() != expected {
        return Err(Error::IndexCorrupt(format!(
            "expected {} bytes of vectors, found {}",
            expected,
            body.len()
        )));
    }

    let data = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((dimension, data))
}

/// Write to `<path>.tmp`, fsync, then rename over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 4;

    fn meta(subject: &str) -> VectorMetadata {
        VectorMetadata {
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    fn ids(hits: &[(MessageId, f32)]) -> Vec<MessageId> {
        hits.iter().map(|(id, _)| *id).collect()
    }

    fn seeded(index: &mut VectorIndex) -> Result<()> {
        index.insert(10, &[1.0, 0.0, 0.0, 0.0], meta("a"))?;
        index.insert(20, &[0.0, 1.0, 0.0, 0.0], meta("b"))?;
        index.insert(30, &[0.7, 0.7, 0.0, 0.0], meta("c"))?;
        index.insert(40, &[0.0, 0.0, 0.0, 1.0], meta("d"))?;
        Ok(())
    }

    #[test]
    fn test_slots_are_dense() -> Result<()> {
        let mut index = VectorIndex::in_memory(DIM);
        assert_eq!(index.insert(1, &[1.0, 0.0, 0.0, 0.0], meta("x"))?, 0);
        assert_eq!(index.insert(2, &[0.0, 1.0, 0.0, 0.0], meta("y"))?, 1);
        assert_eq!(index.insert(1, &[0.0, 0.0, 1.0, 0.0], meta("z"))?, 2);
        assert_eq!(index.len(), 3);
        assert_eq!(index.entry(1).map(SlotEntry::message_id), Some(2));
        Ok(())
    }

    #[test]
    fn test_search_orders_by_distance() -> Result<()> {
        let mut index = VectorIndex::in_memory(DIM);
        seeded(&mut index)?;

        let hits = index.search(&[1.0, 0.1, 0.0, 0.0], 3);
        assert_eq!(ids(&hits), vec![10, 30, 20]);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 0).is_empty());
        assert!(index.search(&[], 3).is_empty());
        Ok(())
    }

    #[test]
    fn test_dimension_is_always_conformed() -> Result<()> {
        let mut index = VectorIndex::in_memory(DIM);
        let short = index.insert(1, &[3.0, 4.0], meta("short"))?;
        let long = index.insert(2, &[0.0, 0.0, 0.0, 2.0, 9.0, 9.0], meta("long"))?;

        assert_eq!(index.vector(short).unwrap(), &[0.6, 0.8, 0.0, 0.0]);
        assert_eq!(index.vector(long).unwrap(), &[0.0, 0.0, 0.0, 1.0]);

        // A short query is padded the same way
        assert_eq!(ids(&index.search(&[3.0, 4.0], 1)), vec![1]);
        let hits = index.search(&[0.0, 0.0, 0.0, 5.0, 1.0, 1.0, 1.0], 1);
        assert_eq!(ids(&hits), vec![2]);
        Ok(())
    }

    #[test]
    fn test_non_finite_and_zero_vectors() -> Result<()> {
        let mut index = VectorIndex::in_memory(DIM);
        let slot = index.insert(1, &[f32::NAN, 2.0, f32::INFINITY, 0.0], meta("nan"))?;
        assert_eq!(index.vector(slot).unwrap(), &[0.0, 1.0, 0.0, 0.0]);

        let zero = index.insert(2, &[0.0; DIM], meta("zero"))?;
        assert_eq!(index.vector(zero).unwrap(), &[0.0; DIM]);

        assert!(matches!(
            index.insert(3, &[], meta("empty")),
            Err(Error::EmptyVector)
        ));
        assert_eq!(index.len(), 2);
        Ok(())
    }

    #[test]
    fn test_ties_break_by_slot() -> Result<()> {
        let mut index = VectorIndex::in_memory(DIM);
        index.insert(7, &[0.0, 1.0, 0.0, 0.0], meta("first"))?;
        index.insert(3, &[0.0, 1.0, 0.0, 0.0], meta("second"))?;
        assert_eq!(ids(&index.search(&[0.0, 1.0, 0.0, 0.0], 2)), vec![7, 3]);
        Ok(())
    }

    #[test]
    fn test_soft_delete_hides_message() -> Result<()> {
        let mut index = VectorIndex::in_memory(DIM);
        seeded(&mut index)?;

        assert!(index.has_live(10));
        assert_eq!(index.delete(10), 1);
        assert_eq!(index.delete(10), 0);
        assert!(!index.has_live(10));
        assert!(index.has_live(20));
        assert_eq!(index.delete(999), 0);

        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 4);
        assert!(!ids(&hits).contains(&10));
        assert_eq!(hits.len(), 3);
        assert_eq!(index.len(), 4);
        assert!(matches!(
            index.entry(0),
            Some(SlotEntry::Tombstoned { message_id: 10, .. })
        ));

        let stats = index.stats();
        assert_eq!((stats.size, stats.live, stats.tombstoned), (4, 3, 1));
        Ok(())
    }

    #[test]
    fn test_slot_without_metadata_is_invisible() -> Result<()> {
        let mut index = VectorIndex::in_memory(DIM);
        seeded(&mut index)?;
        index.slots.remove(&0);
        assert!(!ids(&index.search(&[1.0, 0.0, 0.0, 0.0], 4)).contains(&10));
        Ok(())
    }

    #[test]
    fn test_reload_reproduces_results() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let query = [0.9, 0.3, 0.1, 0.0];

        let before = {
            let mut index = VectorIndex::open(dir.path(), DIM);
            seeded(&mut index)?;
            index.delete(40);
            index.search(&query, 3)
        };

        let reloaded = VectorIndex::open(dir.path(), DIM);
        assert_eq!(reloaded.len(), 4);
        assert_eq!(reloaded.search(&query, 3), before);
        assert!(!reloaded.entry(3).unwrap().is_live());
        match reloaded.entry(0) {
            Some(SlotEntry::Live {
                message_id,
                metadata,
                ..
            }) => {
                assert_eq!(*message_id, 10);
                assert_eq!(metadata, &meta("a"));
            }
            other => panic!("expected live slot, got {:?}", other),
        }
        assert!(!dir.path().join("email_embeddings.index.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_index_starts_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut index = VectorIndex::open(dir.path(), DIM);
            seeded(&mut index)?;
        }
        std::fs::write(dir.path().join(INDEX_FILE), b"garbage")?;

        let mut index = VectorIndex::open(dir.path(), DIM);
        assert!(index.is_empty());
        assert_eq!(index.stats().live, 0);
        assert_eq!(index.insert(5, &[1.0, 0.0, 0.0, 0.0], meta("new"))?, 0);
        Ok(())
    }

    #[test]
    fn test_missing_metadata_starts_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut index = VectorIndex::open(dir.path(), DIM);
            seeded(&mut index)?;
        }
        std::fs::remove_file(dir.path().join(METADATA_FILE))?;
        assert!(VectorIndex::open(dir.path(), DIM).is_empty());
        Ok(())
    }

    #[test]
    fn test_dimension_repair_on_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut index = VectorIndex::open(dir.path(), DIM);
            seeded(&mut index)?;
        }

        let wider = VectorIndex::open(dir.path(), 6);
        assert_eq!(wider.len(), 4);
        assert_eq!(wider.vector(0).unwrap(), &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(ids(&wider.search(&[0.0, 1.0], 1)), vec![20]);

        let narrower = VectorIndex::open(dir.path(), 2);
        assert_eq!(narrower.len(), 4);
        assert_eq!(narrower.vector(3).unwrap(), &[0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_persist_failure_rolls_back_insert() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let metadata_path = dir.path().join("meta-is-a-dir");
        std::fs::create_dir_all(metadata_path.join("occupied"))?;

        let mut index = VectorIndex::open_files(&dir.path().join("idx"), &metadata_path, DIM);
        assert!(index.insert(1, &[1.0, 0.0, 0.0, 0.0], meta("x")).is_err());
        assert!(index.is_empty());
        assert!(index.entry(0).is_none());
        Ok(())
    }

    #[test]
    fn test_decode_rejects_truncated_body() {
        let mut bytes = encode_index(2, &[1.0, 2.0, 3.0, 4.0]);
        let (dimension, data) = decode_index(&bytes).unwrap();
        assert_eq!((dimension, data.len()), (2, 4));
        bytes.pop();
        assert!(decode_index(&bytes).is_err());
    }
}
