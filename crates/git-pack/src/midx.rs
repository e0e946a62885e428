//! Multi-pack index (MIDX) support.
//!
//! The MIDX format uses a chunk-based layout to index objects across
//! multiple pack files. Format:
//!
//! ```text
//! Header: MIDX (4) | version (1) | OID version (1) | num_chunks (1) | num_packs (4)
//! Chunk lookup table: [chunk_id (4) | offset (8)] × num_chunks + terminator
//! Chunks:
//!   - Pack names: null-terminated pack file names
//!   - OID fanout: 256 × 4-byte cumulative counts
//!   - OID lookup: N × (OID bytes) sorted
//!   - Object offsets: N × (pack_index: 4, offset: 4)
//!   - Optional: large offsets (8 bytes each)
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use git_hash::{HashAlgorithm, ObjectId};
use memmap2::Mmap;

use crate::PackError;

/// MIDX signature bytes.
const MIDX_SIGNATURE: &[u8; 4] = b"MIDX";

/// Chunk IDs used in MIDX files.
const CHUNK_PACK_NAMES: u32 = 0x504e_414d; // "PNAM"
const CHUNK_OID_FANOUT: u32 = 0x4f49_4446; // "OIDF"
const CHUNK_OID_LOOKUP: u32 = 0x4f49_444c; // "OIDL"
const CHUNK_OBJECT_OFFSETS: u32 = 0x4f4f_4646; // "OOFF"
const CHUNK_LARGE_OFFSETS: u32 = 0x4c4f_4646; // "LOFF"

/// Multi-pack index spanning multiple packfiles.
#[allow(dead_code)]
pub struct MultiPackIndex {
    data: Mmap,
    num_packs: u32,
    num_objects: u32,
    pack_names: Vec<String>,
    hash_algo: HashAlgorithm,
    /// Chunk offsets
    fanout_offset: usize,
    oid_offset: usize,
    offsets_offset: usize,
    large_offsets_offset: Option<usize>,
    midx_path: PathBuf,
}

impl MultiPackIndex {
    /// Open a multi-pack index file.
    pub fn open(midx_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let midx_path = midx_path.as_ref().to_path_buf();
        let file = std::fs::File::open(&midx_path)?;
        let data = unsafe { Mmap::map(&file)? };

        // Minimum header: signature(4) + version(1) + oid_version(1) + num_chunks(1) + reserved(1) + num_packs(4) = 12
        if data.len() < 12 {
            return Err(PackError::InvalidIndex("MIDX file too small".into()));
        }

        // Validate signature
        if &data[0..4] != MIDX_SIGNATURE {
            return Err(PackError::InvalidIndex("bad MIDX signature".into()));
        }

        let version = data[4];
        if version != 1 {
            return Err(PackError::InvalidIndex(format!(
                "unsupported MIDX version {version}"
            )));
        }

        let oid_version = data[5];
        let hash_algo = match oid_version {
            1 => HashAlgorithm::Sha1,
            2 => HashAlgorithm::Sha256,
            _ => {
                return Err(PackError::InvalidIndex(format!(
                    "unsupported OID version {oid_version}"
                )))
            }
        };

        let num_chunks = data[6] as usize;
        let num_packs = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        // Parse chunk lookup table (starts at offset 12)
        let mut pos = 12;
        let mut pack_names_offset: Option<usize> = None;
        let mut fanout_offset: Option<usize> = None;
        let mut oid_offset: Option<usize> = None;
        let mut offsets_offset: Option<usize> = None;
        let mut large_offsets_offset: Option<usize> = None;

        for _ in 0..num_chunks {
            if pos + 12 > data.len() {
                return Err(PackError::InvalidIndex("truncated chunk table".into()));
            }
            let chunk_id = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            let chunk_offset = u64::from_be_bytes([
                data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7],
                data[pos + 8], data[pos + 9], data[pos + 10], data[pos + 11],
            ]) as usize;
            pos += 12;

            match chunk_id {
                CHUNK_PACK_NAMES => pack_names_offset = Some(chunk_offset),
                CHUNK_OID_FANOUT => fanout_offset = Some(chunk_offset),
                CHUNK_OID_LOOKUP => oid_offset = Some(chunk_offset),
                CHUNK_OBJECT_OFFSETS => offsets_offset = Some(chunk_offset),
                CHUNK_LARGE_OFFSETS => large_offsets_offset = Some(chunk_offset),
                _ => {} // Unknown chunks are ignored
            }
        }

        // Skip terminator entry (zero chunk ID + end offset)
        // pos += 12;

        let fanout_offset = fanout_offset.ok_or_else(|| {
            PackError::InvalidIndex("missing OID fanout chunk".into())
        })?;
        let oid_offset = oid_offset.ok_or_else(|| {
            PackError::InvalidIndex("missing OID lookup chunk".into())
        })?;
        let offsets_offset = offsets_offset.ok_or_else(|| {
            PackError::InvalidIndex("missing object offsets chunk".into())
        })?;

        // Read number of objects from fanout[255]
        let fanout_last = fanout_offset + 255 * 4;
        if fanout_last + 4 > data.len() {
            return Err(PackError::InvalidIndex("truncated fanout table".into()));
        }
        let num_objects = u32::from_be_bytes([
            data[fanout_last],
            data[fanout_last + 1],
            data[fanout_last + 2],
            data[fanout_last + 3],
        ]);

        // Parse pack names
        let pack_names = if let Some(pn_offset) = pack_names_offset {
            parse_pack_names(&data[pn_offset..], fanout_offset.saturating_sub(pn_offset))
        } else {
            Vec::new()
        };

        Ok(Self {
            data,
            num_packs,
            num_objects,
            pack_names,
            hash_algo,
            fanout_offset,
            oid_offset,
            offsets_offset,
            large_offsets_offset,
            midx_path,
        })
    }

    /// Look up an OID, returning `(pack_index, offset)` if found.
    pub fn lookup(&self, oid: &ObjectId) -> Option<(u32, u64)> {
        let hash_len = self.hash_algo.digest_len();
        let (lo, hi) = self.fanout_range(oid.first_byte());
        if lo >= hi {
            return None;
        }

        let target = oid.as_bytes();
        let mut low = lo;
        let mut high = hi;

        while low < high {
            let mid = low + (high - low) / 2;
            let mid_oid = self.oid_bytes_at(mid, hash_len);
            match mid_oid.cmp(target) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => {
                    return Some(self.object_entry(mid as u32));
                }
            }
        }
        None
    }

    /// Number of objects in the MIDX.
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// Number of packs referenced by this MIDX.
    pub fn num_packs(&self) -> u32 {
        self.num_packs
    }

    /// Pack names referenced by this MIDX.
    pub fn pack_names(&self) -> &[String] {
        &self.pack_names
    }

    /// Iterate over all (OID, pack_index, offset) triples.
    pub fn iter(&self) -> MultiPackIndexIter<'_> {
        MultiPackIndexIter {
            midx: self,
            pos: 0,
        }
    }

    fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let end = self.fanout_entry(first_byte) as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fanout_entry(first_byte - 1) as usize
        };
        (start, end)
    }

    fn fanout_entry(&self, index: u8) -> u32 {
        let pos = self.fanout_offset + index as usize * 4;
        u32::from_be_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ])
    }

    fn oid_bytes_at(&self, index: usize, hash_len: usize) -> &[u8] {
        let start = self.oid_offset + index * hash_len;
        &self.data[start..start + hash_len]
    }

    fn object_entry(&self, index: u32) -> (u32, u64) {
        let pos = self.offsets_offset + index as usize * 8;
        let pack_index = u32::from_be_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ]);
        let offset_val = u32::from_be_bytes([
            self.data[pos + 4],
            self.data[pos + 5],
            self.data[pos + 6],
            self.data[pos + 7],
        ]);

        let offset = if offset_val & 0x8000_0000 != 0 {
            // Large offset
            if let Some(lo_offset) = self.large_offsets_offset {
                let idx = (offset_val & 0x7FFF_FFFF) as usize;
                let p = lo_offset + idx * 8;
                u64::from_be_bytes([
                    self.data[p], self.data[p + 1], self.data[p + 2], self.data[p + 3],
                    self.data[p + 4], self.data[p + 5], self.data[p + 6], self.data[p + 7],
                ])
            } else {
                offset_val as u64 // Shouldn't happen with well-formed MIDX
            }
        } else {
            offset_val as u64
        };

        (pack_index, offset)
    }
}

/// Iterator over MIDX entries.
pub struct MultiPackIndexIter<'a> {
    midx: &'a MultiPackIndex,
    pos: u32,
}

impl<'a> Iterator for MultiPackIndexIter<'a> {
    type Item = (ObjectId, u32, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.midx.num_objects {
            return None;
        }
        let hash_len = self.midx.hash_algo.digest_len();
        let oid_bytes = self.midx.oid_bytes_at(self.pos as usize, hash_len);
        let oid = ObjectId::from_bytes(oid_bytes, self.midx.hash_algo)
            .expect("valid OID in MIDX");
        let (pack_idx, offset) = self.midx.object_entry(self.pos);
        self.pos += 1;
        Some((oid, pack_idx, offset))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.midx.num_objects - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

/// Parse null-terminated pack names from the PNAM chunk.
fn parse_pack_names(data: &[u8], max_len: usize) -> Vec<String> {
    let mut names = Vec::new();
    let mut pos = 0;
    let end = std::cmp::min(data.len(), max_len);

    while pos < end {
        // Find null terminator
        let name_end = data[pos..end].iter().position(|&b| b == 0);
        match name_end {
            Some(len) if len > 0 => {
                if let Ok(name) = std::str::from_utf8(&data[pos..pos + len]) {
                    names.push(name.to_string());
                }
                pos += len + 1;
            }
            _ => break,
        }
    }
    names
}

/// How a [`MultiIndex`] partitions its entries across shards.
///
/// Each shard holds only the entries whose OID falls in its bucket, keyed
/// off the first hex nibble (16 shards) or the first byte (256 shards) of
/// the OID — mirroring the single-pack `.idx` fanout table one level up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardCount {
    /// 16 shards, keyed by the OID's first nibble.
    Nibble,
    /// 256 shards, keyed by the OID's first byte.
    Byte,
}

impl ShardCount {
    fn count(self) -> usize {
        match self {
            ShardCount::Nibble => 16,
            ShardCount::Byte => 256,
        }
    }

    fn shard_of(self, oid: &ObjectId) -> usize {
        let first = oid.as_bytes()[0];
        match self {
            ShardCount::Nibble => (first >> 4) as usize,
            ShardCount::Byte => first as usize,
        }
    }
}

/// Configuration for a [`MultiIndex`].
#[derive(Debug, Clone, Copy)]
pub struct MultiIndexConfig {
    /// Top-level sharding key: nibble (16 shards) or byte (256 shards).
    pub shard_count: ShardCount,
    /// Number of packs at which a caller should consider compacting the
    /// index (e.g. by repacking the underlying packs). `MultiIndex` never
    /// compacts on its own — this is purely a threshold the caller consults
    /// via [`MultiIndex::needs_compaction`].
    pub compaction_threshold: usize,
    /// Whether each shard maintains a fanout table over its entries'
    /// second OID byte. Disabling this trades lookup speed for a smaller
    /// in-memory footprint (a full per-shard binary search instead).
    pub use_fanout: bool,
}

impl Default for MultiIndexConfig {
    fn default() -> Self {
        Self {
            shard_count: ShardCount::Byte,
            compaction_threshold: 100,
            use_fanout: true,
        }
    }
}

/// A single resolved location for an object: which pack it lives in, at
/// what offset, and its entry's CRC32 (for integrity checks against the
/// pack's raw bytes without re-decompressing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiIndexEntry {
    pub oid: ObjectId,
    pub pack_id: u32,
    pub offset: u64,
    pub crc: u32,
}

/// Sort/search key used within a shard: primarily the OID's second byte
/// (what the shard's fanout table indexes), with the full OID as a
/// tiebreak. For `ShardCount::Byte` shards (first byte already fixed) this
/// coincides with plain OID order; for `ShardCount::Nibble` shards (which
/// span 16 distinct first-byte values) it does not, so the fanout and the
/// entries' sort order are always built from this same key to stay
/// consistent with each other.
fn shard_sort_key(oid: &ObjectId) -> (u8, ObjectId) {
    (oid.as_bytes()[1], *oid)
}

#[derive(Debug, Clone, Default)]
struct Shard {
    entries: Vec<MultiIndexEntry>,
    fanout: Option<[u32; 256]>,
}

impl Shard {
    fn rebuild(&mut self, use_fanout: bool) {
        self.entries.sort_by_key(|e| shard_sort_key(&e.oid));
        self.fanout = if use_fanout {
            let mut fanout = [0u32; 256];
            for entry in &self.entries {
                fanout[entry.oid.as_bytes()[1] as usize] += 1;
            }
            for i in 1..256 {
                fanout[i] += fanout[i - 1];
            }
            Some(fanout)
        } else {
            None
        };
    }

    fn bracket(&self, second_byte: u8) -> (usize, usize) {
        match &self.fanout {
            Some(fanout) => {
                let end = fanout[second_byte as usize] as usize;
                let start = if second_byte == 0 {
                    0
                } else {
                    fanout[second_byte as usize - 1] as usize
                };
                (start, end)
            }
            None => (0, self.entries.len()),
        }
    }

    fn lookup(&self, oid: &ObjectId) -> Option<MultiIndexEntry> {
        let (start, end) = self.bracket(oid.as_bytes()[1]);
        self.entries[start..end]
            .binary_search_by(|e| e.oid.cmp(oid))
            .ok()
            .map(|i| self.entries[start + i])
    }
}

/// A mutable, in-memory, sharded index mapping object IDs to their pack
/// location across any number of packs.
///
/// Unlike [`MultiPackIndex`] (a read-only parser for the on-disk MIDX
/// format), `MultiIndex` is built and updated incrementally as packs are
/// added to or removed from a repository, without ever serializing a
/// combined on-disk file. Entries are partitioned into shards by the first
/// nibble or byte of their OID; within a shard, a fanout table over the
/// second OID byte brackets binary search the same way the single-pack
/// `.idx` fanout brackets search over the first byte.
pub struct MultiIndex {
    config: MultiIndexConfig,
    shards: Vec<Shard>,
    pack_ids: HashSet<u32>,
}

impl MultiIndex {
    /// Create an empty multi-index with the given configuration.
    pub fn new(config: MultiIndexConfig) -> Self {
        let shard_count = config.shard_count.count();
        Self {
            shards: vec![Shard::default(); shard_count],
            pack_ids: HashSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &MultiIndexConfig {
        &self.config
    }

    /// Number of distinct packs currently represented.
    pub fn pack_count(&self) -> usize {
        self.pack_ids.len()
    }

    /// Total number of indexed objects across all packs.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured compaction threshold. `MultiIndex` never compacts
    /// itself; callers check [`Self::needs_compaction`] and decide whether
    /// to repack.
    pub fn compaction_threshold(&self) -> usize {
        self.config.compaction_threshold
    }

    /// Whether the number of indexed packs has reached the compaction
    /// threshold.
    pub fn needs_compaction(&self) -> bool {
        self.pack_ids.len() >= self.config.compaction_threshold
    }

    /// Add (or replace) a pack's entries in the index.
    ///
    /// Entries are partitioned by shard and merged with each shard's
    /// existing contents. If an OID already present in the index is also
    /// present in `entries`, the incoming entry wins — `add_pack_index` is
    /// assumed to be called with packs in arrival order, so the newly
    /// added pack is always the "newer" one for dedup purposes.
    pub fn add_pack_index(
        &mut self,
        pack_id: u32,
        entries: impl IntoIterator<Item = (ObjectId, u64, u32)>,
    ) {
        let shard_count = self.shards.len();
        let mut by_shard: Vec<Vec<MultiIndexEntry>> = vec![Vec::new(); shard_count];
        for (oid, offset, crc) in entries {
            let shard_idx = self.config.shard_count.shard_of(&oid);
            by_shard[shard_idx].push(MultiIndexEntry {
                oid,
                pack_id,
                offset,
                crc,
            });
        }

        for (shard_idx, incoming) in by_shard.into_iter().enumerate() {
            if incoming.is_empty() {
                continue;
            }
            let shard = &mut self.shards[shard_idx];
            let mut by_oid: HashMap<ObjectId, MultiIndexEntry> =
                shard.entries.drain(..).map(|e| (e.oid, e)).collect();
            for entry in incoming {
                by_oid.insert(entry.oid, entry);
            }
            shard.entries = by_oid.into_values().collect();
            shard.rebuild(self.config.use_fanout);
        }

        self.pack_ids.insert(pack_id);
    }

    /// Remove every entry belonging to `pack_id`, rebuilding the fanout of
    /// any shard that changed.
    pub fn remove_pack_index(&mut self, pack_id: u32) {
        for shard in &mut self.shards {
            let had_pack = shard.entries.iter().any(|e| e.pack_id == pack_id);
            if !had_pack {
                continue;
            }
            shard.entries.retain(|e| e.pack_id != pack_id);
            shard.rebuild(self.config.use_fanout);
        }
        self.pack_ids.remove(&pack_id);
    }

    /// Look up a single OID.
    pub fn lookup(&self, oid: &ObjectId) -> Option<MultiIndexEntry> {
        let shard_idx = self.config.shard_count.shard_of(oid);
        self.shards[shard_idx].lookup(oid)
    }

    /// Look up many OIDs at once, grouping the work by shard so each
    /// shard's entries and fanout are touched together instead of once per
    /// query. Results are returned in the same order as `oids`.
    pub fn lookup_batch(&self, oids: &[ObjectId]) -> Vec<Option<MultiIndexEntry>> {
        let mut by_shard: Vec<Vec<usize>> = vec![Vec::new(); self.shards.len()];
        for (i, oid) in oids.iter().enumerate() {
            by_shard[self.config.shard_count.shard_of(oid)].push(i);
        }

        let mut results: Vec<Option<MultiIndexEntry>> = vec![None; oids.len()];
        for (shard_idx, indices) in by_shard.into_iter().enumerate() {
            if indices.is_empty() {
                continue;
            }
            let shard = &self.shards[shard_idx];
            for i in indices {
                results[i] = shard.lookup(&oids[i]);
            }
        }
        results
    }
}

#[cfg(test)]
mod multi_index_tests {
    use super::*;

    fn make_oid(first: u8, second: u8, suffix: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = first;
        bytes[1] = second;
        bytes[19] = suffix;
        ObjectId::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn add_and_lookup_across_shards() {
        let mut midx = MultiIndex::new(MultiIndexConfig::default());
        let oid_a = make_oid(0x10, 0x05, 1);
        let oid_b = make_oid(0x20, 0x0a, 2);

        midx.add_pack_index(0, vec![(oid_a, 100, 111), (oid_b, 200, 222)]);

        assert_eq!(midx.len(), 2);
        assert_eq!(midx.pack_count(), 1);
        assert_eq!(
            midx.lookup(&oid_a),
            Some(MultiIndexEntry {
                oid: oid_a,
                pack_id: 0,
                offset: 100,
                crc: 111
            })
        );
        assert_eq!(midx.lookup(&oid_b).map(|e| e.offset), Some(200));
        assert_eq!(midx.lookup(&make_oid(0x99, 0x00, 0)), None);
    }

    #[test]
    fn newer_pack_wins_on_dedup() {
        let mut midx = MultiIndex::new(MultiIndexConfig::default());
        let oid = make_oid(0x40, 0x01, 9);

        midx.add_pack_index(0, vec![(oid, 50, 1)]);
        midx.add_pack_index(1, vec![(oid, 999, 2)]);

        assert_eq!(midx.len(), 1);
        let entry = midx.lookup(&oid).unwrap();
        assert_eq!(entry.pack_id, 1);
        assert_eq!(entry.offset, 999);
    }

    #[test]
    fn remove_pack_index_rebuilds_fanout() {
        let mut midx = MultiIndex::new(MultiIndexConfig::default());
        let oid_a = make_oid(0x33, 0x01, 1);
        let oid_b = make_oid(0x33, 0x02, 2);

        midx.add_pack_index(0, vec![(oid_a, 10, 1)]);
        midx.add_pack_index(1, vec![(oid_b, 20, 2)]);
        assert_eq!(midx.len(), 2);

        midx.remove_pack_index(0);
        assert_eq!(midx.len(), 1);
        assert_eq!(midx.lookup(&oid_a), None);
        assert_eq!(midx.lookup(&oid_b).map(|e| e.pack_id), Some(1));
    }

    #[test]
    fn batch_lookup_matches_single_lookup() {
        let mut midx = MultiIndex::new(MultiIndexConfig::default());
        let oids: Vec<ObjectId> = (0u8..20)
            .map(|i| make_oid(i.wrapping_mul(13), i.wrapping_mul(7), i))
            .collect();
        let entries: Vec<(ObjectId, u64, u32)> = oids
            .iter()
            .enumerate()
            .map(|(i, oid)| (*oid, i as u64 * 10, i as u32))
            .collect();
        midx.add_pack_index(0, entries);

        let mut query: Vec<ObjectId> = oids.clone();
        query.push(make_oid(0xee, 0xee, 0xee));

        let batch = midx.lookup_batch(&query);
        for (oid, result) in query.iter().zip(batch.iter()) {
            assert_eq!(*result, midx.lookup(oid));
        }
    }

    #[test]
    fn nibble_sharding_groups_by_first_nibble() {
        let mut midx = MultiIndex::new(MultiIndexConfig {
            shard_count: ShardCount::Nibble,
            ..MultiIndexConfig::default()
        });
        // Same top nibble (0x5), different low nibble and second byte —
        // both land in the same shard but must still resolve individually.
        let oid_a = make_oid(0x51, 0x11, 1);
        let oid_b = make_oid(0x5f, 0x22, 2);
        midx.add_pack_index(0, vec![(oid_a, 1, 1), (oid_b, 2, 2)]);

        assert_eq!(midx.lookup(&oid_a).map(|e| e.offset), Some(1));
        assert_eq!(midx.lookup(&oid_b).map(|e| e.offset), Some(2));
    }

    #[test]
    fn compaction_threshold_is_caller_consulted_only() {
        let mut midx = MultiIndex::new(MultiIndexConfig {
            compaction_threshold: 2,
            ..MultiIndexConfig::default()
        });
        assert!(!midx.needs_compaction());
        midx.add_pack_index(0, vec![(make_oid(1, 1, 1), 1, 1)]);
        midx.add_pack_index(1, vec![(make_oid(2, 2, 2), 2, 2)]);
        assert!(midx.needs_compaction());
        // Crossing the threshold never triggers any mutation on its own.
        assert_eq!(midx.pack_count(), 2);
    }
}
