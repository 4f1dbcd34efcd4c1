//! The global index: a persistent map from commit id to the slice and
//! offset covering it.
//!
//! The file is a header, the list of slice hashes, a 256-way fanout
//! table of absolute offsets, then fixed-size entries sorted by id.
//! Lookups bisect within the fanout bucket of the id's first byte.
//! Rewrites are atomic: entries are merged in memory, sorted, and the
//! whole file is replaced under a lock file.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use revcache_hash::ObjectId;

use crate::codec::{
    self, IndexEntry, IndexHeader, ObjectEntry, SliceHeader, FANOUT_LEN, INDEX_ENTRY_LEN,
    INDEX_HEADER_LEN, INDEX_VERSION, SLICE_HEADER_LEN,
};
use crate::lockfile::LockFile;
use crate::slice::SliceFile;
use crate::CacheError;

const INDEX_FILE: &str = "index";

/// A successful index lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHit {
    /// Hash of the slice holding the commit.
    pub slice: ObjectId,
    /// Position of that slice in the index's slice list.
    pub cache_index: u8,
    /// Byte offset of the commit entry within the slice.
    pub offset: u32,
    pub is_start: bool,
}

/// Result of an index regeneration.
#[derive(Debug, Default)]
pub struct RegenerateOutcome {
    /// Slices successfully indexed.
    pub slices: usize,
    /// Human-readable reports about slices that were skipped.
    pub warnings: Vec<String>,
}

struct Loaded {
    map: Mmap,
    head: IndexHeader,
    slices: Vec<ObjectId>,
    /// Absolute offsets; `fanout[256]` is the file length.
    fanout: Box<[u32; 257]>,
}

/// The global index over all slices of one cache directory.
pub struct CacheIndex {
    path: PathBuf,
    loaded: Option<Loaded>,
}

impl CacheIndex {
    /// Open the index under `dir`. A missing or unreadable file yields
    /// an empty index; the cache only ever provides hints.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        let path = dir.join(INDEX_FILE);
        let loaded = load(&path);
        Ok(Self { path, loaded })
    }

    /// Whether any slice is indexed.
    pub fn is_empty(&self) -> bool {
        self.loaded.is_none() || self.head().object_nr == 0
    }

    /// Number of index entries.
    pub fn len(&self) -> u32 {
        self.head().object_nr
    }

    /// Newest commit date covered by the index.
    pub fn max_date(&self) -> u32 {
        self.head().max_date
    }

    /// Hashes of the indexed slices, in slice-list order.
    pub fn slices(&self) -> &[ObjectId] {
        match &self.loaded {
            Some(loaded) => &loaded.slices,
            None => &[],
        }
    }

    /// Look up a commit id.
    pub fn lookup(&self, id: &ObjectId) -> Option<IndexHit> {
        let loaded = self.loaded.as_ref()?;
        let bucket = id.first_byte() as usize;
        let start = loaded.fanout[bucket] as usize;
        let end = loaded.fanout[bucket + 1] as usize;
        if start >= end || end > loaded.map.len() {
            return None;
        }
        let span = end - start;
        if span % INDEX_ENTRY_LEN != 0 {
            return None;
        }

        let mut lo = 0usize;
        let mut hi = span / INDEX_ENTRY_LEN;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = IndexEntry::decode(&loaded.map, start + mid * INDEX_ENTRY_LEN).ok()?;
            match entry.id.cmp(id) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    let slice = *loaded.slices.get(entry.cache_index as usize)?;
                    return Some(IndexHit {
                        slice,
                        cache_index: entry.cache_index,
                        offset: entry.pos,
                        is_start: entry.is_start,
                    });
                }
            }
        }
        None
    }

    /// The slice covering `id`, short-circuiting commits newer than
    /// anything indexed.
    pub fn slice_for(&self, id: &ObjectId, date: u32) -> Option<ObjectId> {
        if date > self.max_date() {
            return None;
        }
        self.lookup(id).map(|hit| hit.slice)
    }

    /// All indexed start commits whose slice is in `which` (any slice
    /// if `which` is empty).
    pub fn starts_in(&self, which: &[ObjectId]) -> Vec<ObjectId> {
        let mut starts = Vec::new();
        let Some(loaded) = &self.loaded else { return starts };
        for entry in entries_of(loaded) {
            if !entry.is_start {
                continue;
            }
            let Some(slice) = loaded.slices.get(entry.cache_index as usize) else {
                continue;
            };
            if which.is_empty() || which.contains(slice) {
                starts.push(entry.id);
            }
        }
        starts
    }

    /// Merge the commits of a finished slice into the index and rewrite
    /// it atomically.
    ///
    /// Collision policy: an existing entry survives unless the newcomer
    /// is a start or `overwrite_all` is set — older slices tend to
    /// cover deeper ancestry, so keeping them maximizes replay length.
    /// End entries are never indexed (a replay reaching one must leave
    /// the slice).
    pub fn append_slice(
        &mut self,
        slice_hash: &ObjectId,
        data: &[u8],
        overwrite_all: bool,
    ) -> Result<(), CacheError> {
        SliceHeader::decode(data)?;

        let mut slices = self.slices().to_vec();
        let mut entries = self.all_entries();
        let mut by_id: HashMap<ObjectId, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();

        let cache_index = match slices.iter().position(|s| s == slice_hash) {
            Some(i) => i as u8,
            None => {
                if slices.len() >= u8::MAX as usize {
                    return Err(CacheError::Structural(
                        "index cannot refer to more than 255 slices".into(),
                    ));
                }
                slices.push(*slice_hash);
                (slices.len() - 1) as u8
            }
        };

        let old_max = self.max_date();
        let mut max_date = old_max;

        for item in codec::EntryCursor::new(data, SLICE_HEADER_LEN, data.len()) {
            let (pos, entry) = item?;
            if !entry.is_commit() || entry.is_end {
                continue;
            }

            // Commits newer than the old maximum cannot be indexed yet,
            // so skip the search.
            let existing = if entry.date > old_max {
                None
            } else {
                by_id.get(&entry.id).copied()
            };
            max_date = max_date.max(entry.date);

            if let Some(at) = existing {
                if !entry.is_start && !overwrite_all {
                    continue;
                }
                entries[at] = IndexEntry {
                    id: entry.id,
                    is_start: entry.is_start,
                    cache_index,
                    pos,
                };
            } else {
                by_id.insert(entry.id, entries.len());
                entries.push(IndexEntry {
                    id: entry.id,
                    is_start: entry.is_start,
                    cache_index,
                    pos,
                });
            }
        }

        self.write(slices, entries, max_date)
    }

    /// Rebuild the index from the slice files under `dir`, oldest
    /// first so that older slices win collisions, skipping hashes in
    /// `exclude`. Unreadable slices are reported, not fatal.
    pub fn regenerate(
        &mut self,
        dir: &Path,
        exclude: &[ObjectId],
    ) -> Result<RegenerateOutcome, CacheError> {
        let mut outcome = RegenerateOutcome::default();

        let mut candidates: Vec<(std::time::SystemTime, ObjectId)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(hash) = ObjectId::from_hex(name) else { continue };
            if exclude.contains(&hash) {
                continue;
            }
            match SliceFile::open(dir, &hash) {
                Ok(slice) => candidates.push((slice.mtime(), hash)),
                Err(e) => outcome
                    .warnings
                    .push(format!("bad cache slice {name}: {e}; fuse recommended")),
            }
        }
        candidates.sort();

        // Start from scratch; the old file is replaced on the first write.
        self.loaded = None;
        if candidates.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::Io(e)),
            }
            return Ok(outcome);
        }

        for (_, hash) in candidates {
            let slice = SliceFile::open(dir, &hash)?;
            self.append_slice(&hash, slice.data(), false)?;
            outcome.slices += 1;
        }
        Ok(outcome)
    }

    fn head(&self) -> IndexHeader {
        match &self.loaded {
            Some(loaded) => loaded.head.clone(),
            None => IndexHeader {
                version: INDEX_VERSION,
                ..IndexHeader::default()
            },
        }
    }

    fn all_entries(&self) -> Vec<IndexEntry> {
        match &self.loaded {
            Some(loaded) => entries_of(loaded).collect(),
            None => Vec::new(),
        }
    }

    /// Sort, rebuild the fanout, rewrite the file under its lock and
    /// remap.
    fn write(
        &mut self,
        slices: Vec<ObjectId>,
        mut entries: Vec<IndexEntry>,
        max_date: u32,
    ) -> Result<(), CacheError> {
        entries.sort_by(|a, b| a.id.cmp(&b.id));

        let ofs_objects = (INDEX_HEADER_LEN + slices.len() * 20 + FANOUT_LEN) as u32;
        let head = IndexHeader {
            version: INDEX_VERSION,
            ofs_objects,
            object_nr: entries.len() as u32,
            cache_nr: slices.len() as u8,
            max_date,
        };

        let mut fanout = [0u32; 256];
        let mut bucket = 0usize;
        for (i, entry) in entries.iter().enumerate() {
            let first = entry.id.first_byte() as usize;
            while bucket <= first {
                fanout[bucket] = ofs_objects + (i * INDEX_ENTRY_LEN) as u32;
                bucket += 1;
            }
        }
        let end = ofs_objects + (entries.len() * INDEX_ENTRY_LEN) as u32;
        while bucket < 256 {
            fanout[bucket] = end;
            bucket += 1;
        }

        let mut lock = LockFile::acquire(&self.path)?;
        lock.write_all(&head.encode())?;
        for slice in &slices {
            lock.write_all(slice.as_bytes())?;
        }
        for offset in &fanout {
            lock.write_all(&offset.to_be_bytes())?;
        }
        for entry in &entries {
            lock.write_all(&entry.encode())?;
        }
        lock.commit()?;

        self.loaded = load(&self.path);
        if self.loaded.is_none() {
            return Err(CacheError::Structural(
                "freshly written index failed to load".into(),
            ));
        }
        Ok(())
    }
}

fn entries_of(loaded: &Loaded) -> impl Iterator<Item = IndexEntry> + '_ {
    let start = loaded.head.ofs_objects as usize;
    let count = (loaded.map.len().saturating_sub(start)) / INDEX_ENTRY_LEN;
    (0..count).filter_map(move |i| IndexEntry::decode(&loaded.map, start + i * INDEX_ENTRY_LEN).ok())
}

/// Map and validate the index file; `None` means "no usable index".
fn load(path: &Path) -> Option<Loaded> {
    let file = fs::File::open(path).ok()?;
    let map = unsafe { Mmap::map(&file) }.ok()?;
    let head = IndexHeader::decode(&map).ok()?;

    let slices_start = INDEX_HEADER_LEN;
    let fanout_start = slices_start + head.cache_nr as usize * 20;
    let ofs_objects = fanout_start + FANOUT_LEN;
    if head.ofs_objects as usize != ofs_objects || map.len() < ofs_objects {
        return None;
    }
    if (map.len() - ofs_objects) % INDEX_ENTRY_LEN != 0 {
        return None;
    }

    let mut slices = Vec::with_capacity(head.cache_nr as usize);
    for i in 0..head.cache_nr as usize {
        slices.push(codec::oid_at(&map, slices_start + i * 20));
    }

    let mut fanout = Box::new([0u32; 257]);
    for i in 0..256 {
        fanout[i] = codec::read_u32(&map, fanout_start + i * 4);
        if (fanout[i] as usize) < ofs_objects || fanout[i] as usize > map.len() {
            return None;
        }
    }
    fanout[256] = map.len() as u32;

    Some(Loaded { map, head, slices, fanout })
}

/// Validate that the index hit actually addresses the commit it claims;
/// stale entries surface as [`CacheError::IndexStale`].
pub(crate) fn check_hit(
    slice: &SliceFile,
    hit: &IndexHit,
    id: &ObjectId,
) -> Result<ObjectEntry, CacheError> {
    let entry = slice.entry_at(hit.offset)?;
    if !entry.is_commit() || entry.id != *id {
        return Err(CacheError::IndexStale {
            commit: *id,
            slice: *slice.hash(),
        });
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ObjectEntry, SLICE_VERSION};
    use revcache_object::ObjectType;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        bytes[19] = n;
        ObjectId::from(bytes)
    }

    /// Build raw slice bytes holding the given commit entries.
    fn slice_bytes(hash: ObjectId, commits: &[(ObjectId, u32, bool, bool)]) -> Vec<u8> {
        let mut body = Vec::new();
        for &(id, date, is_start, is_end) in commits {
            ObjectEntry {
                id,
                kind: ObjectType::Commit,
                is_start,
                is_end,
                uninteresting: false,
                date,
                path: 1,
                merge_paths: vec![],
                split_paths: vec![],
                size: 10,
            }
            .encode(&mut body)
            .unwrap();
        }
        let head = SliceHeader {
            version: SLICE_VERSION,
            ofs_objects: SLICE_HEADER_LEN as u32,
            object_nr: commits.len() as u32,
            size: (SLICE_HEADER_LEN + body.len()) as u32,
            path_nr: 2,
            hash,
        };
        let mut data = head.encode().to_vec();
        data.extend_from_slice(&body);
        data
    }

    #[test]
    fn empty_index_has_no_hits() {
        let dir = tempfile::tempdir().unwrap();
        let index = CacheIndex::open(dir.path()).unwrap();
        assert!(index.is_empty());
        assert!(index.lookup(&oid(1)).is_none());
        assert!(index.slice_for(&oid(1), 5).is_none());
    }

    #[test]
    fn append_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::open(dir.path()).unwrap();
        let slice = oid(0xaa);
        let data = slice_bytes(slice, &[(oid(1), 100, true, false), (oid(2), 90, false, false)]);
        index.append_slice(&slice, &data, false).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.max_date(), 100);
        let hit = index.lookup(&oid(1)).unwrap();
        assert_eq!(hit.slice, slice);
        assert!(hit.is_start);
        assert_eq!(hit.offset, SLICE_HEADER_LEN as u32);

        // Reopening reads the same state back.
        let reopened = CacheIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.lookup(&oid(2)).is_some());
    }

    #[test]
    fn ends_are_not_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::open(dir.path()).unwrap();
        let slice = oid(0xaa);
        let data = slice_bytes(slice, &[(oid(1), 50, true, false), (oid(2), 40, false, true)]);
        index.append_slice(&slice, &data, false).unwrap();

        assert!(index.lookup(&oid(1)).is_some());
        assert!(index.lookup(&oid(2)).is_none());
    }

    #[test]
    fn max_date_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::open(dir.path()).unwrap();
        let slice = oid(0xaa);
        let data = slice_bytes(slice, &[(oid(1), 100, true, false)]);
        index.append_slice(&slice, &data, false).unwrap();

        assert!(index.slice_for(&oid(1), 100).is_some());
        assert!(index.slice_for(&oid(1), 101).is_none());
    }

    #[test]
    fn collision_keeps_older_entry_unless_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::open(dir.path()).unwrap();
        let old_slice = oid(0xaa);
        let new_slice = oid(0xbb);

        index
            .append_slice(&old_slice, &slice_bytes(old_slice, &[(oid(1), 50, false, false)]), false)
            .unwrap();
        // Same commit again, not a start: the old slice keeps it.
        index
            .append_slice(&new_slice, &slice_bytes(new_slice, &[(oid(1), 50, false, false)]), false)
            .unwrap();
        assert_eq!(index.lookup(&oid(1)).unwrap().slice, old_slice);

        // As a start it overrides.
        index
            .append_slice(&new_slice, &slice_bytes(new_slice, &[(oid(1), 50, true, false)]), false)
            .unwrap();
        assert_eq!(index.lookup(&oid(1)).unwrap().slice, new_slice);
    }

    #[test]
    fn overwrite_all_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::open(dir.path()).unwrap();
        let old_slice = oid(0xaa);
        let new_slice = oid(0xbb);

        index
            .append_slice(&old_slice, &slice_bytes(old_slice, &[(oid(1), 50, false, false)]), false)
            .unwrap();
        index
            .append_slice(&new_slice, &slice_bytes(new_slice, &[(oid(1), 50, false, false)]), true)
            .unwrap();
        assert_eq!(index.lookup(&oid(1)).unwrap().slice, new_slice);
    }

    #[test]
    fn fanout_buckets_cover_their_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::open(dir.path()).unwrap();
        let slice = oid(0xcc);
        let commits: Vec<(ObjectId, u32, bool, bool)> = (1..60u8)
            .map(|n| {
                let mut bytes = [0u8; 20];
                bytes[0] = n.wrapping_mul(37); // scatter over buckets
                bytes[19] = n;
                (ObjectId::from(bytes), u32::from(n), false, false)
            })
            .collect();
        index.append_slice(&slice, &slice_bytes(slice, &commits), false).unwrap();

        for (id, ..) in &commits {
            let hit = index.lookup(id).expect("every commit indexed");
            assert_eq!(hit.slice, slice);
        }
        assert!(index.lookup(&oid(0xfe)).is_none());
    }

    #[test]
    fn starts_in_filters_by_slice() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::open(dir.path()).unwrap();
        let s1 = oid(0xaa);
        let s2 = oid(0xbb);
        index
            .append_slice(&s1, &slice_bytes(s1, &[(oid(1), 10, true, false)]), false)
            .unwrap();
        index
            .append_slice(&s2, &slice_bytes(s2, &[(oid(2), 20, true, false)]), false)
            .unwrap();

        assert_eq!(index.starts_in(&[]).len(), 2);
        assert_eq!(index.starts_in(&[s1]), vec![oid(1)]);
    }
}
