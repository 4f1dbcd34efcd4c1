//! Slice generation.
//!
//! The generator drains a [`BoundaryWalk`] latest-first, runs the
//! [`PathTracker`] over every commit, and streams encoded entries into
//! a temporary file in ~1 MiB flushes. When the walk is exhausted the
//! slice hash — SHA-1 over the end hashes then the start hashes, in
//! emission order — is computed, the header is patched in, the slice
//! is appended to the index and the file atomically renamed to its
//! hash.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use revcache_hash::{Hasher, ObjectId};
use revcache_object::ObjectType;
use revcache_store::{ObjectStore, StoreError};
use revcache_walk::{new_side_objects, tree_closure, BoundaryWalk, WalkedCommit};

use crate::codec::{ObjectEntry, SliceHeader, SLICE_HEADER_LEN, SLICE_VERSION};
use crate::index::CacheIndex;
use crate::slice::SliceFile;
use crate::CacheError;

/// Flush granularity for the emission buffer.
const FLUSH_AT: usize = 1_000_000;

/// Knobs for slice generation.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Record each commit's tree and unique objects, not just commits.
    pub objects: bool,
    /// Extend the frontier until every commit's parents are wholly
    /// interesting or wholly UNINTERESTING.
    pub legs: bool,
    /// Append the finished slice to the global index.
    pub make_index: bool,
    /// Let this slice's commits override existing index entries.
    pub overwrite_all: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            objects: true,
            legs: false,
            make_index: true,
            overwrite_all: false,
        }
    }
}

/// What a generation run produced.
#[derive(Debug)]
pub struct SliceOutcome {
    pub hash: ObjectId,
    /// Total entries written, commits and objects alike.
    pub object_nr: u32,
    pub path_nr: u16,
    pub starts: Vec<ObjectId>,
    pub ends: Vec<ObjectId>,
}

/// Generate a slice for the frontier `(starts, ends)`.
pub(crate) fn make_slice(
    store: &dyn ObjectStore,
    dir: &Path,
    index: &mut CacheIndex,
    starts: &[ObjectId],
    ends: &[ObjectId],
    opts: &GenerateOptions,
) -> Result<SliceOutcome, CacheError> {
    let mut walk = BoundaryWalk::new(store, starts, ends)?;
    if opts.legs {
        walk.make_legs(store)?;
    }
    write_slice(store, dir, index, &walk, opts, None)
}

/// Drive the walk into a slice file. `reuse` carries the open source
/// slices during a fuse so unique-object runs can be copied verbatim.
pub(crate) fn write_slice(
    store: &dyn ObjectStore,
    dir: &Path,
    index: &mut CacheIndex,
    walk: &BoundaryWalk,
    opts: &GenerateOptions,
    mut reuse: Option<&mut FuseReuse>,
) -> Result<SliceOutcome, CacheError> {
    fs::create_dir_all(dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(&[0u8; SLICE_HEADER_LEN])?;

    let mut tracker = crate::paths::PathTracker::new();
    let mut buf: Vec<u8> = Vec::with_capacity(FLUSH_AT + 4096);
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    let mut object_nr: u32 = 0;
    let mut body_len: usize = 0;

    for commit in walk.iter() {
        let record = tracker.handle(&commit.id, &commit.parents, |p| walk.is_uninteresting(p))?;

        if record.is_start {
            starts.push(commit.id);
        }
        if record.is_end {
            ends.push(commit.id);
        }
        // A parentless commit bounds the slice at the root of history;
        // the null id stands in for the missing parent side.
        if commit.parents.is_empty() {
            ends.push(ObjectId::NULL);
        }

        let size = object_size(store, &commit.id)?;
        ObjectEntry {
            id: commit.id,
            kind: ObjectType::Commit,
            is_start: record.is_start,
            is_end: record.is_end,
            uninteresting: false,
            date: commit.date,
            path: record.path,
            merge_paths: record.merge_paths,
            split_paths: record.split_paths,
            size,
        }
        .encode(&mut buf)?;
        object_nr += 1;

        if opts.objects {
            let copied = match reuse.as_deref_mut() {
                Some(sources) if !record.is_end => {
                    sources.copy_objects(index, &commit.id, &mut buf)
                }
                _ => None,
            };
            match copied {
                Some(count) => object_nr += count,
                None => {
                    object_nr += emit_objects(store, walk, commit, record.is_end, &mut buf)?;
                }
            }
        }

        if buf.len() > FLUSH_AT {
            temp.write_all(&buf)?;
            body_len += buf.len();
            buf.clear();
        }
    }

    if !buf.is_empty() {
        temp.write_all(&buf)?;
        body_len += buf.len();
        buf.clear();
    }

    // The hash names the boundary, nothing else: ends first, then
    // starts, in the order they were emitted.
    let mut hasher = Hasher::new();
    for id in &ends {
        hasher.update(id.as_bytes());
    }
    for id in &starts {
        hasher.update(id.as_bytes());
    }
    let hash = hasher.finalize();

    let head = SliceHeader {
        version: SLICE_VERSION,
        ofs_objects: SLICE_HEADER_LEN as u32,
        object_nr,
        size: (SLICE_HEADER_LEN + body_len) as u32,
        path_nr: tracker.path_nr(),
        hash,
    };
    let file = temp.as_file_mut();
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&head.encode())?;
    file.flush()?;
    file.sync_all()?;

    if opts.make_index {
        let data = fs::read(temp.path())?;
        index.append_slice(&hash, &data, opts.overwrite_all)?;
    }

    temp.persist(dir.join(hash.to_hex()))
        .map_err(|e| CacheError::Io(e.error))?;

    Ok(SliceOutcome {
        hash,
        object_nr,
        path_nr: head.path_nr,
        starts,
        ends,
    })
}

/// Emit the root tree and, for non-end commits, the unique objects.
fn emit_objects(
    store: &dyn ObjectStore,
    walk: &BoundaryWalk,
    commit: &WalkedCommit,
    is_end: bool,
    buf: &mut Vec<u8>,
) -> Result<u32, CacheError> {
    let tree_size = object_size(store, &commit.tree)?;
    ObjectEntry::non_commit(commit.tree, ObjectType::Tree, tree_size).encode(buf)?;
    let mut count = 1;

    if !is_end {
        for id in unique_objects(store, walk, commit)? {
            let (kind, size) = store
                .read_header(&id)?
                .ok_or(StoreError::NotFound(id))?;
            ObjectEntry::non_commit(id, kind, size).encode(buf)?;
            count += 1;
        }
    }
    Ok(count)
}

/// The objects new at `commit`: the intersection across all parents of
/// each parent-to-commit tree diff's new side, hash-sorted. An object
/// present in any parent belongs to that parent's region instead.
/// Root commits contribute their entire tree closure.
///
/// Only called for commits whose parents are all interesting.
fn unique_objects(
    store: &dyn ObjectStore,
    walk: &BoundaryWalk,
    commit: &WalkedCommit,
) -> Result<Vec<ObjectId>, CacheError> {
    if commit.parents.is_empty() {
        let mut all = Vec::new();
        tree_closure(store, &commit.tree, &mut all)?;
        all.sort();
        all.dedup();
        return Ok(all);
    }

    let mut acc: Option<Vec<ObjectId>> = None;
    for parent in &commit.parents {
        let parent_tree = match walk.get(parent) {
            Some(walked) => walked.tree,
            None => revcache_store::read_commit(store, parent)?.tree,
        };
        let mut fresh = Vec::new();
        new_side_objects(store, &parent_tree, &commit.tree, &mut fresh)?;
        fresh.sort();
        fresh.dedup();

        acc = Some(match acc {
            None => fresh,
            Some(previous) => intersect_sorted(&previous, &fresh),
        });
        if acc.as_ref().is_some_and(|a| a.is_empty()) {
            break;
        }
    }
    Ok(acc.unwrap_or_default())
}

/// Intersection of two sorted, deduplicated id lists.
fn intersect_sorted(a: &[ObjectId], b: &[ObjectId]) -> Vec<ObjectId> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn object_size(store: &dyn ObjectStore, id: &ObjectId) -> Result<u64, CacheError> {
    Ok(store
        .read_header(id)?
        .ok_or(StoreError::NotFound(*id))?
        .1)
}

/// Open source slices a fuse run copies object entries from.
pub(crate) struct FuseReuse {
    /// Source slices positioned by their index `cache_index`.
    pub sources: Vec<Option<SliceFile>>,
    /// Where the previous copy stopped, for cheap continuation.
    last: Option<(usize, u32)>,
}

impl FuseReuse {
    pub fn new(sources: Vec<Option<SliceFile>>) -> Self {
        Self { sources, last: None }
    }

    /// Copy the run of non-commit entries following `id`'s entry in a
    /// source slice, verbatim. Returns the number of entries copied,
    /// or `None` when the commit cannot be reused (not present, a
    /// boundary entry, or damaged — the caller recomputes instead).
    fn copy_objects(
        &mut self,
        index: &CacheIndex,
        id: &ObjectId,
        out: &mut Vec<u8>,
    ) -> Option<u32> {
        let (source_at, offset) = self.locate(index, id)?;
        let slice = self.sources[source_at].as_ref()?;

        let mut entries = slice.entries_from(offset);
        let (_, commit) = entries.next()?.ok()?;
        if commit.is_end {
            // An end entry carries no unique-object run to copy.
            return None;
        }

        let mut copied = 0u32;
        let mut resume = slice.data().len() as u32;
        for item in entries {
            let (pos, entry) = item.ok()?;
            if entry.is_commit() {
                resume = pos;
                break;
            }
            let len = entry.encoded_len();
            out.extend_from_slice(&slice.data()[pos as usize..pos as usize + len]);
            copied += 1;
        }

        self.last = Some((source_at, resume));
        Some(copied)
    }

    /// Find `id`'s entry: first try continuing where the last copy
    /// stopped, then fall back to an index search.
    fn locate(&self, index: &CacheIndex, id: &ObjectId) -> Option<(usize, u32)> {
        if let Some((source_at, offset)) = self.last {
            if let Some(slice) = self.sources.get(source_at).and_then(|s| s.as_ref()) {
                if let Ok(entry) = slice.entry_at(offset) {
                    if entry.is_commit() && entry.id == *id {
                        return Some((source_at, offset));
                    }
                }
            }
        }

        let hit = index.lookup(id)?;
        let source_at = hit.cache_index as usize;
        let slice = self.sources.get(source_at)?.as_ref()?;
        let entry = slice.entry_at(hit.offset).ok()?;
        if !entry.is_commit() || entry.id != *id {
            return None;
        }
        Some((source_at, hit.offset))
    }
}
