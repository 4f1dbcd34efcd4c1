//! Slice replay.
//!
//! Replay reconstitutes a topologically ordered commit stream from a
//! slice without reading the commits themselves: parents are inferred
//! from the path bookkeeping ("face value") and only boundary entries
//! are parsed from the object store. UNINTERESTING state propagates
//! along paths; where an interesting and an UNINTERESTING lineage meet
//! the path collapses to UNINTERESTING and the optimistic parent links
//! of the commit above it are discarded by re-parsing it.

use std::collections::HashMap;

use revcache_hash::ObjectId;
use revcache_object::ObjectType;
use revcache_store::{read_commit, ObjectStore};

use crate::codec::ObjectEntry;
use crate::index::{self, CacheIndex};
use crate::slice::SliceFile;
use crate::CacheError;

/// Traversal flags for a replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Collect tree entries as pending objects.
    pub trees: bool,
    /// Collect blob entries as pending objects.
    pub blobs: bool,
    /// Emit UNINTERESTING commits too.
    pub show_all: bool,
    /// Commits older than this are forced UNINTERESTING.
    pub max_age: Option<u32>,
}

/// A commit materialized by replay.
#[derive(Debug, Clone)]
pub struct ReplayedCommit {
    pub id: ObjectId,
    pub date: u32,
    pub uninteresting: bool,
    /// True while the parent list is inferred from slice bookkeeping
    /// rather than parsed from the object store.
    pub face_value: bool,
    pub parents: Vec<ObjectId>,
    /// Root tree, when known (boundary parse or tree collection).
    pub tree: Option<ObjectId>,
}

/// A non-commit object attributed to an emitted commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingObject {
    pub id: ObjectId,
    pub kind: ObjectType,
    pub size: u64,
}

/// A commit waiting to be traversed outside the current slice, kept in
/// date order (newest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub id: ObjectId,
    pub date: u32,
    pub uninteresting: bool,
}

/// Accumulated replay results. One state can span several sequential
/// replays; a commit already seen is never emitted twice.
#[derive(Debug, Default)]
pub struct ReplayState {
    /// Every commit materialized so far, keyed by id.
    pub commits: HashMap<ObjectId, ReplayedCommit>,
    /// Ids of emitted commits, in slice order.
    pub queue: Vec<ObjectId>,
    /// Objects attributed to emitted commits.
    pub objects: Vec<PendingObject>,
}

impl ReplayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The emitted commits, in output order.
    pub fn emitted(&self) -> impl Iterator<Item = &ReplayedCommit> {
        self.queue.iter().map(|id| &self.commits[id])
    }
}

/// Insert into the work queue keeping newest-date-first order.
pub fn push_work(work: &mut Vec<WorkItem>, item: WorkItem) {
    let at = work
        .iter()
        .position(|w| w.date < item.date)
        .unwrap_or(work.len());
    work.insert(at, item);
}

/// Per-path propagation state during the sweep.
#[derive(Debug, Default, Clone, Copy)]
struct PathState {
    /// Some interesting lineage flows through this path.
    ipath: bool,
    /// Some UNINTERESTING lineage flows through this path.
    upath: bool,
    /// Merge parents still expected before the path may be recycled.
    count: u8,
}

/// Replay `slice` from `seed`.
///
/// Commits from `work` that live in this slice are transferred into it
/// (keeping their UNINTERESTING polarity) and removed from the queue;
/// the sweep then starts at the lowest included offset. Emitted
/// commits land in `state.queue`; boundary commits go back into
/// `work`, date-ordered, for the caller to continue outside the cache.
///
/// On a structural violation the error is returned immediately;
/// whatever was already emitted stays in `state` and the caller must
/// discard or re-verify it.
pub(crate) fn replay_slice(
    store: &dyn ObjectStore,
    index: &CacheIndex,
    slice: &SliceFile,
    seed: &ObjectId,
    state: &mut ReplayState,
    work: &mut Vec<WorkItem>,
    opts: &ReplayOptions,
) -> Result<(), CacheError> {
    // Setup: locate the seed, transfer matching work-queue commits.
    let hit = index.lookup(seed).ok_or(CacheError::NotIndexed(*seed))?;
    if hit.slice != *slice.hash() {
        return Err(CacheError::NotIndexed(*seed));
    }
    let seed_entry = index::check_hit(slice, &hit, seed)?;
    if seed_entry.is_end {
        return Err(CacheError::BoundaryViolation(*seed));
    }

    let mut included: HashMap<u32, bool> = HashMap::new();
    included.insert(hit.offset, false);
    let mut min_offset = hit.offset;

    let mut remaining = Vec::with_capacity(work.len());
    for item in work.drain(..) {
        let transferred = match index.lookup(&item.id) {
            Some(h) if h.slice == *slice.hash() => {
                match index::check_hit(slice, &h, &item.id) {
                    Ok(_) => {
                        included.insert(h.offset, item.uninteresting);
                        min_offset = min_offset.min(h.offset);
                        true
                    }
                    Err(_) => false, // stale entry; keep walking it outside
                }
            }
            _ => false,
        };
        if !transferred {
            remaining.push(item);
        }
    }
    *work = remaining;

    sweep(store, slice, &included, min_offset, state, work, opts)
}

fn sweep(
    store: &dyn ObjectStore,
    slice: &SliceFile,
    included: &HashMap<u32, bool>,
    min_offset: u32,
    state: &mut ReplayState,
    work: &mut Vec<WorkItem>,
    opts: &ReplayOptions,
) -> Result<(), CacheError> {
    let path_nr = slice.path_nr() as usize;
    let mut paths = vec![PathState::default(); path_nr];
    let mut last_objects: Vec<Option<ObjectId>> = vec![None; path_nr];
    let mut consume_children: Option<ObjectId> = None;

    for item in slice.entries_from(min_offset) {
        let (offset, entry) = item?;

        if !entry.is_commit() {
            if let Some(owner) = consume_children {
                collect_object(state, opts, &owner, &entry);
            }
            continue;
        }
        consume_children = None;

        let path = entry.path as usize;

        // In one of our branches? UNINTERESTING trumps interesting.
        if let Some(&uninteresting) = included.get(&offset) {
            if uninteresting {
                paths[path].upath = true;
            } else {
                paths[path].ipath = true;
            }
        } else if !paths[path].ipath && !paths[path].upath {
            continue;
        }

        // Age cutoff forces the boundary side.
        if opts.max_age.is_some_and(|age| entry.date < age) {
            paths[path].upath = true;
        }
        // State accumulated by earlier replays counts too.
        if state
            .commits
            .get(&entry.id)
            .is_some_and(|c| c.uninteresting)
        {
            paths[path].upath = true;
        }

        // Both lineages meet here: collapse to UNINTERESTING and stop
        // trusting the inferred parents of the commit above us.
        if paths[path].ipath && paths[path].upath {
            paths[path] = PathState { upath: true, ..PathState::default() };
            if let Some(last) = last_objects[path].take() {
                reparse(store, state, &last)?;
            }
        }
        let uninteresting_now = paths[path].upath;

        // Close child paths splitting out at this commit.
        for &q in &entry.split_paths {
            let q = q as usize;
            if paths[q].ipath && uninteresting_now {
                // Boundary edge: the child's inferred parents are void.
                if let Some(last) = last_objects[q].take() {
                    reparse(store, state, &last)?;
                }
            } else if let Some(last) = last_objects[q] {
                link_parent(state, &last, &entry.id);
            }

            // A merge path stays open until all of its parents landed.
            if paths[q].count > 0 {
                paths[q].count -= 1;
                if paths[q].count > 0 {
                    continue;
                }
            }
            paths[q] = PathState::default();
            last_objects[q] = None;
        }

        // Topology edge to the previous commit on our own path.
        if let Some(last) = last_objects[path] {
            link_parent(state, &last, &entry.id);
        }

        let already_seen = state.commits.contains_key(&entry.id);
        if !already_seen {
            let record = if entry.is_end {
                // The face-value shortcut is invalid at boundaries:
                // the parents lie outside the slice.
                let commit = read_commit(store, &entry.id)?;
                ReplayedCommit {
                    id: entry.id,
                    date: entry.date,
                    uninteresting: false,
                    face_value: false,
                    parents: commit.parents,
                    tree: Some(commit.tree),
                }
            } else {
                ReplayedCommit {
                    id: entry.id,
                    date: entry.date,
                    uninteresting: false,
                    face_value: true,
                    parents: Vec::new(),
                    tree: None,
                }
            };
            state.commits.insert(entry.id, record);
        }

        let record = state.commits.get_mut(&entry.id).expect("just inserted");
        if uninteresting_now {
            record.uninteresting = true;
        }
        let record_uninteresting = record.uninteresting;

        last_objects[path] = Some(entry.id);

        // Hand the commit to the caller.
        if !record_uninteresting || opts.show_all {
            if !already_seen {
                if entry.is_end {
                    push_work(
                        work,
                        WorkItem {
                            id: entry.id,
                            date: entry.date,
                            uninteresting: record_uninteresting,
                        },
                    );
                } else {
                    state.queue.push(entry.id);
                }
            }
            if !record_uninteresting {
                consume_children = Some(entry.id);
            }
        }

        // Open parent paths with our polarity; our own path must wait
        // for all of them before it can be recycled.
        for &m in &entry.merge_paths {
            let m = m as usize;
            if uninteresting_now {
                paths[m].upath = true;
            } else {
                paths[m].ipath = true;
            }
        }
        if !entry.merge_paths.is_empty() {
            paths[path].count = entry.merge_paths.len() as u8;
        }
    }

    // Every opened merge path must have been fully closed by now.
    if let Some(open) = paths.iter().position(|p| p.count != 0) {
        return Err(CacheError::Structural(format!(
            "slice {} left path {open} waiting for parents",
            slice.hash()
        )));
    }
    Ok(())
}

/// Record `parent` on a face-value commit; parsed commits already know
/// their true parents.
fn link_parent(state: &mut ReplayState, child: &ObjectId, parent: &ObjectId) {
    if let Some(commit) = state.commits.get_mut(child) {
        if commit.face_value {
            commit.parents.push(*parent);
        }
    }
}

/// Replace a commit's inferred parents with the real ones from the
/// object store.
fn reparse(
    store: &dyn ObjectStore,
    state: &mut ReplayState,
    id: &ObjectId,
) -> Result<(), CacheError> {
    let commit = read_commit(store, id)?;
    if let Some(record) = state.commits.get_mut(id) {
        record.parents = commit.parents;
        record.tree = Some(commit.tree);
        record.face_value = false;
    }
    Ok(())
}

/// Attribute a non-commit entry to the interesting commit above it.
fn collect_object(
    state: &mut ReplayState,
    opts: &ReplayOptions,
    owner: &ObjectId,
    entry: &ObjectEntry,
) {
    let wanted = match entry.kind {
        ObjectType::Tree => opts.trees,
        ObjectType::Blob => opts.blobs,
        _ => false,
    };
    if !wanted {
        return;
    }
    if entry.kind == ObjectType::Tree {
        if let Some(commit) = state.commits.get_mut(owner) {
            // The first tree of a commit's run is its root tree.
            if commit.tree.is_none() {
                commit.tree = Some(entry.id);
            }
        }
    }
    state.objects.push(PendingObject {
        id: entry.id,
        kind: entry.kind,
        size: entry.size,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        ObjectId::from(bytes)
    }

    #[test]
    fn work_queue_stays_newest_first() {
        let mut work = Vec::new();
        for (n, date) in [(1u8, 50u32), (2, 80), (3, 20), (4, 80)] {
            push_work(
                &mut work,
                WorkItem { id: oid(n), date, uninteresting: false },
            );
        }
        let dates: Vec<u32> = work.iter().map(|w| w.date).collect();
        assert_eq!(dates, vec![80, 80, 50, 20]);
        // Stable for equal dates: first-inserted stays first.
        assert_eq!(work[0].id, oid(2));
        assert_eq!(work[1].id, oid(4));
    }
}
