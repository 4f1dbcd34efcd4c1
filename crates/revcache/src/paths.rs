//! Path bookkeeping during slice generation.
//!
//! Generation processes commits latest-first, so from the tracker's
//! perspective a commit *opens* the paths of its parents (the merge
//! list) and *closes* the paths of children whose lineage ends at it
//! (the split list). This inverts the forward-DAG reading; the format
//! is committed to this convention.
//!
//! Path ids are small integers recycled aggressively: a merge path
//! cannot be reused until every one of its recorded children has been
//! encountered, tracked by a per-slot child count.

use std::collections::HashMap;

use revcache_hash::ObjectId;

use crate::codec::{MAX_FAN_NR, MAX_PATH_ID};
use crate::CacheError;

/// The path facts recorded into one commit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    pub path: u16,
    pub is_start: bool,
    pub is_end: bool,
    /// Paths of the commit's interesting parents, in parent order.
    pub merge_paths: Vec<u16>,
    /// Paths of children closing on this commit.
    pub split_paths: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    InUse,
    /// A merge path waiting for this many children to close.
    Children(u8),
}

/// Assigns and recycles path ids while the generator streams commits.
pub struct PathTracker {
    /// Indexed by path id; slot 0 is reserved and never allocated.
    slots: Vec<Slot>,
    /// Expected ancestor commit → the child path to split out there.
    pending: Vec<(ObjectId, u16)>,
    /// Paths already assigned to not-yet-emitted commits.
    assigned: HashMap<ObjectId, u16>,
}

impl PathTracker {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::Free],
            pending: Vec::new(),
            assigned: HashMap::new(),
        }
    }

    /// One past the highest path id handed out; this becomes the slice
    /// header's `path_nr`.
    pub fn path_nr(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Process one commit of the latest-first stream and produce its
    /// path record. `parents` is the commit's full parent list;
    /// `uninteresting` classifies each of them.
    pub fn handle<F>(
        &mut self,
        id: &ObjectId,
        parents: &[ObjectId],
        uninteresting: F,
    ) -> Result<PathRecord, CacheError>
    where
        F: Fn(&ObjectId) -> bool,
    {
        // Resolve splits: children recorded against this commit close
        // their paths here.
        let mut split_paths = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].0 == *id {
                let (_, path) = self.pending.remove(i);
                if split_paths.len() >= MAX_FAN_NR {
                    return Err(CacheError::Overflow {
                        commit: *id,
                        count: split_paths.len() + 1,
                    });
                }
                split_paths.push(path);
                if let Slot::Children(n) = self.slots[path as usize] {
                    self.slots[path as usize] =
                        if n <= 1 { Slot::Free } else { Slot::Children(n - 1) };
                }
            } else {
                i += 1;
            }
        }

        // Assign our own path; a commit no child has claimed is a start.
        let (path, is_start) = match self.assigned.remove(id) {
            Some(path) => (path, false),
            None => (self.new_path()?, true),
        };
        self.slots[path as usize] = Slot::InUse;

        // Classify parents.
        let mut is_end = false;
        let mut interesting: Vec<ObjectId> = Vec::new();
        for parent in parents {
            if uninteresting(parent) {
                is_end = true;
            } else {
                interesting.push(*parent);
            }
        }

        if interesting.is_empty() {
            return Ok(PathRecord {
                path,
                is_start,
                is_end,
                merge_paths: Vec::new(),
                split_paths,
            });
        }

        // The linear case: a sole interesting parent nobody else has
        // claimed simply continues this path.
        if interesting.len() == 1 && !self.assigned.contains_key(&interesting[0]) {
            self.assigned.insert(interesting[0], path);
            return Ok(PathRecord {
                path,
                is_start,
                is_end,
                merge_paths: Vec::new(),
                split_paths,
            });
        }

        if interesting.len() > MAX_FAN_NR {
            return Err(CacheError::Overflow {
                commit: *id,
                count: interesting.len(),
            });
        }

        // Merge: every interesting parent gets (or keeps) a path of its
        // own and owes this path a split when it is emitted. Boundary
        // tracking forbids reusing the merge path for a parent.
        let mut merge_paths = Vec::with_capacity(interesting.len());
        for parent in &interesting {
            let parent_path = match self.assigned.get(parent) {
                Some(&p) => p,
                None => {
                    let p = self.new_path()?;
                    self.assigned.insert(*parent, p);
                    p
                }
            };
            merge_paths.push(parent_path);
            self.pending.push((*parent, path));
        }
        self.slots[path as usize] = Slot::Children(interesting.len() as u8);

        Ok(PathRecord {
            path,
            is_start,
            is_end,
            merge_paths,
            split_paths,
        })
    }

    /// Lowest free path id, growing the space if none is free.
    fn new_path(&mut self) -> Result<u16, CacheError> {
        for (i, slot) in self.slots.iter().enumerate().skip(1) {
            if *slot == Slot::Free {
                self.slots[i] = Slot::InUse;
                return Ok(i as u16);
            }
        }
        if self.slots.len() > MAX_PATH_ID as usize {
            return Err(CacheError::Structural("path id space exhausted".into()));
        }
        self.slots.push(Slot::InUse);
        Ok((self.slots.len() - 1) as u16)
    }
}

impl Default for PathTracker {
    fn default() -> Self {
        Self::new()
    }
}
