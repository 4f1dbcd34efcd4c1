use std::collections::{BinaryHeap, HashMap, HashSet};

use revcache_hash::ObjectId;
use revcache_store::{read_commit, ObjectStore};

use crate::WalkError;

/// Commit metadata as the generator consumes it.
#[derive(Debug, Clone)]
pub struct WalkedCommit {
    pub id: ObjectId,
    /// Id of the root tree.
    pub tree: ObjectId,
    /// Committer timestamp, clamped to the format's 32-bit date field.
    pub date: u32,
    /// All parents, interesting or not; classify via
    /// [`BoundaryWalk::is_uninteresting`].
    pub parents: Vec<ObjectId>,
}

/// A bounded commit walk in reverse-chronological topological order.
///
/// The walk is computed eagerly: the UNINTERESTING closure of the end
/// set is marked first, then every commit reachable from the start set
/// outside that closure is collected and ordered so that every commit
/// precedes all of its parents, newest committer date first among the
/// ready candidates. The order is a deterministic function of the
/// commit graph alone.
pub struct BoundaryWalk {
    commits: HashMap<ObjectId, WalkedCommit>,
    order: Vec<ObjectId>,
    uninteresting: HashSet<ObjectId>,
}

impl BoundaryWalk {
    /// Build a walk over the commits reachable from `starts` but not
    /// from `ends`.
    pub fn new(
        store: &dyn ObjectStore,
        starts: &[ObjectId],
        ends: &[ObjectId],
    ) -> Result<Self, WalkError> {
        let uninteresting = ancestor_closure(store, ends)?;

        let mut commits = HashMap::new();
        let mut stack: Vec<ObjectId> = starts
            .iter()
            .filter(|id| !uninteresting.contains(*id))
            .copied()
            .collect();
        let mut seen: HashSet<ObjectId> = stack.iter().copied().collect();

        while let Some(id) = stack.pop() {
            let commit = read_commit(store, &id)?;
            for parent in &commit.parents {
                if !uninteresting.contains(parent) && seen.insert(*parent) {
                    stack.push(*parent);
                }
            }
            commits.insert(
                id,
                WalkedCommit {
                    id,
                    tree: commit.tree,
                    date: clamp_date(commit.date()),
                    parents: commit.parents,
                },
            );
        }

        let mut walk = Self {
            commits,
            order: Vec::new(),
            uninteresting,
        };
        walk.sort();
        Ok(walk)
    }

    /// Extend the walk until every commit's parents are either all
    /// interesting or all UNINTERESTING (the leg property).
    ///
    /// A commit with mixed parents pulls its UNINTERESTING parents into
    /// the walk; pulling can reclassify other commits, so this iterates
    /// to a fixed point before re-sorting.
    pub fn make_legs(&mut self, store: &dyn ObjectStore) -> Result<(), WalkError> {
        loop {
            let mut pull: Vec<ObjectId> = Vec::new();
            for commit in self.commits.values() {
                let mut any_un = false;
                let mut any_in = false;
                for parent in &commit.parents {
                    if self.uninteresting.contains(parent) {
                        any_un = true;
                    } else {
                        any_in = true;
                    }
                }
                if any_un && any_in {
                    pull.extend(
                        commit
                            .parents
                            .iter()
                            .filter(|p| self.uninteresting.contains(*p)),
                    );
                }
            }
            pull.sort();
            pull.dedup();
            if pull.is_empty() {
                break;
            }
            for id in pull {
                self.uninteresting.remove(&id);
                let commit = read_commit(store, &id)?;
                self.commits.insert(
                    id,
                    WalkedCommit {
                        id,
                        tree: commit.tree,
                        date: clamp_date(commit.date()),
                        parents: commit.parents,
                    },
                );
            }
        }
        self.sort();
        Ok(())
    }

    /// Whether `id` lies beyond the boundary.
    pub fn is_uninteresting(&self, id: &ObjectId) -> bool {
        self.uninteresting.contains(id)
    }

    /// The walked commit with this id, if it is part of the walk.
    pub fn get(&self, id: &ObjectId) -> Option<&WalkedCommit> {
        self.commits.get(id)
    }

    /// The ordered commit stream, latest first.
    pub fn iter(&self) -> impl Iterator<Item = &WalkedCommit> {
        self.order.iter().map(|id| &self.commits[id])
    }

    /// Number of commits in the walk.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Topological sort, newest date first among ready commits; ties
    /// break on the id so the order is reproducible.
    fn sort(&mut self) {
        let mut indegree: HashMap<ObjectId, u32> =
            self.commits.keys().map(|id| (*id, 0)).collect();
        for commit in self.commits.values() {
            for parent in &commit.parents {
                if let Some(count) = indegree.get_mut(parent) {
                    *count += 1;
                }
            }
        }

        let mut ready: BinaryHeap<(u32, ObjectId)> = BinaryHeap::new();
        for (id, count) in &indegree {
            if *count == 0 {
                ready.push((self.commits[id].date, *id));
            }
        }

        self.order.clear();
        while let Some((_, id)) = ready.pop() {
            self.order.push(id);
            let parents = self.commits[&id].parents.clone();
            for parent in &parents {
                if let Some(count) = indegree.get_mut(parent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push((self.commits[parent].date, *parent));
                    }
                }
            }
        }
    }
}

fn clamp_date(date: i64) -> u32 {
    date.clamp(0, u32::MAX as i64) as u32
}

/// Mark every commit reachable from `seeds`, seeds included.
fn ancestor_closure(
    store: &dyn ObjectStore,
    seeds: &[ObjectId],
) -> Result<HashSet<ObjectId>, WalkError> {
    let mut closure: HashSet<ObjectId> = HashSet::new();
    let mut stack: Vec<ObjectId> = seeds.to_vec();
    while let Some(id) = stack.pop() {
        if !closure.insert(id) {
            continue;
        }
        let commit = read_commit(store, &id)?;
        for parent in commit.parents {
            if !closure.contains(&parent) {
                stack.push(parent);
            }
        }
    }
    Ok(closure)
}
