//! A revision-graph cache for content-addressed object stores.
//!
//! Commit-ancestry traversal dominates the cost of many repository
//! queries. This crate persists **slices** — precomputed topological
//! walks of commit subgraphs together with the objects unique to each
//! commit — in a compact binary format that is memory-mapped and
//! replayed without touching the underlying commit and tree objects.
//! A global index maps commit ids to the slice and offset that covers
//! them.
//!
//! The cache is a hint, never an authority: a missing or damaged slice
//! surfaces an error and the caller falls back to walking the object
//! store directly.
//!
//! Entry point is [`RevCache`]:
//!
//! - [`RevCache::make_slice`] generates a slice from interesting /
//!   UNINTERESTING frontier sets,
//! - [`RevCache::replay`] streams a slice back out as topologically
//!   ordered commits honoring UNINTERESTING boundaries,
//! - [`RevCache::fuse`] coalesces many small slices into one,
//! - [`RevCache::regenerate_index`] rebuilds the index from the slice
//!   files on disk.

pub mod codec;
mod fuse;
mod generate;
mod index;
mod lockfile;
mod paths;
mod replay;
mod slice;

pub use fuse::{FuseOptions, FuseOutcome};
pub use generate::{GenerateOptions, SliceOutcome};
pub use index::{CacheIndex, IndexHit, RegenerateOutcome};
pub use lockfile::LockFile;
pub use paths::{PathRecord, PathTracker};
pub use replay::{push_work, PendingObject, ReplayOptions, ReplayState, ReplayedCommit, WorkItem};
pub use slice::{SliceEntries, SliceFile};

use std::path::{Path, PathBuf};

use revcache_hash::ObjectId;
use revcache_store::{ObjectStore, StoreError};
use revcache_walk::WalkError;

/// Errors produced by cache operations.
///
/// The cache logs nothing and never retries; callers decide whether to
/// continue without it.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Signature or version mismatch, out-of-range path id or offset,
    /// size fields inconsistent with the file. The affected slice is
    /// unusable.
    #[error("malformed slice or index: {0}")]
    Structural(String),

    /// An index entry points at an entry that is not the commit it
    /// claims. The slice should be ignored and a fuse is recommended.
    #[error("stale index entry for {commit} in slice {slice}")]
    IndexStale { commit: ObjectId, slice: ObjectId },

    /// The commit is not covered by any slice. Not a failure; the
    /// caller walks the object store instead.
    #[error("commit {0} is not indexed")]
    NotIndexed(ObjectId),

    /// Replay was asked to start from a boundary entry.
    #[error("commit {0} is a slice boundary")]
    BoundaryViolation(ObjectId),

    /// A commit exceeded the format's 127 parent/child limit.
    #[error("commit {commit} has {count} parents or pending children, format limit is 127")]
    Overflow { commit: ObjectId, count: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A handle to one cache directory: the global index plus its slices.
///
/// All state is owned by the handle; nothing is process-global, so
/// independent caches can coexist in one process (each handle is still
/// single-threaded within an operation).
pub struct RevCache<'a> {
    store: &'a dyn ObjectStore,
    dir: PathBuf,
    index: CacheIndex,
}

impl<'a> RevCache<'a> {
    /// Open the cache under `dir`, creating the directory if needed.
    /// A missing index file yields an empty index.
    pub fn open(store: &'a dyn ObjectStore, dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index = CacheIndex::open(&dir)?;
        Ok(Self { store, dir, index })
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The global index.
    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    /// The slice covering `commit`, if any. `date` is the commit's
    /// timestamp; commits newer than anything indexed short-circuit.
    pub fn slice_for(&self, commit: &ObjectId, date: u32) -> Option<ObjectId> {
        self.index.slice_for(commit, date)
    }

    /// Open a slice by hash, following pointer files.
    pub fn open_slice(&self, hash: &ObjectId) -> Result<SliceFile, CacheError> {
        SliceFile::open(&self.dir, hash)
    }

    /// Generate a slice covering the commits reachable from `starts`
    /// but not from `ends`, and index it.
    pub fn make_slice(
        &mut self,
        starts: &[ObjectId],
        ends: &[ObjectId],
        opts: &GenerateOptions,
    ) -> Result<SliceOutcome, CacheError> {
        generate::make_slice(self.store, &self.dir, &mut self.index, starts, ends, opts)
    }

    /// Replay `slice` starting from `seed`, feeding `state` and the
    /// date-ordered `work` queue.
    pub fn replay(
        &self,
        slice: &SliceFile,
        seed: &ObjectId,
        state: &mut ReplayState,
        work: &mut Vec<WorkItem>,
        opts: &ReplayOptions,
    ) -> Result<(), CacheError> {
        replay::replay_slice(self.store, &self.index, slice, seed, state, work, opts)
    }

    /// Coalesce the fusable slices under the cache directory into one.
    /// Returns `None` when fewer than two slices qualify.
    pub fn fuse(&mut self, opts: &FuseOptions) -> Result<Option<FuseOutcome>, CacheError> {
        fuse::fuse_slices(self.store, &self.dir, &mut self.index, opts)
    }

    /// Rebuild the index from the slice files on disk, oldest first.
    pub fn regenerate_index(&mut self) -> Result<RegenerateOutcome, CacheError> {
        self.index.regenerate(&self.dir, &[])
    }

    /// Register an out-of-tree slice file via a pointer record and
    /// index its commits.
    pub fn link_slice(&mut self, slice_path: &Path) -> Result<ObjectId, CacheError> {
        slice::link_slice(&self.dir, &mut self.index, slice_path)
    }
}
