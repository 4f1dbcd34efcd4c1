//! Commit traversal for slice generation.
//!
//! [`BoundaryWalk`] produces the reverse-chronological topological commit
//! stream the generator consumes, bounded by interesting and UNINTERESTING
//! seed sets. The tree-diff helpers compute the objects that appear on a
//! commit's side of a parent diff, used for unique-object emission.

mod tree_diff;
mod walk;

pub use tree_diff::{new_side_objects, tree_closure};
pub use walk::{BoundaryWalk, WalkedCommit};

use revcache_store::StoreError;

/// Errors produced while walking commits or trees.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
