//! Object store access for the rev-cache engine.
//!
//! The cache itself never parses raw repository data; everything it needs
//! goes through the [`ObjectStore`] trait. Two implementations live here:
//! [`MemoryStore`] for tests and embedding, and [`LooseStore`] reading a
//! repository's zlib-compressed loose objects. [`Repository`] locates the
//! `.git` directory (and thereby the `rev-cache/` directory) and
//! [`RefStore`] resolves ref names for the command-line front-end.

mod loose;
mod memory;
mod refs;
mod repo;

pub use loose::LooseStore;
pub use memory::MemoryStore;
pub use refs::RefStore;
pub use repo::Repository;

use revcache_hash::ObjectId;
use revcache_object::{Commit, Object, ObjectError, ObjectType, Tree};

/// Errors produced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("object {oid} is a {actual}, expected {expected}")]
    WrongType {
        oid: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error("corrupt object {oid}: {reason}")]
    Corrupt { oid: ObjectId, reason: String },

    #[error("repository not found starting from {0}")]
    RepoNotFound(std::path::PathBuf),

    #[error("invalid ref {0:?}")]
    InvalidRef(String),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read access to a content-addressed object store.
///
/// This is the contract the cache consumes: parsed object reads plus a
/// cheap header read used when only type and size are needed.
pub trait ObjectStore {
    /// Check if an object exists.
    fn contains(&self, oid: &ObjectId) -> bool;

    /// Read and parse an object. Returns `Ok(None)` if absent.
    fn read(&self, oid: &ObjectId) -> Result<Option<Object>, StoreError>;

    /// Read just the type and uncompressed size.
    fn read_header(&self, oid: &ObjectId) -> Result<Option<(ObjectType, u64)>, StoreError>;
}

/// Read an object that must be a commit.
pub fn read_commit(store: &dyn ObjectStore, oid: &ObjectId) -> Result<Commit, StoreError> {
    match store.read(oid)?.ok_or(StoreError::NotFound(*oid))? {
        Object::Commit(c) => Ok(c),
        other => Err(StoreError::WrongType {
            oid: *oid,
            expected: ObjectType::Commit,
            actual: other.object_type(),
        }),
    }
}

/// Read an object that must be a tree.
pub fn read_tree(store: &dyn ObjectStore, oid: &ObjectId) -> Result<Tree, StoreError> {
    match store.read(oid)?.ok_or(StoreError::NotFound(*oid))? {
        Object::Tree(t) => Ok(t),
        other => Err(StoreError::WrongType {
            oid: *oid,
            expected: ObjectType::Tree,
            actual: other.object_type(),
        }),
    }
}

/// Follow tag indirection until a commit is reached.
pub fn peel_to_commit(store: &dyn ObjectStore, oid: &ObjectId) -> Result<ObjectId, StoreError> {
    let mut current = *oid;
    // Tag chains are short; bound the loop against cycles in corrupt data.
    for _ in 0..16 {
        match store.read(&current)?.ok_or(StoreError::NotFound(current))? {
            Object::Commit(_) => return Ok(current),
            Object::Tag(tag) => current = tag.target,
            other => {
                return Err(StoreError::WrongType {
                    oid: current,
                    expected: ObjectType::Commit,
                    actual: other.object_type(),
                })
            }
        }
    }
    Err(StoreError::Corrupt {
        oid: *oid,
        reason: "tag chain too deep".into(),
    })
}
