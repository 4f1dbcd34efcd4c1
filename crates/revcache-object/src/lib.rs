//! Object model for the rev-cache engine: blob, tree, commit and tag
//! parsing plus canonical serialization.
//!
//! Only the fields the cache consumes are modeled — a commit keeps its
//! tree, parents, signatures and message; gpg signatures and unknown
//! headers are skipped during parsing and not round-tripped.

mod blob;
mod commit;
pub mod header;
mod tag;
mod tree;

pub use blob::Blob;
pub use commit::{Commit, Signature};
pub use tag::Tag;
pub use tree::{FileMode, Tree, TreeEntry};

use bstr::BString;
use revcache_hash::{HashError, Hasher, ObjectId};

/// Errors produced by object parsing and serialization.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object type: {0}")]
    InvalidType(BString),

    #[error("invalid object header: {0}")]
    InvalidHeader(String),

    #[error("invalid tree entry at offset {offset}: {reason}")]
    InvalidTreeEntry { offset: usize, reason: String },

    #[error("invalid commit: missing '{field}' header")]
    MissingCommitField { field: &'static str },

    #[error("invalid tag: missing '{field}' header")]
    MissingTagField { field: &'static str },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The object types that can appear in a repository.
///
/// Only commits, trees and blobs are ever written into cache slices; tags
/// exist so refs pointing at annotated tags can be peeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    /// Parse from the type string in object headers.
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"commit" => Ok(Self::Commit),
            b"tree" => Ok(Self::Tree),
            b"blob" => Ok(Self::Blob),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidType(BString::from(s))),
        }
    }

    /// The canonical byte representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed object of any type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Commit(Commit),
    Tree(Tree),
    Blob(Blob),
    Tag(Tag),
}

impl Object {
    /// Parse object content (without the loose header).
    pub fn parse_content(obj_type: ObjectType, content: &[u8]) -> Result<Self, ObjectError> {
        Ok(match obj_type {
            ObjectType::Commit => Self::Commit(Commit::parse(content)?),
            ObjectType::Tree => Self::Tree(Tree::parse(content)?),
            ObjectType::Blob => Self::Blob(Blob::new(content.to_vec())),
            ObjectType::Tag => Self::Tag(Tag::parse(content)?),
        })
    }

    /// Parse a full loose object (`"type size\0content"`).
    pub fn parse(raw: &[u8]) -> Result<Self, ObjectError> {
        let (obj_type, size, header_len) = header::parse_header(raw)?;
        let content = &raw[header_len..];
        if content.len() != size {
            return Err(ObjectError::InvalidHeader(format!(
                "size {} does not match content length {}",
                size,
                content.len()
            )));
        }
        Self::parse_content(obj_type, content)
    }

    /// Serialize to canonical content bytes (without the loose header).
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::Commit(c) => c.serialize(),
            Self::Tree(t) => t.serialize(),
            Self::Blob(b) => b.data.clone(),
            Self::Tag(t) => t.serialize(),
        }
    }

    /// The type of this object.
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Commit(_) => ObjectType::Commit,
            Self::Tree(_) => ObjectType::Tree,
            Self::Blob(_) => ObjectType::Blob,
            Self::Tag(_) => ObjectType::Tag,
        }
    }

    /// Compute the object's id from its canonical serialization.
    pub fn id(&self) -> ObjectId {
        let content = self.serialize();
        Hasher::hash_object(self.object_type().as_str(), &content)
    }
}
