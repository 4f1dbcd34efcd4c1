use std::cmp::Ordering;

use bstr::{BString, ByteSlice};
use revcache_hash::ObjectId;

use crate::ObjectError;

/// File mode for tree entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Regular file (100644)
    Regular,
    /// Executable file (100755)
    Executable,
    /// Symbolic link (120000)
    Symlink,
    /// Submodule link (160000)
    Gitlink,
    /// Subdirectory (040000)
    Tree,
    /// Unknown mode (preserved for round-trip)
    Unknown(u32),
}

impl FileMode {
    /// Parse from octal ASCII bytes (e.g., `b"100644"`).
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        let mut raw: u32 = 0;
        if s.is_empty() {
            return Err(ObjectError::InvalidHeader("empty file mode".into()));
        }
        for &b in s {
            if !(b'0'..=b'7').contains(&b) {
                return Err(ObjectError::InvalidHeader(format!(
                    "bad file mode {:?}",
                    s.as_bstr()
                )));
            }
            raw = raw * 8 + u32::from(b - b'0');
        }
        Ok(Self::from_raw(raw))
    }

    /// Create from the raw numeric value.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0o100644 => Self::Regular,
            0o100755 => Self::Executable,
            0o120000 => Self::Symlink,
            0o160000 => Self::Gitlink,
            0o040000 => Self::Tree,
            other => Self::Unknown(other),
        }
    }

    /// The raw numeric value.
    pub fn raw(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Gitlink => 0o160000,
            Self::Tree => 0o40000,
            Self::Unknown(v) => *v,
        }
    }

    /// Is this a tree (directory) entry?
    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree)
    }

    /// Is this a submodule link?
    pub fn is_gitlink(&self) -> bool {
        matches!(self, Self::Gitlink)
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: BString,
    pub oid: ObjectId,
}

impl TreeEntry {
    /// Canonical tree ordering: names compare bytewise, with directory
    /// names extended by a virtual trailing `/`.
    pub fn cmp_entries(a: &TreeEntry, b: &TreeEntry) -> Ordering {
        let an = &a.name;
        let bn = &b.name;
        let len = an.len().min(bn.len());
        match an[..len].cmp(&bn[..len]) {
            Ordering::Equal => {}
            other => return other,
        }
        let ac = an.get(len).copied().unwrap_or(if a.mode.is_tree() { b'/' } else { 0 });
        let bc = bn.get(len).copied().unwrap_or(if b.mode.is_tree() { b'/' } else { 0 });
        ac.cmp(&bc)
    }
}

/// A tree object: a sorted list of entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Parse tree content (no loose header). Entries are
    /// `"mode name\0" + 20 raw hash bytes`, repeated.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < content.len() {
            let space = content[pos..]
                .iter()
                .position(|&b| b == b' ')
                .map(|p| p + pos)
                .ok_or(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "missing mode terminator".into(),
                })?;
            let mode = FileMode::from_bytes(&content[pos..space])?;

            let nul = content[space + 1..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| p + space + 1)
                .ok_or(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "missing name terminator".into(),
                })?;
            let name = content[space + 1..nul].as_bstr().to_owned();

            let hash_end = nul + 1 + ObjectId::LEN;
            if hash_end > content.len() {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "truncated hash".into(),
                });
            }
            let oid = ObjectId::from_bytes(&content[nul + 1..hash_end])?;

            entries.push(TreeEntry { mode, name, oid });
            pos = hash_end;
        }

        Ok(Self { entries })
    }

    /// Serialize to canonical content bytes. Entries are sorted first.
    pub fn serialize(&self) -> Vec<u8> {
        let mut sorted: Vec<&TreeEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| TreeEntry::cmp_entries(a, b));

        let mut out = Vec::new();
        for entry in sorted {
            out.extend_from_slice(format!("{:o}", entry.mode.raw()).as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        ObjectId::from(bytes)
    }

    fn entry(mode: FileMode, name: &str, n: u8) -> TreeEntry {
        TreeEntry { mode, name: BString::from(name), oid: oid(n) }
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let tree = Tree {
            entries: vec![
                entry(FileMode::Regular, "README", 1),
                entry(FileMode::Tree, "src", 2),
                entry(FileMode::Executable, "run.sh", 3),
            ],
        };
        let parsed = Tree::parse(&tree.serialize()).unwrap();
        assert_eq!(parsed.entries.len(), 3);
        assert!(parsed.entries.iter().any(|e| e.name == "src" && e.mode.is_tree()));
    }

    #[test]
    fn directories_sort_with_trailing_slash() {
        // "a" (dir, sorts as "a/") must come after "a.txt".
        let tree = Tree {
            entries: vec![
                entry(FileMode::Tree, "a", 1),
                entry(FileMode::Regular, "a.txt", 2),
            ],
        };
        let serialized = tree.serialize();
        let parsed = Tree::parse(&serialized).unwrap();
        assert_eq!(parsed.entries[0].name, "a.txt");
        assert_eq!(parsed.entries[1].name, "a");
    }

    #[test]
    fn truncated_hash_is_rejected() {
        let tree = Tree { entries: vec![entry(FileMode::Regular, "f", 1)] };
        let mut raw = tree.serialize();
        raw.truncate(raw.len() - 1);
        assert!(matches!(
            Tree::parse(&raw),
            Err(ObjectError::InvalidTreeEntry { .. })
        ));
    }

    #[test]
    fn empty_tree() {
        let parsed = Tree::parse(b"").unwrap();
        assert!(parsed.entries.is_empty());
    }
}
