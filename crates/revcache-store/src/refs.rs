use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use revcache_hash::ObjectId;

use crate::StoreError;

/// Minimal ref resolution over loose refs and `packed-refs`.
///
/// Enough for the front-end: `HEAD`, branch/tag shorthands, full ref
/// paths and raw hex ids. Reflogs, worktree refs and pseudo-refs other
/// than `HEAD` are not modeled.
pub struct RefStore {
    git_dir: PathBuf,
}

impl RefStore {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self { git_dir: git_dir.into() }
    }

    /// Resolve a revision name to an id.
    ///
    /// Tries, in order: 40-hex id, the name as given under `.git`,
    /// `refs/<name>`, `refs/tags/<name>`, `refs/heads/<name>`,
    /// `refs/remotes/<name>`.
    pub fn resolve(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        if name.len() == 40 {
            if let Ok(oid) = ObjectId::from_hex(name) {
                return Ok(Some(oid));
            }
        }

        let candidates = [
            name.to_string(),
            format!("refs/{name}"),
            format!("refs/tags/{name}"),
            format!("refs/heads/{name}"),
            format!("refs/remotes/{name}"),
        ];
        for candidate in &candidates {
            if let Some(oid) = self.resolve_ref(candidate, 0)? {
                return Ok(Some(oid));
            }
        }
        Ok(None)
    }

    /// Iterate all refs under `refs/`, loose entries shadowing packed ones.
    pub fn iter_all(&self) -> Result<Vec<(String, ObjectId)>, StoreError> {
        let mut refs: BTreeMap<String, ObjectId> = BTreeMap::new();

        for (name, oid) in self.packed_refs()? {
            refs.insert(name, oid);
        }

        let refs_dir = self.git_dir.join("refs");
        if refs_dir.is_dir() {
            self.walk_loose(&refs_dir, "refs", &mut refs)?;
        }

        Ok(refs.into_iter().collect())
    }

    fn walk_loose(
        &self,
        dir: &Path,
        prefix: &str,
        out: &mut BTreeMap<String, ObjectId>,
    ) -> Result<(), StoreError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            let full = format!("{prefix}/{name}");
            if entry.file_type()?.is_dir() {
                self.walk_loose(&entry.path(), &full, out)?;
            } else if let Some(oid) = self.resolve_ref(&full, 0)? {
                out.insert(full, oid);
            }
        }
        Ok(())
    }

    fn resolve_ref(&self, name: &str, depth: u8) -> Result<Option<ObjectId>, StoreError> {
        if depth > 10 {
            return Err(StoreError::InvalidRef(name.to_string()));
        }

        let path = self.git_dir.join(name);
        if path.is_file() {
            let content = fs::read_to_string(&path)?;
            let content = content.trim();
            if let Some(target) = content.strip_prefix("ref: ") {
                return self.resolve_ref(target.trim(), depth + 1);
            }
            return Ok(ObjectId::from_hex(content).ok());
        }

        // Fall back to packed-refs.
        for (packed_name, oid) in self.packed_refs()? {
            if packed_name == name {
                return Ok(Some(oid));
            }
        }
        Ok(None)
    }

    fn packed_refs(&self) -> Result<Vec<(String, ObjectId)>, StoreError> {
        let path = self.git_dir.join("packed-refs");
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut refs = Vec::new();
        for line in content.lines() {
            if line.starts_with('#') || line.starts_with('^') || line.is_empty() {
                continue;
            }
            let Some((hex, name)) = line.split_once(' ') else { continue };
            if let Ok(oid) = ObjectId::from_hex(hex) {
                refs.push((name.trim().to_string(), oid));
            }
        }
        Ok(refs)
    }
}
