//! Opening and reading slice files.
//!
//! A slice is found under the cache directory by its 40-hex hash. The
//! file either starts with `"REVCACHE"` and is the slice itself, or
//! with `"REVCOPTR"` and redirects to an external path. Files are
//! memory-mapped read-only; the header is validated before any entry
//! is served.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use memmap2::Mmap;
use revcache_hash::ObjectId;

use crate::codec::{
    EntryCursor, ObjectEntry, SliceHeader, SlicePointer, POINTER_SIGNATURE, POINTER_VERSION,
    SLICE_HEADER_LEN,
};
use crate::index::CacheIndex;
use crate::CacheError;

/// A validated, memory-mapped slice.
pub struct SliceFile {
    map: Mmap,
    head: SliceHeader,
    path: PathBuf,
    mtime: SystemTime,
}

impl SliceFile {
    /// Open the slice named `hash` under `dir`, following a pointer
    /// file if one sits in its place.
    pub fn open(dir: &Path, hash: &ObjectId) -> Result<Self, CacheError> {
        let named = dir.join(hash.to_hex());
        let mut file = fs::File::open(&named)?;

        let mut signature = [0u8; 8];
        let path = match file.read_exact(&mut signature) {
            Ok(()) if signature == *POINTER_SIGNATURE => {
                let raw = fs::read(&named)?;
                let pointer = SlicePointer::decode(&raw)?;
                pointer.path
            }
            _ => named,
        };

        Self::open_path(&path, hash)
    }

    /// Open and validate a slice at an explicit path.
    pub fn open_path(path: &Path, expected_hash: &ObjectId) -> Result<Self, CacheError> {
        let file = fs::File::open(path)?;
        let mtime = file.metadata()?.modified()?;
        let map = unsafe { Mmap::map(&file) }.map_err(CacheError::Io)?;

        let head = SliceHeader::decode(&map)?;
        if head.hash != *expected_hash {
            return Err(CacheError::Structural(format!(
                "slice {} names itself {}",
                expected_hash, head.hash
            )));
        }
        if head.size as usize != map.len() {
            return Err(CacheError::Structural(format!(
                "slice {} claims {} bytes but holds {}",
                expected_hash,
                head.size,
                map.len()
            )));
        }
        if head.path_nr == 0 {
            return Err(CacheError::Structural(format!(
                "slice {expected_hash} has no path space"
            )));
        }

        Ok(Self {
            map,
            head,
            path: path.to_path_buf(),
            mtime,
        })
    }

    pub fn header(&self) -> &SliceHeader {
        &self.head
    }

    pub fn hash(&self) -> &ObjectId {
        &self.head.hash
    }

    /// One past the highest path id any entry may carry.
    pub fn path_nr(&self) -> u16 {
        self.head.path_nr
    }

    /// The resolved file path (after pointer indirection).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time of the resolved file.
    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    /// The raw mapped bytes, header included.
    pub fn data(&self) -> &[u8] {
        &self.map
    }

    /// Decode and validate the entry at `offset`.
    pub fn entry_at(&self, offset: u32) -> Result<ObjectEntry, CacheError> {
        if (offset as usize) < SLICE_HEADER_LEN {
            return Err(CacheError::Structural(format!(
                "entry offset {offset} inside slice header"
            )));
        }
        let (entry, _) = ObjectEntry::decode(&self.map, offset as usize)?;
        self.validate_entry(&entry)?;
        Ok(entry)
    }

    /// Iterate all entries from the first.
    pub fn entries(&self) -> SliceEntries<'_> {
        self.entries_from(self.head.ofs_objects)
    }

    /// Iterate entries starting at `offset`.
    pub fn entries_from(&self, offset: u32) -> SliceEntries<'_> {
        SliceEntries {
            cursor: EntryCursor::new(&self.map, offset as usize, self.map.len()),
            slice: self,
        }
    }

    /// A commit's path ids must all lie inside the slice's path space.
    fn validate_entry(&self, entry: &ObjectEntry) -> Result<(), CacheError> {
        if !entry.is_commit() {
            return Ok(());
        }
        let in_range = |p: u16| p >= 1 && p < self.head.path_nr;
        if !in_range(entry.path)
            || !entry.merge_paths.iter().all(|&p| in_range(p))
            || !entry.split_paths.iter().all(|&p| in_range(p))
        {
            return Err(CacheError::Structural(format!(
                "commit {} carries a path id outside [1, {})",
                entry.id, self.head.path_nr
            )));
        }
        Ok(())
    }
}

/// Iterator over the validated entries of a slice.
pub struct SliceEntries<'a> {
    cursor: EntryCursor<'a>,
    slice: &'a SliceFile,
}

impl SliceEntries<'_> {
    /// Offset of the entry the next call will decode.
    pub fn offset(&self) -> u32 {
        self.cursor.offset() as u32
    }
}

impl Iterator for SliceEntries<'_> {
    type Item = Result<(u32, ObjectEntry), CacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cursor.next()?;
        Some(item.and_then(|(offset, entry)| {
            self.slice.validate_entry(&entry)?;
            Ok((offset, entry))
        }))
    }
}

/// Register an external slice file under the cache directory: validate
/// it, write a pointer record named by its hash, and index its commits
/// (overriding any collisions — the pointer was installed on purpose).
pub fn link_slice(
    dir: &Path,
    index: &mut CacheIndex,
    slice_path: &Path,
) -> Result<ObjectId, CacheError> {
    let name = slice_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let hash = name
        .get(name.len().saturating_sub(40)..)
        .and_then(|tail| ObjectId::from_hex(tail).ok())
        .ok_or_else(|| {
            CacheError::Structural(format!(
                "slice path {} does not end in a 40-hex hash",
                slice_path.display()
            ))
        })?;

    let slice = SliceFile::open_path(slice_path, &hash)?;

    let pointer = SlicePointer {
        version: POINTER_VERSION,
        path: fs::canonicalize(slice_path)?,
    };
    fs::write(dir.join(hash.to_hex()), pointer.encode())?;

    index.append_slice(&hash, slice.data(), true)?;
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SLICE_VERSION;
    use revcache_object::ObjectType;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        bytes[19] = n;
        ObjectId::from(bytes)
    }

    fn write_slice(dir: &Path, hash: ObjectId, path_nr: u16, entry_paths: &[u16]) -> PathBuf {
        let mut body = Vec::new();
        for &p in entry_paths {
            ObjectEntry {
                id: oid(p as u8),
                kind: ObjectType::Commit,
                is_start: false,
                is_end: false,
                uninteresting: false,
                date: 5,
                path: p,
                merge_paths: vec![],
                split_paths: vec![],
                size: 1,
            }
            .encode(&mut body)
            .unwrap();
        }
        let head = SliceHeader {
            version: SLICE_VERSION,
            ofs_objects: SLICE_HEADER_LEN as u32,
            object_nr: entry_paths.len() as u32,
            size: (SLICE_HEADER_LEN + body.len()) as u32,
            path_nr,
            hash,
        };
        let mut data = head.encode().to_vec();
        data.extend_from_slice(&body);
        let path = dir.join(hash.to_hex());
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn open_and_iterate() {
        let dir = tempfile::tempdir().unwrap();
        let hash = oid(0xaa);
        write_slice(dir.path(), hash, 3, &[1, 2]);

        let slice = SliceFile::open(dir.path(), &hash).unwrap();
        assert_eq!(slice.hash(), &hash);
        assert_eq!(slice.path_nr(), 3);
        let entries: Vec<_> = slice.entries().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, SLICE_HEADER_LEN as u32);
    }

    #[test]
    fn hash_mismatch_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let hash = oid(0xaa);
        let path = write_slice(dir.path(), hash, 2, &[1]);
        let other = oid(0xbb);
        fs::rename(&path, dir.path().join(other.to_hex())).unwrap();

        assert!(matches!(
            SliceFile::open(dir.path(), &other),
            Err(CacheError::Structural(_))
        ));
    }

    #[test]
    fn truncated_file_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let hash = oid(0xaa);
        let path = write_slice(dir.path(), hash, 2, &[1]);
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 4]).unwrap();

        assert!(matches!(
            SliceFile::open(dir.path(), &hash),
            Err(CacheError::Structural(_))
        ));
    }

    #[test]
    fn out_of_range_path_id_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let hash = oid(0xaa);
        // path_nr 2 but an entry claims path 5.
        write_slice(dir.path(), hash, 2, &[5]);

        let slice = SliceFile::open(dir.path(), &hash).unwrap();
        let result: Result<Vec<_>, _> = slice.entries().collect();
        assert!(matches!(result, Err(CacheError::Structural(_))));
    }

    #[test]
    fn pointer_indirection_is_followed() {
        let outside = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let hash = oid(0xcd);
        let target = write_slice(outside.path(), hash, 2, &[1]);

        let pointer = SlicePointer {
            version: POINTER_VERSION,
            path: target.clone(),
        };
        fs::write(cache.path().join(hash.to_hex()), pointer.encode()).unwrap();

        let slice = SliceFile::open(cache.path(), &hash).unwrap();
        assert_eq!(slice.hash(), &hash);
        assert_eq!(slice.path(), target.as_path());
    }

    #[test]
    fn link_slice_writes_pointer_and_indexes() {
        let outside = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let hash = oid(0xcd);
        let target = write_slice(outside.path(), hash, 2, &[1]);

        let mut index = CacheIndex::open(cache.path()).unwrap();
        let linked = link_slice(cache.path(), &mut index, &target).unwrap();
        assert_eq!(linked, hash);

        // The pointer resolves and the commit is indexed.
        let slice = SliceFile::open(cache.path(), &hash).unwrap();
        assert_eq!(slice.hash(), &hash);
        assert_eq!(index.lookup(&oid(1)).unwrap().slice, hash);
    }
}
