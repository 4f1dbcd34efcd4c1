use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use revcache_hash::ObjectId;
use revcache_object::{header, Object, ObjectType};

use crate::{ObjectStore, StoreError};

/// Read-only store over a repository's loose objects directory.
///
/// Objects live at `objects/xx/xxxx...` as zlib streams of
/// `"type size\0content"`. Packed objects are not read; a cache miss
/// there simply means the commit is resolved through the walker instead.
pub struct LooseStore {
    objects_dir: PathBuf,
}

impl LooseStore {
    pub fn new(objects_dir: impl Into<PathBuf>) -> Self {
        Self { objects_dir: objects_dir.into() }
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    fn object_path(&self, oid: &ObjectId) -> PathBuf {
        let hex = oid.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

impl ObjectStore for LooseStore {
    fn contains(&self, oid: &ObjectId) -> bool {
        self.object_path(oid).is_file()
    }

    fn read(&self, oid: &ObjectId) -> Result<Option<Object>, StoreError> {
        let compressed = match fs::read(self.object_path(oid)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).map_err(|e| StoreError::Corrupt {
            oid: *oid,
            reason: format!("zlib: {e}"),
        })?;

        Ok(Some(Object::parse(&raw)?))
    }

    fn read_header(&self, oid: &ObjectId) -> Result<Option<(ObjectType, u64)>, StoreError> {
        let compressed = match fs::read(self.object_path(oid)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };

        // Decompress just enough to see the header; they are tiny.
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut buf = [0u8; 64];
        let mut filled = 0;
        loop {
            if filled >= buf.len() {
                return Err(StoreError::Corrupt {
                    oid: *oid,
                    reason: "header exceeds 64 bytes".into(),
                });
            }
            let n = decoder.read(&mut buf[filled..]).map_err(|e| StoreError::Corrupt {
                oid: *oid,
                reason: format!("zlib: {e}"),
            })?;
            if n == 0 {
                return Err(StoreError::Corrupt {
                    oid: *oid,
                    reason: "unexpected EOF before header terminator".into(),
                });
            }
            filled += n;
            if buf[..filled].contains(&0) {
                break;
            }
        }

        let (obj_type, size, _) = header::parse_header(&buf[..filled])?;
        Ok(Some((obj_type, size as u64)))
    }
}
