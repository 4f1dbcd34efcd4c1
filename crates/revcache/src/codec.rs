//! On-disk layouts for slices, the index and pointer files.
//!
//! All multi-byte integers are big-endian, except the object-size
//! varint which is little-endian base-256 so small sizes stay short.
//! Every decode bounds-checks before touching the buffer; a violation
//! surfaces as [`CacheError::Structural`] and the containing operation
//! fails without partial effect.

use std::path::PathBuf;

use revcache_hash::ObjectId;
use revcache_object::ObjectType;

use crate::CacheError;

pub const SLICE_SIGNATURE: &[u8; 8] = b"REVCACHE";
pub const INDEX_SIGNATURE: &[u8; 8] = b"REVINDEX";
pub const POINTER_SIGNATURE: &[u8; 8] = b"REVCOPTR";

pub const SLICE_VERSION: u8 = 1;
pub const INDEX_VERSION: u8 = 1;
pub const POINTER_VERSION: u8 = 1;

/// Fixed slice header: signature, version, ofs_objects, object_nr,
/// size, path_nr, slice hash.
pub const SLICE_HEADER_LEN: usize = 8 + 1 + 4 + 4 + 4 + 2 + 20;
/// Fixed index header: signature, version, ofs_objects, object_nr,
/// cache_nr, max_date. Followed by slice hashes and the fanout table.
pub const INDEX_HEADER_LEN: usize = 8 + 1 + 4 + 4 + 1 + 4;
/// Fixed prefix of every object entry; path lists and size bytes follow.
pub const ENTRY_PREFIX_LEN: usize = 20 + 1 + 1 + 4 + 2 + 1 + 1 + 1;
/// One index record (two trailing bytes reserved).
pub const INDEX_ENTRY_LEN: usize = 20 + 1 + 1 + 4 + 2;
/// The fanout table: 256 absolute file offsets.
pub const FANOUT_LEN: usize = 256 * 4;

/// Path ids are 15-bit; id 0 is reserved.
pub const MAX_PATH_ID: u16 = 0x7fff;
/// Merge and split lists hold at most 127 entries each.
pub const MAX_FAN_NR: usize = 0x7f;
/// The size varint spans at most 7 bytes.
pub const MAX_SIZE_BYTES: usize = 7;

const FLAG_IS_START: u8 = 0x01;
const FLAG_IS_END: u8 = 0x02;
const FLAG_UNINTERESTING: u8 = 0x04;

const KIND_COMMIT: u8 = 1;
const KIND_TREE: u8 = 2;
const KIND_BLOB: u8 = 3;

/// Header of a slice file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub version: u8,
    /// Offset of the first object entry; always [`SLICE_HEADER_LEN`].
    pub ofs_objects: u32,
    /// Total entries (commits and non-commits).
    pub object_nr: u32,
    /// Total file length in bytes.
    pub size: u32,
    /// One past the highest path id used by any entry.
    pub path_nr: u16,
    /// The slice's content hash (see the generator).
    pub hash: ObjectId,
}

impl SliceHeader {
    pub fn encode(&self) -> [u8; SLICE_HEADER_LEN] {
        let mut buf = [0u8; SLICE_HEADER_LEN];
        buf[0..8].copy_from_slice(SLICE_SIGNATURE);
        buf[8] = self.version;
        buf[9..13].copy_from_slice(&self.ofs_objects.to_be_bytes());
        buf[13..17].copy_from_slice(&self.object_nr.to_be_bytes());
        buf[17..21].copy_from_slice(&self.size.to_be_bytes());
        buf[21..23].copy_from_slice(&self.path_nr.to_be_bytes());
        buf[23..43].copy_from_slice(self.hash.as_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, CacheError> {
        if data.len() < SLICE_HEADER_LEN {
            return Err(CacheError::Structural("slice file too small".into()));
        }
        if &data[0..8] != SLICE_SIGNATURE {
            return Err(CacheError::Structural("bad slice signature".into()));
        }
        let version = data[8];
        if version > SLICE_VERSION {
            return Err(CacheError::Structural(format!(
                "unsupported slice version {version}"
            )));
        }
        let ofs_objects = read_u32(data, 9);
        if ofs_objects as usize != SLICE_HEADER_LEN {
            return Err(CacheError::Structural(format!(
                "bad object offset {ofs_objects}"
            )));
        }
        Ok(Self {
            version,
            ofs_objects,
            object_nr: read_u32(data, 13),
            size: read_u32(data, 17),
            path_nr: read_u16(data, 21),
            hash: oid_at(data, 23),
        })
    }
}

/// Header of the global index file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexHeader {
    pub version: u8,
    /// Offset of the first index entry (header + slice hashes + fanout).
    pub ofs_objects: u32,
    /// Number of index entries.
    pub object_nr: u32,
    /// Number of slices the index refers to.
    pub cache_nr: u8,
    /// Newest commit date seen by any indexed slice.
    pub max_date: u32,
}

impl IndexHeader {
    pub fn encode(&self) -> [u8; INDEX_HEADER_LEN] {
        let mut buf = [0u8; INDEX_HEADER_LEN];
        buf[0..8].copy_from_slice(INDEX_SIGNATURE);
        buf[8] = self.version;
        buf[9..13].copy_from_slice(&self.ofs_objects.to_be_bytes());
        buf[13..17].copy_from_slice(&self.object_nr.to_be_bytes());
        buf[17] = self.cache_nr;
        buf[18..22].copy_from_slice(&self.max_date.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, CacheError> {
        if data.len() < INDEX_HEADER_LEN {
            return Err(CacheError::Structural("index file too small".into()));
        }
        if &data[0..8] != INDEX_SIGNATURE {
            return Err(CacheError::Structural("bad index signature".into()));
        }
        let version = data[8];
        if version > INDEX_VERSION {
            return Err(CacheError::Structural(format!(
                "unsupported index version {version}"
            )));
        }
        Ok(Self {
            version,
            ofs_objects: read_u32(data, 9),
            object_nr: read_u32(data, 13),
            cache_nr: data[17],
            max_date: read_u32(data, 18),
        })
    }
}

/// One record in a slice: a commit with its path topology, or a tree
/// or blob belonging to the preceding commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub kind: ObjectType,
    pub is_start: bool,
    pub is_end: bool,
    pub uninteresting: bool,
    /// Commit date; zero for non-commits.
    pub date: u32,
    /// Path id; zero for non-commits.
    pub path: u16,
    /// Paths opened by this commit (its interesting parents).
    pub merge_paths: Vec<u16>,
    /// Paths closed at this commit (children whose lineage ends here).
    pub split_paths: Vec<u16>,
    /// Uncompressed object size.
    pub size: u64,
}

impl ObjectEntry {
    /// A bare non-commit entry.
    pub fn non_commit(id: ObjectId, kind: ObjectType, size: u64) -> Self {
        Self {
            id,
            kind,
            is_start: false,
            is_end: false,
            uninteresting: false,
            date: 0,
            path: 0,
            merge_paths: Vec::new(),
            split_paths: Vec::new(),
            size,
        }
    }

    pub fn is_commit(&self) -> bool {
        self.kind == ObjectType::Commit
    }

    /// Bytes this entry occupies on disk.
    pub fn encoded_len(&self) -> usize {
        ENTRY_PREFIX_LEN
            + 2 * (self.merge_paths.len() + self.split_paths.len())
            + size_len(self.size)
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), CacheError> {
        if self.merge_paths.len() > MAX_FAN_NR || self.split_paths.len() > MAX_FAN_NR {
            return Err(CacheError::Overflow {
                commit: self.id,
                count: self.merge_paths.len().max(self.split_paths.len()),
            });
        }
        let kind = match self.kind {
            ObjectType::Commit => KIND_COMMIT,
            ObjectType::Tree => KIND_TREE,
            ObjectType::Blob => KIND_BLOB,
            ObjectType::Tag => {
                return Err(CacheError::Structural("tag objects cannot enter a slice".into()))
            }
        };
        let mut flags = 0u8;
        if self.is_start {
            flags |= FLAG_IS_START;
        }
        if self.is_end {
            flags |= FLAG_IS_END;
        }
        if self.uninteresting {
            flags |= FLAG_UNINTERESTING;
        }

        let (size_bytes, size_size) = encode_size(self.size);

        out.extend_from_slice(self.id.as_bytes());
        out.push(kind);
        out.push(flags);
        out.extend_from_slice(&self.date.to_be_bytes());
        out.extend_from_slice(&self.path.to_be_bytes());
        out.push(self.merge_paths.len() as u8);
        out.push(self.split_paths.len() as u8);
        out.push(size_size as u8);
        for path in &self.merge_paths {
            out.extend_from_slice(&path.to_be_bytes());
        }
        for path in &self.split_paths {
            out.extend_from_slice(&path.to_be_bytes());
        }
        out.extend_from_slice(&size_bytes[..size_size]);
        Ok(())
    }

    /// Decode the entry at `pos`. Returns the entry and its on-disk
    /// length.
    pub fn decode(data: &[u8], pos: usize) -> Result<(Self, usize), CacheError> {
        let prefix_end = pos
            .checked_add(ENTRY_PREFIX_LEN)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| CacheError::Structural(format!("entry at {pos} out of range")))?;
        let prefix = &data[pos..prefix_end];

        let kind = match prefix[20] {
            KIND_COMMIT => ObjectType::Commit,
            KIND_TREE => ObjectType::Tree,
            KIND_BLOB => ObjectType::Blob,
            other => {
                return Err(CacheError::Structural(format!(
                    "bad entry kind {other} at {pos}"
                )))
            }
        };
        let flags = prefix[21];
        let merge_nr = prefix[28] as usize;
        let split_nr = prefix[29] as usize;
        let size_size = prefix[30] as usize;
        if merge_nr > MAX_FAN_NR || split_nr > MAX_FAN_NR {
            return Err(CacheError::Structural(format!(
                "entry at {pos} has oversized path lists"
            )));
        }
        if size_size > MAX_SIZE_BYTES {
            return Err(CacheError::Structural(format!(
                "entry at {pos} has a {size_size}-byte size field"
            )));
        }

        let total = ENTRY_PREFIX_LEN + 2 * (merge_nr + split_nr) + size_size;
        let end = pos
            .checked_add(total)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| CacheError::Structural(format!("entry at {pos} truncated")))?;

        let mut cursor = prefix_end;
        let mut merge_paths = Vec::with_capacity(merge_nr);
        for _ in 0..merge_nr {
            merge_paths.push(read_u16(data, cursor));
            cursor += 2;
        }
        let mut split_paths = Vec::with_capacity(split_nr);
        for _ in 0..split_nr {
            split_paths.push(read_u16(data, cursor));
            cursor += 2;
        }
        let size = decode_size(&data[cursor..end]);

        Ok((
            Self {
                id: oid_at(prefix, 0),
                kind,
                is_start: flags & FLAG_IS_START != 0,
                is_end: flags & FLAG_IS_END != 0,
                uninteresting: flags & FLAG_UNINTERESTING != 0,
                date: read_u32(prefix, 22),
                path: read_u16(prefix, 26),
                merge_paths,
                split_paths,
                size,
            },
            total,
        ))
    }
}

/// Iterator over the entries of a slice body.
pub struct EntryCursor<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> EntryCursor<'a> {
    /// Iterate entries of `data` in `[pos, end)`.
    pub fn new(data: &'a [u8], pos: usize, end: usize) -> Self {
        Self { data, pos, end: end.min(data.len()) }
    }

    /// The offset of the entry `next` will decode.
    pub fn offset(&self) -> usize {
        self.pos
    }
}

impl Iterator for EntryCursor<'_> {
    type Item = Result<(u32, ObjectEntry), CacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let at = self.pos;
        match ObjectEntry::decode(self.data, at) {
            Ok((entry, len)) => {
                self.pos = at + len;
                Some(Ok((at as u32, entry)))
            }
            Err(e) => {
                self.pos = self.end; // poison; do not loop on bad data
                Some(Err(e))
            }
        }
    }
}

/// One record of the global index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ObjectId,
    pub is_start: bool,
    /// Position of the owning slice's hash in the index header list.
    pub cache_index: u8,
    /// Byte offset of the commit entry within its slice.
    pub pos: u32,
}

impl IndexEntry {
    pub fn encode(&self) -> [u8; INDEX_ENTRY_LEN] {
        let mut buf = [0u8; INDEX_ENTRY_LEN];
        buf[0..20].copy_from_slice(self.id.as_bytes());
        buf[20] = if self.is_start { FLAG_IS_START } else { 0 };
        buf[21] = self.cache_index;
        buf[22..26].copy_from_slice(&self.pos.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8], pos: usize) -> Result<Self, CacheError> {
        let end = pos
            .checked_add(INDEX_ENTRY_LEN)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| CacheError::Structural(format!("index entry at {pos} out of range")))?;
        let raw = &data[pos..end];
        Ok(Self {
            id: oid_at(raw, 0),
            is_start: raw[20] & FLAG_IS_START != 0,
            cache_index: raw[21],
            pos: read_u32(raw, 22),
        })
    }
}

/// A pointer record redirecting a slice hash to an external file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePointer {
    pub version: u8,
    pub path: PathBuf,
}

impl SlicePointer {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(POINTER_SIGNATURE);
        out.push(self.version);
        out.extend_from_slice(self.path.to_string_lossy().as_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, CacheError> {
        if data.len() < 9 || &data[0..8] != POINTER_SIGNATURE {
            return Err(CacheError::Structural("bad pointer signature".into()));
        }
        let version = data[8];
        if version > POINTER_VERSION {
            return Err(CacheError::Structural(format!(
                "unsupported pointer version {version}"
            )));
        }
        let path = std::str::from_utf8(&data[9..])
            .map_err(|_| CacheError::Structural("pointer path is not UTF-8".into()))?;
        if path.is_empty() {
            return Err(CacheError::Structural("empty pointer path".into()));
        }
        Ok(Self { version, path: PathBuf::from(path) })
    }
}

/// Encode an object size as a little-endian base-256 varint; returns
/// the buffer and the number of significant bytes (0 for size 0).
pub fn encode_size(mut size: u64) -> ([u8; MAX_SIZE_BYTES], usize) {
    let mut buf = [0u8; MAX_SIZE_BYTES];
    let mut len = 0;
    while size != 0 && len < MAX_SIZE_BYTES {
        buf[len] = (size & 0xff) as u8;
        size >>= 8;
        len += 1;
    }
    (buf, len)
}

/// Decode a little-endian base-256 varint.
pub fn decode_size(bytes: &[u8]) -> u64 {
    let mut size = 0u64;
    for (shift, &b) in bytes.iter().enumerate() {
        size |= u64::from(b) << (8 * shift);
    }
    size
}

fn size_len(size: u64) -> usize {
    let mut len = 0;
    let mut s = size;
    while s != 0 && len < MAX_SIZE_BYTES {
        s >>= 8;
        len += 1;
    }
    len
}

pub(crate) fn read_u16(data: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([data[pos], data[pos + 1]])
}

pub(crate) fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

pub(crate) fn oid_at(data: &[u8], pos: usize) -> ObjectId {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&data[pos..pos + 20]);
    ObjectId::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        bytes[19] = n;
        ObjectId::from(bytes)
    }

    #[test]
    fn slice_header_roundtrip() {
        let head = SliceHeader {
            version: SLICE_VERSION,
            ofs_objects: SLICE_HEADER_LEN as u32,
            object_nr: 42,
            size: 9000,
            path_nr: 7,
            hash: oid(0xaa),
        };
        let decoded = SliceHeader::decode(&head.encode()).unwrap();
        assert_eq!(decoded, head);
    }

    #[test]
    fn slice_header_rejects_bad_signature() {
        let mut raw = SliceHeader {
            version: SLICE_VERSION,
            ofs_objects: SLICE_HEADER_LEN as u32,
            object_nr: 0,
            size: 0,
            path_nr: 1,
            hash: oid(1),
        }
        .encode();
        raw[0] = b'X';
        assert!(matches!(
            SliceHeader::decode(&raw),
            Err(CacheError::Structural(_))
        ));
    }

    #[test]
    fn slice_header_rejects_future_version() {
        let mut raw = SliceHeader {
            version: SLICE_VERSION,
            ofs_objects: SLICE_HEADER_LEN as u32,
            object_nr: 0,
            size: 0,
            path_nr: 1,
            hash: oid(1),
        }
        .encode();
        raw[8] = SLICE_VERSION + 1;
        assert!(SliceHeader::decode(&raw).is_err());
    }

    #[test]
    fn commit_entry_roundtrip() {
        let entry = ObjectEntry {
            id: oid(0x42),
            kind: ObjectType::Commit,
            is_start: true,
            is_end: false,
            uninteresting: false,
            date: 1234567,
            path: 3,
            merge_paths: vec![4, 5],
            split_paths: vec![1],
            size: 300,
        };
        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), entry.encoded_len());

        let (decoded, len) = ObjectEntry::decode(&buf, 0).unwrap();
        assert_eq!(len, buf.len());
        assert_eq!(decoded, entry);
    }

    #[test]
    fn non_commit_entry_is_compact() {
        let entry = ObjectEntry::non_commit(oid(9), ObjectType::Blob, 0x1_0000);
        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();
        // Prefix plus a three-byte size varint.
        assert_eq!(buf.len(), ENTRY_PREFIX_LEN + 3);
        let (decoded, _) = ObjectEntry::decode(&buf, 0).unwrap();
        assert_eq!(decoded.size, 0x1_0000);
        assert!(!decoded.is_commit());
    }

    #[test]
    fn entry_decode_rejects_truncation() {
        let entry = ObjectEntry {
            merge_paths: vec![2],
            ..ObjectEntry::non_commit(oid(1), ObjectType::Commit, 99)
        };
        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(ObjectEntry::decode(&buf, 0).is_err());
    }

    #[test]
    fn entry_decode_rejects_bad_kind() {
        let mut buf = Vec::new();
        ObjectEntry::non_commit(oid(1), ObjectType::Blob, 5)
            .encode(&mut buf)
            .unwrap();
        buf[20] = 9;
        assert!(ObjectEntry::decode(&buf, 0).is_err());
    }

    #[test]
    fn entry_encode_rejects_overflow() {
        let entry = ObjectEntry {
            merge_paths: vec![1; MAX_FAN_NR + 1],
            ..ObjectEntry::non_commit(oid(1), ObjectType::Commit, 1)
        };
        let mut buf = Vec::new();
        assert!(matches!(
            entry.encode(&mut buf),
            Err(CacheError::Overflow { .. })
        ));
    }

    #[test]
    fn size_varint_edges() {
        for size in [0u64, 1, 0xff, 0x100, 0xffff_ffff, 0x0123_4567_89ab] {
            let (buf, len) = encode_size(size);
            assert_eq!(decode_size(&buf[..len]), size);
        }
        assert_eq!(encode_size(0).1, 0);
        assert_eq!(encode_size(0xff).1, 1);
        assert_eq!(encode_size(0x100).1, 2);
    }

    #[test]
    fn index_entry_roundtrip() {
        let entry = IndexEntry {
            id: oid(0x07),
            is_start: true,
            cache_index: 3,
            pos: 0xdead,
        };
        let raw = entry.encode();
        assert_eq!(IndexEntry::decode(&raw, 0).unwrap(), entry);
    }

    #[test]
    fn pointer_roundtrip() {
        let ptr = SlicePointer {
            version: POINTER_VERSION,
            path: PathBuf::from("/var/cache/slice-archive"),
        };
        let decoded = SlicePointer::decode(&ptr.encode()).unwrap();
        assert_eq!(decoded, ptr);
    }

    #[test]
    fn pointer_rejects_empty_path() {
        let mut raw = Vec::new();
        raw.extend_from_slice(POINTER_SIGNATURE);
        raw.push(POINTER_VERSION);
        assert!(SlicePointer::decode(&raw).is_err());
    }

    #[test]
    fn cursor_walks_consecutive_entries() {
        let mut buf = Vec::new();
        let first = ObjectEntry {
            path: 1,
            date: 10,
            ..ObjectEntry::non_commit(oid(1), ObjectType::Commit, 50)
        };
        first.encode(&mut buf).unwrap();
        ObjectEntry::non_commit(oid(2), ObjectType::Tree, 20)
            .encode(&mut buf)
            .unwrap();

        let entries: Vec<_> = EntryCursor::new(&buf, 0, buf.len())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 0);
        assert_eq!(entries[1].0, first.encoded_len() as u32);
        assert_eq!(entries[1].1.kind, ObjectType::Tree);
    }

    #[test]
    fn cursor_surfaces_corruption_once() {
        let mut buf = Vec::new();
        ObjectEntry::non_commit(oid(1), ObjectType::Blob, 5)
            .encode(&mut buf)
            .unwrap();
        buf[20] = 0xee;
        let mut cursor = EntryCursor::new(&buf, 0, buf.len());
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }
}
