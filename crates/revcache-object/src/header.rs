//! Loose object header codec: `"type size\0"`.

use crate::{ObjectError, ObjectType};

/// Parse a loose object header, returning the type, content size and
/// header length (including the NUL).
pub fn parse_header(raw: &[u8]) -> Result<(ObjectType, usize, usize), ObjectError> {
    let nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ObjectError::InvalidHeader("missing NUL terminator".into()))?;
    let header = &raw[..nul];

    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ObjectError::InvalidHeader("missing space separator".into()))?;

    let obj_type = ObjectType::from_bytes(&header[..space])?;

    let size_str = std::str::from_utf8(&header[space + 1..])
        .map_err(|_| ObjectError::InvalidHeader("non-UTF8 size".into()))?;
    let size: usize = size_str
        .parse()
        .map_err(|_| ObjectError::InvalidHeader(format!("bad size {:?}", size_str)))?;

    Ok((obj_type, size, nul + 1))
}

/// Format a loose object header for the given type and content size.
pub fn format_header(obj_type: ObjectType, size: usize) -> Vec<u8> {
    format!("{} {}\0", obj_type, size).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_blob_header() {
        let (t, size, len) = parse_header(b"blob 11\0hello world").unwrap();
        assert_eq!(t, ObjectType::Blob);
        assert_eq!(size, 11);
        assert_eq!(len, 8);
    }

    #[test]
    fn format_roundtrip() {
        let raw = format_header(ObjectType::Commit, 123);
        let (t, size, len) = parse_header(&raw).unwrap();
        assert_eq!(t, ObjectType::Commit);
        assert_eq!(size, 123);
        assert_eq!(len, raw.len());
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(parse_header(b"bonk 3\0abc").is_err());
    }

    #[test]
    fn rejects_missing_nul() {
        assert!(parse_header(b"blob 3").is_err());
    }
}
