use bstr::{BString, ByteSlice};
use revcache_hash::ObjectId;

use crate::{ObjectError, ObjectType};

/// An annotated tag, modeled only far enough to peel it to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub target: ObjectId,
    pub target_type: ObjectType,
    pub name: BString,
}

impl Tag {
    /// Parse tag content (no loose header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut target: Option<ObjectId> = None;
        let mut target_type: Option<ObjectType> = None;
        let mut name = BString::from("");

        for line in content.lines() {
            if line.is_empty() {
                break;
            }
            let Some(space) = line.iter().position(|&b| b == b' ') else {
                continue;
            };
            let (key, value) = (&line[..space], &line[space + 1..]);
            match key {
                b"object" => {
                    let hex = std::str::from_utf8(value)
                        .map_err(|_| ObjectError::InvalidHeader("non-UTF8 object id".into()))?;
                    target = Some(ObjectId::from_hex(hex.trim())?);
                }
                b"type" => target_type = Some(ObjectType::from_bytes(value)?),
                b"tag" => name = value.as_bstr().to_owned(),
                _ => {}
            }
        }

        Ok(Self {
            target: target.ok_or(ObjectError::MissingTagField { field: "object" })?,
            target_type: target_type
                .ok_or(ObjectError::MissingTagField { field: "type" })?,
            name,
        })
    }

    /// Serialize to canonical content bytes (header section only).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"object ");
        out.extend_from_slice(self.target.to_hex().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(b"type ");
        out.extend_from_slice(self.target_type.as_str().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(b"tag ");
        out.extend_from_slice(&self.name);
        out.push(b'\n');
        out
    }
}
