use bstr::{BString, ByteSlice};
use revcache_hash::ObjectId;

use crate::ObjectError;

/// An identity plus timestamp, as found in author/committer lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    /// Seconds since the epoch.
    pub when: i64,
    /// Timezone offset as written, e.g. `+0200`.
    pub tz: BString,
}

impl Signature {
    /// Parse `"Name <email> timestamp tz"`.
    pub fn parse(raw: &[u8]) -> Result<Self, ObjectError> {
        let lt = raw
            .iter()
            .position(|&b| b == b'<')
            .ok_or_else(|| ObjectError::InvalidSignature("missing '<'".into()))?;
        let gt = raw
            .iter()
            .position(|&b| b == b'>')
            .ok_or_else(|| ObjectError::InvalidSignature("missing '>'".into()))?;
        if gt < lt {
            return Err(ObjectError::InvalidSignature("'>' before '<'".into()));
        }

        let name = raw[..lt].trim_end().as_bstr().to_owned();
        let email = raw[lt + 1..gt].as_bstr().to_owned();

        let rest = raw[gt + 1..].trim();
        let mut fields = rest.split(|&b| b == b' ');
        let when = fields
            .next()
            .and_then(|f| std::str::from_utf8(f).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| ObjectError::InvalidSignature("bad timestamp".into()))?;
        let tz = fields
            .next()
            .map(|f| f.as_bstr().to_owned())
            .unwrap_or_else(|| BString::from("+0000"));

        Ok(Self { name, email, when, tz })
    }

    /// Serialize back to `"Name <email> timestamp tz"`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.name);
        out.extend_from_slice(b" <");
        out.extend_from_slice(&self.email);
        out.extend_from_slice(b"> ");
        out.extend_from_slice(self.when.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(&self.tz);
        out
    }
}

/// A commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Id of the root tree.
    pub tree: ObjectId,
    /// Parent commit ids (empty for a root commit).
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    /// Commit message (everything after the blank separator line).
    pub message: BString,
}

impl Commit {
    /// Parse commit content (no loose header).
    ///
    /// Unknown headers, gpg signatures and their continuation lines are
    /// skipped; they are not needed for graph traversal.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut tree: Option<ObjectId> = None;
        let mut parents = Vec::new();
        let mut author: Option<Signature> = None;
        let mut committer: Option<Signature> = None;

        let mut pos = 0;
        while pos < content.len() {
            if content[pos] == b'\n' {
                pos += 1;
                break;
            }

            let line_end = content[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| p + pos)
                .unwrap_or(content.len());
            let line = &content[pos..line_end];
            pos = line_end + 1;

            // Continuation line of a multi-line header (e.g. gpgsig).
            if line.first() == Some(&b' ') {
                continue;
            }

            let Some(space) = line.iter().position(|&b| b == b' ') else {
                continue;
            };
            let (key, value) = (&line[..space], &line[space + 1..]);

            match key {
                b"tree" => tree = Some(parse_oid_value(value, "tree")?),
                b"parent" => parents.push(parse_oid_value(value, "parent")?),
                b"author" => author = Some(Signature::parse(value)?),
                b"committer" => committer = Some(Signature::parse(value)?),
                _ => {}
            }
        }

        Ok(Self {
            tree: tree.ok_or(ObjectError::MissingCommitField { field: "tree" })?,
            parents,
            author: author.ok_or(ObjectError::MissingCommitField { field: "author" })?,
            committer: committer
                .ok_or(ObjectError::MissingCommitField { field: "committer" })?,
            message: content[pos.min(content.len())..].as_bstr().to_owned(),
        })
    }

    /// Serialize to canonical content bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');
        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(b"author ");
        out.extend_from_slice(&self.author.serialize());
        out.push(b'\n');
        out.extend_from_slice(b"committer ");
        out.extend_from_slice(&self.committer.serialize());
        out.extend_from_slice(b"\n\n");
        out.extend_from_slice(&self.message);
        out
    }

    /// Committer timestamp, the date the cache orders by.
    pub fn date(&self) -> i64 {
        self.committer.when
    }
}

fn parse_oid_value(value: &[u8], field: &'static str) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::InvalidHeader(format!("non-UTF8 {field} id")))?;
    Ok(ObjectId::from_hex(hex.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(when: i64) -> Signature {
        Signature {
            name: BString::from("A U Thor"),
            email: BString::from("author@example.com"),
            when,
            tz: BString::from("+0000"),
        }
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let commit = Commit {
            tree: ObjectId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap(),
            parents: vec![
                ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap(),
            ],
            author: sig(1100),
            committer: sig(1200),
            message: BString::from("subject\n\nbody\n"),
        };
        let parsed = Commit::parse(&commit.serialize()).unwrap();
        assert_eq!(parsed, commit);
        assert_eq!(parsed.date(), 1200);
    }

    #[test]
    fn root_commit_has_no_parents() {
        let commit = Commit {
            tree: ObjectId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap(),
            parents: vec![],
            author: sig(1),
            committer: sig(1),
            message: BString::from("root\n"),
        };
        let parsed = Commit::parse(&commit.serialize()).unwrap();
        assert!(parsed.parents.is_empty());
    }

    #[test]
    fn unknown_headers_are_skipped() {
        let raw = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
gpgsig -----BEGIN PGP SIGNATURE-----\n line2\n line3\n\
author A <a@b> 7 +0000\n\
committer C <c@d> 9 +0100\n\
\n\
msg\n";
        let parsed = Commit::parse(raw).unwrap();
        assert_eq!(parsed.committer.when, 9);
        assert_eq!(parsed.message, BString::from("msg\n"));
    }

    #[test]
    fn missing_tree_is_an_error() {
        let raw = b"author A <a@b> 7 +0000\ncommitter C <c@d> 9 +0100\n\nmsg\n";
        assert!(matches!(
            Commit::parse(raw),
            Err(ObjectError::MissingCommitField { field: "tree" })
        ));
    }

    #[test]
    fn signature_parse_handles_tz() {
        let s = Signature::parse(b"Jane Doe <jane@example.com> 1234567890 -0500").unwrap();
        assert_eq!(s.name, BString::from("Jane Doe"));
        assert_eq!(s.when, 1234567890);
        assert_eq!(s.tz, BString::from("-0500"));
    }
}
