//! Persistent identifier codec.
//!
//! A PID is the only node handle exposed at the public boundary. Its textual
//! form is `swh:1:<type>:<40 lowercase hex>`, always exactly 50 ASCII bytes,
//! which makes fixed-width map files and fixed-size hash keys possible.

use std::fmt;
use std::str::FromStr;

use crate::error::{GraphError, Result};

/// Length of the textual form, in bytes.
pub const PID_STR_LEN: usize = 50;
/// Length of the compact binary form, in bytes.
pub const PID_BIN_LEN: usize = 22;

const DIGEST_LEN: usize = 20;
const SCHEME_VERSION: u8 = 1;

/// Type of an archive node.
///
/// Ordinals follow the alphabetical order of the 3-letter tokens and are the
/// values stored in the packed node-type table, so they are part of the
/// on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum NodeType {
    Content = 0,
    Directory = 1,
    Origin = 2,
    Release = 3,
    Revision = 4,
    Snapshot = 5,
}

impl NodeType {
    pub const COUNT: usize = 6;

    pub fn all() -> [NodeType; Self::COUNT] {
        [
            NodeType::Content,
            NodeType::Directory,
            NodeType::Origin,
            NodeType::Release,
            NodeType::Revision,
            NodeType::Snapshot,
        ]
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<NodeType> {
        match ordinal {
            0 => Some(NodeType::Content),
            1 => Some(NodeType::Directory),
            2 => Some(NodeType::Origin),
            3 => Some(NodeType::Release),
            4 => Some(NodeType::Revision),
            5 => Some(NodeType::Snapshot),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            NodeType::Content => "cnt",
            NodeType::Directory => "dir",
            NodeType::Origin => "ori",
            NodeType::Release => "rel",
            NodeType::Revision => "rev",
            NodeType::Snapshot => "snp",
        }
    }

    pub fn from_token(token: &[u8]) -> Option<NodeType> {
        match token {
            b"cnt" => Some(NodeType::Content),
            b"dir" => Some(NodeType::Directory),
            b"ori" => Some(NodeType::Origin),
            b"rel" => Some(NodeType::Release),
            b"rev" => Some(NodeType::Revision),
            b"snp" => Some(NodeType::Snapshot),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A parsed persistent identifier: node type plus SHA1 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid {
    pub node_type: NodeType,
    pub digest: [u8; DIGEST_LEN],
}

impl Pid {
    pub fn new(node_type: NodeType, digest: [u8; DIGEST_LEN]) -> Pid {
        Pid { node_type, digest }
    }

    /// Parses the 50-byte textual form. Any deviation in length, prefix,
    /// version, type token, or hex alphabet is rejected.
    pub fn parse(text: &[u8]) -> Result<Pid> {
        let bad = || GraphError::BadPid(String::from_utf8_lossy(text).into_owned());
        if text.len() != PID_STR_LEN {
            return Err(bad());
        }
        if &text[..4] != b"swh:" {
            return Err(bad());
        }
        if text[4] != b'0' + SCHEME_VERSION || text[5] != b':' {
            return Err(bad());
        }
        let node_type = NodeType::from_token(&text[6..9]).ok_or_else(bad)?;
        if text[9] != b':' {
            return Err(bad());
        }
        let mut digest = [0u8; DIGEST_LEN];
        for (i, pair) in text[10..].chunks_exact(2).enumerate() {
            let hi = hex_value(pair[0]).ok_or_else(bad)?;
            let lo = hex_value(pair[1]).ok_or_else(bad)?;
            digest[i] = (hi << 4) | lo;
        }
        Ok(Pid { node_type, digest })
    }

    /// The textual form as a fixed-size byte array, used as hash key and as
    /// the record payload of the fixed-width map files.
    pub fn to_str_bytes(&self) -> [u8; PID_STR_LEN] {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = [0u8; PID_STR_LEN];
        out[..4].copy_from_slice(b"swh:");
        out[4] = b'0' + SCHEME_VERSION;
        out[5] = b':';
        out[6..9].copy_from_slice(self.node_type.token().as_bytes());
        out[9] = b':';
        for (i, byte) in self.digest.iter().enumerate() {
            out[10 + 2 * i] = HEX[(byte >> 4) as usize];
            out[11 + 2 * i] = HEX[(byte & 0xf) as usize];
        }
        out
    }

    /// Compact 22-byte binary projection: version, 1-based type, digest.
    pub fn to_bytes(&self) -> [u8; PID_BIN_LEN] {
        let mut out = [0u8; PID_BIN_LEN];
        out[0] = SCHEME_VERSION;
        out[1] = self.node_type.ordinal() + 1;
        out[2..].copy_from_slice(&self.digest);
        out
    }

    pub fn from_bytes(bytes: &[u8; PID_BIN_LEN]) -> Result<Pid> {
        let bad = || GraphError::BadPid(format!("binary pid {bytes:02x?}"));
        if bytes[0] != SCHEME_VERSION || bytes[1] == 0 {
            return Err(bad());
        }
        let node_type = NodeType::from_ordinal(bytes[1] - 1).ok_or_else(bad)?;
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes[2..]);
        Ok(Pid { node_type, digest })
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_str_bytes();
        f.write_str(std::str::from_utf8(&text).expect("pid text is ASCII"))
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({self})")
    }
}

impl FromStr for Pid {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Pid> {
        Pid::parse(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "swh:1:cnt:94a9ed024d3859793618152ea559a168bbcbb5e2";

    #[test]
    fn parse_format_roundtrip() {
        let pid: Pid = SAMPLE.parse().unwrap();
        assert_eq!(pid.node_type, NodeType::Content);
        assert_eq!(pid.to_string(), SAMPLE);
    }

    #[test]
    fn binary_roundtrip() {
        let pid: Pid = SAMPLE.parse().unwrap();
        let bytes = pid.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 1);
        assert_eq!(Pid::from_bytes(&bytes).unwrap(), pid);
    }

    #[test]
    fn rejects_malformed_text() {
        for text in [
            "",
            "swh:1:cnt:94a9ed024d3859793618152ea559a168bbcbb5e",
            "swh:1:cnt:94a9ed024d3859793618152ea559a168bbcbb5e2f",
            "swh:2:cnt:94a9ed024d3859793618152ea559a168bbcbb5e2",
            "swh:1:con:94a9ed024d3859793618152ea559a168bbcbb5e2",
            "swh:1:cnt:94A9ED024D3859793618152EA559A168BBCBB5E2",
            "swh:1:cnt;94a9ed024d3859793618152ea559a168bbcbb5e2",
            "git:1:cnt:94a9ed024d3859793618152ea559a168bbcbb5e2",
        ] {
            assert!(
                matches!(text.parse::<Pid>(), Err(GraphError::BadPid(_))),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn type_tokens_roundtrip() {
        for ty in NodeType::all() {
            assert_eq!(NodeType::from_token(ty.token().as_bytes()), Some(ty));
            assert_eq!(NodeType::from_ordinal(ty.ordinal()), Some(ty));
        }
        assert_eq!(NodeType::from_ordinal(6), None);
        assert_eq!(NodeType::from_token(b"xyz"), None);
    }
}
