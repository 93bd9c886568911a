//! Traversal restriction predicates compiled from textual specs.

use crate::error::{GraphError, Result};
use crate::pid::NodeType;

/// Predicate over (source type, destination type) pairs, compiled from a
/// spec such as `"rev:dir,dir:cnt"` or `"*:*"`. The empty spec denies every
/// edge. Lookup is a single array access.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AllowedEdges {
    matrix: [[bool; NodeType::COUNT]; NodeType::COUNT],
}

impl AllowedEdges {
    /// Allows every edge, equivalent to compiling `"*:*"`.
    pub fn all() -> AllowedEdges {
        AllowedEdges {
            matrix: [[true; NodeType::COUNT]; NodeType::COUNT],
        }
    }

    pub fn compile(spec: &str) -> Result<AllowedEdges> {
        let mut matrix = [[false; NodeType::COUNT]; NodeType::COUNT];
        if spec.trim().is_empty() {
            return Ok(AllowedEdges { matrix });
        }
        for token in spec.split(',') {
            let token = token.trim();
            let (src, dst) = token
                .split_once(':')
                .ok_or_else(|| GraphError::BadSpec(format!("edge token '{token}'")))?;
            for src_type in parse_side(src)? {
                for dst_type in parse_side(dst)? {
                    matrix[src_type.ordinal() as usize][dst_type.ordinal() as usize] = true;
                }
            }
        }
        Ok(AllowedEdges { matrix })
    }

    pub fn allowed(&self, src: NodeType, dst: NodeType) -> bool {
        self.matrix[src.ordinal() as usize][dst.ordinal() as usize]
    }
}

/// Node-type whitelist compiled from a spec such as `"rev,dir,cnt"` or `"*"`,
/// the mask consumed by the subgraph view.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeFilter {
    mask: [bool; NodeType::COUNT],
}

impl NodeFilter {
    pub fn all() -> NodeFilter {
        NodeFilter {
            mask: [true; NodeType::COUNT],
        }
    }

    pub fn compile(spec: &str) -> Result<NodeFilter> {
        let mut mask = [false; NodeType::COUNT];
        if spec.trim().is_empty() {
            return Ok(NodeFilter { mask });
        }
        for token in spec.split(',') {
            for node_type in parse_side(token.trim())? {
                mask[node_type.ordinal() as usize] = true;
            }
        }
        Ok(NodeFilter { mask })
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.mask[node_type.ordinal() as usize]
    }
}

fn parse_side(token: &str) -> Result<Vec<NodeType>> {
    if token == "*" {
        return Ok(NodeType::all().to_vec());
    }
    NodeType::from_token(token.as_bytes())
        .map(|t| vec![t])
        .ok_or_else(|| GraphError::BadSpec(format!("node type '{token}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_denies_all() {
        let edges = AllowedEdges::compile("").unwrap();
        for src in NodeType::all() {
            for dst in NodeType::all() {
                assert!(!edges.allowed(src, dst));
            }
        }
    }

    #[test]
    fn star_star_allows_all() {
        let edges = AllowedEdges::compile("*:*").unwrap();
        assert_eq!(edges, AllowedEdges::all());
    }

    #[test]
    fn specific_pairs() {
        let edges = AllowedEdges::compile("rev:dir,dir:cnt").unwrap();
        assert!(edges.allowed(NodeType::Revision, NodeType::Directory));
        assert!(edges.allowed(NodeType::Directory, NodeType::Content));
        assert!(!edges.allowed(NodeType::Directory, NodeType::Directory));
        assert!(!edges.allowed(NodeType::Content, NodeType::Revision));
    }

    #[test]
    fn wildcard_side() {
        let edges = AllowedEdges::compile("rev:*").unwrap();
        for dst in NodeType::all() {
            assert!(edges.allowed(NodeType::Revision, dst));
            assert!(!edges.allowed(NodeType::Snapshot, dst));
        }
    }

    #[test]
    fn bad_tokens_are_rejected() {
        for spec in ["rev", "rev:", "rev:xyz", "foo:cnt", "rev:dir,", "::"] {
            assert!(
                matches!(AllowedEdges::compile(spec), Err(GraphError::BadSpec(_))),
                "accepted {spec:?}"
            );
        }
    }

    #[test]
    fn compilation_is_deterministic() {
        for spec in ["*:*", "rev:dir,dir:cnt", "snp:*,*:cnt"] {
            assert_eq!(
                AllowedEdges::compile(spec).unwrap(),
                AllowedEdges::compile(spec).unwrap()
            );
        }
    }

    #[test]
    fn node_filter() {
        let filter = NodeFilter::compile("dir,cnt").unwrap();
        assert!(filter.contains(NodeType::Directory));
        assert!(filter.contains(NodeType::Content));
        assert!(!filter.contains(NodeType::Revision));
        assert_eq!(NodeFilter::compile("*").unwrap(), NodeFilter::all());
        assert!(NodeFilter::compile("dir,nope").is_err());
        let empty = NodeFilter::compile("").unwrap();
        assert!(NodeType::all().iter().all(|&t| !empty.contains(t)));
    }
}
