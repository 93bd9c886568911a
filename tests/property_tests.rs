use proptest::prelude::*;
use strata::bits::{BitReader, BitWriter};
use strata::edges::AllowedEdges;
use strata::graph::{BvGraph, BvGraphWriter};
use strata::maps::{TypeMap, TypeMapBuilder};
use strata::mph::Mph;
use strata::{NodeType, Pid};

fn arb_node_type() -> impl Strategy<Value = NodeType> {
    (0u8..6).prop_map(|ordinal| NodeType::from_ordinal(ordinal).unwrap())
}

fn arb_pid() -> impl Strategy<Value = Pid> {
    (arb_node_type(), prop::array::uniform20(any::<u8>()))
        .prop_map(|(node_type, digest)| Pid::new(node_type, digest))
}

/// Adjacency lists over `n` nodes: each list sorted, deduplicated, in range.
fn arb_adjacency() -> impl Strategy<Value = Vec<Vec<u64>>> {
    (1usize..24).prop_flat_map(|n| {
        prop::collection::vec(
            prop::collection::vec(0..n as u64, 0..n).prop_map(|mut list| {
                list.sort_unstable();
                list.dedup();
                list
            }),
            n,
        )
    })
}

proptest! {
    #[test]
    fn pid_parse_format_is_identity(pid in arb_pid()) {
        let text = pid.to_string();
        prop_assert_eq!(text.len(), 50);
        let reparsed: Pid = text.parse().unwrap();
        prop_assert_eq!(reparsed, pid);
        prop_assert_eq!(Pid::from_bytes(&pid.to_bytes()).unwrap(), pid);
    }

    #[test]
    fn gamma_stream_roundtrips(values in prop::collection::vec(0u64..1 << 48, 0..200)) {
        let mut writer = BitWriter::new();
        for &value in &values {
            writer.write_gamma(value);
        }
        let (bytes, _) = writer.finish();
        let mut reader = BitReader::new(&bytes);
        for &value in &values {
            prop_assert_eq!(reader.read_gamma(), value);
        }
        prop_assert!(!reader.is_overrun());
    }

    #[test]
    fn edge_spec_compiles_deterministically(
        pairs in prop::collection::vec((arb_node_type(), arb_node_type()), 1..10)
    ) {
        let spec = pairs
            .iter()
            .map(|(s, d)| format!("{s}:{d}"))
            .collect::<Vec<_>>()
            .join(",");
        let compiled = AllowedEdges::compile(&spec).unwrap();
        prop_assert_eq!(compiled, AllowedEdges::compile(&spec).unwrap());
        for (src, dst) in &pairs {
            prop_assert!(compiled.allowed(*src, *dst));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn graph_codec_matches_the_vector_model(lists in arb_adjacency()) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("graph");
        let mut writer = BvGraphWriter::new(lists.len() as u64);
        for list in &lists {
            writer.write_node(list).unwrap();
        }
        let (nodes, arcs) = writer.finish(&base).unwrap();
        prop_assert_eq!(nodes, lists.len() as u64);
        prop_assert_eq!(arcs, lists.iter().map(|l| l.len() as u64).sum::<u64>());

        let graph = BvGraph::load(&base).unwrap();
        for (node, expected) in lists.iter().enumerate() {
            prop_assert_eq!(
                graph.outdegree(node as u64).unwrap(),
                expected.len() as u64
            );
            let got: Vec<u64> = graph.successors(node as u64).unwrap().collect();
            prop_assert_eq!(&got, expected);
            prop_assert!(got.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn mph_is_bijective_over_any_key_set(
        count in 1u64..150,
        node_type in arb_node_type(),
    ) {
        let keys: Vec<[u8; 50]> = (0..count)
            .map(|i| {
                let mut digest = [0u8; 20];
                digest[..8].copy_from_slice(&i.to_be_bytes());
                digest[19] = 0xa5;
                Pid::new(node_type, digest).to_str_bytes()
            })
            .collect();
        let mph = Mph::build(&keys).unwrap();
        let mut seen = vec![false; count as usize];
        for key in &keys {
            let ordinal = mph.get(key);
            prop_assert!(ordinal < count);
            prop_assert!(!seen[ordinal as usize]);
            seen[ordinal as usize] = true;
        }
    }

    #[test]
    fn type_map_packs_and_unpacks(types in prop::collection::vec(arb_node_type(), 1..200)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.map");
        let mut builder = TypeMapBuilder::new(types.len() as u64);
        for (id, &node_type) in types.iter().enumerate() {
            builder.set(id as u64, node_type).unwrap();
        }
        builder.store(&path).unwrap();
        let map = TypeMap::load(&path).unwrap();
        for (id, &node_type) in types.iter().enumerate() {
            prop_assert_eq!(map.get(id as u64).unwrap(), node_type);
        }
    }
}
