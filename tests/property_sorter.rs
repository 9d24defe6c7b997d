// tests/property_sorter.rs

use std::collections::{BTreeSet, HashSet};

use jobdag::dag::TopologicalSorter;
use proptest::prelude::*;

// Acyclic by construction: node N may only depend on nodes 0..N-1.
fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1..=max_nodes).prop_flat_map(|num_nodes| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_nodes),
            num_nodes,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, deps)| {
                    if i == 0 {
                        BTreeSet::new()
                    } else {
                        deps.into_iter().map(|d| d % i).collect()
                    }
                })
                .collect()
        })
    })
}

fn name(i: usize) -> String {
    format!("job_{i}")
}

proptest! {
    #[test]
    fn every_node_is_handed_out_once_after_its_predecessors(
        deps in dag_strategy(12),
        // Which of the currently handed-out nodes finishes next.
        picks in proptest::collection::vec(any::<usize>(), 64),
    ) {
        let mut sorter = TopologicalSorter::new();
        for (i, node_deps) in deps.iter().enumerate() {
            sorter.add(&name(i), node_deps.iter().map(|d| name(*d))).unwrap();
        }
        sorter.prepare().unwrap();

        let mut handed_out: HashSet<String> = HashSet::new();
        let mut done: HashSet<String> = HashSet::new();
        let mut in_progress: Vec<String> = Vec::new();
        let mut picks = picks.into_iter().cycle();

        while sorter.is_active() {
            for node in sorter.get_ready() {
                let idx: usize = node.trim_start_matches("job_").parse().unwrap();
                for dep in &deps[idx] {
                    prop_assert!(done.contains(&name(*dep)), "{node} handed out before {dep}");
                }
                prop_assert!(handed_out.insert(node.clone()), "{node} handed out twice");
                in_progress.push(node);
            }

            prop_assert!(!in_progress.is_empty(), "sorter active but nothing to finish");
            let pick = picks.next().unwrap_or(0) % in_progress.len();
            let finished = in_progress.swap_remove(pick);
            sorter.done(&finished).unwrap();
            done.insert(finished);
        }

        prop_assert_eq!(handed_out.len(), deps.len());
        prop_assert_eq!(done.len(), deps.len());
    }
}
