use std::{collections::HashMap, sync::Arc};

use crate::components::{Product, ProductId};

/// A band of a product, as a node of the dependency graph.
pub(crate) type Node = (Arc<Product>, String);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Depth first search for a cycle reachable from `start`.
/// Returns the name of the band closing the cycle.
///
/// `dependencies` lists the bands a band is computed from,
/// unknown bands are skipped.
pub(crate) fn find_cycle(
    start: Node,
    dependencies: impl Fn(&Arc<Product>, &str) -> Vec<Node>,
) -> Option<String> {
    let mut visits: HashMap<(ProductId, String), Visit> = HashMap::new();
    // Explicit stack of (node, its dependencies, next dependency to visit).
    let mut stack: Vec<(Node, Vec<Node>, usize)> = Vec::new();

    visits.insert((start.0.id(), start.1.clone()), Visit::InProgress);
    let first = dependencies(&start.0, &start.1);
    stack.push((start, first, 0));

    while let Some((node, deps, next)) = stack.last_mut() {
        let Some(dependency) = deps.get(*next).cloned() else {
            visits.insert((node.0.id(), node.1.clone()), Visit::Done);
            stack.pop();
            continue;
        };
        *next += 1;
        match visits.get(&(dependency.0.id(), dependency.1.clone())) {
            Some(Visit::InProgress) => return Some(dependency.1),
            Some(Visit::Done) => continue,
            None => {
                visits.insert((dependency.0.id(), dependency.1.clone()), Visit::InProgress);
                let deps = dependencies(&dependency.0, &dependency.1);
                stack.push((dependency, deps, 0));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph<'a>(edges: &'a [(&'a str, &'a str)], product: &'a Arc<Product>) -> impl Fn(&Arc<Product>, &str) -> Vec<Node> + 'a {
        move |_, band| {
            edges
                .iter()
                .filter(|(from, _)| *from == band)
                .map(|(_, to)| (Arc::clone(product), to.to_string()))
                .collect()
        }
    }

    #[test]
    fn diamond_is_acyclic() {
        let product = Arc::new(Product::new("p", "T", (1, 1)));
        let edges = [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")];
        let start = (Arc::clone(&product), String::from("a"));
        assert_eq!(find_cycle(start, graph(&edges, &product)), None);
    }

    #[test]
    fn indirect_cycle_is_found() {
        let product = Arc::new(Product::new("p", "T", (1, 1)));
        let edges = [("a", "b"), ("b", "c"), ("c", "a")];
        let start = (Arc::clone(&product), String::from("a"));
        assert_eq!(find_cycle(start, graph(&edges, &product)), Some(String::from("a")));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let product = Arc::new(Product::new("p", "T", (1, 1)));
        let edges = [("a", "a")];
        let start = (Arc::clone(&product), String::from("a"));
        assert_eq!(find_cycle(start, graph(&edges, &product)), Some(String::from("a")));
    }
}
