use crate::registry::ExecutionUnit;
use crate::utils::errors::WorkloadError;

const MIN_DEPTH: usize = 4;

struct Node {
    children: Option<(Box<Node>, Box<Node>)>,
}

fn bottom_up(depth: usize) -> Box<Node> {
    let children = if depth > 0 {
        Some((bottom_up(depth - 1), bottom_up(depth - 1)))
    } else {
        None
    };
    Box::new(Node { children })
}

fn check(node: &Node) -> u64 {
    match &node.children {
        Some((left, right)) => 1 + check(left) + check(right),
        None => 1,
    }
}

/// Allocates and walks many short-lived binary trees next to one long-lived tree.
#[derive(Default)]
pub struct BinaryTrees;

impl ExecutionUnit for BinaryTrees {
    fn name(&self) -> &str {
        "binarytrees"
    }

    fn description(&self) -> &str {
        "Binary trees allocation/deallocation"
    }

    fn effective_size(&self, _requested: usize) -> usize {
        16
    }

    fn execute(&mut self, max_depth: usize) -> Result<u64, WorkloadError> {
        if max_depth < MIN_DEPTH + 2 {
            return Err(WorkloadError::InvalidSize {
                size: max_depth,
                reason: format!("depth must be at least {}", MIN_DEPTH + 2),
            });
        }

        let mut checksum = check(&bottom_up(max_depth + 1));
        let long_lived = bottom_up(max_depth);

        for depth in (MIN_DEPTH..=max_depth).step_by(2) {
            let iterations = 1u64 << (max_depth - depth + MIN_DEPTH);
            let mut total = 0;
            for _ in 0..iterations {
                total += check(&bottom_up(depth));
            }
            checksum = checksum.wrapping_add(total);
        }

        Ok(checksum.wrapping_add(check(&long_lived)))
    }
}
