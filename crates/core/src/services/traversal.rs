use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::model::{FunctionHandle, WorkItem};

/// Breadth-first worklist of functions still to disassemble.
///
/// A function is marked seen when it is dequeued, not when it is queued, so
/// a function reachable from itself is processed exactly once.
#[derive(Debug)]
pub struct Scheduler {
    queue: VecDeque<WorkItem>,
    seen: HashSet<u64>,
    max_depth: u32,
}

impl Scheduler {
    pub fn new(max_depth: u32) -> Self {
        Self { queue: VecDeque::new(), seen: HashSet::new(), max_depth }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Queue a function unless it is too deep or already handled.
    pub fn enqueue(&mut self, function: FunctionHandle, depth: u32) -> bool {
        if depth > self.max_depth || self.seen.contains(&function.identity()) {
            return false;
        }
        debug!("enqueue {} at depth {depth}", function.signature);
        self.queue.push_back(WorkItem::new(function, depth));
        true
    }

    /// Next unhandled item, marking it seen.
    pub fn next(&mut self) -> Option<WorkItem> {
        while let Some(item) = self.queue.pop_front() {
            if self.seen.insert(item.function.identity()) {
                debug!("dequeue {} at depth {}", item.function.signature, item.depth);
                return Some(item);
            }
        }
        None
    }

    pub fn is_seen(&self, identity: u64) -> bool {
        self.seen.contains(&identity)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
