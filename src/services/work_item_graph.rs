//! Work item graph: dependency DAG with a guarded status transition table.
//!
//! The graph is the single owned store of work item state. Cycle detection
//! runs once at construction; afterwards `mark` is the only status mutator.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BuildAttempt, WorkItem, WorkItemId, WorkItemSpec, WorkItemStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    InStack,
    Done,
}

/// Dependency graph over work items.
#[derive(Debug, Clone)]
pub struct WorkItemGraph {
    items: HashMap<WorkItemId, WorkItem>,
    /// Reverse edges: item -> items that depend on it
    dependents: HashMap<WorkItemId, Vec<WorkItemId>>,
    /// Topological order, priority then input order among peers
    order: Vec<WorkItemId>,
}

impl WorkItemGraph {
    /// Build the graph, failing fast on duplicates, unknown dependencies or cycles.
    #[instrument(skip(specs), fields(count = specs.len()))]
    pub fn new(specs: Vec<WorkItemSpec>) -> DomainResult<Self> {
        let mut input_order = Vec::with_capacity(specs.len());
        let mut items = HashMap::with_capacity(specs.len());

        for spec in specs {
            let item = WorkItem::from_spec(spec);
            if items.contains_key(&item.id) {
                return Err(DomainError::DuplicateItem(item.id));
            }
            input_order.push(item.id.clone());
            items.insert(item.id.clone(), item);
        }

        let mut dependents: HashMap<WorkItemId, Vec<WorkItemId>> =
            input_order.iter().map(|id| (id.clone(), Vec::new())).collect();
        for id in &input_order {
            for dep in items[id].dependencies() {
                match dependents.get_mut(dep) {
                    Some(list) => list.push(id.clone()),
                    None => return Err(DomainError::UnknownItem(dep.clone())),
                }
            }
        }

        if let Some(cycle) = find_cycle(&items, &input_order) {
            return Err(DomainError::CyclicDependency(cycle));
        }

        let order = topological_order(&items, &dependents, &input_order);
        debug!(order = ?order, "work item graph constructed");

        Ok(Self {
            items,
            dependents,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.items.get(id)
    }

    /// Items in topological order.
    pub fn items(&self) -> impl Iterator<Item = &WorkItem> + '_ {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn topological_order(&self) -> &[WorkItemId] {
        &self.order
    }

    /// Pending items whose dependencies are all Done, in topological order.
    ///
    /// Lazy and restartable: nothing is retained between calls.
    pub fn ready_items(&self) -> impl Iterator<Item = &WorkItem> + '_ {
        self.items()
            .filter(|item| item.status == WorkItemStatus::Pending)
            .filter(|item| self.dependencies_done(item))
    }

    /// Direct dependents of an item.
    pub fn dependents(&self, id: &WorkItemId) -> &[WorkItemId] {
        self.dependents.get(id).map_or(&[], Vec::as_slice)
    }

    /// Change an item's status according to the transition table.
    #[instrument(skip(self), fields(item = %id, to = %status))]
    pub fn mark(&mut self, id: &WorkItemId, status: WorkItemStatus) -> DomainResult<()> {
        let item = self
            .items
            .get(id)
            .ok_or_else(|| DomainError::UnknownItem(id.clone()))?;

        let from = item.status;
        if !from.can_transition_to(status) {
            return Err(DomainError::InvalidTransition {
                item: id.clone(),
                from: from.as_str().to_string(),
                to: status.as_str().to_string(),
                reason: "not in transition table".to_string(),
            });
        }

        if status == WorkItemStatus::Ready && !self.dependencies_done(item) {
            return Err(DomainError::InvalidTransition {
                item: id.clone(),
                from: from.as_str().to_string(),
                to: status.as_str().to_string(),
                reason: "dependencies not done".to_string(),
            });
        }

        if let Some(item) = self.items.get_mut(id) {
            item.set_status(status);
        }
        debug!(from = %from, "work item status changed");
        Ok(())
    }

    /// Mark a Pending item Done with the attempts of an earlier run.
    ///
    /// Only for resuming: the item's work is already on trunk, so it skips
    /// the build states. Every dependency must already be Done.
    pub fn restore_done(&mut self, id: &WorkItemId, attempts: Vec<BuildAttempt>) -> DomainResult<()> {
        let item = self
            .items
            .get(id)
            .ok_or_else(|| DomainError::UnknownItem(id.clone()))?;
        let refuse = |reason: &str| DomainError::InvalidTransition {
            item: id.clone(),
            from: item.status.as_str().to_string(),
            to: WorkItemStatus::Done.as_str().to_string(),
            reason: reason.to_string(),
        };
        if item.status != WorkItemStatus::Pending {
            return Err(refuse("only pending items can be restored"));
        }
        if !self.dependencies_done(item) {
            return Err(refuse("dependencies not done"));
        }

        if let Some(item) = self.items.get_mut(id) {
            item.attempts = attempts;
            item.set_status(WorkItemStatus::Done);
        }
        debug!(item = %id, "work item restored as done");
        Ok(())
    }

    /// Append an attempt to an item's history.
    pub fn record_attempt(&mut self, id: &WorkItemId, attempt: BuildAttempt) -> DomainResult<()> {
        let item = self
            .items
            .get_mut(id)
            .ok_or_else(|| DomainError::UnknownItem(id.clone()))?;
        item.attempts.push(attempt);
        Ok(())
    }

    /// Block every transitive dependent of `id` that has not finished.
    ///
    /// Returns the ids that were newly blocked.
    pub fn block_dependents(&mut self, id: &WorkItemId) -> DomainResult<Vec<WorkItemId>> {
        if !self.items.contains_key(id) {
            return Err(DomainError::UnknownItem(id.clone()));
        }

        let mut blocked = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<WorkItemId> = self.dependents(id).iter().cloned().collect();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            let status = self.items[&next].status;
            if !matches!(status, WorkItemStatus::Blocked | WorkItemStatus::Done) {
                self.mark(&next, WorkItemStatus::Blocked)?;
                blocked.push(next.clone());
            }
            queue.extend(self.dependents(&next).iter().cloned());
        }

        Ok(blocked)
    }

    /// Counts per status, every status present.
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = WorkItemStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for item in self.items.values() {
            *counts.entry(item.status.as_str().to_string()).or_default() += 1;
        }
        counts
    }

    pub fn count(&self, status: WorkItemStatus) -> usize {
        self.items.values().filter(|i| i.status == status).count()
    }

    /// True once every item is Done, Failed or Blocked.
    pub fn is_settled(&self) -> bool {
        self.items.values().all(|i| i.status.is_terminal())
    }

    fn dependencies_done(&self, item: &WorkItem) -> bool {
        item.dependencies().iter().all(|dep| {
            self.items
                .get(dep)
                .is_some_and(|d| d.status == WorkItemStatus::Done)
        })
    }
}

/// Depth-first search over dependency edges; returns the first cycle found,
/// closed with its starting node.
fn find_cycle(items: &HashMap<WorkItemId, WorkItem>, input_order: &[WorkItemId]) -> Option<Vec<WorkItemId>> {
    let mut state: HashMap<&WorkItemId, Visit> =
        input_order.iter().map(|id| (id, Visit::Unvisited)).collect();

    for root in input_order {
        if state[root] != Visit::Unvisited {
            continue;
        }

        // Explicit stack of (node, remaining deps) keeps deep chains off the call stack.
        let mut path: Vec<&WorkItemId> = vec![root];
        let mut frames: Vec<std::collections::btree_set::Iter<'_, WorkItemId>> =
            vec![items[root].dependencies().iter()];
        state.insert(root, Visit::InStack);

        while let Some(frame) = frames.last_mut() {
            match frame.next() {
                Some(dep) => match state[dep] {
                    Visit::InStack => {
                        let start = path.iter().position(|id| *id == dep).unwrap_or(0);
                        let mut cycle: Vec<WorkItemId> =
                            path[start..].iter().map(|id| (*id).clone()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Visit::Unvisited => {
                        state.insert(dep, Visit::InStack);
                        path.push(dep);
                        frames.push(items[dep].dependencies().iter());
                    }
                    Visit::Done => {}
                },
                None => {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        state.insert(done, Visit::Done);
                    }
                }
            }
        }
    }

    None
}

/// Kahn's algorithm with (priority, input position) as tie-break.
fn topological_order(
    items: &HashMap<WorkItemId, WorkItem>,
    dependents: &HashMap<WorkItemId, Vec<WorkItemId>>,
    input_order: &[WorkItemId],
) -> Vec<WorkItemId> {
    let position: HashMap<&WorkItemId, usize> =
        input_order.iter().enumerate().map(|(i, id)| (id, i)).collect();
    let mut in_degree: HashMap<&WorkItemId, usize> = input_order
        .iter()
        .map(|id| (id, items[id].dependencies().len()))
        .collect();

    let mut heap = BinaryHeap::new();
    for id in input_order {
        if in_degree[id] == 0 {
            heap.push(Reverse((items[id].priority, position[id])));
        }
    }

    let mut order = Vec::with_capacity(input_order.len());
    while let Some(Reverse((_, pos))) = heap.pop() {
        let id = &input_order[pos];
        order.push(id.clone());
        for dependent in &dependents[id] {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    heap.push(Reverse((items[dependent].priority, position[dependent])));
                }
            }
        }
    }

    order
}
