//! Deferred function scheduling.
//!
//! Calls with a non-zero bind priority are not executed while their cell is
//! first written; they are queued with a snapshot of the row context and run
//! after the group's regions exist. Negative priorities form the inner pass,
//! positive the outer pass; magnitude orders execution within a pass.

use platereport_common::CellRef;
use platereport_template::RowContext;

#[derive(Clone, Debug)]
pub struct DeferredCall {
    pub priority: i32,
    pub name: String,
    pub args: Vec<String>,
    /// Logical sheet the call was written on.
    pub sheet: String,
    pub target: CellRef,
    /// Row context as it was when the cell was expanded.
    pub ctx: RowContext,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeferredPass {
    Inner,
    Outer,
}

impl DeferredPass {
    fn accepts(self, priority: i32) -> bool {
        match self {
            DeferredPass::Inner => priority < 0,
            DeferredPass::Outer => priority > 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeferredQueue {
    calls: Vec<DeferredCall>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        DeferredQueue::default()
    }

    pub fn push(&mut self, call: DeferredCall) {
        self.calls.push(call);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Remove and return the calls belonging to `pass`, ordered by
    /// ascending |priority|. The sort is stable, so calls sharing a
    /// magnitude keep their queueing order.
    pub fn take_pass(&mut self, pass: DeferredPass) -> Vec<DeferredCall> {
        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(self.calls.len());
        for call in self.calls.drain(..) {
            if pass.accepts(call.priority) {
                taken.push(call);
            } else {
                kept.push(call);
            }
        }
        self.calls = kept;
        taken.sort_by_key(|c| c.priority.unsigned_abs());
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(priority: i32, name: &str) -> DeferredCall {
        DeferredCall {
            priority,
            name: name.to_string(),
            args: Vec::new(),
            sheet: "Main".to_string(),
            target: CellRef::new(1, 1),
            ctx: RowContext::new(),
        }
    }

    #[test]
    fn passes_split_by_sign_and_order_by_magnitude() {
        let mut q = DeferredQueue::new();
        for (p, n) in [(-5, "a"), (-1, "b"), (2, "c"), (10, "d")] {
            q.push(call(p, n));
        }
        let inner: Vec<_> = q
            .take_pass(DeferredPass::Inner)
            .into_iter()
            .map(|c| (c.priority, c.name))
            .collect();
        assert_eq!(inner, vec![(-1, "b".into()), (-5, "a".into())]);
        let outer: Vec<_> = q
            .take_pass(DeferredPass::Outer)
            .into_iter()
            .map(|c| (c.priority, c.name))
            .collect();
        assert_eq!(outer, vec![(2, "c".into()), (10, "d".into())]);
        assert!(q.is_empty());
    }

    #[test]
    fn equal_magnitudes_keep_queue_order() {
        let mut q = DeferredQueue::new();
        q.push(call(-2, "first"));
        q.push(call(-2, "second"));
        let inner = q.take_pass(DeferredPass::Inner);
        assert_eq!(inner[0].name, "first");
        assert_eq!(inner[1].name, "second");
    }
}
