use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of a template node. Clones made for horizontal replication get
/// fresh ids so their print output can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        NodeId(raw)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Original-to-clone id table for one clone operation.
///
/// A node registers its clone id before its children are cloned, so
/// references between siblings (e.g. float dependants) can be remapped once
/// the whole subtree exists.
#[derive(Debug, Default)]
pub struct CloneContext {
    ids: HashMap<NodeId, NodeId>,
}

impl CloneContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone id for `original`, allocated on first request.
    pub fn map(&mut self, original: NodeId) -> NodeId {
        *self.ids.entry(original).or_insert_with(NodeId::next)
    }

    pub fn get(&self, original: NodeId) -> Option<NodeId> {
        self.ids.get(&original).copied()
    }

    /// Ids outside the cloned subtree map to themselves.
    pub fn remap(&self, id: NodeId) -> NodeId {
        self.get(id).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_stable_within_a_context() {
        let mut ctx = CloneContext::new();
        let a = NodeId::next();
        let b = NodeId::next();
        let a2 = ctx.map(a);
        assert_ne!(a, a2);
        assert_eq!(ctx.map(a), a2);
        assert_eq!(ctx.remap(a), a2);
        assert_eq!(ctx.remap(b), b);
        assert_eq!(ctx.len(), 1);
    }
}
