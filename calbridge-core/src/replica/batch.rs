use crate::backend::WriteOp;

/// Writes queued against one replica, waiting for the next commit.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<WriteOp>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of queued inserts and updates, in that order.
    pub fn counts(&self) -> (usize, usize) {
        let inserts = self
            .ops
            .iter()
            .filter(|op| matches!(op, WriteOp::Insert { .. }))
            .count();
        (inserts, self.ops.len() - inserts)
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}
