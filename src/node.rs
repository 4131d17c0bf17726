//! Bound nodes: a behavior paired with its runtime parameters.

use std::any::TypeId;
use std::sync::Arc;

use crate::batch::PlanePolicy;
use crate::element::DataType;
use crate::fuser;
use crate::kind::{NodeKind, Signature};
use crate::operation::{
    self, ComputeOperation, IncompleteOperation, ReadOperation, WriteOperation,
};
use crate::point::ActiveThreads;
use crate::{FusionError, Result};

/// A bound node of one of the eight kinds.
///
/// Nodes are immutable and cheap to clone (the bound operation is shared).
/// Fused and batched nodes are nodes too: to any outer composition they are
/// indistinguishable from a single leaf of the same kind.
#[derive(Clone, Debug)]
pub enum Node {
    Read(Arc<dyn ReadOperation>),
    ReadBack(Arc<dyn ReadOperation>),
    IncompleteReadBack(Arc<dyn IncompleteOperation>),
    Unary(Arc<dyn ComputeOperation>),
    Binary(Arc<dyn ComputeOperation>),
    Ternary(Arc<dyn ComputeOperation>),
    MidWrite(Arc<dyn WriteOperation>),
    Write(Arc<dyn WriteOperation>),
}

/// Evaluates `$body` with `$op` bound to the operation of any variant.
macro_rules! with_op {
    ($node:expr, $op:ident => $body:expr) => {
        match $node {
            Node::Read($op) | Node::ReadBack($op) => $body,
            Node::IncompleteReadBack($op) => $body,
            Node::Unary($op) | Node::Binary($op) | Node::Ternary($op) => $body,
            Node::MidWrite($op) | Node::Write($op) => $body,
        }
    };
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Read(_) => NodeKind::Read,
            Node::ReadBack(_) => NodeKind::ReadBack,
            Node::IncompleteReadBack(_) => NodeKind::IncompleteReadBack,
            Node::Unary(_) => NodeKind::Unary,
            Node::Binary(_) => NodeKind::Binary,
            Node::Ternary(_) => NodeKind::Ternary,
            Node::MidWrite(_) => NodeKind::MidWrite,
            Node::Write(_) => NodeKind::Write,
        }
    }

    pub fn name(&self) -> &'static str {
        with_op!(self, op => op.name())
    }

    pub fn signature(&self) -> Signature {
        with_op!(self, op => op.signature())
    }

    pub fn input_type(&self) -> DataType {
        self.signature().input
    }

    pub fn output_type(&self) -> DataType {
        self.signature().output
    }

    /// Iteration domain of a complete read, `None` for every other kind.
    pub fn active_threads(&self) -> Option<ActiveThreads> {
        match self {
            Node::Read(op) | Node::ReadBack(op) => Some(op.active_threads()),
            _ => None,
        }
    }

    /// Number of planes if this is a batch node.
    pub fn batch_size(&self) -> Option<usize> {
        with_op!(self, op => op.batch().map(|b| b.nodes.len()))
    }

    /// Per-plane nodes and policy if this is a batch node.
    pub(crate) fn batch_parts(&self) -> Option<(Vec<Node>, PlanePolicy)> {
        with_op!(self, op => op.batch().map(|b| (b.nodes.to_vec(), b.policy.clone())))
    }

    /// Composes `self` with `continuation`.
    ///
    /// This is the only way into fusion. The result has the external
    /// contract of the whole chain: `self`'s input and `continuation`'s
    /// output. Fails if `self` is an incomplete read or a terminating
    /// write, if `continuation` is a complete read, if the value types
    /// do not line up, or if two batches of different size meet.
    pub fn then(&self, continuation: &Node) -> Result<Node> {
        fuser::fuse(self, continuation)
    }

    /// `self.then(a).then(b)...` over every continuation in order.
    pub fn then_all<'a, I>(&self, continuations: I) -> Result<Node>
    where
        I: IntoIterator<Item = &'a Node>,
    {
        continuations
            .into_iter()
            .try_fold(self.clone(), |acc, next| acc.then(next))
    }

    /// The steps of this node with any fused sequence expanded.
    pub(crate) fn flatten(&self) -> Vec<Node> {
        with_op!(self, op => op.fused_steps().map(<[Node]>::to_vec))
            .unwrap_or_else(|| vec![self.clone()])
    }

    /// Behavior identities along the flattened steps and their back
    /// operations, used to compare per-plane nodes of a batch.
    pub(crate) fn behavior_path(&self) -> Vec<TypeId> {
        with_op!(self, op => operation::behavior_path(&**op))
    }

    pub(crate) fn as_complete_read(&self) -> Result<Arc<dyn ReadOperation>> {
        match self {
            Node::Read(op) | Node::ReadBack(op) => Ok(op.clone()),
            other => Err(other.kind_mismatch("a Read or ReadBack")),
        }
    }

    pub(crate) fn as_incomplete(&self) -> Result<Arc<dyn IncompleteOperation>> {
        match self {
            Node::IncompleteReadBack(op) => Ok(op.clone()),
            other => Err(other.kind_mismatch("an IncompleteReadBack")),
        }
    }

    pub(crate) fn as_compute(&self) -> Result<Arc<dyn ComputeOperation>> {
        match self {
            Node::Unary(op) | Node::Binary(op) | Node::Ternary(op) => Ok(op.clone()),
            other => Err(other.kind_mismatch("a Unary, Binary or Ternary")),
        }
    }

    pub(crate) fn as_write(&self) -> Result<Arc<dyn WriteOperation>> {
        match self {
            Node::MidWrite(op) | Node::Write(op) => Ok(op.clone()),
            other => Err(other.kind_mismatch("a Write or MidWrite")),
        }
    }

    pub(crate) fn kind_mismatch(&self, expected: &'static str) -> FusionError {
        FusionError::KindMismatch {
            expected,
            found: self.kind(),
            name: self.name(),
        }
    }
}
