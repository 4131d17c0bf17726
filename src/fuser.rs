//! Fusion of adjacent bound nodes into one synthetic node.
//!
//! [`fuse`] looks at the two nodes being joined and picks one of four
//! outcomes:
//!
//! - the continuation writes: append it to a step sequence walked at
//!   execution time (a scalar head is first broadcast if the write is
//!   batched);
//! - either side is a batch: fuse plane by plane (see [`crate::batch`]);
//! - the continuation is an incomplete read: hand `self` to it as its back
//!   operation;
//! - otherwise: append to a flat step sequence.
//!
//! Sequences never nest: both sides are flattened before being joined, so
//! a fused node holds every leaf step exactly once.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::batch;
use crate::element::{DataType, Pixel};
use crate::kind::{NodeKind, Signature};
use crate::node::Node;
use crate::operation::{
    ComputeOperation, Describe, ReadOperation, WriteOperation,
};
use crate::point::{ActiveThreads, Point, Size};
use crate::{FusionError, Result};

/// Joins `first` and `continuation` into one node.
pub(crate) fn fuse(first: &Node, continuation: &Node) -> Result<Node> {
    check_composable(first, continuation)?;

    let first_batch = first.batch_size();
    let cont_batch = continuation.batch_size();
    if let (Some(a), Some(b)) = (first_batch, cont_batch) {
        if a != b {
            return Err(FusionError::BatchSizeMismatch(a, b));
        }
    }

    if continuation.kind().is_any_write_type() {
        let head = match (first_batch, cont_batch) {
            (None, Some(n)) => batch::broadcast(first, n)?,
            _ => first.clone(),
        };
        trace!(
            first = first.name(),
            continuation = continuation.name(),
            "appending write to sequence"
        );
        return sequence(&head, continuation);
    }

    if first_batch.is_some() || cont_batch.is_some() {
        trace!(
            first = first.name(),
            continuation = continuation.name(),
            "fusing plane by plane"
        );
        return batch::fuse_batched(first, continuation);
    }

    if let Node::IncompleteReadBack(op) = continuation {
        trace!(
            back = first.name(),
            continuation = continuation.name(),
            "completing read with back operation"
        );
        return op.complete(first);
    }

    trace!(
        first = first.name(),
        continuation = continuation.name(),
        "appending step to sequence"
    );
    sequence(first, continuation)
}

fn check_composable(first: &Node, continuation: &Node) -> Result<()> {
    match first.kind() {
        NodeKind::IncompleteReadBack => {
            return Err(FusionError::IncompleteHead {
                name: first.name(),
                continuation: continuation.kind(),
            })
        }
        NodeKind::Write => {
            return Err(FusionError::WriteHead {
                name: first.name(),
                continuation: continuation.kind(),
            })
        }
        _ => {}
    }
    if continuation.kind().is_any_complete_read_type() {
        return Err(FusionError::ReadContinuation {
            previous: first.kind(),
            continuation: continuation.kind(),
        });
    }
    Ok(())
}

/// Fails unless `producer`'s output is what `consumer` takes as input.
pub(crate) fn check_types(producer: &Node, consumer: &Node) -> Result<()> {
    let found = producer.output_type();
    let expected = consumer.input_type();
    if found != expected {
        return Err(FusionError::TypeMismatch {
            producer: producer.name(),
            producer_kind: producer.kind(),
            consumer: consumer.name(),
            consumer_kind: consumer.kind(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Kind of a flattened step sequence.
fn sequence_kind(nodes: &[Node]) -> NodeKind {
    let first = nodes[0].kind();
    let last = nodes[nodes.len() - 1].kind();
    if last == NodeKind::Write {
        NodeKind::Write
    } else if first.is_any_complete_read_type() {
        NodeKind::Read
    } else if nodes.iter().any(|n| n.kind() == NodeKind::MidWrite) {
        NodeKind::MidWrite
    } else if nodes.iter().all(|n| n.kind() == NodeKind::Unary) {
        NodeKind::Unary
    } else {
        NodeKind::Binary
    }
}

fn sequence(first: &Node, continuation: &Node) -> Result<Node> {
    check_types(first, continuation)?;
    let mut nodes = first.flatten();
    nodes.extend(continuation.flatten());

    let kind = sequence_kind(&nodes);
    let first_sig = nodes[0].signature();
    let last_sig = nodes[nodes.len() - 1].signature();
    let signature = Signature {
        read_data: first_sig.read_data,
        input: first_sig.input,
        params: (kind != NodeKind::Unary).then_some("FusedOperation"),
        back: None,
        output: if kind == NodeKind::Write {
            DataType::Null
        } else {
            last_sig.output
        },
        write_data: last_sig.write_data,
    };

    match nodes[0].as_complete_read() {
        Ok(source) => {
            let steps = nodes[1..]
                .iter()
                .map(Step::from_node)
                .collect::<Result<Vec<_>>>()?;
            let fused = Arc::new(FusedRead {
                kind,
                signature,
                source,
                steps,
                nodes,
            });
            Ok(if kind == NodeKind::Write {
                Node::Write(fused)
            } else {
                Node::Read(fused)
            })
        }
        Err(_) => {
            let steps = nodes
                .iter()
                .map(Step::from_node)
                .collect::<Result<Vec<_>>>()?;
            let fused = FusedSteps {
                kind,
                signature,
                steps,
                nodes,
            };
            Ok(match kind {
                NodeKind::Write => Node::Write(Arc::new(fused)),
                NodeKind::MidWrite => Node::MidWrite(Arc::new(fused)),
                NodeKind::Unary => Node::Unary(Arc::new(fused)),
                _ => Node::Binary(Arc::new(fused)),
            })
        }
    }
}

/// One non-read step of a sequence.
#[derive(Clone)]
pub(crate) enum Step {
    Compute(Arc<dyn ComputeOperation>),
    Write(Arc<dyn WriteOperation>),
}

impl Step {
    pub(crate) fn from_node(node: &Node) -> Result<Step> {
        match node {
            Node::Unary(op) | Node::Binary(op) | Node::Ternary(op) => {
                Ok(Step::Compute(op.clone()))
            }
            Node::MidWrite(op) | Node::Write(op) => Ok(Step::Write(op.clone())),
            other => Err(other.kind_mismatch("a compute or write")),
        }
    }

    #[inline]
    pub(crate) fn apply(&self, point: Point, value: Pixel) -> Pixel {
        match self {
            Step::Compute(op) => op.exec(point, value),
            Step::Write(op) => op.exec(point, value),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Compute(op) => write!(f, "Compute({})", op.name()),
            Step::Write(op) => write!(f, "Write({})", op.name()),
        }
    }
}

#[inline]
pub(crate) fn run_steps(steps: &[Step], point: Point, value: Pixel) -> Pixel {
    steps.iter().fold(value, |v, step| step.apply(point, v))
}

/// A fused sequence that begins with a complete read.
///
/// As a `Read` it produces the value of the last step at each coordinate.
/// As a `Write` it is a closed pipeline: every coordinate is read,
/// transformed and written without any input.
pub struct FusedRead {
    kind: NodeKind,
    signature: Signature,
    source: Arc<dyn ReadOperation>,
    steps: Vec<Step>,
    nodes: Vec<Node>,
}

impl fmt::Debug for FusedRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusedRead")
            .field("kind", &self.kind)
            .field("source", &self.source.name())
            .field("steps", &self.steps)
            .finish()
    }
}

impl Describe for FusedRead {
    fn name(&self) -> &'static str {
        "FusedRead"
    }

    fn signature(&self) -> Signature {
        self.signature
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<FusedRead>()
    }

    fn fused_steps(&self) -> Option<&[Node]> {
        Some(&self.nodes)
    }
}

impl ReadOperation for FusedRead {
    #[inline]
    fn exec(&self, point: Point) -> Pixel {
        run_steps(&self.steps, point, self.source.exec(point))
    }

    fn num_elems(&self, plane: u32) -> Size {
        self.source.num_elems(plane)
    }

    fn active_threads(&self) -> ActiveThreads {
        self.source.active_threads()
    }
}

impl WriteOperation for FusedRead {
    /// Runs the closed pipeline at `point`; the input is ignored.
    #[inline]
    fn exec(&self, point: Point, _input: Pixel) -> Pixel {
        ReadOperation::exec(self, point)
    }
}

/// A fused sequence of compute and write steps.
pub struct FusedSteps {
    kind: NodeKind,
    signature: Signature,
    steps: Vec<Step>,
    nodes: Vec<Node>,
}

impl fmt::Debug for FusedSteps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusedSteps")
            .field("kind", &self.kind)
            .field("steps", &self.steps)
            .finish()
    }
}

impl Describe for FusedSteps {
    fn name(&self) -> &'static str {
        "FusedOperation"
    }

    fn signature(&self) -> Signature {
        self.signature
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<FusedSteps>()
    }

    fn fused_steps(&self) -> Option<&[Node]> {
        Some(&self.nodes)
    }
}

impl ComputeOperation for FusedSteps {
    #[inline]
    fn exec(&self, point: Point, input: Pixel) -> Pixel {
        run_steps(&self.steps, point, input)
    }
}

impl WriteOperation for FusedSteps {
    #[inline]
    fn exec(&self, point: Point, input: Pixel) -> Pixel {
        run_steps(&self.steps, point, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Add, Cast, Crop, Mul, PerThreadRead, PerThreadWrite};
    use crate::operation::{
        BinaryBehavior, IncompleteReadBackBehavior, ReadBehavior, UnaryBehavior,
        WriteBehavior,
    };
    use crate::point::Rect;
    use crate::tensor::Tensor;

    fn source() -> Node {
        let t = Tensor::<f32>::from_fn(8, 4, 1, |x, y, _| (x + 8 * y) as f32);
        PerThreadRead::<f32>::build(t).unwrap()
    }

    #[test]
    fn test_read_then_compute_is_read() {
        let fused = source()
            .then(&Mul::<f32>::build(2.0).unwrap())
            .unwrap();
        assert_eq!(fused.kind(), NodeKind::Read);
        assert_eq!(fused.flatten().len(), 2);
        assert_eq!(fused.active_threads(), Some(ActiveThreads::new(8, 4, 1)));
    }

    #[test]
    fn test_sequences_do_not_nest() {
        let compute = Mul::<f32>::build(2.0)
            .unwrap()
            .then(&Add::<f32>::build(1.0).unwrap())
            .unwrap();
        assert_eq!(compute.kind(), NodeKind::Binary);
        let fused = source().then(&compute).unwrap();
        let names: Vec<_> = fused.flatten().iter().map(Node::name).collect();
        assert_eq!(names, vec!["PerThreadRead", "Mul", "Add"]);
    }

    #[test]
    fn test_unary_chain_stays_unary() {
        let chain = Cast::<f32, f64>::build()
            .unwrap()
            .then(&Cast::<f64, f32>::build().unwrap())
            .unwrap();
        assert_eq!(chain.kind(), NodeKind::Unary);
        assert_eq!(chain.signature().params, None);
    }

    #[test]
    fn test_compute_then_mid_write_is_mid_write() {
        let out = Tensor::<f32>::new_2d(8, 4);
        let chain = Mul::<f32>::build(2.0)
            .unwrap()
            .then(&PerThreadWrite::<f32>::build_mid(out).unwrap())
            .unwrap();
        assert_eq!(chain.kind(), NodeKind::MidWrite);
        assert_eq!(chain.output_type(), f32_type());
    }

    #[test]
    fn test_read_then_write_is_closed_write() {
        let out = Tensor::<f32>::new_2d(8, 4);
        let closed = source()
            .then(&PerThreadWrite::<f32>::build(out).unwrap())
            .unwrap();
        assert_eq!(closed.kind(), NodeKind::Write);
        assert_eq!(closed.output_type(), DataType::Null);
        assert_eq!(closed.input_type(), DataType::Null);
    }

    #[test]
    fn test_complete_read_as_continuation_rejected() {
        let err = source().then(&source()).unwrap_err();
        assert!(matches!(
            err,
            FusionError::ReadContinuation {
                previous: NodeKind::Read,
                continuation: NodeKind::Read,
            }
        ));
        assert!(err
            .to_string()
            .contains("a Read operation cannot be used as a continuation step"));
    }

    #[test]
    fn test_incomplete_head_rejected() {
        let crop = Crop::build(Rect::new(0, 0, 2, 2)).unwrap();
        let err = crop.then(&Mul::<f32>::build(2.0).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            FusionError::IncompleteHead {
                name: "Crop",
                continuation: NodeKind::Binary,
            }
        ));
    }

    #[test]
    fn test_write_head_rejected() {
        let write = PerThreadWrite::<f32>::build(Tensor::new_2d(1, 1)).unwrap();
        let err = write.then(&Mul::<f32>::build(2.0).unwrap()).unwrap_err();
        assert!(matches!(err, FusionError::WriteHead { .. }));
    }

    #[test]
    fn test_type_mismatch_names_both_nodes() {
        let err = source()
            .then(&Mul::<u8>::build(2).unwrap())
            .unwrap_err();
        match err {
            FusionError::TypeMismatch {
                producer,
                consumer,
                expected,
                found,
                ..
            } => {
                assert_eq!(producer, "PerThreadRead");
                assert_eq!(consumer, "Mul");
                assert_eq!(expected, u8_type());
                assert_eq!(found, f32_type());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_incomplete_continuation_completes() {
        let cropped = source()
            .then(&Crop::build(Rect::new(2, 1, 4, 2)).unwrap())
            .unwrap();
        assert_eq!(cropped.kind(), NodeKind::ReadBack);
        assert_eq!(cropped.active_threads(), Some(ActiveThreads::new(4, 2, 1)));
    }

    fn f32_type() -> DataType {
        DataType::Elem(<f32 as crate::element::Element>::TYPE)
    }

    fn u8_type() -> DataType {
        DataType::Elem(<u8 as crate::element::Element>::TYPE)
    }
}
