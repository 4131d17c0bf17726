//! Batched nodes: `N` per-plane nodes selected by the `z` coordinate.
//!
//! A batch node stores one bound node per plane and behaves, from the
//! outside, like a single node of the same kind whose `z` extent is the
//! number of planes. With [`PlanePolicy::ConditionalWithDefault`] only the
//! first `used_planes` planes run their node; every other plane yields the
//! stored default value without touching its node.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::element::{DataType, Pixel, TypedPixel};
use crate::kind::{NodeKind, Signature};
use crate::node::Node;
use crate::operation::{
    ComputeOperation, Describe, IncompleteOperation, ReadOperation, WriteOperation,
};
use crate::point::{ActiveThreads, Point, Size, WriteExtent};
use crate::{FusionError, Result};

/// Which planes of a batch run their per-plane node.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanePolicy {
    /// Every plane runs.
    ProcessAll,
    /// Planes `z >= used_planes` return `default` instead.
    ConditionalWithDefault {
        used_planes: u32,
        default: TypedPixel,
    },
}

impl PlanePolicy {
    pub fn used_planes(&self, batch: usize) -> u32 {
        match self {
            PlanePolicy::ProcessAll => batch as u32,
            PlanePolicy::ConditionalWithDefault { used_planes, .. } => *used_planes,
        }
    }

    /// Policy of the fusion of two batches.
    ///
    /// A conditional continuation wins; a conditional head is kept only when
    /// the continuation processes every plane. The default is re-typed to the
    /// fused output when the batch is assembled.
    pub(crate) fn combine(first: &PlanePolicy, continuation: &PlanePolicy) -> PlanePolicy {
        match (first, continuation) {
            (_, c @ PlanePolicy::ConditionalWithDefault { .. }) => c.clone(),
            (f @ PlanePolicy::ConditionalWithDefault { .. }, PlanePolicy::ProcessAll) => f.clone(),
            (PlanePolicy::ProcessAll, PlanePolicy::ProcessAll) => PlanePolicy::ProcessAll,
        }
    }
}

/// Borrowed view of a batch node's planes.
#[derive(Clone, Copy, Debug)]
pub struct BatchInfo<'a> {
    pub nodes: &'a [Node],
    pub policy: &'a PlanePolicy,
}

/// A batch of per-plane operations of one kind.
pub struct Batch<Op: ?Sized> {
    kind: NodeKind,
    nodes: Vec<Node>,
    planes: Vec<Arc<Op>>,
    policy: PlanePolicy,
    active: ActiveThreads,
}

impl<Op: ?Sized> Clone for Batch<Op> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            nodes: self.nodes.clone(),
            planes: self.planes.clone(),
            policy: self.policy.clone(),
            active: self.active,
        }
    }
}

impl<Op: ?Sized> fmt::Debug for Batch<Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("kind", &self.kind)
            .field("planes", &self.nodes.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<Op: ?Sized> Batch<Op> {
    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn policy(&self) -> &PlanePolicy {
        &self.policy
    }

    /// The default value if plane `z` is not processed.
    #[inline]
    fn defaulted(&self, z: u32) -> Option<Pixel> {
        match &self.policy {
            PlanePolicy::ConditionalWithDefault {
                used_planes,
                default,
            } if z >= *used_planes => Some(default.pixel),
            _ => None,
        }
    }

    /// Node of plane `z`. Pipelines are validated against the batch size
    /// before dispatch, so a miss only happens when an operation is driven
    /// by hand.
    #[inline]
    fn plane(&self, z: u32) -> Option<&Op> {
        self.planes.get(z as usize).map(Arc::as_ref)
    }
}

impl<Op: ?Sized + Describe + 'static> Describe for Batch<Op> {
    fn name(&self) -> &'static str {
        if self.kind.is_any_read_type() {
            "BatchRead"
        } else if self.kind.is_any_write_type() {
            "BatchWrite"
        } else {
            "Batch"
        }
    }

    fn signature(&self) -> Signature {
        self.nodes[0].signature()
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<Batch<Op>>()
    }

    fn batch(&self) -> Option<BatchInfo<'_>> {
        Some(BatchInfo {
            nodes: &self.nodes,
            policy: &self.policy,
        })
    }
}

impl ReadOperation for Batch<dyn ReadOperation> {
    #[inline]
    fn exec(&self, point: Point) -> Pixel {
        match (self.defaulted(point.z), self.plane(point.z)) {
            (Some(default), _) => default,
            (None, Some(op)) => op.exec(point),
            (None, None) => Pixel::ZERO,
        }
    }

    fn num_elems(&self, plane: u32) -> Size {
        match (self.defaulted(plane), self.plane(plane)) {
            (Some(_), _) => Size::new(self.active.x, self.active.y),
            (None, Some(op)) => op.num_elems(plane),
            (None, None) => Size::default(),
        }
    }

    fn active_threads(&self) -> ActiveThreads {
        self.active
    }
}

impl IncompleteOperation for Batch<dyn IncompleteOperation> {
    fn complete(&self, back: &Node) -> Result<Node> {
        let this = Node::IncompleteReadBack(Arc::new(self.clone()));
        fuse_batched(back, &this)
    }
}

impl ComputeOperation for Batch<dyn ComputeOperation> {
    #[inline]
    fn exec(&self, point: Point, input: Pixel) -> Pixel {
        match (self.defaulted(point.z), self.plane(point.z)) {
            (Some(default), _) => default,
            (None, Some(op)) => op.exec(point, input),
            (None, None) => input,
        }
    }
}

impl WriteOperation for Batch<dyn WriteOperation> {
    #[inline]
    fn exec(&self, point: Point, input: Pixel) -> Pixel {
        match self.plane(point.z) {
            Some(op) => op.exec(point, input),
            None => input,
        }
    }

    /// Plane `z` stores through its own node at depth `z`, so the batch
    /// reaches as deep as the leading planes whose storage holds that plane.
    fn extent(&self) -> Option<WriteExtent> {
        let mut width = u32::MAX;
        let mut height = u32::MAX;
        let mut planes = 0;
        for (z, op) in (0u32..).zip(&self.planes) {
            let Some(extent) = op.extent() else {
                planes += 1;
                continue;
            };
            if extent.planes.is_some_and(|depth| z >= depth) {
                break;
            }
            width = width.min(extent.width);
            height = height.min(extent.height);
            planes += 1;
        }
        Some(WriteExtent::new(width, height, Some(planes)))
    }
}

/// Builds batched reads.
pub struct BatchRead;

impl BatchRead {
    /// Batch whose every plane runs, with extents the per-axis maximum of
    /// the planes' own extents and `z` extent `N`.
    pub fn build(nodes: impl IntoIterator<Item = Node>) -> Result<Node> {
        let nodes = reads_only(nodes)?;
        from_planes(nodes, PlanePolicy::ProcessAll)
    }

    /// Batch whose planes `z >= used_planes` yield `default`, cast to the
    /// common output type of the planes.
    pub fn build_conditional(
        nodes: impl IntoIterator<Item = Node>,
        used_planes: u32,
        default: TypedPixel,
    ) -> Result<Node> {
        let nodes = reads_only(nodes)?;
        from_planes(
            nodes,
            PlanePolicy::ConditionalWithDefault {
                used_planes,
                default,
            },
        )
    }
}

/// Builds batched writes.
pub struct BatchWrite;

impl BatchWrite {
    /// Batch whose plane `z` writes through `nodes[z]`.
    pub fn build(nodes: impl IntoIterator<Item = Node>) -> Result<Node> {
        let nodes: Vec<Node> = nodes.into_iter().collect();
        if let Some(bad) = nodes.iter().find(|n| n.kind() != NodeKind::Write) {
            return Err(bad.kind_mismatch("a Write"));
        }
        from_planes(nodes, PlanePolicy::ProcessAll)
    }
}

fn reads_only(nodes: impl IntoIterator<Item = Node>) -> Result<Vec<Node>> {
    let nodes: Vec<Node> = nodes.into_iter().collect();
    if let Some(bad) = nodes.iter().find(|n| !n.kind().is_any_read_type()) {
        return Err(bad.kind_mismatch("a Read, ReadBack or IncompleteReadBack"));
    }
    Ok(nodes)
}

/// Replicates a scalar node across `n` planes.
pub(crate) fn broadcast(node: &Node, n: usize) -> Result<Node> {
    from_planes(vec![node.clone(); n], PlanePolicy::ProcessAll)
}

/// Plane-by-plane fusion where at least one side is a batch. A scalar side
/// is replicated across the planes of the other.
pub(crate) fn fuse_batched(first: &Node, continuation: &Node) -> Result<Node> {
    let n = first
        .batch_size()
        .or_else(|| continuation.batch_size())
        .ok_or(FusionError::EmptyBatch)?;
    let (first_planes, first_policy) = planes_of(first, n);
    let (cont_planes, cont_policy) = planes_of(continuation, n);
    if first_planes.len() != cont_planes.len() {
        return Err(FusionError::BatchSizeMismatch(
            first_planes.len(),
            cont_planes.len(),
        ));
    }

    let fused = first_planes
        .iter()
        .zip(&cont_planes)
        .map(|(a, c)| a.then(c))
        .collect::<Result<Vec<_>>>()?;
    from_planes(fused, PlanePolicy::combine(&first_policy, &cont_policy))
}

fn planes_of(node: &Node, n: usize) -> (Vec<Node>, PlanePolicy) {
    node.batch_parts()
        .unwrap_or_else(|| (vec![node.clone(); n], PlanePolicy::ProcessAll))
}

/// Assembles a batch node from homogeneous per-plane nodes: same kind,
/// same signature, same behaviors down through every back operation.
pub(crate) fn from_planes(nodes: Vec<Node>, policy: PlanePolicy) -> Result<Node> {
    let first = nodes.first().ok_or(FusionError::EmptyBatch)?;
    let kind = first.kind();
    let signature = first.signature();
    let path = first.behavior_path();
    for (plane, node) in nodes.iter().enumerate().skip(1) {
        let differs = if node.kind() != kind {
            Some("kind")
        } else if node.signature() != signature {
            Some("signature")
        } else if node.behavior_path() != path {
            Some("behavior")
        } else {
            None
        };
        if let Some(facet) = differs {
            return Err(FusionError::HeterogeneousBatch {
                plane,
                facet,
                expected: first.name(),
                found: node.name(),
            });
        }
    }

    let policy = match policy {
        PlanePolicy::ConditionalWithDefault {
            used_planes,
            default,
        } => {
            if used_planes as usize > nodes.len() {
                return Err(FusionError::UsedPlanesOutOfRange {
                    used: used_planes,
                    batch: nodes.len(),
                });
            }
            let default = match first.output_type() {
                DataType::Elem(out) => default.cast_to(out)?,
                DataType::Null => default,
            };
            PlanePolicy::ConditionalWithDefault {
                used_planes,
                default,
            }
        }
        PlanePolicy::ProcessAll => PlanePolicy::ProcessAll,
    };

    debug!(
        kind = %kind,
        planes = nodes.len(),
        used_planes = policy.used_planes(nodes.len()),
        plane_op = first.name(),
        "building batch"
    );

    match kind {
        NodeKind::Read | NodeKind::ReadBack => {
            let planes = nodes
                .iter()
                .map(Node::as_complete_read)
                .collect::<Result<Vec<_>>>()?;
            let extent = planes
                .iter()
                .map(|p| p.active_threads())
                .fold(ActiveThreads::default(), ActiveThreads::max);
            let active = ActiveThreads::new(extent.x, extent.y, planes.len() as u32);
            Ok(Node::Read(Arc::new(assemble(
                NodeKind::Read,
                nodes,
                planes,
                policy,
                active,
            ))))
        }
        NodeKind::IncompleteReadBack => {
            let planes = nodes
                .iter()
                .map(Node::as_incomplete)
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::IncompleteReadBack(Arc::new(assemble(
                kind,
                nodes,
                planes,
                policy,
                ActiveThreads::default(),
            ))))
        }
        NodeKind::Unary | NodeKind::Binary | NodeKind::Ternary => {
            let planes = nodes
                .iter()
                .map(Node::as_compute)
                .collect::<Result<Vec<_>>>()?;
            let batch = Arc::new(assemble(
                kind,
                nodes,
                planes,
                policy,
                ActiveThreads::default(),
            ));
            Ok(match kind {
                NodeKind::Unary => Node::Unary(batch),
                NodeKind::Binary => Node::Binary(batch),
                _ => Node::Ternary(batch),
            })
        }
        NodeKind::MidWrite | NodeKind::Write => {
            let planes = nodes
                .iter()
                .map(Node::as_write)
                .collect::<Result<Vec<_>>>()?;
            let batch = Arc::new(assemble(
                kind,
                nodes,
                planes,
                policy,
                ActiveThreads::default(),
            ));
            Ok(if kind == NodeKind::Write {
                Node::Write(batch)
            } else {
                Node::MidWrite(batch)
            })
        }
    }
}

fn assemble<Op: ?Sized>(
    kind: NodeKind,
    nodes: Vec<Node>,
    planes: Vec<Arc<Op>>,
    policy: PlanePolicy,
    active: ActiveThreads,
) -> Batch<Op> {
    Batch {
        kind,
        nodes,
        planes,
        policy,
        active,
    }
}
