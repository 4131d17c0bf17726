//! Behavior traits for leaf operations and their erased runtime interfaces.
//!
//! A leaf operation is a zero-sized behavior type implementing one of the
//! per-kind behavior traits ([`ReadBehavior`], [`BinaryBehavior`], ...). The
//! behavior supplies static functions over its `Params`; calling the provided
//! `build` binds concrete parameters and returns a [`Node`].
//!
//! Internally each kind has one generic instance type holding the bound
//! parameters (and back operation). The instances implement the erased
//! interfaces ([`ReadOperation`], [`ComputeOperation`], ...) that fusion,
//! batching and execution work against, so per-kind plumbing exists once
//! per kind rather than once per leaf.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::batch::BatchInfo;
use crate::element::{DataType, Pixel};
use crate::kind::{facet_name, NodeKind, Signature};
use crate::node::Node;
use crate::point::{ActiveThreads, Point, Size, WriteExtent};
use crate::{FusionError, Result};

/// Values produced by one thread-fused execution unit.
pub type FusedLanes = SmallVec<[Pixel; 4]>;

// ============================================================================
// Erased interfaces
// ============================================================================

/// What every bound operation exposes regardless of its kind.
pub trait Describe: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn signature(&self) -> Signature;

    /// Identity of the behavior type, used to keep batches homogeneous.
    fn behavior_id(&self) -> TypeId;

    /// Behavior path of the bound back operation, if any.
    fn back_path(&self) -> Vec<TypeId> {
        Vec::new()
    }

    /// The flattened steps of a fused operation.
    fn fused_steps(&self) -> Option<&[Node]> {
        None
    }

    /// Per-plane storage of a batch operation.
    fn batch(&self) -> Option<BatchInfo<'_>> {
        None
    }
}

/// A complete read: produces a value from a coordinate.
pub trait ReadOperation: Describe {
    fn exec(&self, point: Point) -> Pixel;

    /// Extents of plane `plane`.
    fn num_elems(&self, plane: u32) -> Size;

    fn active_threads(&self) -> ActiveThreads;

    /// Whether this read may serve several logical elements per unit.
    fn thread_fusion(&self) -> bool {
        false
    }

    /// Reads `elems` consecutive logical elements for the execution unit at
    /// `unit`, i.e. `x` in `unit.x * elems .. (unit.x + 1) * elems`.
    fn exec_fused(&self, unit: Point, elems: u32, out: &mut FusedLanes) {
        let base = unit.x * elems;
        for i in 0..elems {
            out.push(self.exec(Point::new(base + i, unit.y, unit.z)));
        }
    }
}

/// A read that still needs its back operation.
pub trait IncompleteOperation: Describe {
    /// Binds `back` and returns the completed node.
    fn complete(&self, back: &Node) -> Result<Node>;
}

/// Unary, Binary and Ternary operations.
pub trait ComputeOperation: Describe {
    fn exec(&self, point: Point, input: Pixel) -> Pixel;
}

/// Write and MidWrite operations.
pub trait WriteOperation: Describe {
    /// Writes `input` at `point` and returns the value forwarded to the
    /// next step.
    fn exec(&self, point: Point, input: Pixel) -> Pixel;

    fn thread_fusion(&self) -> bool {
        false
    }

    /// Region this write can store into; `None` accepts any coordinate.
    fn extent(&self) -> Option<WriteExtent> {
        None
    }

    /// Writes the values of one thread-fused execution unit.
    fn exec_fused(&self, unit: Point, values: &[Pixel]) {
        let base = unit.x * values.len() as u32;
        for (i, v) in values.iter().enumerate() {
            self.exec(Point::new(base + i as u32, unit.y, unit.z), *v);
        }
    }
}

/// A nested, fully bound sub-pipeline held by ReadBack and Ternary nodes.
pub trait BackOperation: Clone + fmt::Debug + Send + Sync + 'static {
    fn back_name(&self) -> &'static str;

    fn back_path(&self) -> Vec<TypeId>;
}

impl BackOperation for Arc<dyn ReadOperation> {
    fn back_name(&self) -> &'static str {
        self.name()
    }

    fn back_path(&self) -> Vec<TypeId> {
        behavior_path(&**self)
    }
}

impl BackOperation for Arc<dyn ComputeOperation> {
    fn back_name(&self) -> &'static str {
        self.name()
    }

    fn back_path(&self) -> Vec<TypeId> {
        behavior_path(&**self)
    }
}

/// Behavior identities of `op` in execution order. A fused sequence
/// contributes its leaves; a leaf is followed by its back operation's path.
pub(crate) fn behavior_path<O: Describe + ?Sized>(op: &O) -> Vec<TypeId> {
    match op.fused_steps() {
        Some(nodes) => nodes.iter().flat_map(Node::behavior_path).collect(),
        None => {
            let mut path = vec![op.behavior_id()];
            path.extend(op.back_path());
            path
        }
    }
}

fn validated<O: Describe>(kind: NodeKind, op: O) -> Result<O> {
    op.signature().validate(kind, op.name())?;
    Ok(op)
}

// ============================================================================
// Read
// ============================================================================

/// A read driven only by its parameters and the coordinate.
pub trait ReadBehavior: Sized + 'static {
    type Params: Clone + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;

    const THREAD_FUSION: bool = false;

    fn read_data_type(params: &Self::Params) -> DataType;

    fn output_type(params: &Self::Params) -> DataType;

    fn num_elems(params: &Self::Params, plane: u32) -> Size;

    fn active_threads(params: &Self::Params) -> ActiveThreads {
        ActiveThreads::from_size(Self::num_elems(params, 0), 1)
    }

    fn exec(point: Point, params: &Self::Params) -> Pixel;

    /// Reads `elems` consecutive elements along `x` starting at `point`.
    fn exec_run(point: Point, elems: u32, params: &Self::Params, out: &mut FusedLanes) {
        for i in 0..elems {
            out.push(Self::exec(Point::new(point.x + i, point.y, point.z), params));
        }
    }

    fn build(params: Self::Params) -> Result<Node> {
        let op = validated(NodeKind::Read, ReadInstance::<Self> { params })?;
        Ok(Node::Read(Arc::new(op)))
    }
}

pub(crate) struct ReadInstance<B: ReadBehavior> {
    params: B::Params,
}

impl<B: ReadBehavior> fmt::Debug for ReadInstance<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(B::NAME).field("params", &self.params).finish()
    }
}

impl<B: ReadBehavior> Describe for ReadInstance<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn signature(&self) -> Signature {
        Signature {
            read_data: B::read_data_type(&self.params),
            params: facet_name::<B::Params>(),
            output: B::output_type(&self.params),
            ..Signature::NULL
        }
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<B>()
    }
}

impl<B: ReadBehavior> ReadOperation for ReadInstance<B> {
    #[inline]
    fn exec(&self, point: Point) -> Pixel {
        B::exec(point, &self.params)
    }

    fn num_elems(&self, plane: u32) -> Size {
        B::num_elems(&self.params, plane)
    }

    fn active_threads(&self) -> ActiveThreads {
        B::active_threads(&self.params)
    }

    fn thread_fusion(&self) -> bool {
        B::THREAD_FUSION
    }

    fn exec_fused(&self, unit: Point, elems: u32, out: &mut FusedLanes) {
        let start = Point::new(unit.x * elems, unit.y, unit.z);
        B::exec_run(start, elems, &self.params, out);
    }
}

// ============================================================================
// ReadBack
// ============================================================================

/// A read that produces its value by consulting a back operation.
pub trait ReadBackBehavior: Sized + 'static {
    type Params: Clone + fmt::Debug + Send + Sync + 'static;
    type Back: BackOperation;

    const NAME: &'static str;

    fn read_data_type(params: &Self::Params, back: &Self::Back) -> DataType;

    fn output_type(params: &Self::Params, back: &Self::Back) -> DataType;

    fn num_elems(params: &Self::Params, back: &Self::Back, plane: u32) -> Size;

    fn active_threads(params: &Self::Params, back: &Self::Back) -> ActiveThreads;

    fn exec(point: Point, params: &Self::Params, back: &Self::Back) -> Pixel;

    fn build(params: Self::Params, back: Self::Back) -> Result<Node> {
        let op = validated(
            NodeKind::ReadBack,
            ReadBackInstance::<Self> { params, back },
        )?;
        Ok(Node::ReadBack(Arc::new(op)))
    }
}

pub(crate) struct ReadBackInstance<B: ReadBackBehavior> {
    params: B::Params,
    back: B::Back,
}

impl<B: ReadBackBehavior> fmt::Debug for ReadBackInstance<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(B::NAME)
            .field("params", &self.params)
            .field("back", &self.back)
            .finish()
    }
}

impl<B: ReadBackBehavior> Describe for ReadBackInstance<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn signature(&self) -> Signature {
        Signature {
            read_data: B::read_data_type(&self.params, &self.back),
            params: facet_name::<B::Params>(),
            back: Some(self.back.back_name()),
            output: B::output_type(&self.params, &self.back),
            ..Signature::NULL
        }
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<B>()
    }

    fn back_path(&self) -> Vec<TypeId> {
        self.back.back_path()
    }
}

impl<B: ReadBackBehavior> ReadOperation for ReadBackInstance<B> {
    #[inline]
    fn exec(&self, point: Point) -> Pixel {
        B::exec(point, &self.params, &self.back)
    }

    fn num_elems(&self, plane: u32) -> Size {
        B::num_elems(&self.params, &self.back, plane)
    }

    fn active_threads(&self) -> ActiveThreads {
        B::active_threads(&self.params, &self.back)
    }
}

// ============================================================================
// IncompleteReadBack
// ============================================================================

/// A back-reading operation bound to its parameters but not yet to a back
/// operation. Continuing a read with it hands that read over as the back
/// operation via [`complete`](Self::complete).
pub trait IncompleteReadBackBehavior: Sized + 'static {
    type Params: Clone + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;

    /// Output type known before completion, if any.
    fn output_type(_params: &Self::Params) -> DataType {
        DataType::Null
    }

    fn complete(params: &Self::Params, back: &Node) -> Result<Node>;

    fn build(params: Self::Params) -> Result<Node> {
        let op = validated(
            NodeKind::IncompleteReadBack,
            IncompleteInstance::<Self> { params },
        )?;
        Ok(Node::IncompleteReadBack(Arc::new(op)))
    }
}

pub(crate) struct IncompleteInstance<B: IncompleteReadBackBehavior> {
    params: B::Params,
}

impl<B: IncompleteReadBackBehavior> fmt::Debug for IncompleteInstance<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(B::NAME).field("params", &self.params).finish()
    }
}

impl<B: IncompleteReadBackBehavior> Describe for IncompleteInstance<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn signature(&self) -> Signature {
        Signature {
            params: facet_name::<B::Params>(),
            output: B::output_type(&self.params),
            ..Signature::NULL
        }
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<B>()
    }
}

impl<B: IncompleteReadBackBehavior> IncompleteOperation for IncompleteInstance<B> {
    fn complete(&self, back: &Node) -> Result<Node> {
        B::complete(&self.params, back)
    }
}

// ============================================================================
// Compute
// ============================================================================

/// `Input -> Output` with no parameters.
pub trait UnaryBehavior: Sized + 'static {
    const NAME: &'static str;

    fn input_type() -> DataType;

    fn output_type() -> DataType;

    fn exec(input: Pixel) -> Pixel;

    /// Build-time checks beyond the facets of the kind.
    fn validate() -> std::result::Result<(), &'static str> {
        Ok(())
    }

    fn build() -> Result<Node> {
        Self::validate().map_err(|reason| FusionError::InvalidSignature {
            kind: NodeKind::Unary,
            name: Self::NAME,
            reason,
        })?;
        let op = validated(
            NodeKind::Unary,
            UnaryInstance::<Self> {
                _marker: PhantomData,
            },
        )?;
        Ok(Node::Unary(Arc::new(op)))
    }
}

pub(crate) struct UnaryInstance<B: UnaryBehavior> {
    _marker: PhantomData<fn() -> B>,
}

impl<B: UnaryBehavior> fmt::Debug for UnaryInstance<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(B::NAME)
    }
}

impl<B: UnaryBehavior> Describe for UnaryInstance<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn signature(&self) -> Signature {
        Signature {
            input: B::input_type(),
            output: B::output_type(),
            ..Signature::NULL
        }
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<B>()
    }
}

impl<B: UnaryBehavior> ComputeOperation for UnaryInstance<B> {
    #[inline]
    fn exec(&self, _point: Point, input: Pixel) -> Pixel {
        B::exec(input)
    }
}

/// `Input × Params -> Output`.
pub trait BinaryBehavior: Sized + 'static {
    type Params: Clone + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;

    fn input_type(params: &Self::Params) -> DataType;

    fn output_type(params: &Self::Params) -> DataType;

    fn exec(input: Pixel, params: &Self::Params) -> Pixel;

    fn build(params: Self::Params) -> Result<Node> {
        let op = validated(NodeKind::Binary, BinaryInstance::<Self> { params })?;
        Ok(Node::Binary(Arc::new(op)))
    }
}

pub(crate) struct BinaryInstance<B: BinaryBehavior> {
    params: B::Params,
}

impl<B: BinaryBehavior> fmt::Debug for BinaryInstance<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(B::NAME).field("params", &self.params).finish()
    }
}

impl<B: BinaryBehavior> Describe for BinaryInstance<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn signature(&self) -> Signature {
        Signature {
            input: B::input_type(&self.params),
            params: facet_name::<B::Params>(),
            output: B::output_type(&self.params),
            ..Signature::NULL
        }
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<B>()
    }
}

impl<B: BinaryBehavior> ComputeOperation for BinaryInstance<B> {
    #[inline]
    fn exec(&self, _point: Point, input: Pixel) -> Pixel {
        B::exec(input, &self.params)
    }
}

/// `Input × Params × BackOperation -> Output`.
///
/// The coordinate is passed along so the back operation can be consulted
/// on the right plane.
pub trait TernaryBehavior: Sized + 'static {
    type Params: Clone + fmt::Debug + Send + Sync + 'static;
    type Back: BackOperation;

    const NAME: &'static str;

    fn input_type(params: &Self::Params, back: &Self::Back) -> DataType;

    fn output_type(params: &Self::Params, back: &Self::Back) -> DataType;

    fn exec(point: Point, input: Pixel, params: &Self::Params, back: &Self::Back) -> Pixel;

    fn build(params: Self::Params, back: Self::Back) -> Result<Node> {
        let op = validated(
            NodeKind::Ternary,
            TernaryInstance::<Self> { params, back },
        )?;
        Ok(Node::Ternary(Arc::new(op)))
    }
}

pub(crate) struct TernaryInstance<B: TernaryBehavior> {
    params: B::Params,
    back: B::Back,
}

impl<B: TernaryBehavior> fmt::Debug for TernaryInstance<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(B::NAME)
            .field("params", &self.params)
            .field("back", &self.back)
            .finish()
    }
}

impl<B: TernaryBehavior> Describe for TernaryInstance<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn signature(&self) -> Signature {
        Signature {
            input: B::input_type(&self.params, &self.back),
            params: facet_name::<B::Params>(),
            back: Some(self.back.back_name()),
            output: B::output_type(&self.params, &self.back),
            ..Signature::NULL
        }
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<B>()
    }

    fn back_path(&self) -> Vec<TypeId> {
        self.back.back_path()
    }
}

impl<B: TernaryBehavior> ComputeOperation for TernaryInstance<B> {
    #[inline]
    fn exec(&self, point: Point, input: Pixel) -> Pixel {
        B::exec(point, input, &self.params, &self.back)
    }
}

// ============================================================================
// Write
// ============================================================================

/// Stores its input at the coordinate.
///
/// The same behavior yields a terminating `Write` through
/// [`build`](Self::build) or a forwarding `MidWrite` through
/// [`build_mid`](Self::build_mid).
pub trait WriteBehavior: Sized + 'static {
    type Params: Clone + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;

    const THREAD_FUSION: bool = false;

    fn input_type(params: &Self::Params) -> DataType;

    fn write_data_type(params: &Self::Params) -> DataType;

    fn exec(point: Point, input: Pixel, params: &Self::Params);

    /// Stores `values` into consecutive elements along `x` starting at
    /// `point`.
    fn exec_run(point: Point, values: &[Pixel], params: &Self::Params) {
        for (i, v) in values.iter().enumerate() {
            Self::exec(Point::new(point.x + i as u32, point.y, point.z), *v, params);
        }
    }

    /// Region the parameters can store into; `None` accepts any coordinate.
    fn extent(_params: &Self::Params) -> Option<WriteExtent> {
        None
    }

    fn build(params: Self::Params) -> Result<Node> {
        let op = validated(
            NodeKind::Write,
            WriteInstance::<Self> { params, mid: false },
        )?;
        Ok(Node::Write(Arc::new(op)))
    }

    fn build_mid(params: Self::Params) -> Result<Node> {
        let op = validated(
            NodeKind::MidWrite,
            WriteInstance::<Self> { params, mid: true },
        )?;
        Ok(Node::MidWrite(Arc::new(op)))
    }
}

pub(crate) struct WriteInstance<B: WriteBehavior> {
    params: B::Params,
    mid: bool,
}

impl<B: WriteBehavior> fmt::Debug for WriteInstance<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(B::NAME)
            .field("params", &self.params)
            .field("mid", &self.mid)
            .finish()
    }
}

impl<B: WriteBehavior> Describe for WriteInstance<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn signature(&self) -> Signature {
        let input = B::input_type(&self.params);
        Signature {
            input,
            params: facet_name::<B::Params>(),
            output: if self.mid { input } else { DataType::Null },
            write_data: B::write_data_type(&self.params),
            ..Signature::NULL
        }
    }

    fn behavior_id(&self) -> TypeId {
        TypeId::of::<B>()
    }
}

impl<B: WriteBehavior> WriteOperation for WriteInstance<B> {
    #[inline]
    fn exec(&self, point: Point, input: Pixel) -> Pixel {
        B::exec(point, input, &self.params);
        input
    }

    fn thread_fusion(&self) -> bool {
        B::THREAD_FUSION
    }

    fn extent(&self) -> Option<WriteExtent> {
        B::extent(&self.params)
    }

    fn exec_fused(&self, unit: Point, values: &[Pixel]) {
        let start = Point::new(unit.x * values.len() as u32, unit.y, unit.z);
        B::exec_run(start, values, &self.params);
    }
}
