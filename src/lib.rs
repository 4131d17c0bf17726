//! Declarative read/compute/write pipelines fused into a single pass.
//!
//! A pipeline is described as an ordered chain of independent nodes ("read
//! the source", "crop", "resize", "multiply", "write the destination"). The
//! chain is collapsed at construction time into one synthetic node, and the
//! executor walks the iteration domain once, threading every value through
//! all steps without intermediate buffers.
//!
//! # Core Types
//!
//! - [`NodeKind`]: the closed taxonomy of node kinds, with the predicates
//!   used to branch on a node's role
//! - [`Node`]: a bound node (behavior plus runtime parameters); [`Node::then`]
//!   is the single entry point into fusion
//! - Behavior traits ([`ReadBehavior`], [`ReadBackBehavior`],
//!   [`IncompleteReadBackBehavior`], [`UnaryBehavior`], [`BinaryBehavior`],
//!   [`TernaryBehavior`], [`WriteBehavior`]): what a leaf operation implements
//!   to take part in composition
//! - [`BatchRead`] / [`BatchWrite`]: turn `N` per-plane pipelines into one
//!   batched node, optionally with a [`PlanePolicy::ConditionalWithDefault`]
//!
//! # Execution
//!
//! - [`Executor::run`]: fuse a chain and run it over its iteration domain,
//!   in parallel (rayon, `parallel` feature) or as a sequential loop nest
//! - [`ThreadFusionInfo`]: several logical elements per execution unit when
//!   the read and write element types allow it
//! - [`DivergentBatchExecutor`]: one of several pipelines per batch plane,
//!   chosen by a [`SequenceSelector`]
//! - [`CircularTensor`]: a ring buffer of planes updated through the
//!   divergent executor
//!
//! # Example
//!
//! ```rust
//! use fused_kernel::ops::{Crop, Mul, PerThreadRead, PerThreadWrite, Resize};
//! use fused_kernel::{
//!     BinaryBehavior, DispatchConfig, Executor, IncompleteReadBackBehavior, ReadBehavior,
//!     Rect, Size, Tensor, WriteBehavior,
//! };
//!
//! let input = Tensor::<[f32; 2]>::from_fn(256, 256, 1, |x, y, _| [x as f32, y as f32]);
//! let output = Tensor::<[f32; 2]>::new_2d(16, 16);
//!
//! let pipeline = PerThreadRead::<[f32; 2]>::build(input)?
//!     .then(&Crop::build(Rect::new(64, 32, 64, 64))?)?
//!     .then(&Resize::build(Size::new(16, 16))?)?
//!     .then(&Mul::<[f32; 2]>::build([3.0, 5.0])?)?;
//!
//! Executor::run(
//!     &DispatchConfig::default(),
//!     &[pipeline, PerThreadWrite::<[f32; 2]>::build(output.clone())?],
//! )?;
//! assert_eq!(output.get(1, 0, 0), [(64.0 + 4.0) * 3.0, 32.0 * 5.0]);
//! # Ok::<(), fused_kernel::FusionError>(())
//! ```

mod batch;
mod circular;
mod divergent;
mod element;
mod executor;
mod fuser;
mod kind;
mod node;
mod operation;
pub mod ops;
mod point;
mod tensor;
mod thread_fusion;
mod threading;

// ============================================================================
// Taxonomy and values
// ============================================================================
pub use element::{
    CellOf, DataType, ElemType, Element, NullType, Pixel, Scalar, ScalarType, TypedPixel,
    MAX_LANES,
};
pub use kind::{NodeKind, Signature};
pub use point::{ActiveThreads, Point, Rect, Size, WriteExtent};
pub use tensor::Tensor;

// ============================================================================
// Bound nodes and behaviors
// ============================================================================
pub use node::Node;
pub use operation::{
    BackOperation, BinaryBehavior, ComputeOperation, Describe, FusedLanes,
    IncompleteOperation, IncompleteReadBackBehavior, ReadBackBehavior, ReadBehavior,
    ReadOperation, TernaryBehavior, UnaryBehavior, WriteBehavior, WriteOperation,
};

// ============================================================================
// Fusion and batching
// ============================================================================
pub use batch::{Batch, BatchInfo, BatchRead, BatchWrite, PlanePolicy};
pub use fuser::{FusedRead, FusedSteps};

// ============================================================================
// Execution
// ============================================================================
pub use circular::{CircularTensor, CircularTensorOrder};
pub use divergent::{DivergentBatchExecutor, SequenceSelector};
pub use executor::{BlockShape, DispatchConfig, Executor, Pipeline, Realization};
pub use thread_fusion::ThreadFusionInfo;

// ============================================================================
// Constants
// ============================================================================

/// Default tile shape of the parallel realization.
pub const DEFAULT_BLOCK: BlockShape = BlockShape { x: 32, y: 8 };

/// Minimum number of execution units before the parallel realization splits
/// a region across threads.
pub const MIN_THREAD_LENGTH: u64 = 1 << 15;

/// Upper bound, in bytes, of the data one execution unit reads or writes
/// when thread fusion is enabled.
pub const MAX_FUSED_BYTES: usize = 16;

// ============================================================================
// Error types
// ============================================================================

/// Errors raised while building nodes and pipelines.
///
/// All of them surface at construction time; a pipeline that builds
/// successfully executes without error paths.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// A complete read was used after another node.
    #[error(
        "a {continuation} operation cannot be used as a continuation step (after {previous}); \
         only IncompleteReadBack operations may follow"
    )]
    ReadContinuation {
        previous: NodeKind,
        continuation: NodeKind,
    },

    /// An incomplete read has no iteration domain and cannot be continued.
    #[error(
        "an IncompleteReadBack operation ({name}) cannot be continued by {continuation}: \
         it needs a back operation first"
    )]
    IncompleteHead {
        name: &'static str,
        continuation: NodeKind,
    },

    /// A Write terminates the chain.
    #[error("a Write operation ({name}) terminates the pipeline and cannot be continued by {continuation}")]
    WriteHead {
        name: &'static str,
        continuation: NodeKind,
    },

    /// Producer output and consumer input disagree.
    #[error("{consumer} ({consumer_kind}) expects {expected}, but {producer} ({producer_kind}) produces {found}")]
    TypeMismatch {
        producer: &'static str,
        producer_kind: NodeKind,
        consumer: &'static str,
        consumer_kind: NodeKind,
        expected: DataType,
        found: DataType,
    },

    /// A node of the wrong kind was supplied.
    #[error("{expected} operation required, found {found} ({name})")]
    KindMismatch {
        expected: &'static str,
        found: NodeKind,
        name: &'static str,
    },

    /// Node facets violate the invariants of its kind.
    #[error("invalid {kind} operation {name}: {reason}")]
    InvalidSignature {
        kind: NodeKind,
        name: &'static str,
        reason: &'static str,
    },

    /// Two batches of different sizes were fused.
    #[error("fusing two batch operations of different batch size: {0} vs {1}")]
    BatchSizeMismatch(usize, usize),

    /// A batch was built from no planes.
    #[error("a batch needs at least one plane")]
    EmptyBatch,

    /// Per-plane nodes differ in kind, signature or behavior.
    #[error("heterogeneous batch: plane {plane} ({found}) differs from plane 0 ({expected}) in {facet}")]
    HeterogeneousBatch {
        plane: usize,
        facet: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// `used_planes` exceeds the batch size.
    #[error("used planes {used} exceeds batch size {batch}")]
    UsedPlanesOutOfRange { used: u32, batch: usize },

    /// A value cast between element types with different channel counts.
    #[error("cannot cast {from} to {to}: channel counts differ")]
    ChannelMismatch { from: ElemType, to: ElemType },

    /// A rectangle does not fit in the extents of its source.
    #[error("rectangle {rect:?} does not fit in source of size {size:?}")]
    RectOutOfBounds { rect: Rect, size: Size },

    /// A write cannot hold the iteration domain of the read before it.
    #[error("{name} stores into {extent:?}, which cannot hold the iteration domain {domain:?}")]
    WriteOutOfBounds {
        name: &'static str,
        domain: ActiveThreads,
        extent: WriteExtent,
    },

    /// A pipeline step does not reach every plane of a dispatch.
    #[error("{name} covers {planes} planes, but the dispatch runs {required}")]
    PlaneCountMismatch {
        name: &'static str,
        planes: u32,
        required: u32,
    },

    /// A frame pushed into a ring buffer has the wrong size.
    #[error("frame of size {found:?} does not match ring buffer planes of size {expected:?}")]
    FrameSizeMismatch { expected: Size, found: Size },

    /// An extent that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroExtent(&'static str),

    /// The executor was given no nodes.
    #[error("empty pipeline")]
    EmptyPipeline,

    /// The chain does not begin with a complete read.
    #[error("a pipeline must begin with a Read or ReadBack operation, found {0}")]
    MissingRead(NodeKind),

    /// The chain does not end with a Write.
    #[error("a pipeline must end with a Write operation, found {0}")]
    MissingWrite(NodeKind),
}

/// Result type for node and pipeline construction.
pub type Result<T> = std::result::Result<T, FusionError>;
