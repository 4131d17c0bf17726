//! Node kinds and the associated-type facets each kind must declare.
//!
//! Every pipeline node belongs to exactly one [`NodeKind`]. The kind fixes
//! which facets of its [`Signature`] are meaningful; the predicates on
//! [`NodeKind`] let fusion and execution branch on a node's role without
//! knowing what the node computes.

use std::any::{type_name, TypeId};
use std::fmt;

use crate::element::{DataType, NullType};
use crate::{FusionError, Result};

/// The closed set of node kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Produces a value from a coordinate.
    Read,
    /// Produces a value from a coordinate by consulting a nested back operation.
    ReadBack,
    /// A back-reading node whose back operation is not bound yet.
    IncompleteReadBack,
    /// `Input -> Output`, no parameters.
    Unary,
    /// `Input × Params -> Output`.
    Binary,
    /// `Input × Params × BackOperation -> Output`.
    Ternary,
    /// Writes its input and forwards it unchanged.
    MidWrite,
    /// Writes its input and terminates the chain.
    Write,
}

impl NodeKind {
    pub const ALL: [NodeKind; 8] = [
        NodeKind::Read,
        NodeKind::ReadBack,
        NodeKind::IncompleteReadBack,
        NodeKind::Unary,
        NodeKind::Binary,
        NodeKind::Ternary,
        NodeKind::MidWrite,
        NodeKind::Write,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            NodeKind::Read => "Read",
            NodeKind::ReadBack => "ReadBack",
            NodeKind::IncompleteReadBack => "IncompleteReadBack",
            NodeKind::Unary => "Unary",
            NodeKind::Binary => "Binary",
            NodeKind::Ternary => "Ternary",
            NodeKind::MidWrite => "MidWrite",
            NodeKind::Write => "Write",
        }
    }

    pub const fn is_read_type(self) -> bool {
        matches!(self, NodeKind::Read)
    }

    pub const fn is_read_back_type(self) -> bool {
        matches!(self, NodeKind::ReadBack)
    }

    pub const fn is_incomplete_read_back_type(self) -> bool {
        matches!(self, NodeKind::IncompleteReadBack)
    }

    /// Any node that may begin a pipeline.
    pub const fn is_any_read_type(self) -> bool {
        matches!(
            self,
            NodeKind::Read | NodeKind::ReadBack | NodeKind::IncompleteReadBack
        )
    }

    /// A read that has a defined iteration domain.
    pub const fn is_any_complete_read_type(self) -> bool {
        matches!(self, NodeKind::Read | NodeKind::ReadBack)
    }

    pub const fn is_compute_type(self) -> bool {
        matches!(self, NodeKind::Unary | NodeKind::Binary | NodeKind::Ternary)
    }

    pub const fn is_write_type(self) -> bool {
        matches!(self, NodeKind::Write)
    }

    pub const fn is_mid_write_type(self) -> bool {
        matches!(self, NodeKind::MidWrite)
    }

    pub const fn is_any_write_type(self) -> bool {
        matches!(self, NodeKind::Write | NodeKind::MidWrite)
    }

    /// Whether a node of this kind can stand alone as the first step of a
    /// pipeline: every kind except `IncompleteReadBack`.
    pub const fn is_complete_operation(self) -> bool {
        !matches!(self, NodeKind::IncompleteReadBack)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The associated-type facets of a node.
///
/// `params` and `back` name the parameter type and back operation when the
/// node has them, and are `None` (the [`NullType`] facet) otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    pub read_data: DataType,
    pub input: DataType,
    pub params: Option<&'static str>,
    pub back: Option<&'static str>,
    pub output: DataType,
    pub write_data: DataType,
}

impl Signature {
    pub const NULL: Signature = Signature {
        read_data: DataType::Null,
        input: DataType::Null,
        params: None,
        back: None,
        output: DataType::Null,
        write_data: DataType::Null,
    };

    /// Checks the facet invariants of `kind`.
    pub fn validate(&self, kind: NodeKind, name: &'static str) -> Result<()> {
        let fail = |reason: &'static str| {
            Err(FusionError::InvalidSignature { kind, name, reason })
        };
        if kind.is_any_read_type() {
            if !self.input.is_null() {
                return fail("reads produce values from coordinates and take no input");
            }
            if !self.write_data.is_null() {
                return fail("reads have no write data type");
            }
        }
        match kind {
            NodeKind::Read => {
                if self.back.is_some() {
                    return fail("a Read has no back operation");
                }
                if self.output.is_null() || self.read_data.is_null() {
                    return fail("a Read must declare its read data and output types");
                }
            }
            NodeKind::ReadBack => {
                if self.back.is_none() {
                    return fail("a ReadBack needs a back operation");
                }
                if self.output.is_null() {
                    return fail("a ReadBack must declare its output type");
                }
            }
            NodeKind::IncompleteReadBack => {
                if self.back.is_some() {
                    return fail("an IncompleteReadBack cannot hold a back operation yet");
                }
            }
            NodeKind::Unary | NodeKind::Binary | NodeKind::Ternary => {
                if self.input.is_null() || self.output.is_null() {
                    return fail("compute operations map an input type to an output type");
                }
                match (kind, self.params.is_some(), self.back.is_some()) {
                    (NodeKind::Unary, false, false)
                    | (NodeKind::Binary, true, false)
                    | (NodeKind::Ternary, true, true) => {}
                    (NodeKind::Unary, _, _) => {
                        return fail("a Unary never carries parameters or a back operation")
                    }
                    (NodeKind::Binary, _, _) => {
                        return fail("a Binary carries parameters and no back operation")
                    }
                    _ => return fail("a Ternary carries parameters and a back operation"),
                }
            }
            NodeKind::MidWrite | NodeKind::Write => {
                if self.input.is_null() || self.write_data.is_null() {
                    return fail("writes must declare their input and write data types");
                }
                if self.params.is_none() {
                    return fail("writes carry the destination as parameters");
                }
                if kind == NodeKind::Write && !self.output.is_null() {
                    return fail("a Write produces no output");
                }
                if kind == NodeKind::MidWrite && self.output != self.input {
                    return fail("a MidWrite forwards its input unchanged");
                }
            }
        }
        Ok(())
    }
}

/// Name of a parameter or back-operation type, `None` for [`NullType`].
pub(crate) fn facet_name<P: 'static>() -> Option<&'static str> {
    if TypeId::of::<P>() == TypeId::of::<NullType>() {
        None
    } else {
        Some(type_name::<P>())
    }
}
