//! Leaf operations.
//!
//! Each type here is a behavior: implement the matching behavior trait and
//! call its `build` to get a [`Node`](crate::Node).
//!
//! | Operation | Kind |
//! |-----------|------|
//! | [`PerThreadRead`] | Read |
//! | [`PerThreadWrite`] | Write / MidWrite |
//! | [`Crop`], [`Resize`], [`ResizeKeepAspect`], [`BorderReader`] | IncompleteReadBack |
//! | [`CropComplete`], [`ResizeComplete`], [`BorderComplete`] | ReadBack |
//! | [`Interpolate`] | Ternary |
//! | [`Add`], [`Sub`], [`Mul`], [`Div`] | Binary |
//! | [`Cast`], [`SaturateCast`] | Unary |

mod arithmetic;
mod border;
mod cast;
mod crop;
mod memory;
mod resize;

pub use arithmetic::{Add, Div, Mul, Sub};
pub use border::{BorderComplete, BorderParams, BorderReader, BorderType};
pub use cast::{Cast, SaturateCast};
pub use crop::{Crop, CropComplete};
pub use memory::{
    CircularRead, CircularReadParams, CircularWrite, CircularWriteParams, PerThreadRead,
    PerThreadWrite,
};
pub use resize::{
    AspectRatio, Interpolate, InterpolationType, KeepAspectParams, Resize, ResizeComplete,
    ResizeKeepAspect, ResizeParams,
};
