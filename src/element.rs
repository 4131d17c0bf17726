//! Element descriptors and the lane-based value carried between pipeline steps.
//!
//! Every step of a fused pipeline exchanges a [`Pixel`]: up to [`MAX_LANES`]
//! channel values carried as `f64`. What those lanes *mean* (how many are
//! used, which storage type they round-trip through) is described once, at
//! build time, by an [`ElemType`]. Storage types implement [`Element`], and
//! each channel is kept in the [`Scalar::Cell`] of its own width.

use std::fmt;
use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering,
};

use num_traits::AsPrimitive;

use crate::{FusionError, Result};

/// Maximum number of channels a single element may carry.
pub const MAX_LANES: usize = 4;

/// Scalar storage type of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ScalarType {
    /// Size of one channel in bytes.
    pub const fn size_bytes(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Converts `value` into this scalar type with `as` semantics
    /// (truncation toward zero, saturation at the range limits, NaN to 0)
    /// and widens the result back to `f64`.
    #[inline]
    pub fn coerce(self, value: f64) -> f64 {
        match self {
            ScalarType::U8 => (value as u8) as f64,
            ScalarType::I8 => (value as i8) as f64,
            ScalarType::U16 => (value as u16) as f64,
            ScalarType::I16 => (value as i16) as f64,
            ScalarType::U32 => (value as u32) as f64,
            ScalarType::I32 => (value as i32) as f64,
            ScalarType::F32 => (value as f32) as f64,
            ScalarType::F64 => value,
        }
    }

    /// Like [`coerce`](Self::coerce), but rounds to the nearest integer first
    /// when the target is an integer type.
    #[inline]
    pub fn saturate(self, value: f64) -> f64 {
        if self.is_float() {
            self.coerce(value)
        } else {
            self.coerce(value.round())
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::U8 => "u8",
            ScalarType::I8 => "i8",
            ScalarType::U16 => "u16",
            ScalarType::I16 => "i16",
            ScalarType::U32 => "u32",
            ScalarType::I32 => "i32",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A concrete element type: scalar type plus channel count (1..=4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElemType {
    scalar: ScalarType,
    channels: u8,
}

impl ElemType {
    pub const fn new(scalar: ScalarType, channels: u8) -> Self {
        Self { scalar, channels }
    }

    pub const fn scalar(self) -> ScalarType {
        self.scalar
    }

    pub const fn channels(self) -> usize {
        self.channels as usize
    }

    pub const fn size_bytes(self) -> usize {
        self.scalar.size_bytes() * self.channels as usize
    }

    /// Same channel count, different scalar type.
    pub const fn with_scalar(self, scalar: ScalarType) -> Self {
        Self::new(scalar, self.channels)
    }

    /// Coerces the used lanes of `pixel` to this type and clears the rest.
    #[inline]
    pub fn coerce(self, pixel: Pixel) -> Pixel {
        let mut lanes = [0.0; MAX_LANES];
        for (out, &v) in lanes.iter_mut().zip(&pixel.0).take(self.channels()) {
            *out = self.scalar.coerce(v);
        }
        Pixel(lanes)
    }

    /// Saturating, rounding conversion of the used lanes of `pixel`.
    #[inline]
    pub fn saturate(self, pixel: Pixel) -> Pixel {
        let mut lanes = [0.0; MAX_LANES];
        for (out, &v) in lanes.iter_mut().zip(&pixel.0).take(self.channels()) {
            *out = self.scalar.saturate(v);
        }
        Pixel(lanes)
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.channels == 1 {
            write!(f, "{}", self.scalar)
        } else {
            write!(f, "{}x{}", self.scalar, self.channels)
        }
    }
}

/// Marker for a facet a node does not have (no parameters, no back operation).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NullType;

/// Data type facet of a node; `Null` is the explicit absence marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Null,
    Elem(ElemType),
}

impl DataType {
    pub const fn is_null(self) -> bool {
        matches!(self, DataType::Null)
    }

    pub const fn elem(self) -> Option<ElemType> {
        match self {
            DataType::Null => None,
            DataType::Elem(e) => Some(e),
        }
    }
}

impl From<ElemType> for DataType {
    fn from(e: ElemType) -> Self {
        DataType::Elem(e)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Null => f.write_str("NullType"),
            DataType::Elem(e) => e.fmt(f),
        }
    }
}

/// Value exchanged between pipeline steps.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Pixel(pub [f64; MAX_LANES]);

impl Pixel {
    pub const ZERO: Pixel = Pixel([0.0; MAX_LANES]);

    pub const fn new(lanes: [f64; MAX_LANES]) -> Self {
        Pixel(lanes)
    }

    /// Builds a pixel from up to [`MAX_LANES`] leading values.
    pub fn from_slice(values: &[f64]) -> Self {
        let mut lanes = [0.0; MAX_LANES];
        for (l, &v) in lanes.iter_mut().zip(values) {
            *l = v;
        }
        Pixel(lanes)
    }

    #[inline]
    pub fn lane(&self, i: usize) -> f64 {
        self.0[i]
    }

    /// Applies `f` lane by lane on the first `channels` lanes; the others are zero.
    #[inline]
    pub fn zip_with(self, other: Pixel, channels: usize, f: impl Fn(f64, f64) -> f64) -> Pixel {
        let mut lanes = [0.0; MAX_LANES];
        for (i, out) in lanes.iter_mut().enumerate().take(channels) {
            *out = f(self.0[i], other.0[i]);
        }
        Pixel(lanes)
    }

    /// `self * w` on the first `channels` lanes.
    #[inline]
    pub fn scaled(self, w: f64, channels: usize) -> Pixel {
        self.zip_with(Pixel::ZERO, channels, |a, _| a * w)
    }

    /// Lane-wise sum on the first `channels` lanes.
    #[inline]
    pub fn plus(self, other: Pixel, channels: usize) -> Pixel {
        self.zip_with(other, channels, |a, b| a + b)
    }
}

/// A pixel tagged with the element type it is expressed in.
///
/// Used wherever a value is supplied at build time rather than computed:
/// batch default values and constant borders.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TypedPixel {
    pub ty: ElemType,
    pub pixel: Pixel,
}

impl TypedPixel {
    pub fn new<T: Element>(value: T) -> Self {
        Self {
            ty: T::TYPE,
            pixel: value.to_pixel(),
        }
    }

    /// Reinterprets the value channel-wise as `target`.
    pub fn cast_to(&self, target: ElemType) -> Result<TypedPixel> {
        if self.ty == target {
            return Ok(*self);
        }
        if self.ty.channels() != target.channels() {
            return Err(FusionError::ChannelMismatch {
                from: self.ty,
                to: target,
            });
        }
        Ok(TypedPixel {
            ty: target,
            pixel: target.coerce(self.pixel),
        })
    }
}

/// One channel of storage, kept in a lock-free cell of the same width.
///
/// Cells are accessed with relaxed ordering: execution units touch
/// disjoint cells, and a dispatch completes before the host reads back.
pub trait Scalar: Copy + Default + fmt::Debug + Send + Sync + 'static {
    type Cell: Send + Sync;

    const SCALAR: ScalarType;

    fn cell(value: Self) -> Self::Cell;

    fn load(cell: &Self::Cell) -> Self;

    fn store(cell: &Self::Cell, value: Self);
}

macro_rules! impl_int_scalar {
    ($($t:ty => $s:ident, $cell:ty);* $(;)?) => {$(
        impl Scalar for $t {
            type Cell = $cell;

            const SCALAR: ScalarType = ScalarType::$s;

            fn cell(value: Self) -> $cell {
                <$cell>::new(value)
            }

            #[inline]
            fn load(cell: &$cell) -> Self {
                cell.load(Ordering::Relaxed)
            }

            #[inline]
            fn store(cell: &$cell, value: Self) {
                cell.store(value, Ordering::Relaxed)
            }
        }
    )*};
}

impl_int_scalar!(
    u8 => U8, AtomicU8;
    i8 => I8, AtomicI8;
    u16 => U16, AtomicU16;
    i16 => I16, AtomicI16;
    u32 => U32, AtomicU32;
    i32 => I32, AtomicI32;
);

impl Scalar for f32 {
    type Cell = AtomicU32;

    const SCALAR: ScalarType = ScalarType::F32;

    fn cell(value: Self) -> AtomicU32 {
        AtomicU32::new(value.to_bits())
    }

    #[inline]
    fn load(cell: &AtomicU32) -> Self {
        f32::from_bits(cell.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(cell: &AtomicU32, value: Self) {
        cell.store(value.to_bits(), Ordering::Relaxed)
    }
}

impl Scalar for f64 {
    type Cell = AtomicU64;

    const SCALAR: ScalarType = ScalarType::F64;

    fn cell(value: Self) -> AtomicU64 {
        AtomicU64::new(value.to_bits())
    }

    #[inline]
    fn load(cell: &AtomicU64) -> Self {
        f64::from_bits(cell.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(cell: &AtomicU64, value: Self) {
        cell.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// Storage cell of one channel of `T`.
pub type CellOf<T> = <<T as Element>::Scalar as Scalar>::Cell;

/// Storage element: a scalar or a small fixed array of scalars.
pub trait Element: Copy + Default + fmt::Debug + Send + Sync + 'static {
    type Scalar: Scalar;

    const TYPE: ElemType;

    fn to_pixel(self) -> Pixel;

    fn from_pixel(pixel: Pixel) -> Self;

    /// Reads one element from its `TYPE.channels()` cells.
    fn load_cells(cells: &[CellOf<Self>]) -> Self;

    /// Stores one element into its `TYPE.channels()` cells.
    fn store_cells(self, cells: &[CellOf<Self>]);
}

macro_rules! impl_element {
    (@array $t:ty, $n:literal) => {
        impl Element for [$t; $n] {
            type Scalar = $t;

            const TYPE: ElemType = ElemType::new(<$t as Scalar>::SCALAR, $n);

            #[inline]
            fn to_pixel(self) -> Pixel {
                let mut lanes = [0.0; MAX_LANES];
                for (l, v) in lanes.iter_mut().zip(self) {
                    *l = v.as_();
                }
                Pixel(lanes)
            }

            #[inline]
            fn from_pixel(pixel: Pixel) -> Self {
                let mut out = [<$t>::default(); $n];
                for (o, &l) in out.iter_mut().zip(&pixel.0) {
                    *o = l.as_();
                }
                out
            }

            #[inline]
            fn load_cells(cells: &[CellOf<Self>]) -> Self {
                let mut out = [<$t>::default(); $n];
                for (o, cell) in out.iter_mut().zip(cells) {
                    *o = <$t as Scalar>::load(cell);
                }
                out
            }

            #[inline]
            fn store_cells(self, cells: &[CellOf<Self>]) {
                for (v, cell) in self.into_iter().zip(cells) {
                    <$t as Scalar>::store(cell, v);
                }
            }
        }
    };
    ($($t:ty),* $(,)?) => {$(
        impl Element for $t {
            type Scalar = $t;

            const TYPE: ElemType = ElemType::new(<$t as Scalar>::SCALAR, 1);

            #[inline]
            fn to_pixel(self) -> Pixel {
                Pixel([self.as_(), 0.0, 0.0, 0.0])
            }

            #[inline]
            fn from_pixel(pixel: Pixel) -> Self {
                pixel.0[0].as_()
            }

            #[inline]
            fn load_cells(cells: &[CellOf<Self>]) -> Self {
                <$t as Scalar>::load(&cells[0])
            }

            #[inline]
            fn store_cells(self, cells: &[CellOf<Self>]) {
                <$t as Scalar>::store(&cells[0], self)
            }
        }
        impl_element!(@array $t, 2);
        impl_element!(@array $t, 3);
        impl_element!(@array $t, 4);
    )*};
}

impl_element!(u8, i8, u16, i16, u32, i32, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_coerce_saturates_and_truncates() {
        assert_eq!(ScalarType::U8.coerce(300.0), 255.0);
        assert_eq!(ScalarType::U8.coerce(-4.0), 0.0);
        assert_eq!(ScalarType::U8.coerce(2.9), 2.0);
        assert_eq!(ScalarType::I8.coerce(-200.0), -128.0);
        assert_eq!(ScalarType::F32.coerce(0.1), 0.1f32 as f64);
    }

    #[test]
    fn test_saturate_rounds_to_nearest() {
        assert_eq!(ScalarType::U8.saturate(2.6), 3.0);
        assert_eq!(ScalarType::U8.saturate(254.7), 255.0);
        assert_eq!(ScalarType::I16.saturate(-1.4), -1.0);
        assert_eq!(ScalarType::F64.saturate(2.6), 2.6);
    }

    #[test]
    fn test_elem_type_sizes_and_display() {
        assert_eq!(<[f32; 2]>::TYPE.size_bytes(), 8);
        assert_eq!(u8::TYPE.size_bytes(), 1);
        assert_eq!(<[u8; 3]>::TYPE.channels(), 3);
        assert_eq!(<[f32; 2]>::TYPE.to_string(), "f32x2");
        assert_eq!(DataType::Null.to_string(), "NullType");
    }

    #[test]
    fn test_element_pixel_conversion() {
        let v = [1.5f32, -2.0];
        let px = v.to_pixel();
        assert_eq!(px, Pixel::new([1.5, -2.0, 0.0, 0.0]));
        assert_eq!(<[f32; 2]>::from_pixel(px), v);
        assert_eq!(u8::from_pixel(Pixel::new([260.0, 0.0, 0.0, 0.0])), 255);
    }

    #[test]
    fn test_coerce_clears_unused_lanes() {
        let px = Pixel::new([1.7, 2.2, 9.0, 9.0]);
        let out = <[u8; 2]>::TYPE.coerce(px);
        assert_eq!(out, Pixel::new([1.0, 2.0, 0.0, 0.0]));
    }

    #[test]
    fn test_typed_pixel_cast_channelwise() {
        let v = TypedPixel::new([3.7f32, 300.0]);
        let cast = v.cast_to(<[u8; 2]>::TYPE).unwrap();
        assert_eq!(cast.ty, <[u8; 2]>::TYPE);
        assert_eq!(cast.pixel, Pixel::new([3.0, 255.0, 0.0, 0.0]));
    }

    #[test]
    fn test_cells_round_trip_at_native_width() {
        let cells: Vec<CellOf<[i16; 3]>> = (0..3).map(|_| i16::cell(0)).collect();
        [-7i16, 300, 12].store_cells(&cells);
        assert_eq!(<[i16; 3]>::load_cells(&cells), [-7, 300, 12]);
        assert_eq!(std::mem::size_of::<CellOf<u8>>(), 1);
        assert_eq!(std::mem::size_of::<CellOf<[f32; 2]>>(), 4);
    }

    #[test]
    fn test_typed_pixel_cast_channel_mismatch() {
        let v = TypedPixel::new(1.0f32);
        let err = v.cast_to(<[f32; 3]>::TYPE).unwrap_err();
        assert!(matches!(err, FusionError::ChannelMismatch { .. }));
    }
}
