//! Resizing with bilinear interpolation.
//!
//! [`Resize`] stretches the back read to the destination size.
//! [`ResizeKeepAspect`] scales it to fit inside the destination with the
//! source aspect ratio, filling the uncovered border with a background
//! value. Both complete into a [`ResizeComplete`] whose back operation is
//! an [`Interpolate`] node bound to the original read.
//!
//! Values come out as `f32` with the channel count of the source.

use std::sync::Arc;

use crate::element::{DataType, ElemType, Pixel, ScalarType, TypedPixel};
use crate::node::Node;
use crate::operation::{
    ComputeOperation, IncompleteReadBackBehavior, ReadBackBehavior, ReadOperation,
    TernaryBehavior,
};
use crate::point::{ActiveThreads, Point, Rect, Size};
use crate::{FusionError, Result};

/// Interpolation kernels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InterpolationType {
    #[default]
    Linear,
}

/// How [`ResizeKeepAspect`] places the scaled image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AspectRatio {
    /// Centered.
    #[default]
    Preserve,
    /// Centered, with the scaled extent rounded down to an even size.
    PreserveEven,
    /// Against the left edge, centered vertically.
    PreserveLeft,
}

/// Parameters of [`ResizeKeepAspect`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeepAspectParams {
    pub dst: Size,
    pub mode: AspectRatio,
    /// Value of the destination outside the scaled image; cast to the
    /// interpolated output type on completion.
    pub background: TypedPixel,
}

/// Resize to a fixed destination size, ignoring the aspect ratio.
pub struct Resize;

impl IncompleteReadBackBehavior for Resize {
    type Params = Size;

    const NAME: &'static str = "Resize";

    fn complete(dst: &Size, back: &Node) -> Result<Node> {
        let back = back.as_complete_read()?;
        checked_extents(*dst, back.num_elems(0))?;
        let params = ResizeParams::new(*dst, *dst, Rect::new(0, 0, dst.width, dst.height), &back);
        ResizeComplete::build(params, interpolator(back)?)
    }
}

/// Resize that keeps the source aspect ratio.
pub struct ResizeKeepAspect;

impl IncompleteReadBackBehavior for ResizeKeepAspect {
    type Params = KeepAspectParams;

    const NAME: &'static str = "Resize";

    fn complete(params: &KeepAspectParams, back: &Node) -> Result<Node> {
        let back = back.as_complete_read()?;
        let dst = params.dst;
        let src = checked_extents(dst, back.num_elems(0))?;
        let target = target_size(src, dst, params.mode);
        let x = match params.mode {
            AspectRatio::PreserveLeft => 0,
            _ => dst.width.saturating_sub(target.width) / 2,
        };
        let y = dst.height.saturating_sub(target.height) / 2;

        let interp = interpolator(back.clone())?;
        let background = match interp.signature().output {
            DataType::Elem(out) => params.background.cast_to(out)?,
            DataType::Null => params.background,
        };
        let mut resize = ResizeParams::new(dst, target, Rect::new(x, y, target.width, target.height), &back);
        resize.background = Some(background.pixel);
        ResizeComplete::build(resize, interp)
    }
}

fn checked_extents(dst: Size, src: Size) -> Result<Size> {
    if dst.width == 0 || dst.height == 0 {
        return Err(FusionError::ZeroExtent("resize destination size"));
    }
    if src.width == 0 || src.height == 0 {
        return Err(FusionError::ZeroExtent("resize source size"));
    }
    Ok(src)
}

fn interpolator(back: Arc<dyn ReadOperation>) -> Result<Arc<dyn ComputeOperation>> {
    Interpolate::build(InterpolationType::Linear, back)?.as_compute()
}

/// Size of the scaled image inside `dst`: full height first, full width
/// if that overflows.
fn target_size(src: Size, dst: Size, mode: AspectRatio) -> Size {
    let even = mode == AspectRatio::PreserveEven;
    let round_even = |v: u32| if even { v - v % 2 } else { v };

    let scale = dst.height as f32 / src.height as f32;
    let width = round_even((scale * src.width as f32).round() as u32);
    if width > dst.width {
        let scale = dst.width as f32 / src.width as f32;
        let height = round_even((scale * src.height as f32).round() as u32);
        Size::new(dst.width, height.max(1))
    } else {
        Size::new(width.max(1), dst.height)
    }
}

/// Parameters of a completed resize.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResizeParams {
    pub dst: Size,
    /// Source units per destination unit.
    pub fx: f32,
    pub fy: f32,
    /// Area of the destination covered by the scaled image.
    pub roi: Rect,
    /// Value outside `roi`, already in the output type.
    pub background: Option<Pixel>,
    read_data: DataType,
    planes: u32,
}

impl ResizeParams {
    fn new(dst: Size, target: Size, roi: Rect, back: &Arc<dyn ReadOperation>) -> Self {
        let src = back.num_elems(0);
        Self {
            dst,
            fx: src.width as f32 / target.width as f32,
            fy: src.height as f32 / target.height as f32,
            roi,
            background: None,
            read_data: back.signature().output,
            planes: back.active_threads().z,
        }
    }
}

/// Maps each destination coordinate to a source position and hands it to
/// the interpolator.
pub struct ResizeComplete;

impl ReadBackBehavior for ResizeComplete {
    type Params = ResizeParams;
    type Back = Arc<dyn ComputeOperation>;

    const NAME: &'static str = "Resize";

    fn read_data_type(params: &ResizeParams, _: &Self::Back) -> DataType {
        params.read_data
    }

    fn output_type(_: &ResizeParams, back: &Self::Back) -> DataType {
        back.signature().output
    }

    fn num_elems(params: &ResizeParams, _: &Self::Back, _plane: u32) -> Size {
        params.dst
    }

    fn active_threads(params: &ResizeParams, _: &Self::Back) -> ActiveThreads {
        ActiveThreads::from_size(params.dst, params.planes)
    }

    #[inline]
    fn exec(point: Point, params: &ResizeParams, back: &Self::Back) -> Pixel {
        let roi = params.roi;
        if let Some(background) = params.background {
            let inside = point.x >= roi.x
                && point.x < roi.x + roi.width
                && point.y >= roi.y
                && point.y < roi.y + roi.height;
            if !inside {
                return background;
            }
        }
        let sx = (point.x - roi.x) as f32 * params.fx;
        let sy = (point.y - roi.y) as f32 * params.fy;
        back.exec(point, Pixel::new([sx as f64, sy as f64, 0.0, 0.0]))
    }
}

/// Samples the back read at a fractional `(x, y)` position.
///
/// Neighbours past the last row or column are clamped to it.
pub struct Interpolate;

impl TernaryBehavior for Interpolate {
    type Params = InterpolationType;
    type Back = Arc<dyn ReadOperation>;

    const NAME: &'static str = "Interpolate";

    fn input_type(_: &InterpolationType, _: &Self::Back) -> DataType {
        ElemType::new(ScalarType::F32, 2).into()
    }

    fn output_type(_: &InterpolationType, back: &Self::Back) -> DataType {
        match back.signature().output {
            DataType::Elem(e) => e.with_scalar(ScalarType::F32).into(),
            DataType::Null => DataType::Null,
        }
    }

    #[inline]
    fn exec(point: Point, input: Pixel, _: &InterpolationType, back: &Self::Back) -> Pixel {
        let out = match Self::output_type(&InterpolationType::Linear, back) {
            DataType::Elem(e) => e,
            DataType::Null => return Pixel::ZERO,
        };
        let channels = out.channels();
        let (sx, sy) = (input.lane(0), input.lane(1));
        let size = back.num_elems(point.z);
        let last_x = size.width.saturating_sub(1);
        let last_y = size.height.saturating_sub(1);

        let x1 = sx.floor();
        let y1 = sy.floor();
        let x2 = x1 + 1.0;
        let y2 = y1 + 1.0;
        let col = |v: f64| (v.max(0.0) as u32).min(last_x);
        let row = |v: f64| (v.max(0.0) as u32).min(last_y);
        let read = |x: f64, y: f64| back.exec(Point::new(col(x), row(y), point.z));

        let value = read(x1, y1)
            .scaled((x2 - sx) * (y2 - sy), channels)
            .plus(read(x2, y1).scaled((sx - x1) * (y2 - sy), channels), channels)
            .plus(read(x1, y2).scaled((x2 - sx) * (sy - y1), channels), channels)
            .plus(read(x2, y2).scaled((sx - x1) * (sy - y1), channels), channels);
        out.coerce(value)
    }
}
