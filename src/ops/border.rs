//! Reads past the edges of a source.
//!
//! A border reader widens the domain of its back read by `pad` on every
//! side and maps each coordinate that falls outside the source back inside
//! it according to a [`BorderType`], or yields a constant value.

use std::sync::Arc;

use crate::element::{DataType, Pixel, TypedPixel};
use crate::node::Node;
use crate::operation::{IncompleteReadBackBehavior, ReadBackBehavior, ReadOperation};
use crate::point::{ActiveThreads, Point, Size};
use crate::{FusionError, Result};

/// Out-of-range policy. With a source row `abcdefgh`:
///
/// | Border | Left padding | Right padding |
/// |--------|--------------|---------------|
/// | `Constant(i)` | `iiiiii` | `iiiiii` |
/// | `Replicate` | `aaaaaa` | `hhhhhh` |
/// | `Reflect` | `fedcba` | `hgfedc` |
/// | `Wrap` | `cdefgh` | `abcdef` |
/// | `Reflect101` | `gfedcb` | `gfedcb` |
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BorderType {
    Constant(TypedPixel),
    Replicate,
    Reflect,
    Wrap,
    Reflect101,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BorderParams {
    pub border: BorderType,
    /// Extra elements on each side of the source.
    pub pad: u32,
}

impl BorderParams {
    pub fn new(border: BorderType, pad: u32) -> Self {
        Self { border, pad }
    }
}

/// Border reader awaiting its source.
///
/// A `Constant` value is cast to the source's output type on completion.
pub struct BorderReader;

impl IncompleteReadBackBehavior for BorderReader {
    type Params = BorderParams;

    const NAME: &'static str = "BorderReader";

    fn complete(params: &BorderParams, back: &Node) -> Result<Node> {
        let back = back.as_complete_read()?;
        let size = back.num_elems(0);
        if size.width == 0 || size.height == 0 {
            return Err(FusionError::ZeroExtent("border reader source size"));
        }
        let border = match (params.border, back.signature().output) {
            (BorderType::Constant(value), DataType::Elem(out)) => {
                BorderType::Constant(value.cast_to(out)?)
            }
            (border, _) => border,
        };
        BorderComplete::build(BorderParams::new(border, params.pad), back)
    }
}

/// Border reader bound to its source.
pub struct BorderComplete;

impl ReadBackBehavior for BorderComplete {
    type Params = BorderParams;
    type Back = Arc<dyn ReadOperation>;

    const NAME: &'static str = "BorderReader";

    fn read_data_type(_: &BorderParams, back: &Self::Back) -> DataType {
        back.signature().output
    }

    fn output_type(_: &BorderParams, back: &Self::Back) -> DataType {
        back.signature().output
    }

    fn num_elems(params: &BorderParams, back: &Self::Back, plane: u32) -> Size {
        padded(back.num_elems(plane), params.pad)
    }

    fn active_threads(params: &BorderParams, back: &Self::Back) -> ActiveThreads {
        let active = back.active_threads();
        let size = padded(Size::new(active.x, active.y), params.pad);
        ActiveThreads::from_size(size, active.z)
    }

    #[inline]
    fn exec(point: Point, params: &BorderParams, back: &Self::Back) -> Pixel {
        let size = back.num_elems(point.z);
        let x = point.x as i64 - params.pad as i64;
        let y = point.y as i64 - params.pad as i64;
        let (w, h) = (size.width as i64, size.height as i64);
        if (0..w).contains(&x) && (0..h).contains(&y) {
            return back.exec(Point::new(x as u32, y as u32, point.z));
        }
        let (x, y) = match params.border {
            BorderType::Constant(value) => return value.pixel,
            BorderType::Replicate => (x, y),
            BorderType::Reflect => (reflect(x, w - 1), reflect(y, h - 1)),
            BorderType::Wrap => (wrap(x, w), wrap(y, h)),
            BorderType::Reflect101 => (reflect101(x, w - 1), reflect101(y, h - 1)),
        };
        // Padding wider than the source may still land outside.
        let x = x.clamp(0, w - 1) as u32;
        let y = y.clamp(0, h - 1) as u32;
        back.exec(Point::new(x, y, point.z))
    }
}

fn padded(size: Size, pad: u32) -> Size {
    Size::new(
        size.width.saturating_add(pad.saturating_mul(2)),
        size.height.saturating_add(pad.saturating_mul(2)),
    )
}

fn reflect(i: i64, last: i64) -> i64 {
    let high = last - (last - i).abs() + i64::from(i > last);
    (high.abs() - i64::from(high < 0)) % (last + 1)
}

fn wrap(i: i64, len: i64) -> i64 {
    let high = if i < len { i } else { i % len };
    if high >= 0 {
        high
    } else {
        high - ((high - len + 1) / len) * len
    }
}

fn reflect101(i: i64, last: i64) -> i64 {
    let high = (last - (last - i).abs()).abs() % (last + 1);
    high.abs() % (last + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::ReadBehavior;
    use crate::ops::PerThreadRead;
    use crate::tensor::Tensor;

    /// Row `0 1 2 3 4 5 6 7` read through a border of 6 on each side.
    fn padded_row(border: BorderType) -> Vec<f64> {
        let src = PerThreadRead::<u8>::build(Tensor::from_fn(8, 1, 1, |x, _, _| x as u8)).unwrap();
        let node = src
            .then(&BorderReader::build(BorderParams::new(border, 6)).unwrap())
            .unwrap();
        let op = node.as_complete_read().unwrap();
        assert_eq!(op.num_elems(0), Size::new(20, 13));
        (0..20).map(|x| op.exec(Point::new(x, 6, 0)).lane(0)).collect()
    }

    fn edges(row: &[f64]) -> (Vec<f64>, Vec<f64>) {
        (row[..6].to_vec(), row[14..].to_vec())
    }

    #[test]
    fn test_constant() {
        let row = padded_row(BorderType::Constant(TypedPixel::new(9.0f32)));
        let (left, right) = edges(&row);
        assert_eq!(left, vec![9.0; 6]);
        assert_eq!(right, vec![9.0; 6]);
        assert_eq!(row[6..14], [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_replicate() {
        let (left, right) = edges(&padded_row(BorderType::Replicate));
        assert_eq!(left, vec![0.0; 6]);
        assert_eq!(right, vec![7.0; 6]);
    }

    #[test]
    fn test_reflect() {
        let (left, right) = edges(&padded_row(BorderType::Reflect));
        assert_eq!(left, vec![5.0, 4.0, 3.0, 2.0, 1.0, 0.0]);
        assert_eq!(right, vec![7.0, 6.0, 5.0, 4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_wrap() {
        let (left, right) = edges(&padded_row(BorderType::Wrap));
        assert_eq!(left, vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(right, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_reflect101() {
        let (left, right) = edges(&padded_row(BorderType::Reflect101));
        assert_eq!(left, vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]);
        assert_eq!(right, vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_constant_cast_to_source_type() {
        let src = PerThreadRead::<u8>::build(Tensor::new_2d(2, 2)).unwrap();
        let node = src
            .then(
                &BorderReader::build(BorderParams::new(
                    BorderType::Constant(TypedPixel::new(300.5f64)),
                    1,
                ))
                .unwrap(),
            )
            .unwrap();
        let op = node.as_complete_read().unwrap();
        assert_eq!(op.exec(Point::new(0, 0, 0)).lane(0), 255.0);
    }
}
