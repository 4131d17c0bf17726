//! Rectangular sub-region of a read.

use std::sync::Arc;

use crate::element::{DataType, Pixel};
use crate::node::Node;
use crate::operation::{IncompleteReadBackBehavior, ReadBackBehavior, ReadOperation};
use crate::point::{ActiveThreads, Point, Rect, Size};
use crate::{FusionError, Result};

/// Crop awaiting the read it crops.
///
/// Completing it checks that the rectangle fits in plane 0 of the back
/// read and yields a [`CropComplete`].
pub struct Crop;

impl IncompleteReadBackBehavior for Crop {
    type Params = Rect;

    const NAME: &'static str = "Crop";

    fn complete(rect: &Rect, back: &Node) -> Result<Node> {
        let back = back.as_complete_read()?;
        let size = back.num_elems(0);
        if !rect.fits_in(size) {
            return Err(FusionError::RectOutOfBounds { rect: *rect, size });
        }
        CropComplete::build(*rect, back)
    }
}

/// Reads the back operation at the coordinate shifted by the rectangle's
/// origin; the domain is the rectangle's size.
pub struct CropComplete;

impl ReadBackBehavior for CropComplete {
    type Params = Rect;
    type Back = Arc<dyn ReadOperation>;

    const NAME: &'static str = "Crop";

    fn read_data_type(_: &Rect, back: &Self::Back) -> DataType {
        back.signature().output
    }

    fn output_type(_: &Rect, back: &Self::Back) -> DataType {
        back.signature().output
    }

    fn num_elems(rect: &Rect, _back: &Self::Back, _plane: u32) -> Size {
        rect.size()
    }

    fn active_threads(rect: &Rect, back: &Self::Back) -> ActiveThreads {
        ActiveThreads::from_size(rect.size(), back.active_threads().z)
    }

    #[inline]
    fn exec(point: Point, rect: &Rect, back: &Self::Back) -> Pixel {
        back.exec(Point::new(point.x + rect.x, point.y + rect.y, point.z))
    }
}
