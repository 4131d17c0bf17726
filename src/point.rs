//! Coordinates and extents of the iteration domain.

/// One element of the iteration domain; `z` indexes a batch plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// 2-D extent of one plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle inside a plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// True if the rectangle lies entirely inside `[0, size)`.
    pub fn fits_in(&self, size: Size) -> bool {
        self.x as u64 + self.width as u64 <= size.width as u64
            && self.y as u64 + self.height as u64 <= size.height as u64
    }
}

/// Extents `(x, y, z)` of the iteration domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ActiveThreads {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl ActiveThreads {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn from_size(size: Size, planes: u32) -> Self {
        Self::new(size.width, size.height, planes)
    }

    /// Per-axis maximum.
    pub fn max(self, other: ActiveThreads) -> Self {
        Self::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    pub fn total(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// Region a write can store into.
///
/// `planes: None` accepts every plane: the storage has 2-D semantics and
/// ignores `z`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WriteExtent {
    pub width: u32,
    pub height: u32,
    pub planes: Option<u32>,
}

impl WriteExtent {
    pub const fn new(width: u32, height: u32, planes: Option<u32>) -> Self {
        Self {
            width,
            height,
            planes,
        }
    }

    /// Extent of storage that is `planes` deep, where a single plane is
    /// shared by every `z`.
    pub const fn of_storage(size: Size, planes: u32) -> Self {
        Self::new(
            size.width,
            size.height,
            if planes == 1 { None } else { Some(planes) },
        )
    }

    /// Region both extents can store into.
    pub fn intersect(self, other: WriteExtent) -> Self {
        let planes = match (self.planes, other.planes) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        };
        Self::new(
            self.width.min(other.width),
            self.height.min(other.height),
            planes,
        )
    }

    /// True if every element of `domain` can be stored.
    pub fn covers(&self, domain: ActiveThreads) -> bool {
        domain.x <= self.width
            && domain.y <= self.height
            && self.planes.map_or(true, |planes| domain.z <= planes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_fits_in() {
        let size = Size::new(64, 32);
        assert!(Rect::new(0, 0, 64, 32).fits_in(size));
        assert!(Rect::new(10, 4, 54, 28).fits_in(size));
        assert!(!Rect::new(11, 4, 54, 28).fits_in(size));
        assert!(!Rect::new(u32::MAX, 0, 2, 1).fits_in(size));
    }

    #[test]
    fn test_active_threads_max() {
        let a = ActiveThreads::new(10, 3, 1);
        let b = ActiveThreads::new(4, 8, 2);
        assert_eq!(a.max(b), ActiveThreads::new(10, 8, 2));
        assert_eq!(a.max(b).total(), 160);
    }

    #[test]
    fn test_write_extent_covers_and_intersects() {
        let flat = WriteExtent::of_storage(Size::new(8, 4), 1);
        assert_eq!(flat.planes, None);
        assert!(flat.covers(ActiveThreads::new(8, 4, 9)));
        assert!(!flat.covers(ActiveThreads::new(9, 4, 1)));

        let deep = WriteExtent::of_storage(Size::new(16, 2), 3);
        assert!(!deep.covers(ActiveThreads::new(4, 2, 4)));
        assert_eq!(
            flat.intersect(deep),
            WriteExtent::new(8, 2, Some(3))
        );
    }
}
