//! Shared 3-D pitched buffers that pipelines read from and write into.

use std::fmt;
use std::sync::Arc;

use crate::element::{CellOf, Element, Pixel, Scalar};
use crate::operation::FusedLanes;
use crate::point::Size;

/// A `width × height × planes` buffer of `T`, stored plane-major then row-major.
///
/// Cloning a `Tensor` clones the handle, not the data: every clone observes
/// the same storage, which is what read and write operations capture as
/// their parameters. Each channel is one [`Scalar::Cell`] of the channel's
/// own width (a `Tensor<u8>` holds one byte per channel), so any number of
/// execution units may write disjoint elements concurrently; a dispatch
/// completes before its results are observed on the host.
///
/// A single-plane tensor has 2-D semantics: it is read and written at the
/// same location for every `z`.
#[derive(Clone)]
pub struct Tensor<T: Element> {
    width: u32,
    height: u32,
    planes: u32,
    cells: Arc<[CellOf<T>]>,
}

impl<T: Element> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("type", &T::TYPE)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("planes", &self.planes)
            .finish()
    }
}

impl<T: Element> Tensor<T> {
    /// Zero-filled tensor.
    pub fn new(width: u32, height: u32, planes: u32) -> Self {
        let len = width as usize * height as usize * planes as usize * T::TYPE.channels();
        let cells: Arc<[CellOf<T>]> = (0..len)
            .map(|_| <T::Scalar as Scalar>::cell(Default::default()))
            .collect();
        Self {
            width,
            height,
            planes,
            cells,
        }
    }

    /// Zero-filled single-plane tensor.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self::new(width, height, 1)
    }

    pub fn from_fn(
        width: u32,
        height: u32,
        planes: u32,
        mut f: impl FnMut(u32, u32, u32) -> T,
    ) -> Self {
        let tensor = Self::new(width, height, planes);
        for z in 0..planes {
            for y in 0..height {
                for x in 0..width {
                    tensor.set(x, y, z, f(x, y, z));
                }
            }
        }
        tensor
    }

    pub fn filled(width: u32, height: u32, planes: u32, value: T) -> Self {
        Self::from_fn(width, height, planes, |_, _, _| value)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn planes(&self) -> u32 {
        self.planes
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32, z: u32) -> T {
        T::load_cells(self.run(x, y, z, 1))
    }

    pub fn set(&self, x: u32, y: u32, z: u32, value: T) {
        value.store_cells(self.run(x, y, z, 1));
    }

    /// Copy of one plane in row-major order.
    pub fn plane(&self, z: u32) -> Vec<T> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(self.get(x, y, z));
            }
        }
        out
    }

    /// Copy of the whole tensor, plane after plane.
    pub fn to_vec(&self) -> Vec<T> {
        (0..self.planes).flat_map(|z| self.plane(z)).collect()
    }

    /// Cells of the element at `(x, y, z)` and the `count - 1` elements
    /// after it on the same row.
    #[inline]
    fn run(&self, x: u32, y: u32, z: u32, count: u32) -> &[CellOf<T>] {
        debug_assert!(
            x as u64 + count as u64 <= self.width as u64,
            "x run {x}+{count} out of bounds for width {}",
            self.width
        );
        debug_assert!(y < self.height, "y {y} out of bounds for height {}", self.height);
        debug_assert!(
            self.planes == 1 || z < self.planes,
            "z {z} out of bounds for {} planes",
            self.planes
        );
        let z = if self.planes == 1 { 0 } else { z as usize };
        let row = z * self.height as usize + y as usize;
        let channels = T::TYPE.channels();
        let base = (row * self.width as usize + x as usize) * channels;
        &self.cells[base..base + count as usize * channels]
    }

    #[inline]
    pub(crate) fn load(&self, x: u32, y: u32, z: u32) -> Pixel {
        T::load_cells(self.run(x, y, z, 1)).to_pixel()
    }

    /// Stores `pixel` after converting it to the storage type.
    #[inline]
    pub(crate) fn store(&self, x: u32, y: u32, z: u32, pixel: Pixel) {
        T::from_pixel(pixel).store_cells(self.run(x, y, z, 1));
    }

    /// Reads `count` consecutive elements of one row starting at `(x, y, z)`.
    #[inline]
    pub(crate) fn load_run(&self, x: u32, y: u32, z: u32, count: u32, out: &mut FusedLanes) {
        let channels = T::TYPE.channels();
        for cells in self.run(x, y, z, count).chunks_exact(channels) {
            out.push(T::load_cells(cells).to_pixel());
        }
    }

    /// Stores `values` into consecutive elements of one row starting at
    /// `(x, y, z)`.
    #[inline]
    pub(crate) fn store_run(&self, x: u32, y: u32, z: u32, values: &[Pixel]) {
        let channels = T::TYPE.channels();
        let cells = self.run(x, y, z, values.len() as u32);
        for (cells, value) in cells.chunks_exact(channels).zip(values) {
            T::from_pixel(*value).store_cells(cells);
        }
    }
}
