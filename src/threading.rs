//! Divide-and-conquer distribution of the iteration grid over threads.
//!
//! The grid `(x, y, z)` is split recursively in two along the axis with the
//! largest `(dim - 1) * cost`, where an axis' cost is the number of units
//! one step along it skips. Halves run on `rayon::join` with half the
//! thread budget each, until a region fits in one block, the budget is
//! exhausted, or the region is smaller than [`MIN_THREAD_LENGTH`].

use std::ops::Range;

use crate::executor::BlockShape;
use crate::MIN_THREAD_LENGTH;

/// A box of execution units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Region {
    pub x: Range<u32>,
    pub y: Range<u32>,
    pub z: Range<u32>,
}

impl Region {
    pub(crate) fn new(x: u32, y: u32, z: u32) -> Self {
        Self {
            x: 0..x,
            y: 0..y,
            z: 0..z,
        }
    }

    pub(crate) fn dims(&self) -> [u32; 3] {
        [self.x.len() as u32, self.y.len() as u32, self.z.len() as u32]
    }

    pub(crate) fn total(&self) -> u64 {
        self.dims().iter().map(|&d| d as u64).product()
    }

    /// Splits along `axis`; the second half takes the extra unit of an odd
    /// extent.
    pub(crate) fn split(&self, axis: usize) -> (Region, Region) {
        let range = self.axis(axis);
        let mid = range.start + (range.end - range.start) / 2;
        let mut first = self.clone();
        let mut second = self.clone();
        *first.axis_mut(axis) = range.start..mid;
        *second.axis_mut(axis) = mid..range.end;
        (first, second)
    }

    fn axis(&self, axis: usize) -> Range<u32> {
        match axis {
            0 => self.x.clone(),
            1 => self.y.clone(),
            _ => self.z.clone(),
        }
    }

    fn axis_mut(&mut self, axis: usize) -> &mut Range<u32> {
        match axis {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => &mut self.z,
        }
    }
}

/// Units skipped by one step along each axis.
pub(crate) fn axis_costs(dims: [u32; 3]) -> [u64; 3] {
    let x = dims[0].max(1) as u64;
    let y = dims[1].max(1) as u64;
    [1, x, x * y]
}

/// Axis with the largest `(dim - 1) * cost` among the splittable ones,
/// preferring later axes on ties. `None` if no axis may be split.
pub(crate) fn find_split_axis(dims: [u32; 3], costs: [u64; 3], block: [u32; 3]) -> Option<usize> {
    let mut best = None;
    let mut best_score = 0u64;
    for axis in 0..3 {
        if !should_split_axis(dims[axis], block[axis]) {
            continue;
        }
        let score = (dims[axis] as u64 - 1) * costs[axis];
        if score >= best_score {
            best_score = score;
            best = Some(axis);
        }
    }
    best
}

/// An axis is split only while it is longer than its block.
pub(crate) fn should_split_axis(dim: u32, block: u32) -> bool {
    dim > block.max(1)
}

fn thread_budget() -> usize {
    #[cfg(feature = "parallel")]
    let nthreads = rayon::current_num_threads();
    #[cfg(not(feature = "parallel"))]
    let nthreads = 1;
    nthreads
}

/// Runs `leaf` over disjoint sub-regions covering `region`, in parallel when
/// the `parallel` feature is enabled.
pub(crate) fn for_each_region<F>(region: Region, block: BlockShape, leaf: &F)
where
    F: Fn(&Region) + Sync,
{
    let block = [block.x, block.y, 1];
    split_recursive(region, block, thread_budget(), leaf);
}

fn split_recursive<F>(region: Region, block: [u32; 3], nthreads: usize, leaf: &F)
where
    F: Fn(&Region) + Sync,
{
    if nthreads <= 1 || region.total() <= MIN_THREAD_LENGTH {
        leaf(&region);
        return;
    }
    let dims = region.dims();
    let Some(axis) = find_split_axis(dims, axis_costs(dims), block) else {
        leaf(&region);
        return;
    };
    let (first, second) = region.split(axis);
    let half = nthreads >> 1;
    let rest = nthreads - half;

    #[cfg(feature = "parallel")]
    rayon::join(
        || split_recursive(first, block, half, leaf),
        || split_recursive(second, block, rest, leaf),
    );
    #[cfg(not(feature = "parallel"))]
    {
        split_recursive(first, block, half, leaf);
        split_recursive(second, block, rest, leaf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_find_split_axis_prefers_outer_axes() {
        let dims = [1000, 1000, 1];
        // y: 999 * 1000 beats x: 999 * 1; z cannot split.
        assert_eq!(find_split_axis(dims, axis_costs(dims), [32, 8, 1]), Some(1));
        let dims = [64, 64, 4];
        assert_eq!(find_split_axis(dims, axis_costs(dims), [32, 8, 1]), Some(2));
    }

    #[test]
    fn test_find_split_axis_respects_block() {
        let dims = [32, 8, 1];
        assert_eq!(find_split_axis(dims, axis_costs(dims), [32, 8, 1]), None);
        let dims = [33, 8, 1];
        assert_eq!(find_split_axis(dims, axis_costs(dims), [32, 8, 1]), Some(0));
    }

    #[test]
    fn test_find_split_axis_last_argmax() {
        assert_eq!(find_split_axis([10, 10, 1], [1, 1, 1], [1, 1, 1]), Some(1));
    }

    #[test]
    fn test_split_odd_extent() {
        let r = Region::new(101, 4, 1);
        let (a, b) = r.split(0);
        assert_eq!(a.x, 0..50);
        assert_eq!(b.x, 50..101);
        assert_eq!(a.y, 0..4);
        assert_eq!(a.total() + b.total(), r.total());
    }

    #[test]
    fn test_regions_cover_grid_exactly_once() {
        let seen = Mutex::new(Vec::new());
        for_each_region(Region::new(300, 257, 2), BlockShape::new(32, 8), &|r: &Region| {
            let mut seen = seen.lock().unwrap();
            for z in r.z.clone() {
                for y in r.y.clone() {
                    for x in r.x.clone() {
                        seen.push((x, y, z));
                    }
                }
            }
        });
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 300 * 257 * 2);
    }

    #[test]
    fn test_small_region_is_one_leaf() {
        let calls = Mutex::new(0);
        for_each_region(Region::new(10, 10, 1), BlockShape::new(2, 2), &|_: &Region| {
            *calls.lock().unwrap() += 1;
        });
        assert_eq!(calls.into_inner().unwrap(), 1);
    }
}
