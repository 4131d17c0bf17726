//! A ring buffer of planes kept in age order.
//!
//! [`CircularTensor`] exposes `BATCH` planes ordered by age. Each
//! [`update`](CircularTensor::update) computes one new plane from a caller
//! pipeline and shifts the older planes by one, in a single divergent
//! dispatch:
//!
//! - sequence 1 (the newest plane) runs the caller's chain, stores the
//!   result into the history slot `next_update_idx` and into the output;
//! - sequence 2 (every other plane) copies the history slot holding the
//!   plane of that age.
//!
//! The history is the only storage that persists across updates; reads of
//! sequence 2 never touch the slot sequence 1 writes.

use tracing::debug;

use crate::divergent::DivergentBatchExecutor;
use crate::element::Element;
use crate::executor::DispatchConfig;
use crate::node::Node;
use crate::operation::{ReadBehavior, WriteBehavior};
use crate::ops::{CircularRead, CircularReadParams, CircularWrite, CircularWriteParams, PerThreadWrite};
use crate::point::Size;
use crate::tensor::Tensor;
use crate::{FusionError, Result};

/// Which end of the batch holds the newest plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CircularTensorOrder {
    /// Plane 0 is the newest.
    #[default]
    NewestFirst,
    /// Plane `BATCH - 1` is the newest.
    OldestFirst,
}

impl CircularTensorOrder {
    /// Age of output plane `z` in a batch of `batch` planes (0 = newest).
    #[inline]
    pub fn age(self, z: u32, batch: u32) -> u32 {
        match self {
            CircularTensorOrder::NewestFirst => z,
            CircularTensorOrder::OldestFirst => batch - 1 - z,
        }
    }

    /// Output plane receiving the newest result.
    pub fn newest_plane(self, batch: u32) -> u32 {
        match self {
            CircularTensorOrder::NewestFirst => 0,
            CircularTensorOrder::OldestFirst => batch - 1,
        }
    }
}

/// Ring buffer of `batch` planes of `width × height` elements.
#[derive(Debug)]
pub struct CircularTensor<T: Element> {
    data: Tensor<T>,
    history: Tensor<T>,
    order: CircularTensorOrder,
    next_update_idx: u32,
}

impl<T: Element> CircularTensor<T> {
    pub fn new(width: u32, height: u32, batch: u32, order: CircularTensorOrder) -> Result<Self> {
        if batch == 0 {
            return Err(FusionError::ZeroExtent("circular tensor batch"));
        }
        Ok(Self {
            data: Tensor::new(width, height, batch),
            history: Tensor::new(width, height, batch),
            order,
            next_update_idx: 0,
        })
    }

    /// Planes in age order, as of the last update.
    pub fn tensor(&self) -> &Tensor<T> {
        &self.data
    }

    pub fn batch(&self) -> u32 {
        self.data.planes()
    }

    pub fn order(&self) -> CircularTensorOrder {
        self.order
    }

    /// History slot the next update writes.
    pub fn next_update_idx(&self) -> u32 {
        self.next_update_idx
    }

    /// Runs `nodes` (a complete read followed by compute steps, producing
    /// `T`) to produce the newest plane and ages the others by one.
    ///
    /// The frame must cover exactly one plane of the ring.
    pub fn update(&mut self, config: &DispatchConfig, nodes: &[Node]) -> Result<()> {
        let (head, rest) = nodes.split_first().ok_or(FusionError::EmptyPipeline)?;
        let batch = self.batch();
        let slot = self.next_update_idx;

        let frame = head.then_all(rest)?;
        if let Some(active) = frame.active_threads() {
            let found = Size::new(active.x, active.y);
            if found != self.data.size() {
                return Err(FusionError::FrameSizeMismatch {
                    expected: self.data.size(),
                    found,
                });
            }
        }
        let newest = [
            frame,
            CircularWrite::<T>::build_mid(CircularWriteParams {
                history: self.history.clone(),
                slot,
            })?,
            PerThreadWrite::<T>::build(self.data.clone())?,
        ];
        let shifted = [
            CircularRead::<T>::build(CircularReadParams {
                history: self.history.clone(),
                newest: slot,
                order: self.order,
            })?,
            PerThreadWrite::<T>::build(self.data.clone())?,
        ];

        let newest_plane = self.order.newest_plane(batch);
        debug!(slot, batch, newest_plane, "updating circular tensor");
        DivergentBatchExecutor::run(
            config,
            &|z: u32| -> usize { if z == newest_plane { 1 } else { 2 } },
            batch,
            &[&newest[..], &shifted[..]],
        )?;

        self.next_update_idx = (slot + 1) % batch;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Add, PerThreadRead};
    use crate::operation::BinaryBehavior;

    fn frame(value: i32) -> Vec<Node> {
        vec![
            PerThreadRead::<i32>::build(Tensor::filled(3, 2, 1, value)).unwrap(),
            Add::<i32>::build(0).unwrap(),
        ]
    }

    fn planes(ct: &CircularTensor<i32>) -> Vec<i32> {
        (0..ct.batch()).map(|z| ct.tensor().get(2, 1, z)).collect()
    }

    #[test]
    fn test_newest_first() {
        let mut ct = CircularTensor::<i32>::new(3, 2, 3, CircularTensorOrder::NewestFirst).unwrap();
        let config = DispatchConfig::default();
        ct.update(&config, &frame(1)).unwrap();
        assert_eq!(planes(&ct), vec![1, 0, 0]);
        ct.update(&config, &frame(2)).unwrap();
        assert_eq!(planes(&ct), vec![2, 1, 0]);
        ct.update(&config, &frame(3)).unwrap();
        ct.update(&config, &frame(4)).unwrap();
        assert_eq!(planes(&ct), vec![4, 3, 2]);
        assert_eq!(ct.next_update_idx(), 1);
    }

    #[test]
    fn test_oldest_first() {
        let mut ct = CircularTensor::<i32>::new(3, 2, 3, CircularTensorOrder::OldestFirst).unwrap();
        let config = DispatchConfig::sequential();
        for v in 1..=4 {
            ct.update(&config, &frame(v)).unwrap();
        }
        assert_eq!(planes(&ct), vec![2, 3, 4]);
    }

    #[test]
    fn test_frame_size_must_match() {
        let mut ct = CircularTensor::<i32>::new(4, 4, 2, CircularTensorOrder::NewestFirst).unwrap();
        let small = [PerThreadRead::<i32>::build(Tensor::filled(2, 2, 1, 5)).unwrap()];
        let err = ct.update(&DispatchConfig::default(), &small).unwrap_err();
        assert!(matches!(
            err,
            FusionError::FrameSizeMismatch {
                expected: Size { width: 4, height: 4 },
                found: Size { width: 2, height: 2 },
            }
        ));
        assert_eq!(ct.next_update_idx(), 0);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let err = CircularTensor::<u8>::new(1, 1, 0, CircularTensorOrder::NewestFirst).unwrap_err();
        assert!(matches!(err, FusionError::ZeroExtent(_)));
    }

    #[test]
    fn test_type_mismatch_surfaces_before_dispatch() {
        let mut ct = CircularTensor::<u8>::new(3, 2, 2, CircularTensorOrder::NewestFirst).unwrap();
        let err = ct.update(&DispatchConfig::default(), &frame(1)).unwrap_err();
        assert!(matches!(err, FusionError::TypeMismatch { .. }));
        assert_eq!(ct.next_update_idx(), 0);
    }
}
