//! Divergent batch execution: a different pipeline for each plane.
//!
//! A [`DivergentBatchExecutor`] dispatch covers `num_planes` planes. Each
//! plane asks the [`SequenceSelector`] for a sequence number and runs the
//! pipeline with that number (sequences are numbered from 1 in the order
//! given) over its own extents. Thread fusion is never used here.

use tracing::{debug, warn};

use crate::executor::{DispatchConfig, Pipeline};
use crate::node::Node;
use crate::thread_fusion::ThreadFusionInfo;
use crate::threading::Region;
use crate::{FusionError, Result};

/// Maps a plane index to the 1-based number of the sequence it runs.
pub trait SequenceSelector: Sync {
    fn at(&self, plane: u32) -> usize;
}

impl<F> SequenceSelector for F
where
    F: Fn(u32) -> usize + Sync,
{
    fn at(&self, plane: u32) -> usize {
        self(plane)
    }
}

/// Entry point for per-plane divergent dispatches.
pub struct DivergentBatchExecutor;

impl DivergentBatchExecutor {
    /// Runs one of `sequences` on every plane `0..num_planes`.
    ///
    /// Each sequence is a node chain accepted by
    /// [`Pipeline::from_chain`] whose read and writes reach every plane of
    /// `0..num_planes`; a shorter batch or tensor is rejected before
    /// anything runs. A plane whose selector value matches no sequence is
    /// skipped with a warning.
    pub fn run<S, C>(
        config: &DispatchConfig,
        selector: &S,
        num_planes: u32,
        sequences: &[C],
    ) -> Result<()>
    where
        S: SequenceSelector + ?Sized,
        C: AsRef<[Node]>,
    {
        if sequences.is_empty() {
            return Err(FusionError::EmptyPipeline);
        }
        let pipelines = sequences
            .iter()
            .map(|chain| -> Result<Pipeline> {
                let pipeline = Pipeline::from_chain(chain.as_ref())?;
                pipeline.check_planes(num_planes)?;
                Ok(pipeline)
            })
            .collect::<Result<Vec<_>>>()?;
        if config.thread_fusion {
            debug!("thread fusion requested but not used for divergent dispatches");
        }
        debug!(
            sequences = pipelines.len(),
            planes = num_planes,
            realization = ?config.realization,
            "dispatching divergent batch"
        );

        for z in 0..num_planes {
            let selected = selector.at(z);
            let Some((_, pipeline)) = (1..)
                .zip(&pipelines)
                .find(|(index, _)| *index == selected)
            else {
                warn!(
                    plane = z,
                    selected,
                    sequences = pipelines.len(),
                    "no sequence selected for plane"
                );
                continue;
            };
            let active = pipeline.active_threads();
            let grid = Region {
                x: 0..active.x,
                y: 0..active.y,
                z: z..z + 1,
            };
            pipeline.run_grid(grid, config, ThreadFusionInfo::DISABLED);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchRead;
    use crate::ops::{Add, PerThreadRead, PerThreadWrite};
    use crate::operation::{BinaryBehavior, ReadBehavior, WriteBehavior};
    use crate::tensor::Tensor;

    #[test]
    fn test_selector_routes_planes() {
        let input = Tensor::<i32>::filled(4, 2, 1, 10);
        let out = Tensor::<i32>::new(4, 2, 3);
        let seq1 = vec![
            PerThreadRead::<i32>::build(input.clone()).unwrap(),
            PerThreadWrite::<i32>::build(out.clone()).unwrap(),
        ];
        let seq2 = vec![
            PerThreadRead::<i32>::build(input).unwrap(),
            Add::<i32>::build(5).unwrap(),
            PerThreadWrite::<i32>::build(out.clone()).unwrap(),
        ];
        DivergentBatchExecutor::run(
            &DispatchConfig::default(),
            &|z: u32| -> usize { if z == 0 { 1 } else { 2 } },
            3,
            &[seq1, seq2],
        )
        .unwrap();
        assert!(out.plane(0).iter().all(|&v| v == 10));
        assert!(out.plane(1).iter().all(|&v| v == 15));
        assert!(out.plane(2).iter().all(|&v| v == 15));
    }

    #[test]
    fn test_unmatched_plane_is_skipped() {
        let out = Tensor::<u8>::filled(2, 2, 2, 7);
        let seq = vec![
            PerThreadRead::<u8>::build(Tensor::filled(2, 2, 1, 1)).unwrap(),
            PerThreadWrite::<u8>::build(out.clone()).unwrap(),
        ];
        DivergentBatchExecutor::run(
            &DispatchConfig::sequential(),
            &|z: u32| z as usize + 1,
            2,
            &[seq],
        )
        .unwrap();
        assert!(out.plane(0).iter().all(|&v| v == 1));
        assert!(out.plane(1).iter().all(|&v| v == 7));
    }

    #[test]
    fn test_thread_fusion_request_is_ignored() {
        let input = Tensor::<u8>::from_fn(5, 3, 1, |x, y, _| (x + 5 * y) as u8);
        let out = Tensor::<u8>::new(5, 3, 2);
        let seq = vec![
            PerThreadRead::<u8>::build(input.clone()).unwrap(),
            PerThreadWrite::<u8>::build(out.clone()).unwrap(),
        ];
        DivergentBatchExecutor::run(
            &DispatchConfig::sequential().with_thread_fusion(true),
            &|_: u32| -> usize { 1 },
            2,
            &[seq],
        )
        .unwrap();
        assert_eq!(out.plane(0), input.plane(0));
        assert_eq!(out.plane(1), input.plane(0));
    }

    #[test]
    fn test_short_batch_rejected_before_dispatch() {
        let out = Tensor::<u8>::filled(2, 2, 4, 9);
        let short = vec![
            BatchRead::build([
                PerThreadRead::<u8>::build(Tensor::filled(2, 2, 1, 1)).unwrap(),
                PerThreadRead::<u8>::build(Tensor::filled(2, 2, 1, 2)).unwrap(),
            ])
            .unwrap(),
            PerThreadWrite::<u8>::build(out.clone()).unwrap(),
        ];
        let err = DivergentBatchExecutor::run(
            &DispatchConfig::sequential(),
            &|_: u32| -> usize { 1 },
            4,
            &[short],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FusionError::PlaneCountMismatch {
                name: "BatchRead",
                planes: 2,
                required: 4,
            }
        ));
        assert!(out.to_vec().iter().all(|&v| v == 9));
    }

    #[test]
    fn test_no_sequences_rejected() {
        let err = DivergentBatchExecutor::run(
            &DispatchConfig::default(),
            &|_: u32| -> usize { 1 },
            1,
            &[] as &[Vec<Node>],
        )
        .unwrap_err();
        assert!(matches!(err, FusionError::EmptyPipeline));
    }
}
