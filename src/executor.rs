//! Turning a chain of nodes into one dispatch over its iteration domain.
//!
//! A dispatch fuses the chain into a [`Pipeline`] (a complete read, the
//! compute and mid-write steps, a final write), derives the grid from the
//! read's active threads and the thread-fusion factor, and visits every
//! execution unit exactly once, either as a plain loop nest
//! ([`Realization::Sequential`]) or split over the rayon pool
//! ([`Realization::Parallel`]).

use std::fmt;
use std::iter;
use std::sync::Arc;

use tracing::debug;

use crate::element::DataType;
use crate::fuser::{run_steps, Step};
use crate::node::Node;
use crate::operation::{FusedLanes, ReadOperation, WriteOperation};
use crate::point::{ActiveThreads, Point};
use crate::thread_fusion::ThreadFusionInfo;
use crate::threading::{for_each_region, Region};
use crate::{FusionError, Result, DEFAULT_BLOCK};

/// How execution units are mapped onto hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Realization {
    /// Tiles of the grid run concurrently on the rayon pool.
    Parallel,
    /// One loop nest on the calling thread.
    Sequential,
}

impl Default for Realization {
    fn default() -> Self {
        if cfg!(feature = "parallel") {
            Realization::Parallel
        } else {
            Realization::Sequential
        }
    }
}

/// Tile shape below which the parallel realization stops splitting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockShape {
    pub x: u32,
    pub y: u32,
}

impl BlockShape {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl Default for BlockShape {
    fn default() -> Self {
        DEFAULT_BLOCK
    }
}

/// Runtime configuration of one dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchConfig {
    pub realization: Realization,
    pub block: BlockShape,
    /// Request thread fusion; honored only when the pipeline allows it.
    pub thread_fusion: bool,
}

impl DispatchConfig {
    pub fn sequential() -> Self {
        Self {
            realization: Realization::Sequential,
            ..Self::default()
        }
    }

    pub fn parallel() -> Self {
        Self {
            realization: Realization::Parallel,
            ..Self::default()
        }
    }

    pub fn with_block(mut self, block: BlockShape) -> Self {
        self.block = block;
        self
    }

    pub fn with_thread_fusion(mut self, enabled: bool) -> Self {
        self.thread_fusion = enabled;
        self
    }
}

/// A validated `read → steps → write` pipeline.
#[derive(Clone)]
pub struct Pipeline {
    read: Arc<dyn ReadOperation>,
    steps: Vec<Step>,
    write: Arc<dyn WriteOperation>,
    read_type: DataType,
    write_type: DataType,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("read", &self.read.name())
            .field("steps", &self.steps)
            .field("write", &self.write.name())
            .finish()
    }
}

impl Pipeline {
    /// Fuses `nodes` in order and validates the result.
    pub fn from_chain(nodes: &[Node]) -> Result<Pipeline> {
        let (head, rest) = nodes.split_first().ok_or(FusionError::EmptyPipeline)?;
        Self::from_node(&head.then_all(rest)?)
    }

    /// Validates an already fused node as a closed pipeline.
    pub fn from_node(node: &Node) -> Result<Pipeline> {
        let nodes = node.flatten();
        let (first, rest) = nodes.split_first().ok_or(FusionError::EmptyPipeline)?;
        let read = first
            .as_complete_read()
            .map_err(|_| FusionError::MissingRead(first.kind()))?;
        let (last, middle) = rest
            .split_last()
            .ok_or(FusionError::MissingWrite(first.kind()))?;
        let write = match last {
            Node::Write(op) => op.clone(),
            other => return Err(FusionError::MissingWrite(other.kind())),
        };
        let steps = middle
            .iter()
            .map(Step::from_node)
            .collect::<Result<Vec<_>>>()?;

        let read_sig = first.signature();
        let read_type = if read_sig.read_data.is_null() {
            read_sig.output
        } else {
            read_sig.read_data
        };
        let write_sig = last.signature();
        let write_type = if write_sig.write_data.is_null() {
            write_sig.input
        } else {
            write_sig.write_data
        };

        let pipeline = Pipeline {
            read,
            steps,
            write,
            read_type,
            write_type,
        };
        pipeline.check_write_extents()?;
        debug!(
            read = first.name(),
            steps = pipeline.steps.len(),
            write = last.name(),
            "built pipeline"
        );
        Ok(pipeline)
    }

    /// Mid writes and the final write, in order.
    fn writes(&self) -> impl Iterator<Item = &Arc<dyn WriteOperation>> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Write(op) => Some(op),
                Step::Compute(_) => None,
            })
            .chain(iter::once(&self.write))
    }

    /// Fails unless every write can store the whole iteration domain.
    fn check_write_extents(&self) -> Result<()> {
        let domain = self.active_threads();
        for write in self.writes() {
            if let Some(extent) = write.extent() {
                if !extent.covers(domain) {
                    return Err(FusionError::WriteOutOfBounds {
                        name: write.name(),
                        domain,
                        extent,
                    });
                }
            }
        }
        Ok(())
    }

    /// Fails unless the read and every write reach planes `0..planes`.
    pub(crate) fn check_planes(&self, planes: u32) -> Result<()> {
        let read_planes = match self.read.batch() {
            Some(batch) => Some(batch.nodes.len() as u32),
            None => Some(self.active_threads().z).filter(|&z| z != 1),
        };
        let mismatch = |name, covered: Option<u32>| match covered {
            Some(covered) if covered < planes => Err(FusionError::PlaneCountMismatch {
                name,
                planes: covered,
                required: planes,
            }),
            _ => Ok(()),
        };
        mismatch(self.read.name(), read_planes)?;
        for write in self.writes() {
            mismatch(write.name(), write.extent().and_then(|e| e.planes))?;
        }
        Ok(())
    }

    /// Iteration domain of the leading read.
    pub fn active_threads(&self) -> ActiveThreads {
        self.read.active_threads()
    }

    /// Fusion factor this pipeline runs with under `config`.
    pub fn thread_fusion(&self, config: &DispatchConfig) -> ThreadFusionInfo {
        let requested =
            config.thread_fusion && self.read.thread_fusion() && self.write.thread_fusion();
        ThreadFusionInfo::new(self.read_type, self.write_type, requested)
    }

    /// Runs every execution unit of the domain once.
    pub fn run(&self, config: &DispatchConfig) {
        let active = self.active_threads();
        let tf = self.thread_fusion(config);
        let grid = Region::new(tf.grid_width(active.x), active.y, active.z);
        debug!(
            read = self.read.name(),
            write = self.write.name(),
            x = active.x,
            y = active.y,
            z = active.z,
            elems_per_thread = tf.elems_per_thread(),
            realization = ?config.realization,
            "dispatching pipeline"
        );
        self.run_grid(grid, config, tf);
    }

    pub(crate) fn run_grid(&self, grid: Region, config: &DispatchConfig, tf: ThreadFusionInfo) {
        match config.realization {
            Realization::Sequential => self.run_region(&grid, tf),
            Realization::Parallel => {
                for_each_region(grid, config.block, &|region: &Region| {
                    self.run_region(region, tf)
                })
            }
        }
    }

    fn run_region(&self, region: &Region, tf: ThreadFusionInfo) {
        for z in region.z.clone() {
            let extent = self.read.num_elems(z);
            let rows = region.y.start..region.y.end.min(extent.height);
            for y in rows {
                for ux in region.x.clone() {
                    self.run_unit(Point::new(ux, y, z), extent.width, tf);
                }
            }
        }
    }

    /// One execution unit: a single element, or `k` consecutive elements
    /// along `x` under thread fusion. A partial unit at the right edge
    /// falls back to one element at a time.
    #[inline]
    fn run_unit(&self, unit: Point, width: u32, tf: ThreadFusionInfo) {
        if !tf.is_enabled() {
            if unit.x < width {
                self.run_element(unit);
            }
            return;
        }
        let k = tf.elems_per_thread();
        let base = unit.x * k;
        if base >= width {
            return;
        }
        if base + k <= width {
            let mut lanes = FusedLanes::new();
            self.read.exec_fused(unit, k, &mut lanes);
            for (i, value) in lanes.iter_mut().enumerate() {
                let point = Point::new(base + i as u32, unit.y, unit.z);
                *value = run_steps(&self.steps, point, *value);
            }
            self.write.exec_fused(unit, &lanes);
        } else {
            for x in base..width {
                self.run_element(Point::new(x, unit.y, unit.z));
            }
        }
    }

    #[inline]
    fn run_element(&self, point: Point) {
        let value = run_steps(&self.steps, point, self.read.exec(point));
        self.write.exec(point, value);
    }
}

/// Entry point for homogeneous dispatches.
pub struct Executor;

impl Executor {
    /// Fuses `nodes` (a complete read first, a write last) and runs the
    /// result over the read's domain.
    pub fn run(config: &DispatchConfig, nodes: &[Node]) -> Result<()> {
        Pipeline::from_chain(nodes)?.run(config);
        Ok(())
    }
}
