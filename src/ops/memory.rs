//! Reads and writes over [`Tensor`] storage.

use std::marker::PhantomData;

use crate::circular::CircularTensorOrder;
use crate::element::{DataType, Element, Pixel};
use crate::operation::{FusedLanes, ReadBehavior, WriteBehavior};
use crate::point::{ActiveThreads, Point, Size, WriteExtent};
use crate::tensor::Tensor;

/// Reads the element at the coordinate.
pub struct PerThreadRead<T>(PhantomData<T>);

impl<T: Element> ReadBehavior for PerThreadRead<T> {
    type Params = Tensor<T>;

    const NAME: &'static str = "PerThreadRead";

    const THREAD_FUSION: bool = true;

    fn read_data_type(_: &Tensor<T>) -> DataType {
        T::TYPE.into()
    }

    fn output_type(_: &Tensor<T>) -> DataType {
        T::TYPE.into()
    }

    fn num_elems(tensor: &Tensor<T>, _plane: u32) -> Size {
        tensor.size()
    }

    fn active_threads(tensor: &Tensor<T>) -> ActiveThreads {
        ActiveThreads::from_size(tensor.size(), tensor.planes())
    }

    #[inline]
    fn exec(point: Point, tensor: &Tensor<T>) -> Pixel {
        tensor.load(point.x, point.y, point.z)
    }

    #[inline]
    fn exec_run(point: Point, elems: u32, tensor: &Tensor<T>, out: &mut FusedLanes) {
        tensor.load_run(point.x, point.y, point.z, elems, out);
    }
}

/// Stores the input at the coordinate.
pub struct PerThreadWrite<T>(PhantomData<T>);

impl<T: Element> WriteBehavior for PerThreadWrite<T> {
    type Params = Tensor<T>;

    const NAME: &'static str = "PerThreadWrite";

    const THREAD_FUSION: bool = true;

    fn input_type(_: &Tensor<T>) -> DataType {
        T::TYPE.into()
    }

    fn write_data_type(_: &Tensor<T>) -> DataType {
        T::TYPE.into()
    }

    #[inline]
    fn exec(point: Point, input: Pixel, tensor: &Tensor<T>) {
        tensor.store(point.x, point.y, point.z, input);
    }

    #[inline]
    fn exec_run(point: Point, values: &[Pixel], tensor: &Tensor<T>) {
        tensor.store_run(point.x, point.y, point.z, values);
    }

    fn extent(tensor: &Tensor<T>) -> Option<WriteExtent> {
        Some(WriteExtent::of_storage(tensor.size(), tensor.planes()))
    }
}

/// History of a circular buffer, read in age order.
#[derive(Clone, Debug)]
pub struct CircularReadParams<T: Element> {
    pub history: Tensor<T>,
    /// Slot holding the newest plane.
    pub newest: u32,
    pub order: CircularTensorOrder,
}

/// Output plane `z` reads the history slot holding the plane of the
/// matching age.
pub struct CircularRead<T>(PhantomData<T>);

impl<T: Element> ReadBehavior for CircularRead<T> {
    type Params = CircularReadParams<T>;

    const NAME: &'static str = "CircularRead";

    fn read_data_type(_: &Self::Params) -> DataType {
        T::TYPE.into()
    }

    fn output_type(_: &Self::Params) -> DataType {
        T::TYPE.into()
    }

    fn num_elems(params: &Self::Params, _plane: u32) -> Size {
        params.history.size()
    }

    fn active_threads(params: &Self::Params) -> ActiveThreads {
        ActiveThreads::from_size(params.history.size(), params.history.planes())
    }

    #[inline]
    fn exec(point: Point, params: &Self::Params) -> Pixel {
        let batch = params.history.planes();
        let age = params.order.age(point.z, batch);
        let slot = (params.newest + batch - age) % batch;
        params.history.load(point.x, point.y, slot)
    }
}

/// One slot of a circular buffer's history.
#[derive(Clone, Debug)]
pub struct CircularWriteParams<T: Element> {
    pub history: Tensor<T>,
    pub slot: u32,
}

/// Stores the input into a fixed history slot, whatever the plane.
pub struct CircularWrite<T>(PhantomData<T>);

impl<T: Element> WriteBehavior for CircularWrite<T> {
    type Params = CircularWriteParams<T>;

    const NAME: &'static str = "CircularWrite";

    fn input_type(_: &Self::Params) -> DataType {
        T::TYPE.into()
    }

    fn write_data_type(_: &Self::Params) -> DataType {
        T::TYPE.into()
    }

    #[inline]
    fn exec(point: Point, input: Pixel, params: &Self::Params) {
        params.history.store(point.x, point.y, params.slot, input);
    }

    fn extent(params: &Self::Params) -> Option<WriteExtent> {
        Some(WriteExtent::new(
            params.history.width(),
            params.history.height(),
            None,
        ))
    }
}
