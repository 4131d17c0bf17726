//! Conversions between element types of the same channel count.

use std::marker::PhantomData;

use crate::element::{DataType, Element, Pixel};
use crate::operation::UnaryBehavior;

fn same_channels<I: Element, O: Element>() -> Result<(), &'static str> {
    if I::TYPE.channels() == O::TYPE.channels() {
        Ok(())
    } else {
        Err("input and output channel counts differ")
    }
}

/// `as`-style conversion: floats truncate toward zero and out-of-range
/// values clamp.
pub struct Cast<I, O>(PhantomData<(I, O)>);

impl<I: Element, O: Element> UnaryBehavior for Cast<I, O> {
    const NAME: &'static str = "Cast";

    fn input_type() -> DataType {
        I::TYPE.into()
    }

    fn output_type() -> DataType {
        O::TYPE.into()
    }

    fn validate() -> Result<(), &'static str> {
        same_channels::<I, O>()
    }

    #[inline]
    fn exec(input: Pixel) -> Pixel {
        O::TYPE.coerce(input)
    }
}

/// Rounds to nearest before clamping into the target range.
pub struct SaturateCast<I, O>(PhantomData<(I, O)>);

impl<I: Element, O: Element> UnaryBehavior for SaturateCast<I, O> {
    const NAME: &'static str = "SaturateCast";

    fn input_type() -> DataType {
        I::TYPE.into()
    }

    fn output_type() -> DataType {
        O::TYPE.into()
    }

    fn validate() -> Result<(), &'static str> {
        same_channels::<I, O>()
    }

    #[inline]
    fn exec(input: Pixel) -> Pixel {
        O::TYPE.saturate(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::NodeKind;
    use crate::FusionError;

    #[test]
    fn test_cast_truncates() {
        let out = Cast::<f32, u8>::exec(2.9f32.to_pixel());
        assert_eq!(u8::from_pixel(out), 2);
    }

    #[test]
    fn test_saturate_cast_rounds_and_clamps() {
        let out = SaturateCast::<[f32; 2], [u8; 2]>::exec([2.6f32, 300.0].to_pixel());
        assert_eq!(<[u8; 2]>::from_pixel(out), [3, 255]);
        let out = SaturateCast::<f64, i8>::exec((-200.4f64).to_pixel());
        assert_eq!(i8::from_pixel(out), -128);
    }

    #[test]
    fn test_channel_count_change_rejected() {
        let err = Cast::<[u8; 3], f32>::build().unwrap_err();
        assert!(matches!(
            err,
            FusionError::InvalidSignature {
                kind: NodeKind::Unary,
                name: "Cast",
                ..
            }
        ));
        assert!(SaturateCast::<f64, [u8; 2]>::build().is_err());
        assert!(SaturateCast::<[f64; 2], [u8; 2]>::build().is_ok());
    }

    #[test]
    fn test_cast_is_unary() {
        let node = Cast::<u8, f32>::build().unwrap();
        assert_eq!(node.signature().params, None);
        assert_eq!(node.output_type(), DataType::from(f32::TYPE));
    }
}
