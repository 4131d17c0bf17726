//! Element-wise arithmetic with a bound operand.

use std::marker::PhantomData;

use crate::element::{DataType, Element, Pixel};
use crate::operation::BinaryBehavior;

macro_rules! arithmetic_op {
    ($(#[$doc:meta])* $name:ident, $label:literal, |$a:ident, $b:ident| $body:expr) => {
        $(#[$doc])*
        pub struct $name<T>(PhantomData<T>);

        impl<T: Element> BinaryBehavior for $name<T> {
            type Params = T;

            const NAME: &'static str = $label;

            fn input_type(_: &T) -> DataType {
                T::TYPE.into()
            }

            fn output_type(_: &T) -> DataType {
                T::TYPE.into()
            }

            #[inline]
            fn exec(input: Pixel, operand: &T) -> Pixel {
                let lanes = input.zip_with(operand.to_pixel(), T::TYPE.channels(), |$a, $b| $body);
                T::TYPE.coerce(lanes)
            }
        }
    };
}

arithmetic_op!(
    /// `input + operand`.
    Add, "Add", |a, b| a + b
);
arithmetic_op!(
    /// `input - operand`.
    Sub, "Sub", |a, b| a - b
);
arithmetic_op!(
    /// `input * operand`.
    Mul, "Mul", |a, b| a * b
);
arithmetic_op!(
    /// `input / operand`. Integer division truncates toward zero.
    Div, "Div", |a, b| a / b
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_channel_operand() {
        let out = Mul::<[f32; 2]>::exec([2.0f32, 3.0].to_pixel(), &[3.0, 5.0]);
        assert_eq!(<[f32; 2]>::from_pixel(out), [6.0, 15.0]);
    }

    #[test]
    fn test_integer_results_stay_in_range() {
        assert_eq!(u8::from_pixel(Add::<u8>::exec(250u8.to_pixel(), &10)), 255);
        assert_eq!(u8::from_pixel(Sub::<u8>::exec(3u8.to_pixel(), &10)), 0);
        assert_eq!(i32::from_pixel(Div::<i32>::exec((-7i32).to_pixel(), &2)), -3);
    }

    #[test]
    fn test_signature() {
        let node = Add::<[u16; 3]>::build([1, 2, 3]).unwrap();
        assert_eq!(node.input_type(), DataType::from(<[u16; 3]>::TYPE));
        assert_eq!(node.output_type(), node.input_type());
        assert!(node.signature().params.is_some());
    }
}
