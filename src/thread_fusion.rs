//! Thread fusion: several consecutive logical elements per execution unit.
//!
//! When the leading read and the final write both move small elements
//! (one or two channels), one execution unit can serve `elems_per_thread`
//! consecutive elements along `x`, turning `k` narrow loads and stores into
//! one wide access. The factor is bounded by the lane count of a value and
//! by [`MAX_FUSED_BYTES`].
//!
//! Outputs are identical with and without fusion; only the grid changes.

use crate::element::{DataType, ElemType, MAX_LANES};
use crate::MAX_FUSED_BYTES;

/// Fusion factor of one dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadFusionInfo {
    elems_per_thread: u32,
}

impl ThreadFusionInfo {
    /// One element per unit.
    pub const DISABLED: ThreadFusionInfo = ThreadFusionInfo {
        elems_per_thread: 1,
    };

    /// Fusion factor for a pipeline reading `read` and writing `write`.
    ///
    /// Returns [`DISABLED`](Self::DISABLED) unless fusion is `requested`,
    /// both types are concrete 1- or 2-channel elements, and the computed
    /// factor is greater than one.
    pub fn new(read: DataType, write: DataType, requested: bool) -> Self {
        if !requested {
            return Self::DISABLED;
        }
        let (Some(read), Some(write)) = (read.elem(), write.elem()) else {
            return Self::DISABLED;
        };
        if !eligible(read) || !eligible(write) {
            return Self::DISABLED;
        }
        let channels = read.channels().max(write.channels());
        let bytes = read.scalar().size_bytes().max(write.scalar().size_bytes());
        let factor = (MAX_LANES / channels).min(MAX_FUSED_BYTES / bytes);
        if factor > 1 {
            Self {
                elems_per_thread: factor as u32,
            }
        } else {
            Self::DISABLED
        }
    }

    #[inline]
    pub fn elems_per_thread(&self) -> u32 {
        self.elems_per_thread
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.elems_per_thread > 1
    }

    /// Number of execution units covering `width` elements.
    #[inline]
    pub fn grid_width(&self, width: u32) -> u32 {
        width.div_ceil(self.elems_per_thread)
    }

    /// True if `width` splits into whole units.
    #[inline]
    pub fn is_divisible(&self, width: u32) -> bool {
        width % self.elems_per_thread == 0
    }
}

impl Default for ThreadFusionInfo {
    fn default() -> Self {
        Self::DISABLED
    }
}

fn eligible(ty: ElemType) -> bool {
    matches!(ty.channels(), 1 | 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;

    fn ty<T: Element>() -> DataType {
        T::TYPE.into()
    }

    #[test]
    fn test_factor_from_channels_and_bytes() {
        // 4 lanes / 1 channel, 16 bytes / 4 bytes.
        assert_eq!(ThreadFusionInfo::new(ty::<f32>(), ty::<f32>(), true).elems_per_thread(), 4);
        // 4 lanes / 2 channels.
        assert_eq!(
            ThreadFusionInfo::new(ty::<[u8; 2]>(), ty::<[f32; 2]>(), true).elems_per_thread(),
            2
        );
        // 16 bytes / 8 bytes.
        assert_eq!(ThreadFusionInfo::new(ty::<f64>(), ty::<u8>(), true).elems_per_thread(), 2);
        // 4 lanes / 2 channels and 16 / 8 bytes.
        assert_eq!(
            ThreadFusionInfo::new(ty::<[f64; 2]>(), ty::<[f64; 2]>(), true).elems_per_thread(),
            2
        );
    }

    #[test]
    fn test_disabled_cases() {
        assert!(!ThreadFusionInfo::new(ty::<f32>(), ty::<f32>(), false).is_enabled());
        assert!(!ThreadFusionInfo::new(ty::<[u8; 3]>(), ty::<[u8; 3]>(), true).is_enabled());
        assert!(!ThreadFusionInfo::new(ty::<f32>(), ty::<[f32; 4]>(), true).is_enabled());
        assert!(!ThreadFusionInfo::new(DataType::Null, ty::<f32>(), true).is_enabled());
        assert_eq!(ThreadFusionInfo::default(), ThreadFusionInfo::DISABLED);
    }

    #[test]
    fn test_grid_width() {
        let tf = ThreadFusionInfo::new(ty::<f32>(), ty::<f32>(), true);
        assert_eq!(tf.grid_width(37), 10);
        assert!(!tf.is_divisible(37));
        assert_eq!(tf.grid_width(40), 10);
        assert!(tf.is_divisible(40));
        assert_eq!(ThreadFusionInfo::DISABLED.grid_width(37), 37);
    }
}
