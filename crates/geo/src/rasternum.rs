use crate::{ArrayDataType, RasterBuffer};

/// Type requirements for the samples of raster bands
///
/// All intermediate computations are done in `f64`, conversion back to the sample type
/// rounds half away from zero and saturates at the bounds of the type for integral types.
/// Floating point types are passed through unclamped.
pub trait RasterNum:
    Copy + Send + Sync + 'static + num::NumCast + num::Bounded + PartialOrd + std::fmt::Debug + std::fmt::Display + bytemuck::Pod
{
    const TYPE: ArrayDataType;
    const IS_INTEGER: bool;

    fn from_f64_saturating(val: f64) -> Self;
    fn as_f64(self) -> f64;

    /// The value closest to `nodata` that is not `nodata` itself.
    /// Used to prevent valid results from being reported as nodata.
    fn nearest_valid_value(nodata: Self) -> Self;

    fn typed_slice(buffer: &RasterBuffer) -> Option<&[Self]>;
    fn typed_slice_mut(buffer: &mut RasterBuffer) -> Option<&mut [Self]>;
    fn into_buffer(data: Vec<Self>) -> RasterBuffer;
}

macro_rules! buffer_access_impl {
    ($variant:ident) => {
        fn typed_slice(buffer: &RasterBuffer) -> Option<&[Self]> {
            match buffer {
                RasterBuffer::$variant(data) => Some(data),
                _ => None,
            }
        }

        fn typed_slice_mut(buffer: &mut RasterBuffer) -> Option<&mut [Self]> {
            match buffer {
                RasterBuffer::$variant(data) => Some(data),
                _ => None,
            }
        }

        fn into_buffer(data: Vec<Self>) -> RasterBuffer {
            RasterBuffer::$variant(data)
        }
    };
}

macro_rules! rasternum_int_impl {
    ($t:ty, $raster_type:ident, $variant:ident) => {
        impl RasterNum for $t {
            const TYPE: ArrayDataType = ArrayDataType::$raster_type;
            const IS_INTEGER: bool = true;

            #[inline]
            fn from_f64_saturating(val: f64) -> Self {
                // float to int casts saturate and map NaN to 0
                val.round() as $t
            }

            #[inline]
            fn as_f64(self) -> f64 {
                self as f64
            }

            fn nearest_valid_value(nodata: Self) -> Self {
                if nodata == <$t>::MIN { <$t>::MIN + 1 } else { nodata - 1 }
            }

            buffer_access_impl!($variant);
        }
    };
}

macro_rules! rasternum_fp_impl {
    ($t:ty, $raster_type:ident, $variant:ident) => {
        impl RasterNum for $t {
            const TYPE: ArrayDataType = ArrayDataType::$raster_type;
            const IS_INTEGER: bool = false;

            #[inline]
            fn from_f64_saturating(val: f64) -> Self {
                val as $t
            }

            #[inline]
            fn as_f64(self) -> f64 {
                self as f64
            }

            fn nearest_valid_value(nodata: Self) -> Self {
                (nodata as f64 + 1e-5) as $t
            }

            buffer_access_impl!($variant);
        }
    };
}

rasternum_int_impl!(i8, Int8, I8);
rasternum_int_impl!(i16, Int16, I16);
rasternum_int_impl!(i32, Int32, I32);
rasternum_int_impl!(i64, Int64, I64);
rasternum_int_impl!(u8, Uint8, U8);
rasternum_int_impl!(u16, Uint16, U16);
rasternum_int_impl!(u32, Uint32, U32);
rasternum_int_impl!(u64, Uint64, U64);
rasternum_fp_impl!(f32, Float32, F32);
rasternum_fp_impl!(f64, Float64, F64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_conversion_rounds_half_away_from_zero() {
        assert_eq!(u8::from_f64_saturating(2.5), 3);
        assert_eq!(u8::from_f64_saturating(2.49), 2);
        assert_eq!(i16::from_f64_saturating(-2.5), -3);
        assert_eq!(u8::from_f64_saturating(266.7), 255);
        assert_eq!(u8::from_f64_saturating(-4.0), 0);
        assert_eq!(u16::from_f64_saturating(f64::NAN), 0);
        assert_eq!(i8::from_f64_saturating(-1000.0), i8::MIN);
        assert_eq!(f32::from_f64_saturating(1e10), 1e10_f32);
        assert_eq!(f64::from_f64_saturating(-0.25), -0.25);
    }

    #[test]
    fn nearest_valid_value() {
        assert_eq!(u8::nearest_valid_value(0), 1);
        assert_eq!(u8::nearest_valid_value(255), 254);
        assert_eq!(i16::nearest_valid_value(i16::MIN), i16::MIN + 1);
        assert_eq!(i16::nearest_valid_value(-9999), -10000);
        assert!(f32::nearest_valid_value(0.0) > 0.0);
    }
}
