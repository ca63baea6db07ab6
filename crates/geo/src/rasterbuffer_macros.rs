//! Macros for dispatching on `RasterBuffer` and `ArrayDataType` variants.

/// Dispatch on the `RasterBuffer` variants and evaluate an expression with the inner `Vec` bound to `$var`.
///
/// # Example
///
/// ```ignore
/// let len = dispatch_rasterbuffer!(buffer, data, data.len());
/// ```
#[macro_export]
macro_rules! dispatch_rasterbuffer {
    ($buffer:expr, $var:ident, $expr:expr) => {
        match $buffer {
            $crate::RasterBuffer::U8($var) => $expr,
            $crate::RasterBuffer::U16($var) => $expr,
            $crate::RasterBuffer::U32($var) => $expr,
            $crate::RasterBuffer::U64($var) => $expr,
            $crate::RasterBuffer::I8($var) => $expr,
            $crate::RasterBuffer::I16($var) => $expr,
            $crate::RasterBuffer::I32($var) => $expr,
            $crate::RasterBuffer::I64($var) => $expr,
            $crate::RasterBuffer::F32($var) => $expr,
            $crate::RasterBuffer::F64($var) => $expr,
        }
    };
}

/// Dispatch on `ArrayDataType` and evaluate an expression with `$t` bound to the corresponding Rust type.
///
/// # Example
///
/// ```ignore
/// dispatch_datatype!(data_type, T, engine.process_region::<T>(window, T::typed_slice_mut(&mut buf)))
/// ```
#[macro_export]
macro_rules! dispatch_datatype {
    ($data_type:expr, $t:ident, $expr:expr) => {
        match $data_type {
            $crate::ArrayDataType::Uint8 => {
                type $t = u8;
                $expr
            }
            $crate::ArrayDataType::Uint16 => {
                type $t = u16;
                $expr
            }
            $crate::ArrayDataType::Uint32 => {
                type $t = u32;
                $expr
            }
            $crate::ArrayDataType::Uint64 => {
                type $t = u64;
                $expr
            }
            $crate::ArrayDataType::Int8 => {
                type $t = i8;
                $expr
            }
            $crate::ArrayDataType::Int16 => {
                type $t = i16;
                $expr
            }
            $crate::ArrayDataType::Int32 => {
                type $t = i32;
                $expr
            }
            $crate::ArrayDataType::Int64 => {
                type $t = i64;
                $expr
            }
            $crate::ArrayDataType::Float32 => {
                type $t = f32;
                $expr
            }
            $crate::ArrayDataType::Float64 => {
                type $t = f64;
                $expr
            }
        }
    };
}
