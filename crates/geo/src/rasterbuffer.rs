use crate::{ArrayDataType, Error, RasterNum, Result};

/// Type erased sample buffer
///
/// Used where the sample type is only known at runtime: cached blocks and regions of bands with
/// differing data types.
#[derive(Clone, Debug, PartialEq)]
pub enum RasterBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl RasterBuffer {
    /// Allocates a zero filled buffer, reports allocation failure instead of aborting.
    pub fn try_zeroed(data_type: ArrayDataType, len: usize) -> Result<Self> {
        dispatch_datatype!(data_type, T, try_zeroed_vec::<T>(len).map(T::into_buffer))
    }

    pub fn data_type(&self) -> ArrayDataType {
        match self {
            RasterBuffer::U8(_) => ArrayDataType::Uint8,
            RasterBuffer::U16(_) => ArrayDataType::Uint16,
            RasterBuffer::U32(_) => ArrayDataType::Uint32,
            RasterBuffer::U64(_) => ArrayDataType::Uint64,
            RasterBuffer::I8(_) => ArrayDataType::Int8,
            RasterBuffer::I16(_) => ArrayDataType::Int16,
            RasterBuffer::I32(_) => ArrayDataType::Int32,
            RasterBuffer::I64(_) => ArrayDataType::Int64,
            RasterBuffer::F32(_) => ArrayDataType::Float32,
            RasterBuffer::F64(_) => ArrayDataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        dispatch_rasterbuffer!(self, data, data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.data_type().size_in_bytes()
    }

    pub fn as_bytes(&self) -> &[u8] {
        dispatch_rasterbuffer!(self, data, bytemuck::cast_slice(data.as_slice()))
    }

    pub fn as_slice<T: RasterNum>(&self) -> Result<&[T]> {
        T::typed_slice(self).ok_or_else(|| self.type_mismatch(T::TYPE))
    }

    pub fn as_mut_slice<T: RasterNum>(&mut self) -> Result<&mut [T]> {
        let data_type = self.data_type();
        T::typed_slice_mut(self).ok_or_else(|| type_mismatch_error(data_type, T::TYPE))
    }

    /// Copies `len` samples starting at `offset` into `dst`, converting to the destination type when needed.
    pub fn copy_to<T: RasterNum>(&self, offset: usize, dst: &mut [T]) -> Result<()> {
        let end = offset + dst.len();
        if end > self.len() {
            return Err(Error::InvalidArgument(format!(
                "Buffer range {offset}..{end} out of bounds (length {})",
                self.len()
            )));
        }

        if let Some(src) = T::typed_slice(self) {
            dst.copy_from_slice(&src[offset..end]);
        } else {
            dispatch_rasterbuffer!(self, src, {
                for (d, s) in dst.iter_mut().zip(&src[offset..end]) {
                    *d = T::from_f64_saturating(s.as_f64());
                }
            });
        }

        Ok(())
    }

    fn type_mismatch(&self, requested: ArrayDataType) -> Error {
        type_mismatch_error(self.data_type(), requested)
    }
}

fn type_mismatch_error(actual: ArrayDataType, requested: ArrayDataType) -> Error {
    Error::InvalidArgument(format!("Buffer contains {actual} samples, {requested} requested"))
}

/// Allocates a zero filled vector, reports allocation failure instead of aborting.
pub fn try_zeroed_vec<T: RasterNum>(len: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| Error::Runtime(format!("Failed to allocate buffer of {len} {} samples: {e}", T::TYPE)))?;
    data.resize(len, <T as bytemuck::Zeroable>::zeroed());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access() -> Result<()> {
        let mut buf = RasterBuffer::try_zeroed(ArrayDataType::Uint16, 4)?;
        assert_eq!(buf.data_type(), ArrayDataType::Uint16);
        assert_eq!(buf.size_in_bytes(), 8);

        buf.as_mut_slice::<u16>()?.copy_from_slice(&[1, 2, 300, 4]);
        assert!(buf.as_slice::<u8>().is_err());

        let mut converted = [0u8; 3];
        buf.copy_to(1, &mut converted)?;
        assert_eq!(converted, [2, 255, 4]);

        let mut out_of_range = [0u16; 4];
        assert!(buf.copy_to(1, &mut out_of_range).is_err());
        Ok(())
    }
}
