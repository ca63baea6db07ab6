use crate::{Error, Result};

/// The numeric type of the samples of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ArrayDataType {
    Int8 = 0,
    Uint8 = 1,
    Int16 = 2,
    Uint16 = 3,
    Int32 = 4,
    Uint32 = 5,
    Int64 = 6,
    Uint64 = 7,
    Float32 = 8,
    Float64 = 9,
}

impl ArrayDataType {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Int8 => "Int8",
            Self::Uint8 => "Byte",
            Self::Int16 => "Int16",
            Self::Uint16 => "UInt16",
            Self::Int32 => "Int32",
            Self::Uint32 => "UInt32",
            Self::Int64 => "Int64",
            Self::Uint64 => "UInt64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
        }
    }

    pub const fn size_in_bytes(&self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }

    pub const fn size_in_bits(&self) -> u32 {
        (self.size_in_bytes() * 8) as u32
    }

    pub const fn is_integer(&self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }

    pub const fn is_unsigned_integer(&self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64)
    }
}

impl std::fmt::Display for ArrayDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl std::str::FromStr for ArrayDataType {
    type Err = Error;

    /// Parses the type names as they appear in raster dataset descriptions (case insensitive)
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "int8" => Self::Int8,
            "byte" | "uint8" => Self::Uint8,
            "int16" => Self::Int16,
            "uint16" => Self::Uint16,
            "int32" => Self::Int32,
            "uint32" => Self::Uint32,
            "int64" => Self::Int64,
            "uint64" => Self::Uint64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            _ => return Err(Error::InvalidArgument(format!("Unsupported data type: {s}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_data_type_names() -> Result<()> {
        assert_eq!("Byte".parse::<ArrayDataType>()?, ArrayDataType::Uint8);
        assert_eq!("uint16".parse::<ArrayDataType>()?, ArrayDataType::Uint16);
        assert_eq!("Float32".parse::<ArrayDataType>()?, ArrayDataType::Float32);
        assert!("CFloat64".parse::<ArrayDataType>().is_err());

        assert_eq!(ArrayDataType::Uint16.size_in_bits(), 16);
        assert!(ArrayDataType::Uint32.is_unsigned_integer());
        assert!(!ArrayDataType::Float64.is_integer());
        Ok(())
    }
}
