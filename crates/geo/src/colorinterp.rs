/// Color interpretation of a raster band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorInterpretation {
    #[default]
    Undefined,
    Gray,
    Palette,
    Red,
    Green,
    Blue,
    Alpha,
    /// Near infrared, or any other spectral range without a dedicated variant
    Other,
}

impl ColorInterpretation {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Gray => "Gray",
            Self::Palette => "Palette",
            Self::Red => "Red",
            Self::Green => "Green",
            Self::Blue => "Blue",
            Self::Alpha => "Alpha",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for ColorInterpretation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}
