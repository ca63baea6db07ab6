//! The XML description of a pansharpened dataset
//!
//! The document follows the VRT pansharpened dataset dialect:
//!
//! ```xml
//! <VRTDataset subClass="VRTPansharpenedDataset">
//!   <PansharpeningOptions>
//!     <AlgorithmOptions>
//!       <Weights>0.3,0.7</Weights>
//!     </AlgorithmOptions>
//!     <PanchroBand>
//!       <SourceFilename relativeToVRT="1">pan.tif</SourceFilename>
//!       <SourceBand>1</SourceBand>
//!     </PanchroBand>
//!     <SpectralBand dstBand="1">
//!       <SourceFilename relativeToVRT="1">ms.tif</SourceFilename>
//!       <SourceBand>1</SourceBand>
//!     </SpectralBand>
//!   </PansharpeningOptions>
//! </VRTDataset>
//! ```

use std::path::{Path, PathBuf};

use geo::{ArrayDataType, BandIndex, RasterSize, ResampleAlg, band_index};
use itertools::Itertools;
use xml::{
    EmitterConfig, EventReader, EventWriter,
    reader::XmlEvent,
    writer::XmlEvent as WriteEvent,
};

use crate::{
    Error, Result,
    options::{NumThreads, PansharpenAlgorithm},
    reconcile::SpatialExtentAdjustment,
};

const DATASET_ELEMENT: &str = "VRTDataset";
const DATASET_SUBCLASS: &str = "VRTPansharpenedDataset";
const BAND_ELEMENT: &str = "VRTRasterBand";
const PANSHARPENED_BAND_SUBCLASS: &str = "VRTPansharpenedRasterBand";
const OPTIONS_ELEMENT: &str = "PansharpeningOptions";

/// Reference to a band of a raster file
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub filename: PathBuf,
    /// The filename is relative to the directory of the document
    pub relative_to_vrt: bool,
    pub band: BandIndex,
}

impl SourceRef {
    pub fn new(filename: impl Into<PathBuf>, band: BandIndex) -> Self {
        SourceRef {
            filename: filename.into(),
            relative_to_vrt: false,
            band,
        }
    }

    /// Reference to `path`, stored relative to `base_dir` when the path is located below it
    pub fn with_base_dir(path: &Path, band: BandIndex, base_dir: Option<&Path>) -> Self {
        match base_dir.and_then(|dir| path.strip_prefix(dir).ok()) {
            Some(relative) if path.is_absolute() => SourceRef {
                filename: relative.to_path_buf(),
                relative_to_vrt: true,
                band,
            },
            _ => SourceRef::new(path, band),
        }
    }

    /// The path to open
    pub fn resolve(&self, base_dir: Option<&Path>) -> PathBuf {
        match base_dir {
            Some(dir) if self.relative_to_vrt => dir.join(&self.filename),
            _ => self.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectralBandConfig {
    /// Absent when the spectral bands are provided as opened bands
    pub source: Option<SourceRef>,
    /// The 1-based output band this spectral band is sharpened into, input only when absent
    pub dst_band: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NoDataSetting {
    /// Use the nodata value of the panchromatic band if all spectral bands agree
    #[default]
    Inherit,
    /// Ignore the nodata values of the sources
    Disabled,
    Value(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BandKind {
    Pansharpened,
    /// Band copied from a source without pansharpening, reads 0 without a source
    Passthrough { source: Option<SourceRef> },
}

/// Explicit declaration of an output band
#[derive(Debug, Clone, PartialEq)]
pub struct BandDeclaration {
    /// 1-based band number
    pub band: usize,
    pub data_type: Option<ArrayDataType>,
    pub kind: BandKind,
}

/// Description of a pansharpened dataset
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PansharpenConfig {
    /// Declared dataset size, must match the (adjusted) panchromatic band
    pub raster_size: Option<RasterSize>,
    pub block_size: Option<RasterSize>,
    /// Explicit band declarations, the bands are derived from the spectral band mapping when empty
    pub bands: Vec<BandDeclaration>,
    pub algorithm: PansharpenAlgorithm,
    /// Uniform weights when absent
    pub weights: Option<Vec<f64>>,
    /// Cubic when absent
    pub resampling: Option<ResampleAlg>,
    pub num_threads: Option<NumThreads>,
    /// NBITS of the first spectral band when absent
    pub bit_depth: Option<u32>,
    pub nodata: NoDataSetting,
    pub ms_shift_x: f64,
    pub ms_shift_y: f64,
    pub spatial_extent_adjustment: SpatialExtentAdjustment,
    /// Absent when the panchromatic band is provided as an opened band
    pub panchro_band: Option<SourceRef>,
    pub spectral_bands: Vec<SpectralBandConfig>,
}

impl PansharpenConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)
            .map_err(|e| Error::Runtime(format!("Failed to read '{}': {e}", path.display())))?;
        Self::from_xml(&xml)
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let root = parse_tree(xml)?;
        if !root.name.eq_ignore_ascii_case(DATASET_ELEMENT) {
            return Err(Error::Config(format!("Expected {DATASET_ELEMENT} root element, got {}", root.name)));
        }

        if let Some(sub_class) = root.attribute("subClass")
            && !sub_class.eq_ignore_ascii_case(DATASET_SUBCLASS)
        {
            return Err(Error::Config(format!("Unsupported dataset subClass: {sub_class}")));
        }

        let raster_size = match (root.attribute("rasterXSize"), root.attribute("rasterYSize")) {
            (Some(x), Some(y)) => Some(RasterSize::with_rows_cols(
                parse_value("rasterYSize", y)?,
                parse_value("rasterXSize", x)?,
            )),
            (None, None) => None,
            _ => return Err(Error::Config("rasterXSize and rasterYSize must be specified together".to_string())),
        };

        let block_size = match (root.child_text("BlockXSize"), root.child_text("BlockYSize")) {
            (None, None) => None,
            (x, y) => Some(RasterSize::with_rows_cols(
                y.map(|v| parse_value("BlockYSize", v)).transpose()?.unwrap_or(DEFAULT_BLOCK_SIZE),
                x.map(|v| parse_value("BlockXSize", v)).transpose()?.unwrap_or(DEFAULT_BLOCK_SIZE),
            )),
        };

        let bands = root
            .children_named(BAND_ELEMENT)
            .enumerate()
            .map(|(i, band)| parse_band_declaration(band, i + 1))
            .collect::<Result<Vec<_>>>()?;

        let options = root
            .child(OPTIONS_ELEMENT)
            .ok_or_else(|| Error::Config(format!("Missing {OPTIONS_ELEMENT}")))?;

        let algorithm = match options.child_text("Algorithm") {
            Some(alg) => alg.parse()?,
            None => PansharpenAlgorithm::default(),
        };

        let weights = options
            .child("AlgorithmOptions")
            .and_then(|alg_options| alg_options.child_text("Weights"))
            .map(parse_weights)
            .transpose()?;

        let resampling = options
            .child_text("Resampling")
            .map(|s| {
                s.parse::<ResampleAlg>()
                    .map_err(|_| Error::Config(format!("Unsupported Resampling: {s}")))
            })
            .transpose()?;

        let num_threads = options
            .child_text("NumThreads")
            .map(|s| NumThreads::parse(s).map_err(|_| Error::Config(format!("Invalid value for NumThreads: {s}"))))
            .transpose()?;

        let bit_depth = options
            .child_text("BitDepth")
            .map(|s| parse_value("BitDepth", s))
            .transpose()?;

        let nodata = match options.child_text("NoData") {
            None => NoDataSetting::Inherit,
            Some(s) if s.eq_ignore_ascii_case("None") => NoDataSetting::Disabled,
            Some(s) => NoDataSetting::Value(parse_value("NoData", s)?),
        };

        let ms_shift_x = options
            .child_text("MSShiftX")
            .map(|s| parse_value("MSShiftX", s))
            .transpose()?
            .unwrap_or(0.0);
        let ms_shift_y = options
            .child_text("MSShiftY")
            .map(|s| parse_value("MSShiftY", s))
            .transpose()?
            .unwrap_or(0.0);

        let spatial_extent_adjustment = match options.child_text("SpatialExtentAdjustment") {
            Some(s) => s.parse()?,
            None => SpatialExtentAdjustment::default(),
        };

        let panchro_band = options
            .child("PanchroBand")
            .map(|band| parse_source_ref(band, "PanchroBand"))
            .transpose()?;

        let spectral_bands = options
            .children_named("SpectralBand")
            .map(parse_spectral_band)
            .collect::<Result<Vec<_>>>()?;

        Ok(PansharpenConfig {
            raster_size,
            block_size,
            bands,
            algorithm,
            weights,
            resampling,
            num_threads,
            bit_depth,
            nodata,
            ms_shift_x,
            ms_shift_y,
            spatial_extent_adjustment,
            panchro_band,
            spectral_bands,
        })
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut output = Vec::new();
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .write_document_declaration(false)
            .create_writer(&mut output);

        let mut root = WriteEvent::start_element(DATASET_ELEMENT).attr("subClass", DATASET_SUBCLASS);
        let size = self.raster_size.map(|size| (size.cols.to_string(), size.rows.to_string()));
        if let Some((cols, rows)) = &size {
            root = root.attr("rasterXSize", cols.as_str()).attr("rasterYSize", rows.as_str());
        }
        writer.write(root)?;

        if let Some(block_size) = self.block_size {
            write_text_element(&mut writer, "BlockXSize", &block_size.cols.to_string())?;
            write_text_element(&mut writer, "BlockYSize", &block_size.rows.to_string())?;
        }

        for band in &self.bands {
            write_band_declaration(&mut writer, band)?;
        }

        writer.write(WriteEvent::start_element(OPTIONS_ELEMENT))?;
        write_text_element(&mut writer, "Algorithm", self.algorithm.to_str())?;
        if let Some(weights) = &self.weights {
            writer.write(WriteEvent::start_element("AlgorithmOptions"))?;
            write_text_element(&mut writer, "Weights", &weights.iter().join(","))?;
            writer.write(WriteEvent::end_element())?;
        }

        if let Some(resampling) = self.resampling {
            write_text_element(&mut writer, "Resampling", resampling.to_str())?;
        }

        match self.num_threads {
            Some(NumThreads::AllCpus) => write_text_element(&mut writer, "NumThreads", "ALL_CPUS")?,
            Some(NumThreads::Count(count)) => write_text_element(&mut writer, "NumThreads", &count.to_string())?,
            None => {}
        }

        if let Some(bit_depth) = self.bit_depth {
            write_text_element(&mut writer, "BitDepth", &bit_depth.to_string())?;
        }

        match self.nodata {
            NoDataSetting::Inherit => {}
            NoDataSetting::Disabled => write_text_element(&mut writer, "NoData", "None")?,
            NoDataSetting::Value(nodata) => write_text_element(&mut writer, "NoData", &nodata.to_string())?,
        }

        if self.ms_shift_x != 0.0 {
            write_text_element(&mut writer, "MSShiftX", &self.ms_shift_x.to_string())?;
        }
        if self.ms_shift_y != 0.0 {
            write_text_element(&mut writer, "MSShiftY", &self.ms_shift_y.to_string())?;
        }

        write_text_element(&mut writer, "SpatialExtentAdjustment", self.spatial_extent_adjustment.to_str())?;

        if let Some(panchro) = &self.panchro_band {
            writer.write(WriteEvent::start_element("PanchroBand"))?;
            write_source_ref(&mut writer, panchro)?;
            writer.write(WriteEvent::end_element())?;
        }

        for spectral in &self.spectral_bands {
            let dst_band = spectral.dst_band.map(|band| band.to_string());
            let mut element = WriteEvent::start_element("SpectralBand");
            if let Some(dst_band) = &dst_band {
                element = element.attr("dstBand", dst_band.as_str());
            }
            writer.write(element)?;
            if let Some(source) = &spectral.source {
                write_source_ref(&mut writer, source)?;
            }
            writer.write(WriteEvent::end_element())?;
        }

        writer.write(WriteEvent::end_element())?; // PansharpeningOptions
        writer.write(WriteEvent::end_element())?; // VRTDataset
        drop(writer);

        String::from_utf8(output).map_err(|e| Error::Xml(format!("Invalid UTF-8 in XML output: {e}")))
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_xml()?)?;
        Ok(())
    }
}

/// Default block width and height
pub const DEFAULT_BLOCK_SIZE: usize = 512;

fn parse_value<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {field}: '{value}'")))
}

fn parse_weights(weights: &str) -> Result<Vec<f64>> {
    weights
        .split([',', ' ', '\t', '\n', '\r'])
        .filter(|w| !w.is_empty())
        .map(|w| parse_value("Weights", w))
        .collect()
}

fn parse_band_number(context: &str, value: &str) -> Result<BandIndex> {
    band_index(parse_value(context, value)?).map_err(|_| Error::Config(format!("{context}: invalid band {value}")))
}

fn parse_source_ref(element: &Element, context: &str) -> Result<SourceRef> {
    let filename_element = element
        .child("SourceFilename")
        .ok_or_else(|| Error::Config(format!("{context}.SourceFilename missing")))?;

    let filename = filename_element.text.trim();
    if filename.is_empty() {
        return Err(Error::Config(format!("{context}.SourceFilename missing")));
    }

    let relative_to_vrt = filename_element
        .attribute("relativeToVRT")
        .is_some_and(|v| v.trim() == "1" || v.trim().eq_ignore_ascii_case("true"));

    let band = match element.child_text("SourceBand") {
        Some(band) => parse_band_number(&format!("{context}.SourceBand"), band)?,
        None => geo::FIRST_BAND,
    };

    Ok(SourceRef {
        filename: PathBuf::from(filename),
        relative_to_vrt,
        band,
    })
}

fn parse_spectral_band(element: &Element) -> Result<SpectralBandConfig> {
    let dst_band = match element.attribute("dstBand") {
        Some(dst) => match dst.trim().parse::<i64>() {
            Ok(band) if band >= 1 => Some(band as usize),
            _ => return Err(Error::Config(format!("SpectralBand.dstBand = '{dst}' invalid, dstBand must be >= 1"))),
        },
        None => None,
    };

    let source = match element.child("SourceFilename") {
        Some(_) => Some(parse_source_ref(element, "SpectralBand")?),
        None => None,
    };

    Ok(SpectralBandConfig { source, dst_band })
}

fn parse_band_declaration(element: &Element, position: usize) -> Result<BandDeclaration> {
    let band = match element.attribute("band") {
        Some(band) => parse_value("VRTRasterBand.band", band)?,
        None => position,
    };

    if band != position {
        return Err(Error::Config(format!("VRTRasterBand band = {band} declared at position {position}")));
    }

    let data_type = element
        .attribute("dataType")
        .map(|dt| dt.parse::<ArrayDataType>().map_err(|_| Error::Config(format!("Unsupported dataType: {dt}"))))
        .transpose()?;

    let kind = match element.attribute("subClass") {
        Some(sub_class) if sub_class.eq_ignore_ascii_case(PANSHARPENED_BAND_SUBCLASS) => BandKind::Pansharpened,
        _ => BandKind::Passthrough {
            source: element
                .children
                .iter()
                .find(|child| child.name.eq_ignore_ascii_case("SimpleSource") || child.name.eq_ignore_ascii_case("ComplexSource"))
                .map(|source| parse_source_ref(source, &format!("VRTRasterBand {band} source")))
                .transpose()?,
        },
    };

    Ok(BandDeclaration { band, data_type, kind })
}

fn write_text_element<W: std::io::Write>(writer: &mut EventWriter<W>, name: &str, value: &str) -> Result<()> {
    writer.write(WriteEvent::start_element(name))?;
    writer.write(WriteEvent::characters(value))?;
    writer.write(WriteEvent::end_element())?;
    Ok(())
}

fn write_source_ref<W: std::io::Write>(writer: &mut EventWriter<W>, source: &SourceRef) -> Result<()> {
    let filename = source.filename.to_string_lossy();
    writer.write(
        WriteEvent::start_element("SourceFilename").attr("relativeToVRT", if source.relative_to_vrt { "1" } else { "0" }),
    )?;
    writer.write(WriteEvent::characters(&filename))?;
    writer.write(WriteEvent::end_element())?;
    write_text_element(writer, "SourceBand", &source.band.to_string())
}

fn write_band_declaration<W: std::io::Write>(writer: &mut EventWriter<W>, band: &BandDeclaration) -> Result<()> {
    let band_nr = band.band.to_string();
    let mut element = WriteEvent::start_element(BAND_ELEMENT);
    if let Some(data_type) = band.data_type {
        element = element.attr("dataType", data_type.to_str());
    }
    element = element.attr("band", band_nr.as_str());

    match &band.kind {
        BandKind::Pansharpened => {
            writer.write(element.attr("subClass", PANSHARPENED_BAND_SUBCLASS))?;
        }
        BandKind::Passthrough { source } => {
            writer.write(element)?;
            if let Some(source) = source {
                writer.write(WriteEvent::start_element("SimpleSource"))?;
                write_source_ref(writer, source)?;
                writer.write(WriteEvent::end_element())?;
            }
        }
    }

    writer.write(WriteEvent::end_element())?;
    Ok(())
}

/// Minimal element tree of a parsed document, element and attribute names are matched case insensitive
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children_named(name).next()
    }

    fn children_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name.eq_ignore_ascii_case(name))
    }

    /// Trimmed text content of the first child with the given name
    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|child| child.text.trim())
    }
}

fn parse_tree(xml: &str) -> Result<Element> {
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    for event in EventReader::from_str(xml) {
        match event? {
            XmlEvent::StartElement { name, attributes, .. } => {
                stack.push(Element {
                    name: name.local_name,
                    attributes: attributes
                        .into_iter()
                        .map(|attr| (attr.name.local_name, attr.value))
                        .collect(),
                    ..Default::default()
                });
            }
            XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            XmlEvent::EndElement { .. } => {
                let element = stack.pop().ok_or_else(|| Error::Xml("Unbalanced end element".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            _ => {}
        }
    }

    root.ok_or_else(|| Error::Xml("Empty XML document".to_string()))
}
