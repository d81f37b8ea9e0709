//! Reading and writing feature tables as tab-separated text.
//!
//! A table starts with optional `# key=value` property lines, followed by a header
//! naming the columns, one feature per line after that. Only `scan`, `time`, `mz`,
//! `intensity` and `charge` are required when reading; `mass` is always recomputed
//! from `mz` and `charge`.
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::str::FromStr;

use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, instrument};

use mzquant::feature::{IdentificationInfo, QuantitationInfo};
use mzquant::feature_set::ExtraInfoKind;
use mzquant::{Feature, FeatureSet, FeatureSetLoader, FeatureSetWriter};

pub const BASE_COLUMNS: [&str; 17] = [
    "scan",
    "time",
    "mz",
    "accurateMZ",
    "mass",
    "intensity",
    "charge",
    "chargeStates",
    "kl",
    "background",
    "median",
    "peaks",
    "scanFirst",
    "scanLast",
    "scanCount",
    "totalIntensity",
    "sumSquaresDist",
];

const REQUIRED_COLUMNS: [&str; 5] = ["scan", "time", "mz", "intensity", "charge"];
const IDENTIFICATION_COLUMNS: [&str; 2] = ["peptide", "protein"];
const QUANTITATION_COLUMNS: [&str; 4] = ["lightIntensity", "heavyIntensity", "ratio", "labelCount"];
const DESCRIPTION_COLUMN: &str = "description";

/// Separates multiple peptides or proteins within one field
const LIST_SEPARATOR: char = ';';

#[derive(Debug, Error)]
pub enum TsvError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to parse the feature table: {0}")]
    CsvError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("The feature table has no header line")]
    MissingHeader,
    #[error("The feature table is missing the required column \"{0}\"")]
    MissingColumn(&'static str),
    #[error("Line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("Line {line}: could not parse {column} from \"{value}\"")]
    MalformedValue {
        line: usize,
        column: String,
        value: String,
    },
}

/// Open `path` for reading, or STDIN if it is `-`. Paths ending in `.gz` are decompressed.
pub fn open_input(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::BufReader::new(io::stdin())));
    }
    let handle = io::BufReader::new(fs::File::open(path)?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(io::BufReader::new(GzDecoder::new(handle))))
    } else {
        Ok(Box::new(handle))
    }
}

/// Open `path` for writing, or STDOUT if it is `-`. Paths ending in `.gz` are compressed.
pub fn open_output(path: &Path) -> io::Result<Box<dyn Write + Send>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::BufWriter::new(io::stdout())));
    }
    let handle = io::BufWriter::new(fs::File::create(path)?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzEncoder::new(handle, Compression::best())))
    } else {
        Ok(Box::new(handle))
    }
}

/// Read and parse the whole feature table at `path`
pub fn read_feature_set(path: &Path) -> Result<FeatureSet, TsvError> {
    let handle = open_input(path)?;
    let source = if path.as_os_str() == "-" {
        None
    } else {
        path.file_stem()
            .map(|s| s.to_string_lossy().trim_end_matches(".tsv").to_string())
    };
    let mut reader = TsvFeatureReader::new(handle);
    reader.source = source;
    reader.load()
}

fn table_reader<R: Read>(handle: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(handle)
}

fn table_writer<W: Write>(handle: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(handle)
}

/// Translate a record-level parse failure, shifting its line number past the property lines
fn record_error(err: csv::Error, line_offset: usize) -> TsvError {
    if let csv::ErrorKind::UnequalLengths {
        pos,
        expected_len,
        len,
    } = err.kind()
    {
        return TsvError::FieldCount {
            line: pos.as_ref().map(|p| p.line() as usize).unwrap_or_default() + line_offset,
            expected: *expected_len as usize,
            found: *len as usize,
        };
    }
    TsvError::CsvError(err)
}

struct Columns {
    positions: HashMap<String, usize>,
}

impl Columns {
    fn from_header(header: &csv::StringRecord) -> Result<Self, TsvError> {
        if header.iter().all(|name| name.is_empty()) {
            return Err(TsvError::MissingHeader);
        }
        let positions: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        for name in REQUIRED_COLUMNS {
            if !positions.contains_key(name) {
                return Err(TsvError::MissingColumn(name));
            }
        }
        Ok(Self { positions })
    }
}

struct Row<'a> {
    columns: &'a Columns,
    record: &'a csv::StringRecord,
    line: usize,
}

impl<'a> Row<'a> {
    fn new(columns: &'a Columns, record: &'a csv::StringRecord, line: usize) -> Self {
        Self {
            columns,
            record,
            line,
        }
    }

    /// The non-empty text of a column, if the table has it
    fn text(&self, name: &str) -> Option<&'a str> {
        self.columns
            .positions
            .get(name)
            .and_then(|i| self.record.get(*i))
            .filter(|s| !s.is_empty())
    }

    fn get<T: FromStr>(&self, name: &str) -> Result<Option<T>, TsvError> {
        match self.text(name) {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| TsvError::MalformedValue {
                    line: self.line,
                    column: name.to_string(),
                    value: value.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn require<T: FromStr>(&self, name: &str) -> Result<T, TsvError> {
        self.get(name)?.ok_or_else(|| TsvError::MalformedValue {
            line: self.line,
            column: name.to_string(),
            value: String::new(),
        })
    }

    fn list(&self, name: &str) -> Vec<String> {
        self.text(name)
            .map(|s| {
                s.split(LIST_SEPARATOR)
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .map(|v| v.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn to_feature(&self) -> Result<Feature, TsvError> {
        let mut feature = Feature::new(
            self.require("scan")?,
            self.require("time")?,
            self.require("mz")?,
            self.require("intensity")?,
            self.require("charge")?,
        );

        if let Some(value) = self.get("accurateMZ")? {
            feature.accurate_mz = value;
        }
        if let Some(value) = self.get("chargeStates")? {
            feature.charge_states = value;
        }
        if let Some(value) = self.get("kl")? {
            feature.kl = value;
        }
        if let Some(value) = self.get("background")? {
            feature.background = value;
        }
        if let Some(value) = self.get("median")? {
            feature.median = value;
        }
        if let Some(value) = self.get("peaks")? {
            feature.peaks = value;
        }
        if let Some(value) = self.get("scanFirst")? {
            feature.scan_first = value;
        }
        if let Some(value) = self.get("scanLast")? {
            feature.scan_last = value;
        }
        if let Some(value) = self.get("scanCount")? {
            feature.scan_count = value;
        }
        if let Some(value) = self.get("totalIntensity")? {
            feature.total_intensity = value;
        }
        if let Some(value) = self.get("sumSquaresDist")? {
            feature.sum_squares_dist = value;
        }

        let peptides = self.list("peptide");
        if !peptides.is_empty() {
            feature.identification = Some(IdentificationInfo::new(peptides, self.list("protein")));
        }

        let light: Option<f64> = self.get("lightIntensity")?;
        let heavy: Option<f64> = self.get("heavyIntensity")?;
        if let (Some(light), Some(heavy)) = (light, heavy) {
            let label_count = self.get("labelCount")?.unwrap_or(1);
            let mut quant = QuantitationInfo::new(light, heavy, label_count);
            if let Some(ratio) = self.get("ratio")? {
                quant.ratio = ratio;
            }
            feature.quantitation = Some(quant);
        }

        feature.description = self.text(DESCRIPTION_COLUMN).map(|s| s.to_string());
        Ok(feature)
    }
}

/// Parses a feature table from a buffered stream
pub struct TsvFeatureReader<R: BufRead> {
    handle: R,
    /// The name given to the loaded set
    pub source: Option<String>,
}

impl<R: BufRead> TsvFeatureReader<R> {
    pub fn new(handle: R) -> Self {
        Self {
            handle,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl<R: BufRead> FeatureSetLoader for TsvFeatureReader<R> {
    type Error = TsvError;

    #[instrument(level = "debug", skip_all, fields(source = ?self.source))]
    fn load(&mut self) -> Result<FeatureSet, Self::Error> {
        let mut properties = BTreeMap::new();
        let mut line_offset = 0;
        let mut buffer = String::new();

        // Property lines are only meaningful before the header, so they are taken off
        // the stream before the table parser sees it
        loop {
            let next = self.handle.fill_buf()?;
            if next.first() != Some(&b'#') {
                break;
            }
            buffer.clear();
            self.handle.read_line(&mut buffer)?;
            line_offset += 1;
            if let Some((key, value)) = buffer.trim_start_matches('#').split_once('=') {
                properties.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let mut reader = table_reader(&mut self.handle);
        let columns = Columns::from_header(reader.headers()?)?;

        let mut features = Vec::new();
        let mut record = csv::StringRecord::new();
        while reader
            .read_record(&mut record)
            .map_err(|e| record_error(e, line_offset))?
        {
            let line = record.position().map(|p| p.line() as usize).unwrap_or_default() + line_offset;
            features.push(Row::new(&columns, &record, line).to_feature()?);
        }

        debug!("Read {} features", features.len());
        let mut set = FeatureSet::new(features);
        set.properties = properties;
        set.source = self.source.clone();
        Ok(set)
    }
}

fn opt<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes feature tables, adding the identification, quantitation and description
/// columns only when some feature in the set needs them
pub struct TsvFeatureWriter<W: Write> {
    handle: W,
}

impl<W: Write> TsvFeatureWriter<W> {
    pub fn new(handle: W) -> Self {
        Self { handle }
    }

    pub fn into_inner(self) -> W {
        self.handle
    }

    fn feature_record(feature: &Feature, identification: bool, quantitation: bool, description: bool) -> Vec<String> {
        let mut record = vec![
            feature.scan.to_string(),
            feature.time.to_string(),
            feature.mz.to_string(),
            feature.accurate_mz.to_string(),
            feature.mass.to_string(),
            feature.intensity.to_string(),
            feature.charge.to_string(),
            feature.charge_states.to_string(),
            feature.kl.to_string(),
            feature.background.to_string(),
            feature.median.to_string(),
            feature.peaks.to_string(),
            feature.scan_first.to_string(),
            feature.scan_last.to_string(),
            feature.scan_count.to_string(),
            feature.total_intensity.to_string(),
            feature.sum_squares_dist.to_string(),
        ];
        if identification {
            let ident = feature.identification.as_ref();
            record.push(ident.map(|i| i.peptides.iter().join(";")).unwrap_or_default());
            record.push(ident.map(|i| i.proteins.iter().join(";")).unwrap_or_default());
        }
        if quantitation {
            let quant = feature.quantitation.as_ref();
            record.extend([
                opt(quant.map(|q| q.light_intensity)),
                opt(quant.map(|q| q.heavy_intensity)),
                opt(quant.map(|q| q.ratio)),
                opt(quant.map(|q| q.label_count)),
            ]);
        }
        if description {
            record.push(feature.description.clone().unwrap_or_default());
        }
        record
    }
}

impl<W: Write> FeatureSetWriter for TsvFeatureWriter<W> {
    type Error = TsvError;

    #[instrument(level = "debug", skip_all, fields(features = features.len()))]
    fn write(&mut self, features: &FeatureSet) -> Result<(), Self::Error> {
        let identification = features.has_extra_info(ExtraInfoKind::Identification);
        let quantitation = features.has_extra_info(ExtraInfoKind::Quantitation);
        let description = features.iter().any(|f| f.description.is_some());

        for (key, value) in features.properties.iter() {
            writeln!(self.handle, "# {key}={value}")?;
        }

        let mut header: Vec<&str> = BASE_COLUMNS.to_vec();
        if identification {
            header.extend(IDENTIFICATION_COLUMNS);
        }
        if quantitation {
            header.extend(QUANTITATION_COLUMNS);
        }
        if description {
            header.push(DESCRIPTION_COLUMN);
        }

        let mut writer = table_writer(&mut self.handle);
        writer.write_record(&header)?;
        for feature in features.iter() {
            writer.write_record(Self::feature_record(feature, identification, quantitation, description))?;
        }
        writer.flush()?;
        drop(writer);
        self.handle.flush()?;
        Ok(())
    }
}
