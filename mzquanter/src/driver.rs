use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzquant::cluster::ClusterError;
use mzquant::deconvolution::DeconvolutionError;
use mzquant::feature::ordering;
use mzquant::feature_set::ExtraInfoKind;
use mzquant::label::LabelParseError;
use mzquant::pairs::PairingError;
use mzquant::{
    Deconvoluter, DeconvolutionParams, FeatureGrouper, FeatureSelector, FeatureSet,
    FeatureSetWriter, GroupingParams, IsotopePairMatcher, LabelRegistry, OptimizationGrid,
    PairingParams,
};

use crate::args::{
    ArgBucketScoring, ArgConflictResolver, ArgElutionDimension, ArgIdentificationMerge,
    ArgMassDimension, ArgPairingStrategy, ArgToleranceKind,
};
use crate::progress::ProgressRecord;
use crate::time_range::TimeRange;
use crate::tsv::{open_output, read_feature_set, TsvError, TsvFeatureWriter};
use crate::write::{write_peptide_array, ChannelSink, PeptideArrayWriter};

/// Read when no `--config-file` is given, if it exists
pub const DEFAULT_CONFIG_FILE: &str = "mzquanter.toml";
pub const ENV_PREFIX: &str = "MZQUANTER_";
pub const BUFFER_SIZE: usize = 1000;

fn positive_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("`{s}` is not greater than zero"))
    }
}

#[derive(Debug, Error)]
pub enum MZQuanterError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read the feature table {0}: {1}")]
    FeatureTableError(String, #[source] TsvError),
    #[error("Failed to write the feature table: {0}")]
    OutputError(#[source] TsvError),
    #[error("Invalid configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Invalid label: {0}")]
    LabelError(
        #[source]
        #[from]
        LabelParseError,
    ),
    #[error(transparent)]
    ClusterError(#[from] ClusterError),
    #[error(transparent)]
    DeconvolutionError(#[from] DeconvolutionError),
    #[error(transparent)]
    PairingError(#[from] PairingError),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
    #[error("The output writer stopped before all rows were sent")]
    WriterDisconnected,
}

/// Layer `args` under the TOML configuration file and `MZQUANTER_` environment variables
pub fn configure<T: Serialize + DeserializeOwned>(args: &T, config_file: Option<&Path>) -> Result<T, MZQuanterError> {
    let mut figment = Figment::from(Serialized::defaults(args));
    figment = match config_file {
        Some(path) => {
            debug!("Reading configuration from {}", path.display());
            figment.merge(Toml::file_exact(path))
        }
        None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
    };
    Ok(figment.merge(Env::prefixed(ENV_PREFIX)).extract()?)
}

fn read_input(path: &Path) -> Result<FeatureSet, MZQuanterError> {
    read_feature_set(path)
        .map_err(|e| MZQuanterError::FeatureTableError(path.display().to_string(), e))
}

fn write_output(path: &Path, features: &FeatureSet) -> Result<(), MZQuanterError> {
    let mut writer = TsvFeatureWriter::new(open_output(path)?);
    writer.write(features).map_err(MZQuanterError::OutputError)
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommonArgs {
    /// The path to write the output file to, or if '-' is passed, write to STDOUT.
    ///
    /// Paths ending in `.gz` are gzip-compressed.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzquanter.toml` in the working directory.
    /// Environment variables prefixed with `MZQUANTER_` will be read too.
    #[arg(long = "config-file")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(short = 't', long = "threads", default_value_t = -1)]
    pub threads: i32,

    /// The time range to process, denoted (start?)-(stop?)
    #[arg(
        short='r',
        long="time-range",
        value_parser=TimeRange::from_str,
        value_name="BEGIN-END",
        long_help=r#"The time range to process, denoted (start?)-(stop?)

If a start is not specified, features are kept from the start of the run.
If a stop is not specified, features are kept to the end of the run.
"#
    )]
    pub time_range: Option<TimeRange>,
}

impl Default for CommonArgs {
    fn default() -> Self {
        Self {
            output_file: PathBuf::from("-"),
            log_file: None,
            config_file: None,
            threads: -1,
            time_range: None,
        }
    }
}

impl CommonArgs {
    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZQuanterError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()?.into()
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    fn selector(&self) -> FeatureSelector {
        match self.time_range {
            Some(time_range) if !time_range.is_unbounded() => {
                time_range.apply(FeatureSelector::default())
            }
            _ => FeatureSelector::default(),
        }
    }

    fn select(&self, features: FeatureSet) -> FeatureSet {
        let selector = self.selector();
        if selector.is_open() {
            features
        } else {
            let subset = features.filter(&selector);
            debug!(
                "Kept {} of {} features in the time range",
                subset.len(),
                features.len()
            );
            subset
        }
    }
}

fn log_version() {
    info!(
        "mzquanter v{}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );
}

/// Collapse the charge states of each peptide in a feature table into one feature
#[derive(Args, Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeconvoluteArgs {
    /// The feature table to read, or if '-' is passed, read from STDIN
    #[arg()]
    pub input_file: PathBuf,

    #[command(flatten)]
    #[serde(flatten)]
    pub common: CommonArgs,

    /// The neutral mass tolerance between charge states, in ppm
    #[arg(short = 'm', long = "mass-tolerance", default_value_t = 15.0, value_parser = positive_float)]
    pub mass_tolerance: f64,

    /// The retention time tolerance between charge states, in seconds
    #[arg(short = 'e', long = "elution-tolerance", default_value_t = 30.0, value_parser = positive_float)]
    pub elution_tolerance: f64,

    /// Search for the tolerances that best separate charge states before deconvolving
    #[arg(long = "optimize")]
    pub optimize: bool,

    /// Include each member's description next to its charge in merged descriptions
    #[arg(long = "show-charge-descriptions")]
    pub show_charge_descriptions: bool,
}

impl Default for DeconvoluteArgs {
    fn default() -> Self {
        let params = DeconvolutionParams::default();
        Self {
            input_file: PathBuf::from("-"),
            common: CommonArgs::default(),
            mass_tolerance: params.mass_tolerance,
            elution_tolerance: params.elution_tolerance,
            optimize: false,
            show_charge_descriptions: params.show_charge_descriptions,
        }
    }
}

impl DeconvoluteArgs {
    pub fn params(&self) -> DeconvolutionParams {
        DeconvolutionParams {
            mass_tolerance: self.mass_tolerance,
            elution_tolerance: self.elution_tolerance,
            show_charge_descriptions: self.show_charge_descriptions,
        }
    }

    pub fn main(&self) -> Result<ProgressRecord, MZQuanterError> {
        log_version();
        info!("Input: {}", self.input_file.display());
        info!("Output: {}", self.common.output_file.display());
        self.common.create_threadpool()?.install(|| self.run())
    }

    fn run(&self) -> Result<ProgressRecord, MZQuanterError> {
        let start = Instant::now();
        let features = self.common.select(read_input(&self.input_file)?);
        let mut deconvoluter = Deconvoluter::new(self.params());
        if self.optimize {
            deconvoluter.optimize_parameters(&features, &OptimizationGrid::default())?;
        }
        let (merged, summary) = deconvoluter.deconvolute(&features)?;
        write_output(&self.common.output_file, &merged)?;

        let progress = ProgressRecord::from(summary);
        progress.log_deconvolution();
        info!("Elapsed Time: {:0.3?}", start.elapsed());
        Ok(progress)
    }
}

/// Align the features of several runs into a peptide array
#[derive(Args, Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlignArgs {
    /// The feature tables to align, one per run
    #[arg(required = true, num_args = 1..)]
    pub input_files: Vec<PathBuf>,

    #[command(flatten)]
    #[serde(flatten)]
    pub common: CommonArgs,

    /// The mass tolerance between runs, in the units of `--tolerance-kind`
    #[arg(short = 'm', long = "mass-tolerance", default_value_t = 0.1, value_parser = positive_float)]
    pub mass_tolerance: f64,

    #[arg(short = 'k', long = "tolerance-kind", value_enum, default_value_t = ArgToleranceKind::Da)]
    pub tolerance_kind: ArgToleranceKind,

    /// The elution tolerance between runs, in seconds or scans
    #[arg(short = 'e', long = "elution-tolerance", default_value_t = 100.0, value_parser = positive_float)]
    pub elution_tolerance: f64,

    #[arg(long = "mass-dimension", value_enum, default_value_t = ArgMassDimension::Mass)]
    pub mass_dimension: ArgMassDimension,

    #[arg(long = "elution-dimension", value_enum, default_value_t = ArgElutionDimension::Time)]
    pub elution_dimension: ArgElutionDimension,

    /// Only align features that share a charge state
    #[arg(short = 'z', long = "group-by-charge")]
    pub group_by_charge: bool,

    /// How to combine several features from one run that land in the same row
    #[arg(short = 'c', long = "conflict-resolution", value_enum, default_value_t = ArgConflictResolver::Best)]
    pub conflict_resolution: ArgConflictResolver,

    #[arg(long = "identification-merge", value_enum, default_value_t = ArgIdentificationMerge::Union)]
    pub identification_merge: ArgIdentificationMerge,

    /// Mass tolerances to try, choosing the best scoring combination with `--elution-candidates`
    #[arg(long = "mass-candidates", value_delimiter = ',', value_parser = positive_float)]
    pub mass_candidates: Vec<f64>,

    /// Elution tolerances to try, choosing the best scoring combination with `--mass-candidates`
    #[arg(long = "elution-candidates", value_delimiter = ',', value_parser = positive_float)]
    pub elution_candidates: Vec<f64>,

    #[arg(long = "scoring", value_enum, default_value_t = ArgBucketScoring::Auto)]
    pub scoring: ArgBucketScoring,

    /// The number of rows to queue for writing
    #[arg(short = 'w', long = "write-buffer-size", default_value_t = BUFFER_SIZE)]
    pub write_buffer_size: usize,
}

impl Default for AlignArgs {
    fn default() -> Self {
        let params = GroupingParams::default();
        Self {
            input_files: Vec::new(),
            common: CommonArgs::default(),
            mass_tolerance: params.mass_tolerance,
            tolerance_kind: ArgToleranceKind::Da,
            elution_tolerance: params.elution_tolerance,
            mass_dimension: ArgMassDimension::Mass,
            elution_dimension: ArgElutionDimension::Time,
            group_by_charge: params.group_by_charge,
            conflict_resolution: ArgConflictResolver::Best,
            identification_merge: ArgIdentificationMerge::Union,
            mass_candidates: Vec::new(),
            elution_candidates: Vec::new(),
            scoring: ArgBucketScoring::Auto,
            write_buffer_size: BUFFER_SIZE,
        }
    }
}

impl AlignArgs {
    pub fn params(&self) -> GroupingParams {
        GroupingParams {
            mass_tolerance: self.mass_tolerance,
            tolerance_kind: self.tolerance_kind.into(),
            elution_tolerance: self.elution_tolerance,
            mass_dimension: self.mass_dimension.into(),
            elution_dimension: self.elution_dimension.into(),
            group_by_charge: self.group_by_charge,
            conflict_resolver: self.conflict_resolution.into(),
            identification_merge: self.identification_merge.into(),
        }
    }

    pub fn main(&self) -> Result<ProgressRecord, MZQuanterError> {
        log_version();
        info!("Inputs: {}", self.input_files.len());
        info!("Output: {}", self.common.output_file.display());
        self.common.create_threadpool()?.install(|| self.run())
    }

    fn run(&self) -> Result<ProgressRecord, MZQuanterError> {
        let start = Instant::now();
        let sets: Vec<FeatureSet> = self
            .input_files
            .par_iter()
            .map(|path| read_input(path).map(|set| self.common.select(set)))
            .collect::<Result<_, _>>()?;

        let identifications = sets
            .iter()
            .any(|s| s.has_extra_info(ExtraInfoKind::Identification));
        let mut progress = ProgressRecord {
            input_sets: sets.len(),
            input_features: sets.iter().map(|s| s.len()).sum(),
            ..Default::default()
        };

        let mut grouper = FeatureGrouper::new(self.params());
        for set in sets {
            grouper.add_set(set);
        }

        if !self.mass_candidates.is_empty() && !self.elution_candidates.is_empty() {
            let best = grouper.calculate_best_buckets(
                &self.mass_candidates,
                &self.elution_candidates,
                self.scoring.resolve(identifications),
            )?;
            info!(
                "Best tolerances: mass={} elution={} (score {})",
                best.dimension1, best.dimension2, best.score
            );
        } else {
            if !self.mass_candidates.is_empty() || !self.elution_candidates.is_empty() {
                warn!("Both --mass-candidates and --elution-candidates are needed to optimize, using fixed tolerances");
            }
            grouper.split2d()?;
        }

        let (sender, receiver) = crossbeam_channel::bounded(self.write_buffer_size.max(1));
        let writer = PeptideArrayWriter::new(
            open_output(&self.common.output_file)?,
            self.group_by_charge,
            identifications,
        );
        let write_task = thread::spawn(move || write_peptide_array(writer, receiver));

        let mut sink = ChannelSink::new(sender);
        let sent = grouper.write_peptide_array(&mut sink);
        drop(sink);

        match write_task.join() {
            Ok(o) => {
                o?;
            }
            Err(e) => {
                warn!("Failed to join writer task: {e:?}");
            }
        }
        let diagnostics = sent.map_err(|_| MZQuanterError::WriterDisconnected)?;

        progress += ProgressRecord::from(diagnostics);
        progress.log_alignment();
        info!("Elapsed Time: {:0.3?}", start.elapsed());
        Ok(progress)
    }
}

/// Find light/heavy isotope label pairs in a feature table and quantify them
#[derive(Args, Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PairsArgs {
    /// The feature table to read, or if '-' is passed, read from STDIN
    #[arg()]
    pub input_file: PathBuf,

    #[command(flatten)]
    #[serde(flatten)]
    pub common: CommonArgs,

    /// A label name (icat, icat-cleavable, acrylamide, silac-k6, silac-k8, silac-r10, o18)
    /// or a description of the form <light>+<heavy delta>[#<max labels>][@<residue>]
    #[arg(short = 'L', long = "label", default_value = "icat")]
    pub label: String,

    /// The mass tolerance between expected and observed partners, in the units of `--tolerance-kind`
    #[arg(short = 'm', long = "mass-tolerance", default_value_t = 0.1, value_parser = positive_float)]
    pub mass_tolerance: f64,

    #[arg(short = 'k', long = "tolerance-kind", value_enum, default_value_t = ArgToleranceKind::Da)]
    pub tolerance_kind: ArgToleranceKind,

    /// The retention time tolerance between partners, in seconds
    #[arg(short = 'e', long = "elution-tolerance", default_value_t = 30.0, value_parser = positive_float)]
    pub elution_tolerance: f64,

    #[arg(short = 's', long = "strategy", value_enum, default_value_t = ArgPairingStrategy::MassAnchored)]
    pub strategy: ArgPairingStrategy,
}

impl Default for PairsArgs {
    fn default() -> Self {
        let params = PairingParams::default();
        Self {
            input_file: PathBuf::from("-"),
            common: CommonArgs::default(),
            label: "icat".to_string(),
            mass_tolerance: params.mass_tolerance,
            tolerance_kind: ArgToleranceKind::Da,
            elution_tolerance: params.elution_tolerance,
            strategy: ArgPairingStrategy::MassAnchored,
        }
    }
}

impl PairsArgs {
    pub fn params(&self) -> PairingParams {
        PairingParams {
            mass_tolerance: self.mass_tolerance,
            tolerance_kind: self.tolerance_kind.into(),
            elution_tolerance: self.elution_tolerance,
            strategy: self.strategy.into(),
        }
    }

    pub fn main(&self) -> Result<ProgressRecord, MZQuanterError> {
        log_version();
        info!("Input: {}", self.input_file.display());
        info!("Output: {}", self.common.output_file.display());
        self.common.create_threadpool()?.install(|| self.run())
    }

    fn run(&self) -> Result<ProgressRecord, MZQuanterError> {
        let start = Instant::now();
        let registry = LabelRegistry::with_presets();
        let label = registry.resolve(&self.label)?;
        info!("Label: {label}");
        let matcher = IsotopePairMatcher::new(&label, self.params())?;

        let features = self.common.select(read_input(&self.input_file)?);

        // Pairs never span charge states, so each partition is matched on its own
        let partitions = features.partition_by_charge();
        let quantified: Vec<FeatureSet> = partitions
            .par_iter()
            .filter(|(charge, _)| **charge != 0)
            .map(|(charge, part)| {
                let found = matcher.quantitate_set(part);
                debug!("Charge {charge}: {} pairs from {} features", found.len(), part.len());
                found
            })
            .collect();

        let mut output = features.empty_like();
        output
            .properties
            .insert("label".to_string(), label.to_string());
        for part in quantified {
            output.extend(part);
        }
        output.sort_by(ordering::by_scan_mz);
        write_output(&self.common.output_file, &output)?;

        let progress = ProgressRecord {
            input_sets: 1,
            input_features: features.len(),
            output_features: output.len(),
            pairs: output.len(),
            ..Default::default()
        };
        progress.log_pairs();
        info!("Elapsed Time: {:0.3?}", start.elapsed());
        Ok(progress)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    Deconvolute(DeconvoluteArgs),
    Align(AlignArgs),
    Pairs(PairsArgs),
}

/// Charge state deconvolution, cross-run alignment and isotope label quantitation
/// of LC-MS feature tables.
///
/// Feature tables are tab-separated text with one feature per line.
#[derive(Parser, Debug)]
#[command(author, version)]
pub struct MZQuanter {
    #[command(subcommand)]
    pub command: Command,
}

impl MZQuanter {
    pub fn common(&self) -> &CommonArgs {
        match &self.command {
            Command::Deconvolute(args) => &args.common,
            Command::Align(args) => &args.common,
            Command::Pairs(args) => &args.common,
        }
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.common().log_file.as_deref()
    }

    /// Apply the configuration layers to the chosen command and run it
    pub fn main(&self) -> Result<ProgressRecord, MZQuanterError> {
        let config_file = self.common().config_file.as_deref();
        match &self.command {
            Command::Deconvolute(args) => configure(args, config_file)?.main(),
            Command::Align(args) => configure(args, config_file)?.main(),
            Command::Pairs(args) => configure(args, config_file)?.main(),
        }
    }
}
