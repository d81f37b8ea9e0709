//! Clustering, alignment, charge state deconvolution and isotope label pairing of LC-MS features
pub mod cluster;
pub mod deconvolution;
pub mod feature;
pub mod feature_cluster;
pub mod feature_set;
pub mod grouper;
pub mod label;
pub mod pairs;
pub mod spatial;

pub use cluster::{BucketSummary, ClusterError, Clusterer2D, ToleranceKind};
pub use deconvolution::{Deconvoluter, DeconvolutionParams, OptimizationGrid};
pub use feature::{convert_mass_to_mz, convert_mz_to_mass, Feature, PROTON};
pub use feature_set::{FeatureSelector, FeatureSet, FeatureSetLoader, FeatureSetWriter};
pub use grouper::{ConflictResolver, FeatureGrouper, GroupingParams, PeptideArrayRow, PeptideArraySink};
pub use label::{IsotopicLabel, LabelRegistry};
pub use pairs::{IsotopePairMatcher, Pair, PairingParams, PairingStrategy};
