use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use mzquant::feature_cluster::{BucketScoring, ElutionDimension, MassDimension};
use mzquant::grouper::IdentificationMerge;
use mzquant::{ConflictResolver, PairingStrategy, ToleranceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgToleranceKind {
    /// Tolerances are given in Daltons
    #[default]
    Da,
    /// Tolerances are given in parts-per-million of the reference mass
    Ppm,
}

impl From<ArgToleranceKind> for ToleranceKind {
    fn from(value: ArgToleranceKind) -> Self {
        match value {
            ArgToleranceKind::Da => ToleranceKind::Absolute,
            ArgToleranceKind::Ppm => ToleranceKind::Ppm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgMassDimension {
    /// Cluster on neutral mass
    #[default]
    Mass,
    /// Cluster on the observed m/z
    Mz,
}

impl From<ArgMassDimension> for MassDimension {
    fn from(value: ArgMassDimension) -> Self {
        match value {
            ArgMassDimension::Mass => MassDimension::Mass,
            ArgMassDimension::Mz => MassDimension::Mz,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgElutionDimension {
    /// Cluster on retention time
    #[default]
    Time,
    /// Cluster on scan number
    Scan,
}

impl From<ArgElutionDimension> for ElutionDimension {
    fn from(value: ArgElutionDimension) -> Self {
        match value {
            ArgElutionDimension::Time => ElutionDimension::Time,
            ArgElutionDimension::Scan => ElutionDimension::Scan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgConflictResolver {
    /// Add up the intensities of all of a run's features in the row
    Sum,
    /// Keep the feature with the most isotopic peaks, then the best envelope fit
    #[default]
    Best,
    /// Keep the most intense feature
    Max,
}

impl Display for ArgConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<ArgConflictResolver> for ConflictResolver {
    fn from(value: ArgConflictResolver) -> Self {
        match value {
            ArgConflictResolver::Sum => ConflictResolver::Sum,
            ArgConflictResolver::Best => ConflictResolver::Best,
            ArgConflictResolver::Max => ConflictResolver::Max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgIdentificationMerge {
    /// Report every peptide seen in a cell
    #[default]
    Union,
    /// Report only the peptides every identified feature in a cell agrees on
    Intersection,
}

impl From<ArgIdentificationMerge> for IdentificationMerge {
    fn from(value: ArgIdentificationMerge) -> Self {
        match value {
            ArgIdentificationMerge::Union => IdentificationMerge::Union,
            ArgIdentificationMerge::Intersection => IdentificationMerge::Intersection,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgBucketScoring {
    /// Use peptide agreement when any run carries identifications, otherwise rows with one feature per run
    #[default]
    Auto,
    /// Count rows holding exactly one feature from every run
    OneFromEach,
    /// Reward rows whose identified features agree on a peptide, penalize those that disagree
    PeptideAgreement,
}

impl ArgBucketScoring {
    pub fn resolve(self, has_identifications: bool) -> BucketScoring {
        match self {
            ArgBucketScoring::Auto if has_identifications => BucketScoring::PeptideAgreement,
            ArgBucketScoring::Auto => BucketScoring::OneFromEach,
            ArgBucketScoring::OneFromEach => BucketScoring::OneFromEach,
            ArgBucketScoring::PeptideAgreement => BucketScoring::PeptideAgreement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgPairingStrategy {
    /// Start from the most intense features and consider every label count
    #[default]
    MassAnchored,
    /// Walk features in m/z order looking for a single heavy partner
    IntensityAnchored,
}

impl From<ArgPairingStrategy> for PairingStrategy {
    fn from(value: ArgPairingStrategy) -> Self {
        match value {
            ArgPairingStrategy::MassAnchored => PairingStrategy::MassAnchored,
            ArgPairingStrategy::IntensityAnchored => PairingStrategy::IntensityAnchored,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_scoring_resolution() {
        assert_eq!(ArgBucketScoring::Auto.resolve(true), BucketScoring::PeptideAgreement);
        assert_eq!(ArgBucketScoring::Auto.resolve(false), BucketScoring::OneFromEach);
        assert_eq!(
            ArgBucketScoring::OneFromEach.resolve(true),
            BucketScoring::OneFromEach
        );
    }

    #[test]
    fn test_value_names() {
        let v = ArgPairingStrategy::from_str("intensity-anchored", false).unwrap();
        assert_eq!(PairingStrategy::from(v), PairingStrategy::IntensityAnchored);
        let v = ArgToleranceKind::from_str("ppm", true).unwrap();
        assert_eq!(ToleranceKind::from(v), ToleranceKind::Ppm);
    }
}
