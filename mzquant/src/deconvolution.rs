//! Collapse the charge states of the same peptide into single features
use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, trace};

use crate::cluster::{BestTolerances, ClusterError, ToleranceKind};
use crate::feature::{Feature, IdentificationInfo, QuantitationInfo};
use crate::feature_cluster::{ElutionDimension, FeatureClusterer, MassDimension};
use crate::feature_set::FeatureSet;
use crate::grouper::{FeatureGrouper, GroupingParams};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeconvolutionError {
    #[error("Invalid clustering configuration: {0}")]
    Cluster(#[from] ClusterError),
    #[error("Invalid optimization grid for {dimension}: min={min}, max={max}, step={step}")]
    InvalidGrid {
        dimension: &'static str,
        min: f64,
        max: f64,
        step: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeconvolutionParams {
    /// The mass tolerance in parts-per-million
    pub mass_tolerance: f64,
    /// The retention time tolerance in seconds
    pub elution_tolerance: f64,
    /// Annotate each charge in a merged feature's description with the member's own description
    pub show_charge_descriptions: bool,
}

impl Default for DeconvolutionParams {
    fn default() -> Self {
        Self {
            mass_tolerance: 15.0,
            elution_tolerance: 30.0,
            show_charge_descriptions: false,
        }
    }
}

/// The ranges searched by [`Deconvoluter::optimize_parameters`], bounds inclusive
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptimizationGrid {
    pub mass_min: f64,
    pub mass_max: f64,
    pub mass_step: f64,
    pub elution_min: f64,
    pub elution_max: f64,
    pub elution_step: f64,
}

impl Default for OptimizationGrid {
    fn default() -> Self {
        Self {
            mass_min: 2.0,
            mass_max: 30.0,
            mass_step: 2.0,
            elution_min: 10.0,
            elution_max: 100.0,
            elution_step: 10.0,
        }
    }
}

fn grid_axis(dimension: &'static str, min: f64, max: f64, step: f64) -> Result<Vec<f64>, DeconvolutionError> {
    if !(step > 0.0 && min <= max && min.is_finite() && max.is_finite()) {
        return Err(DeconvolutionError::InvalidGrid {
            dimension,
            min,
            max,
            step,
        });
    }
    let n = ((max - min) / step + 1e-9).floor() as usize;
    Ok((0..=n).map(|i| min + i as f64 * step).collect())
}

impl OptimizationGrid {
    pub fn mass_candidates(&self) -> Result<Vec<f64>, DeconvolutionError> {
        grid_axis("mass", self.mass_min, self.mass_max, self.mass_step)
    }

    pub fn elution_candidates(&self) -> Result<Vec<f64>, DeconvolutionError> {
        grid_axis("elution", self.elution_min, self.elution_max, self.elution_step)
    }
}

/// Counts describing one deconvolution pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeconvolutionSummary {
    pub input_features: usize,
    pub output_features: usize,
    /// Buckets with more than one member that were merged into a single feature
    pub merged_buckets: usize,
    /// Merged buckets whose members named more than one peptide, so no identification was kept
    pub identification_conflicts: usize,
    /// Features with unknown charge, copied through unchanged
    pub uncharged_features: usize,
}

fn has_same_charge_pair(members: &[&Feature]) -> bool {
    let mut seen = BTreeSet::new();
    members.iter().any(|f| !seen.insert(f.charge))
}

fn merge_identification(members: &[&Feature]) -> Result<Option<IdentificationInfo>, ()> {
    let identified: Vec<&IdentificationInfo> = members
        .iter()
        .filter_map(|f| f.identification.as_ref())
        .filter(|i| !i.is_empty())
        .collect();
    let peptides: BTreeSet<&String> = identified.iter().flat_map(|i| i.peptides.iter()).collect();
    match peptides.len() {
        0 => Ok(None),
        1 => {
            let mut proteins: Vec<String> = Vec::new();
            for p in identified.iter().flat_map(|i| i.proteins.iter()) {
                if !proteins.contains(p) {
                    proteins.push(p.clone());
                }
            }
            Ok(Some(IdentificationInfo::new(
                peptides.into_iter().cloned().collect(),
                proteins,
            )))
        }
        _ => Err(()),
    }
}

fn charge_description(members: &[&Feature], annotate: bool) -> String {
    let mut ordered = members.to_vec();
    ordered.sort_by_key(|f| f.charge);
    let parts: Vec<String> = ordered
        .iter()
        .map(|f| match (annotate, f.description.as_deref()) {
            (true, Some(d)) if !d.is_empty() => format!("{} ({})", f.charge, d),
            _ => f.charge.to_string(),
        })
        .collect();
    parts.join(", ")
}

/// Merges features that look like the same peptide at different charge states.
///
/// Features are clustered on neutral mass (ppm tolerance) and retention time. Each
/// bucket with more than one member becomes one feature copied from its most abundant
/// member by total intensity, holding the summed intensities and the count of distinct
/// charges.
#[derive(Debug, Default, Clone)]
pub struct Deconvoluter {
    params: DeconvolutionParams,
}

impl Deconvoluter {
    pub fn new(params: DeconvolutionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DeconvolutionParams {
        &self.params
    }

    pub fn set_tolerances(&mut self, mass_tolerance: f64, elution_tolerance: f64) {
        self.params.mass_tolerance = mass_tolerance;
        self.params.elution_tolerance = elution_tolerance;
    }

    fn make_grouper(&self, charged: FeatureSet) -> FeatureGrouper {
        let mut grouper = FeatureGrouper::new(GroupingParams {
            mass_tolerance: self.params.mass_tolerance,
            tolerance_kind: ToleranceKind::Ppm,
            elution_tolerance: self.params.elution_tolerance,
            mass_dimension: MassDimension::Mass,
            elution_dimension: ElutionDimension::Time,
            group_by_charge: false,
            ..Default::default()
        });
        grouper.add_set(charged);
        grouper
    }

    fn charged_features(features: &FeatureSet) -> FeatureSet {
        let mut charged = features.empty_like();
        charged.extend(features.iter().filter(|f| f.charge != 0).cloned());
        charged
    }

    fn merge_bucket(&self, members: &[&Feature], summary: &mut DeconvolutionSummary) -> Option<Feature> {
        let mut best = *members.first()?;
        for f in members.iter().skip(1) {
            if f.total_intensity > best.total_intensity {
                best = *f;
            }
        }
        let mut merged = best.clone();
        merged.comprised = None;
        merged.intensity = members.iter().map(|f| f.intensity).sum();
        merged.total_intensity = members.iter().map(|f| f.total_intensity).sum();
        merged.charge_states = members.iter().map(|f| f.charge).collect::<BTreeSet<_>>().len() as u32;
        merged.scan_first = members.iter().map(|f| f.scan_first).min().unwrap_or(best.scan_first);
        merged.scan_last = members.iter().map(|f| f.scan_last).max().unwrap_or(best.scan_last);
        merged.description = Some(charge_description(
            members,
            self.params.show_charge_descriptions,
        ));

        merged.identification = match merge_identification(members) {
            Ok(ident) => ident,
            Err(()) => {
                trace!("Dropping conflicting identifications for {merged}");
                summary.identification_conflicts += 1;
                None
            }
        };

        let mut quant: Option<QuantitationInfo> = None;
        for q in members.iter().filter_map(|f| f.quantitation.as_ref()) {
            match quant.as_mut() {
                Some(acc) => acc.merge(q),
                None => quant = Some(*q),
            }
        }
        merged.quantitation = quant;

        merged.comprised = Some(members.iter().map(|f| (*f).clone()).collect::<Arc<[Feature]>>());
        Some(merged)
    }

    /// Produce a new feature set in which each cluster of charge states is one feature.
    ///
    /// Features with an unknown charge state are copied through at the end.
    #[instrument(level = "debug", skip_all, fields(features = features.len()))]
    pub fn deconvolute(&self, features: &FeatureSet) -> Result<(FeatureSet, DeconvolutionSummary), DeconvolutionError> {
        let mut summary = DeconvolutionSummary {
            input_features: features.len(),
            ..Default::default()
        };
        let mut output = features.empty_like();
        if features.is_empty() {
            return Ok((output, summary));
        }

        let mut grouper = self.make_grouper(Self::charged_features(features));
        grouper.split2d()?;

        for (_, clusterer) in grouper.clusterers() {
            for bucket in clusterer.summarize() {
                let members: Vec<&Feature> = clusterer.bucket_features(bucket).map(|(_, f)| f).collect();
                if members.len() == 1 {
                    output.push(members[0].clone());
                } else if let Some(merged) = self.merge_bucket(&members, &mut summary) {
                    summary.merged_buckets += 1;
                    output.push(merged);
                }
            }
        }

        for f in features.iter().filter(|f| f.charge == 0) {
            summary.uncharged_features += 1;
            output.push(f.clone());
        }

        summary.output_features = output.len();
        debug!(
            "Deconvolution merged {} buckets, {} -> {} features",
            summary.merged_buckets, summary.input_features, summary.output_features
        );
        if summary.identification_conflicts > 0 {
            info!(
                "{} merged features had conflicting peptide identifications",
                summary.identification_conflicts
            );
        }
        Ok((output, summary))
    }

    /// Score a bucketing: +1 for each multi-member bucket whose members all differ in
    /// charge, -1 for each multi-member bucket holding two features of the same charge.
    pub fn charge_separation_score(clusterer: &FeatureClusterer) -> i64 {
        let mut score = 0;
        for bucket in clusterer.summarize() {
            if bucket.len() < 2 {
                continue;
            }
            let members: Vec<&Feature> = clusterer.bucket_features(bucket).map(|(_, f)| f).collect();
            if has_same_charge_pair(&members) {
                score -= 1;
            } else {
                score += 1;
            }
        }
        score
    }

    /// Search `grid` for the tolerances with the strictly highest
    /// [`Deconvoluter::charge_separation_score`] and adopt them.
    #[instrument(level = "debug", skip_all, fields(features = features.len()))]
    pub fn optimize_parameters(
        &mut self,
        features: &FeatureSet,
        grid: &OptimizationGrid,
    ) -> Result<BestTolerances, DeconvolutionError> {
        let mass_candidates = grid.mass_candidates()?;
        let elution_candidates = grid.elution_candidates()?;
        let mut grouper = self.make_grouper(Self::charged_features(features));

        let mut best: Option<BestTolerances> = None;
        for mass in mass_candidates.iter().copied() {
            for elution in elution_candidates.iter().copied() {
                grouper.split2d_with(mass, elution)?;
                let score: i64 = grouper
                    .clusterers()
                    .map(|(_, c)| Self::charge_separation_score(c))
                    .sum();
                trace!("mass={mass} ppm elution={elution} score={score}");
                if best.map_or(true, |b| score > b.score) {
                    best = Some(BestTolerances {
                        dimension1: mass,
                        dimension2: elution,
                        score,
                    });
                }
            }
        }
        let best = best.ok_or(ClusterError::EmptyCandidates)?;
        info!(
            "Optimal deconvolution tolerances: {} ppm, {} sec (score {})",
            best.dimension1, best.dimension2, best.score
        );
        self.set_tolerances(best.dimension1, best.dimension2);
        Ok(best)
    }
}
