//! Alignment of features across runs into a peptide array
use std::collections::BTreeMap;
use std::convert::Infallible;

use itertools::Either;
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::cluster::{BestTolerances, BucketSummary, ClusterError, ToleranceKind};
use crate::feature::Feature;
use crate::feature_cluster::{BucketScoring, ElutionDimension, FeatureClusterer, MassDimension};
use crate::feature_set::FeatureSet;

/// How multiple features from the same run in one bucket are reduced to one value
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConflictResolver {
    /// Add up all of the intensities
    Sum,
    /// Take the feature with the most isotopic peaks, then the lowest KL divergence
    #[default]
    Best,
    /// Take the most intense feature
    Max,
}

/// How peptide and protein assignments of co-bucketed features are combined
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IdentificationMerge {
    #[default]
    Union,
    Intersection,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupingParams {
    pub mass_tolerance: f64,
    pub tolerance_kind: ToleranceKind,
    pub elution_tolerance: f64,
    pub mass_dimension: MassDimension,
    pub elution_dimension: ElutionDimension,
    pub group_by_charge: bool,
    pub conflict_resolver: ConflictResolver,
    pub identification_merge: IdentificationMerge,
}

impl Default for GroupingParams {
    fn default() -> Self {
        Self {
            mass_tolerance: 0.1,
            tolerance_kind: ToleranceKind::Absolute,
            elution_tolerance: 100.0,
            mass_dimension: MassDimension::Mass,
            elution_dimension: ElutionDimension::Time,
            group_by_charge: false,
            conflict_resolver: ConflictResolver::Best,
            identification_merge: IdentificationMerge::Union,
        }
    }
}

/// Order features of one run in one bucket so the preferred feature comes first.
///
/// [`ConflictResolver::Sum`] leaves the order untouched. Sorting is stable, so features
/// that compare equal keep their relative order.
pub fn order_cluster_features(features: &mut [&Feature], resolver: ConflictResolver) {
    match resolver {
        ConflictResolver::Sum => {}
        ConflictResolver::Best => {
            features.sort_by(|a, b| b.peaks.cmp(&a.peaks).then_with(|| a.kl.total_cmp(&b.kl)))
        }
        ConflictResolver::Max => features.sort_by(|a, b| b.intensity.total_cmp(&a.intensity)),
    }
}

/// One run's contribution to a row of the peptide array
#[derive(Debug, Clone)]
pub struct ArrayCell {
    pub intensity: f64,
    pub feature_count: usize,
    /// The feature selected by the conflict resolver, or the first feature when summing
    pub representative: Feature,
    pub peptides: Vec<String>,
    pub proteins: Vec<String>,
    /// Whether more than one distinct peptide was attached to the folded features
    pub multiple_peptides: bool,
    pub multiple_proteins: bool,
}

/// A single aligned bucket across all runs
#[derive(Debug, Clone)]
pub struct PeptideArrayRow {
    pub id: usize,
    /// The charge partition this row came from, if grouping by charge
    pub charge: Option<i32>,
    pub min_mass: f64,
    pub max_mass: f64,
    pub min_elution: f64,
    pub max_elution: f64,
    pub feature_count: usize,
    pub set_count: usize,
    pub cells: Vec<Option<ArrayCell>>,
}

impl PeptideArrayRow {
    pub fn conflicting_cells(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|c| c.feature_count > 1)
            .count()
    }

    pub fn identification_conflicts(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|c| c.multiple_peptides)
            .count()
    }
}

/// Counts accumulated while emitting a peptide array
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupingDiagnostics {
    pub rows: usize,
    pub cells: usize,
    pub conflicting_cells: usize,
    pub identification_conflicts: usize,
}

impl GroupingDiagnostics {
    fn observe(&mut self, row: &PeptideArrayRow) {
        self.rows += 1;
        self.cells += row.cells.iter().flatten().count();
        self.conflicting_cells += row.conflicting_cells();
        self.identification_conflicts += row.identification_conflicts();
    }
}

/// A destination for peptide array rows, written one at a time
pub trait PeptideArraySink {
    type Error;

    fn write_header(&mut self, set_names: &[String]) -> Result<(), Self::Error>;

    fn write_row(&mut self, row: PeptideArrayRow) -> Result<(), Self::Error>;
}

impl PeptideArraySink for Vec<PeptideArrayRow> {
    type Error = Infallible;

    fn write_header(&mut self, _set_names: &[String]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn write_row(&mut self, row: PeptideArrayRow) -> Result<(), Self::Error> {
        self.push(row);
        Ok(())
    }
}

fn distinct_in_order<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut acc: Vec<String> = Vec::new();
    for v in values {
        if !acc.contains(v) {
            acc.push(v.clone());
        }
    }
    acc
}

fn merge_identifiers<'a, F>(features: &[&'a Feature], merge: IdentificationMerge, get: F) -> (Vec<String>, bool)
where
    F: Fn(&'a Feature) -> Option<&'a Vec<String>>,
{
    let lists: Vec<&Vec<String>> = features.iter().filter_map(|f| get(*f)).collect();
    let union = distinct_in_order(lists.iter().flat_map(|l| l.iter()));
    let multiple = union.len() > 1;
    let merged = match merge {
        IdentificationMerge::Union => union,
        IdentificationMerge::Intersection => union
            .into_iter()
            .filter(|v| lists.iter().all(|l| l.contains(v)))
            .collect(),
    };
    (merged, multiple)
}

fn build_cell(mut members: Vec<&Feature>, resolver: ConflictResolver, merge: IdentificationMerge) -> Option<ArrayCell> {
    order_cluster_features(&mut members, resolver);
    let representative = *members.first()?;
    let intensity = match resolver {
        ConflictResolver::Sum => members.iter().map(|f| f.intensity as f64).sum(),
        ConflictResolver::Best | ConflictResolver::Max => representative.intensity as f64,
    };
    let (peptides, multiple_peptides) = merge_identifiers(&members, merge, |f| {
        f.identification.as_ref().map(|i| &i.peptides)
    });
    let (proteins, multiple_proteins) = merge_identifiers(&members, merge, |f| {
        f.identification.as_ref().map(|i| &i.proteins)
    });
    Some(ArrayCell {
        intensity,
        feature_count: members.len(),
        representative: representative.clone(),
        peptides,
        proteins,
        multiple_peptides,
        multiple_proteins,
    })
}

fn build_row(
    id: usize,
    charge: Option<i32>,
    clusterer: &FeatureClusterer,
    bucket: &BucketSummary,
    num_sets: usize,
    resolver: ConflictResolver,
    merge: IdentificationMerge,
) -> PeptideArrayRow {
    let mut per_set: Vec<Vec<(usize, &Feature)>> = vec![Vec::new(); num_sets];
    for entry in bucket.entries.iter() {
        if let (Some(slot), Some(f)) = (per_set.get_mut(entry.set_index), clusterer.feature(entry)) {
            slot.push((entry.index, f));
        }
    }
    let cells = per_set
        .into_iter()
        .map(|mut members| {
            members.sort_by_key(|(i, _)| *i);
            build_cell(members.into_iter().map(|(_, f)| f).collect(), resolver, merge)
        })
        .collect();
    PeptideArrayRow {
        id,
        charge,
        min_mass: bucket.min_dimension1,
        max_mass: bucket.max_dimension1,
        min_elution: bucket.min_dimension2,
        max_elution: bucket.max_dimension2,
        feature_count: bucket.len(),
        set_count: bucket.set_count,
        cells,
    }
}

#[derive(Debug, Clone)]
enum Partition {
    Merged(FeatureClusterer),
    ByCharge(BTreeMap<i32, FeatureClusterer>),
}

/// Groups the features of many runs, optionally keeping each charge state apart.
///
/// Every added run gets the same set index in every underlying clusterer, so a
/// charge partition that has no features from a run still holds an empty set for it.
#[derive(Debug, Clone)]
pub struct FeatureGrouper {
    params: GroupingParams,
    partition: Partition,
    set_names: Vec<String>,
}

impl FeatureGrouper {
    pub fn new(params: GroupingParams) -> Self {
        let partition = if params.group_by_charge {
            Partition::ByCharge(BTreeMap::new())
        } else {
            Partition::Merged(Self::make_clusterer(&params))
        };
        Self {
            params,
            partition,
            set_names: Vec::new(),
        }
    }

    fn make_clusterer(params: &GroupingParams) -> FeatureClusterer {
        FeatureClusterer::new(
            params.mass_dimension,
            params.elution_dimension,
            params.tolerance_kind,
        )
    }

    pub fn params(&self) -> &GroupingParams {
        &self.params
    }

    pub fn num_sets(&self) -> usize {
        self.set_names.len()
    }

    pub fn set_names(&self) -> &[String] {
        &self.set_names
    }

    /// Register a run, returning its set index
    pub fn add_set(&mut self, set: FeatureSet) -> usize {
        let index = self.set_names.len();
        let name = set
            .source
            .clone()
            .unwrap_or_else(|| format!("set{}", index + 1));
        match &mut self.partition {
            Partition::Merged(clusterer) => {
                clusterer.add_set(set);
            }
            Partition::ByCharge(clusterers) => {
                let mut parts = set.partition_by_charge();
                for charge in parts.keys() {
                    clusterers.entry(*charge).or_insert_with(|| {
                        let mut clusterer = Self::make_clusterer(&self.params);
                        for _ in 0..index {
                            clusterer.add_set(FeatureSet::default());
                        }
                        clusterer
                    });
                }
                for (charge, clusterer) in clusterers.iter_mut() {
                    let part = parts.remove(charge).unwrap_or_else(|| set.empty_like());
                    clusterer.add_set(part);
                }
            }
        }
        self.set_names.push(name);
        index
    }

    /// The charge states being grouped separately, empty if not grouping by charge
    pub fn charges(&self) -> Vec<i32> {
        match &self.partition {
            Partition::Merged(_) => Vec::new(),
            Partition::ByCharge(clusterers) => clusterers.keys().copied().collect(),
        }
    }

    /// Each underlying clusterer with the charge it covers
    pub fn clusterers(&self) -> impl Iterator<Item = (Option<i32>, &FeatureClusterer)> + '_ {
        match &self.partition {
            Partition::Merged(c) => Either::Left(std::iter::once((None, c))),
            Partition::ByCharge(clusterers) => {
                Either::Right(clusterers.iter().map(|(z, c)| (Some(*z), c)))
            }
        }
    }

    /// Bucket every run with the configured tolerances, returning the bucket count
    #[instrument(level = "debug", skip(self))]
    pub fn split2d(&mut self) -> Result<usize, ClusterError> {
        let mass = self.params.mass_tolerance;
        let elution = self.params.elution_tolerance;
        match &mut self.partition {
            Partition::Merged(c) => c.split2d(mass, elution),
            Partition::ByCharge(clusterers) => {
                let counts: Vec<usize> = clusterers
                    .par_iter_mut()
                    .map(|(_, c)| c.split2d(mass, elution))
                    .collect::<Result<_, _>>()?;
                Ok(counts.into_iter().sum())
            }
        }
    }

    /// Replace the configured tolerances and bucket every run again
    pub fn split2d_with(&mut self, mass_tolerance: f64, elution_tolerance: f64) -> Result<usize, ClusterError> {
        self.params.mass_tolerance = mass_tolerance;
        self.params.elution_tolerance = elution_tolerance;
        self.split2d()
    }

    pub fn num_buckets(&self) -> usize {
        self.clusterers().map(|(_, c)| c.num_buckets()).sum()
    }

    pub fn rows_with_one_from_each(&self) -> usize {
        self.clusterers()
            .map(|(_, c)| c.rows_with_one_from_each())
            .sum()
    }

    pub fn count_all_entries(&self) -> usize {
        self.clusterers().map(|(_, c)| c.count_all_entries()).sum()
    }

    pub fn score(&self, scoring: BucketScoring) -> i64 {
        self.clusterers().map(|(_, c)| c.score(scoring)).sum()
    }

    /// Search the tolerance grid for the pair with the strictly highest score summed over
    /// all charge partitions, then leave the grouper split at that pair.
    #[instrument(level = "debug", skip(self))]
    pub fn calculate_best_buckets(
        &mut self,
        mass_candidates: &[f64],
        elution_candidates: &[f64],
        scoring: BucketScoring,
    ) -> Result<BestTolerances, ClusterError> {
        if mass_candidates.is_empty() || elution_candidates.is_empty() {
            return Err(ClusterError::EmptyCandidates);
        }
        let mut best: Option<BestTolerances> = None;
        for mass in mass_candidates.iter().copied() {
            for elution in elution_candidates.iter().copied() {
                self.split2d_with(mass, elution)?;
                let score = self.score(scoring);
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
        debug!(
            "Best grouping tolerances: mass={} elution={} score={}",
            best.dimension1, best.dimension2, best.score
        );
        self.split2d_with(best.dimension1, best.dimension2)?;
        Ok(best)
    }

    /// Lazily build the peptide array rows of the most recent split, numbered from 1
    pub fn rows(&self) -> impl Iterator<Item = PeptideArrayRow> + '_ {
        let num_sets = self.num_sets();
        let resolver = self.params.conflict_resolver;
        let merge = self.params.identification_merge;
        self.clusterers()
            .flat_map(|(charge, c)| c.summarize().iter().map(move |b| (charge, c, b)))
            .enumerate()
            .map(move |(i, (charge, c, bucket))| {
                build_row(i + 1, charge, c, bucket, num_sets, resolver, merge)
            })
    }

    /// Stream the peptide array into `sink`, one row at a time
    pub fn write_peptide_array<W: PeptideArraySink>(&self, sink: &mut W) -> Result<GroupingDiagnostics, W::Error> {
        let mut diagnostics = GroupingDiagnostics::default();
        sink.write_header(&self.set_names)?;
        for row in self.rows() {
            diagnostics.observe(&row);
            sink.write_row(row)?;
        }
        debug!("Wrote {} peptide array rows", diagnostics.rows);
        Ok(diagnostics)
    }
}
