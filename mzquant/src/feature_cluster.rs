//! Clustering of [`Feature`]s over a chosen pair of coordinates
use std::collections::BTreeSet;

use crate::cluster::{
    BestTolerances, BucketEntry, BucketSummary, ClusterError, Clusterable, Clusterer2D,
    ToleranceKind,
};
use crate::feature::Feature;
use crate::feature_set::FeatureSet;

/// Which mass-like coordinate of a feature is used for dimension 1
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MassDimension {
    #[default]
    Mass,
    Mz,
}

/// Which elution coordinate of a feature is used for dimension 2
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElutionDimension {
    #[default]
    Time,
    Scan,
}

/// How a bucketing is scored during a tolerance search
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BucketScoring {
    /// Count buckets with exactly one feature from every set
    #[default]
    OneFromEach,
    /// Reward buckets whose identified features agree on a peptide and penalize
    /// buckets that mix peptides
    PeptideAgreement,
}

#[derive(Debug, Clone, Copy)]
struct FeatureView<'a> {
    feature: &'a Feature,
    mass_dimension: MassDimension,
    elution_dimension: ElutionDimension,
}

impl Clusterable for FeatureView<'_> {
    fn dimension1_value(&self) -> f64 {
        match self.mass_dimension {
            MassDimension::Mass => self.feature.mass,
            MassDimension::Mz => self.feature.mz,
        }
    }

    fn dimension2_value(&self) -> f64 {
        match self.elution_dimension {
            ElutionDimension::Time => self.feature.time,
            ElutionDimension::Scan => self.feature.scan as f64,
        }
    }
}

/// Score a bucketing by peptide agreement: +1 for each bucket where at least two
/// identified features name the same single peptide, -1 for each bucket where
/// identified features name more than one peptide.
pub fn peptide_agreement_score(sets: &[FeatureSet], buckets: &[BucketSummary]) -> i64 {
    let mut score = 0;
    for bucket in buckets {
        let mut peptides = BTreeSet::new();
        let mut identified = 0usize;
        for entry in bucket.entries.iter() {
            if let Some(pep) = sets
                .get(entry.set_index)
                .and_then(|s| s.get(entry.index))
                .and_then(|f| f.peptide())
            {
                identified += 1;
                peptides.insert(pep);
            }
        }
        if peptides.len() > 1 {
            score -= 1;
        } else if identified > 1 {
            score += 1;
        }
    }
    score
}

/// A [`Clusterer2D`] over features drawn from one or more [`FeatureSet`]s.
///
/// Dimension 1 is mass or m/z with an absolute or ppm tolerance, dimension 2 is
/// retention time or scan number.
#[derive(Debug, Clone)]
pub struct FeatureClusterer {
    mass_dimension: MassDimension,
    elution_dimension: ElutionDimension,
    clusterer: Clusterer2D<ToleranceKind>,
    sets: Vec<FeatureSet>,
}

impl FeatureClusterer {
    pub fn new(
        mass_dimension: MassDimension,
        elution_dimension: ElutionDimension,
        tolerance_kind: ToleranceKind,
    ) -> Self {
        Self {
            mass_dimension,
            elution_dimension,
            clusterer: Clusterer2D::new(tolerance_kind),
            sets: Vec::new(),
        }
    }

    pub fn mass_dimension(&self) -> MassDimension {
        self.mass_dimension
    }

    pub fn elution_dimension(&self) -> ElutionDimension {
        self.elution_dimension
    }

    pub fn tolerance_kind(&self) -> ToleranceKind {
        *self.clusterer.splitter()
    }

    /// Register a feature set under the next set index, returning that index
    pub fn add_set(&mut self, set: FeatureSet) -> usize {
        let views: Vec<FeatureView> = set
            .iter()
            .map(|feature| FeatureView {
                feature,
                mass_dimension: self.mass_dimension,
                elution_dimension: self.elution_dimension,
            })
            .collect();
        let index = self.clusterer.add_set(&views);
        self.sets.push(set);
        index
    }

    pub fn sets(&self) -> &[FeatureSet] {
        &self.sets
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    pub fn split2d(&mut self, mass_tolerance: f64, elution_tolerance: f64) -> Result<usize, ClusterError> {
        self.clusterer.split2d(mass_tolerance, elution_tolerance)
    }

    pub fn summarize(&self) -> &[BucketSummary] {
        self.clusterer.summarize()
    }

    pub fn num_buckets(&self) -> usize {
        self.clusterer.num_buckets()
    }

    pub fn rows_with_one_from_each(&self) -> usize {
        self.clusterer.rows_with_one_from_each()
    }

    pub fn count_all_entries(&self) -> usize {
        self.clusterer.count_all_entries()
    }

    pub fn last_tolerances(&self) -> Option<(f64, f64)> {
        self.clusterer.last_tolerances()
    }

    pub fn feature(&self, entry: &BucketEntry) -> Option<&Feature> {
        self.sets.get(entry.set_index)?.get(entry.index)
    }

    /// The features of a bucket paired with the index of the set they came from
    pub fn bucket_features<'a>(
        &'a self,
        bucket: &'a BucketSummary,
    ) -> impl Iterator<Item = (usize, &'a Feature)> + 'a {
        bucket
            .entries
            .iter()
            .filter_map(|e| self.feature(e).map(|f| (e.set_index, f)))
    }

    pub fn score(&self, scoring: BucketScoring) -> i64 {
        match scoring {
            BucketScoring::OneFromEach => self.rows_with_one_from_each() as i64,
            BucketScoring::PeptideAgreement => peptide_agreement_score(&self.sets, self.summarize()),
        }
    }

    pub fn calculate_best_buckets(
        &mut self,
        mass_candidates: &[f64],
        elution_candidates: &[f64],
        scoring: BucketScoring,
    ) -> Result<BestTolerances, ClusterError> {
        let sets = &self.sets;
        match scoring {
            BucketScoring::OneFromEach => self
                .clusterer
                .calculate_best_buckets(mass_candidates, elution_candidates),
            BucketScoring::PeptideAgreement => self.clusterer.calculate_best_buckets_by(
                mass_candidates,
                elution_candidates,
                |c| peptide_agreement_score(sets, c.summarize()),
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::feature::IdentificationInfo;

    fn identified(scan: i32, time: f64, mz: f64, peptide: &str) -> Feature {
        let mut f = Feature::new(scan, time, mz, 100.0, 2);
        f.identification = Some(IdentificationInfo::from_peptide(peptide, None));
        f
    }

    #[test]
    fn test_coordinate_modes() {
        let set = FeatureSet::new(vec![
            Feature::new(10, 100.0, 500.0, 10.0, 2),
            Feature::new(12, 101.0, 500.001, 10.0, 2),
            Feature::new(200, 101.5, 500.002, 10.0, 2),
        ]);

        let mut by_time = FeatureClusterer::new(MassDimension::Mz, ElutionDimension::Time, ToleranceKind::Absolute);
        by_time.add_set(set.clone());
        assert_eq!(by_time.split2d(0.01, 5.0).unwrap(), 1);

        let mut by_scan = FeatureClusterer::new(MassDimension::Mz, ElutionDimension::Scan, ToleranceKind::Absolute);
        by_scan.add_set(set.clone());
        assert_eq!(by_scan.split2d(0.01, 5.0).unwrap(), 2);

        let mut by_mass = FeatureClusterer::new(MassDimension::Mass, ElutionDimension::Time, ToleranceKind::Ppm);
        by_mass.add_set(set);
        assert_eq!(by_mass.tolerance_kind(), ToleranceKind::Ppm);
        // 0.002 m/z at charge 2 is 0.004 Da, about 4 ppm of 998 Da
        assert_eq!(by_mass.split2d(5.0, 5.0).unwrap(), 1);
        assert_eq!(by_mass.split2d(3.0, 5.0).unwrap(), 2);

        let bucket = &by_mass.summarize()[0];
        let members: Vec<_> = by_mass.bucket_features(bucket).collect();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|(set_index, _)| *set_index == 0));
    }

    #[test]
    fn test_peptide_agreement() {
        let run_a = FeatureSet::new(vec![
            identified(1, 10.0, 400.0, "PEPTIDE"),
            identified(2, 50.0, 600.0, "PEPTIDE"),
        ]);
        let run_b = FeatureSet::new(vec![
            identified(1, 11.0, 400.005, "PEPTIDE"),
            identified(2, 51.0, 600.005, "ELVISLIVES"),
        ]);
        let mut clusterer = FeatureClusterer::new(MassDimension::Mz, ElutionDimension::Time, ToleranceKind::Absolute);
        clusterer.add_set(run_a);
        clusterer.add_set(run_b);
        clusterer.split2d(0.01, 5.0).unwrap();
        assert_eq!(clusterer.num_buckets(), 2);
        assert_eq!(clusterer.score(BucketScoring::PeptideAgreement), 0);
        assert_eq!(clusterer.score(BucketScoring::OneFromEach), 2);

        let best = clusterer
            .calculate_best_buckets(&[0.001, 0.01], &[5.0], BucketScoring::PeptideAgreement)
            .unwrap();
        // Splitting everything apart scores zero, same as the first candidate
        assert_eq!(best.dimension1, 0.001);
        assert_eq!(best.score, 0);
    }
}
