//! A generic two dimensional bucketing engine over sets of points
use mzpeaks::Tolerance;
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// An error that might occur while configuring a clustering pass
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    #[error("Tolerance for dimension {dimension} must be a positive finite number, got {value}")]
    InvalidTolerance { dimension: usize, value: f64 },
    #[error("Cannot search an empty grid of candidate tolerances")]
    EmptyCandidates,
}

/// Anything which can be viewed as a point in two dimensions for clustering
pub trait Clusterable {
    fn dimension1_value(&self) -> f64;
    fn dimension2_value(&self) -> f64;
}

impl Clusterable for (f64, f64) {
    fn dimension1_value(&self) -> f64 {
        self.0
    }

    fn dimension2_value(&self) -> f64 {
        self.1
    }
}

/// Compute the half-width of a bucket along dimension 1 around a reference value
pub trait Dimension1Split {
    fn dimension1_for_split(&self, reference: f64, tolerance: f64) -> f64;
}

/// Whether a tolerance is an absolute width or parts-per-million of the reference value
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ToleranceKind {
    #[default]
    Absolute,
    Ppm,
}

impl ToleranceKind {
    pub fn tolerance(&self, value: f64) -> Tolerance {
        match self {
            Self::Absolute => Tolerance::Da(value),
            Self::Ppm => Tolerance::PPM(value),
        }
    }
}

impl Dimension1Split for ToleranceKind {
    fn dimension1_for_split(&self, reference: f64, tolerance: f64) -> f64 {
        match self {
            Self::Absolute => tolerance,
            Self::Ppm => {
                let (lo, hi) = self.tolerance(tolerance).bounds(reference);
                (hi - lo).abs() / 2.0
            }
        }
    }
}

/// The coordinates of a registered point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterPoint {
    pub dimension1: f64,
    pub dimension2: f64,
}

impl<C: Clusterable> From<&C> for ClusterPoint {
    fn from(value: &C) -> Self {
        Self {
            dimension1: value.dimension1_value(),
            dimension2: value.dimension2_value(),
        }
    }
}

/// A reference from a bucket back to the point that was placed in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketEntry {
    pub set_index: usize,
    pub index: usize,
}

/// The aggregated description of one bucket produced by [`Clusterer2D::split2d`]
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSummary {
    pub min_dimension1: f64,
    pub max_dimension1: f64,
    pub min_dimension2: f64,
    pub max_dimension2: f64,
    /// The number of distinct sets contributing to this bucket
    pub set_count: usize,
    /// The members of the bucket, in the order they were absorbed
    pub entries: Vec<BucketEntry>,
}

impl BucketSummary {
    fn from_anchor(entry: BucketEntry, point: &ClusterPoint) -> Self {
        Self {
            min_dimension1: point.dimension1,
            max_dimension1: point.dimension1,
            min_dimension2: point.dimension2,
            max_dimension2: point.dimension2,
            set_count: 1,
            entries: vec![entry],
        }
    }

    fn absorb(&mut self, entry: BucketEntry, point: &ClusterPoint) {
        self.min_dimension1 = self.min_dimension1.min(point.dimension1);
        self.max_dimension1 = self.max_dimension1.max(point.dimension1);
        self.min_dimension2 = self.min_dimension2.min(point.dimension2);
        self.max_dimension2 = self.max_dimension2.max(point.dimension2);
        self.entries.push(entry);
    }

    fn recount_sets(&mut self) {
        let mut sets: Vec<usize> = self.entries.iter().map(|e| e.set_index).collect();
        sets.sort_unstable();
        sets.dedup();
        self.set_count = sets.len();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the bucket holds exactly one point from each of `num_sets` sets
    pub fn has_one_from_each(&self, num_sets: usize) -> bool {
        self.entries.len() == num_sets && self.set_count == num_sets
    }

    pub fn entries_for_set(&self, set_index: usize) -> impl Iterator<Item = &BucketEntry> + '_ {
        self.entries.iter().filter(move |e| e.set_index == set_index)
    }
}

/// The outcome of a tolerance grid search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestTolerances {
    pub dimension1: f64,
    pub dimension2: f64,
    pub score: i64,
}

fn validate_tolerance(dimension: usize, value: f64) -> Result<f64, ClusterError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ClusterError::InvalidTolerance { dimension, value })
    }
}

/// Partitions every point across every registered set into buckets.
///
/// A bucket is seeded by the lowest dimension-1 point not yet placed and absorbs
/// every unplaced point no further than the split width from the anchor along
/// dimension 1, so long as the bucket's dimension-2 extent stays within the
/// dimension-2 tolerance. Ties along dimension 1 are visited in set order and then
/// insertion order, so a pass is reproducible for fixed inputs.
#[derive(Debug, Clone, Default)]
pub struct Clusterer2D<S: Dimension1Split = ToleranceKind> {
    splitter: S,
    sets: Vec<Vec<ClusterPoint>>,
    buckets: Vec<BucketSummary>,
    last_tolerances: Option<(f64, f64)>,
}

impl<S: Dimension1Split> Clusterer2D<S> {
    pub fn new(splitter: S) -> Self {
        Self {
            splitter,
            sets: Vec::new(),
            buckets: Vec::new(),
            last_tolerances: None,
        }
    }

    pub fn splitter(&self) -> &S {
        &self.splitter
    }

    /// Register a group of points under the next set index, returning that index
    pub fn add_set<'a, C, I>(&mut self, points: I) -> usize
    where
        C: Clusterable + 'a,
        I: IntoIterator<Item = &'a C>,
    {
        let set: Vec<ClusterPoint> = points.into_iter().map(ClusterPoint::from).collect();
        self.sets.push(set);
        self.sets.len() - 1
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    pub fn point(&self, entry: &BucketEntry) -> Option<&ClusterPoint> {
        self.sets.get(entry.set_index)?.get(entry.index)
    }

    pub fn last_tolerances(&self) -> Option<(f64, f64)> {
        self.last_tolerances
    }

    /// Discard the previous partition and bucket every registered point again.
    ///
    /// Returns the number of buckets produced.
    #[instrument(level = "debug", skip(self))]
    pub fn split2d(
        &mut self,
        dimension1_tolerance: f64,
        dimension2_tolerance: f64,
    ) -> Result<usize, ClusterError> {
        let dimension1_tolerance = validate_tolerance(1, dimension1_tolerance)?;
        let dimension2_tolerance = validate_tolerance(2, dimension2_tolerance)?;

        let mut order: Vec<(BucketEntry, ClusterPoint)> = self
            .sets
            .iter()
            .enumerate()
            .flat_map(|(set_index, set)| {
                set.iter()
                    .enumerate()
                    .map(move |(index, p)| (BucketEntry { set_index, index }, *p))
            })
            .collect();
        order.sort_by(|(_, a), (_, b)| a.dimension1.total_cmp(&b.dimension1));

        let mut placed = vec![false; order.len()];
        let mut buckets = Vec::new();

        for i in 0..order.len() {
            if placed[i] {
                continue;
            }
            placed[i] = true;
            let (anchor_entry, anchor) = &order[i];
            let width = self
                .splitter
                .dimension1_for_split(anchor.dimension1, dimension1_tolerance);
            let mut bucket = BucketSummary::from_anchor(*anchor_entry, anchor);

            for j in (i + 1)..order.len() {
                let (entry, point) = &order[j];
                if point.dimension1 - anchor.dimension1 > width {
                    break;
                }
                if placed[j] {
                    continue;
                }
                let lo = bucket.min_dimension2.min(point.dimension2);
                let hi = bucket.max_dimension2.max(point.dimension2);
                if hi - lo <= dimension2_tolerance {
                    placed[j] = true;
                    bucket.absorb(*entry, point);
                }
            }
            bucket.recount_sets();
            buckets.push(bucket);
        }

        trace!(
            "Split {} points into {} buckets",
            order.len(),
            buckets.len()
        );
        self.buckets = buckets;
        self.last_tolerances = Some((dimension1_tolerance, dimension2_tolerance));
        Ok(self.buckets.len())
    }

    /// The buckets produced by the most recent [`Clusterer2D::split2d`] call
    pub fn summarize(&self) -> &[BucketSummary] {
        &self.buckets
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn rows_with_one_from_each(&self) -> usize {
        let n = self.sets.len();
        self.buckets
            .iter()
            .filter(|b| b.has_one_from_each(n))
            .count()
    }

    pub fn count_all_entries(&self) -> usize {
        self.sets.iter().map(|s| s.len()).sum()
    }

    /// Search every pair of candidate tolerances for the one that maximizes
    /// [`Clusterer2D::rows_with_one_from_each`], leaving the clusterer split at the winner.
    pub fn calculate_best_buckets(
        &mut self,
        dimension1_candidates: &[f64],
        dimension2_candidates: &[f64],
    ) -> Result<BestTolerances, ClusterError> {
        self.calculate_best_buckets_by(dimension1_candidates, dimension2_candidates, |c| {
            c.rows_with_one_from_each() as i64
        })
    }

    /// As [`Clusterer2D::calculate_best_buckets`] with a caller supplied score.
    ///
    /// The first candidate pair with the strictly highest score wins.
    pub fn calculate_best_buckets_by<F>(
        &mut self,
        dimension1_candidates: &[f64],
        dimension2_candidates: &[f64],
        mut score: F,
    ) -> Result<BestTolerances, ClusterError>
    where
        F: FnMut(&Self) -> i64,
    {
        if dimension1_candidates.is_empty() || dimension2_candidates.is_empty() {
            return Err(ClusterError::EmptyCandidates);
        }
        let mut best: Option<BestTolerances> = None;
        for d1 in dimension1_candidates.iter().copied() {
            for d2 in dimension2_candidates.iter().copied() {
                self.split2d(d1, d2)?;
                let s = score(self);
                trace!("Tolerances ({d1}, {d2}) scored {s}");
                if best.map_or(true, |b| s > b.score) {
                    best = Some(BestTolerances {
                        dimension1: d1,
                        dimension2: d2,
                        score: s,
                    });
                }
            }
        }
        let best = best.ok_or(ClusterError::EmptyCandidates)?;
        debug!(
            "Best tolerances ({}, {}) with score {}",
            best.dimension1, best.dimension2, best.score
        );
        self.split2d(best.dimension1, best.dimension2)?;
        Ok(best)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_clusterer() -> Clusterer2D {
        let mut clusterer = Clusterer2D::new(ToleranceKind::Absolute);
        let run_a = vec![(100.0, 10.0), (200.0, 20.0), (300.0, 30.0), (300.05, 80.0)];
        let run_b = vec![(100.02, 11.0), (200.03, 22.0), (400.0, 40.0)];
        let run_c = vec![(100.04, 12.0), (200.5, 20.5)];
        clusterer.add_set(&run_a);
        clusterer.add_set(&run_b);
        clusterer.add_set(&run_c);
        clusterer
    }

    #[test_log::test]
    fn test_split2d() {
        let mut clusterer = make_clusterer();
        assert_eq!(clusterer.count_all_entries(), 9);
        let n = clusterer.split2d(0.1, 5.0).unwrap();
        let buckets = clusterer.summarize();
        assert_eq!(n, buckets.len());
        assert_eq!(n, 6);

        let first = &buckets[0];
        assert_eq!(first.len(), 3);
        assert_eq!(first.set_count, 3);
        assert!(first.has_one_from_each(3));
        assert_eq!(first.min_dimension1, 100.0);
        assert_eq!(first.max_dimension1, 100.04);
        assert_eq!(first.min_dimension2, 10.0);
        assert_eq!(first.max_dimension2, 12.0);
        assert_eq!(clusterer.rows_with_one_from_each(), 1);

        let total: usize = buckets.iter().map(|b| b.len()).sum();
        assert_eq!(total, clusterer.count_all_entries());

        // 300.05 is within the mass window of 300.0 but too far away in time
        let split_by_time = buckets.iter().filter(|b| b.min_dimension1 >= 300.0 && b.max_dimension1 < 301.0).count();
        assert_eq!(split_by_time, 2);
    }

    #[test]
    fn test_pairwise_within_tolerance() {
        let mut clusterer = make_clusterer();
        clusterer.split2d(0.6, 5.0).unwrap();
        for bucket in clusterer.summarize() {
            assert!(bucket.max_dimension1 - bucket.min_dimension1 <= 0.6);
            assert!(bucket.max_dimension2 - bucket.min_dimension2 <= 5.0);
        }
        let second = &clusterer.summarize()[1];
        assert_eq!(second.len(), 3);
        let entries: Vec<_> = second.entries_for_set(2).collect();
        assert_eq!(entries, vec![&BucketEntry { set_index: 2, index: 1 }]);
        assert_eq!(clusterer.point(entries[0]).unwrap().dimension1, 200.5);
    }

    #[test]
    fn test_idempotent() {
        let mut clusterer = make_clusterer();
        clusterer.split2d(0.1, 5.0).unwrap();
        let first = clusterer.summarize().to_vec();
        clusterer.split2d(0.1, 5.0).unwrap();
        assert_eq!(first, clusterer.summarize());
    }

    #[test]
    fn test_well_separated_buckets_merge_as_tolerance_grows() {
        let mut clusterer = make_clusterer();
        let mut last = usize::MAX;
        for tol in [0.01, 0.03, 0.1, 0.6, 150.0] {
            let n = clusterer.split2d(tol, 100.0).unwrap();
            assert!(n <= last, "{tol} produced {n} > {last}");
            last = n;
        }
    }

    #[test]
    fn test_greedy_anchor_is_not_monotone() {
        // A wider window lets the first anchor take a point that would otherwise
        // anchor a larger bucket of its own
        let mut clusterer = Clusterer2D::new(ToleranceKind::Absolute);
        let points = vec![
            (7.27, 3.84),
            (6.02, 0.71),
            (6.4, 7.81),
            (7.64, 9.98),
            (0.22, 2.59),
            (6.9, 2.79),
        ];
        clusterer.add_set(&points);
        assert_eq!(clusterer.split2d(4.0, 4.84).unwrap(), 3);
        assert_eq!(clusterer.split2d(6.0, 4.84).unwrap(), 4);
        for bucket in clusterer.summarize() {
            assert!(bucket.max_dimension1 - bucket.min_dimension1 <= 6.0);
            assert!(bucket.max_dimension2 - bucket.min_dimension2 <= 4.84);
        }
    }

    #[test]
    fn test_ppm_split() {
        let split = ToleranceKind::Ppm.dimension1_for_split(1000.0, 10.0);
        assert!((split - 0.01).abs() < 1e-9);
        assert_eq!(ToleranceKind::Absolute.dimension1_for_split(1000.0, 10.0), 10.0);

        let mut clusterer = Clusterer2D::new(ToleranceKind::Ppm);
        let points = vec![(1000.0, 1.0), (1000.009, 1.0), (1000.02, 1.0)];
        clusterer.add_set(&points);
        assert_eq!(clusterer.split2d(10.0, 1.0).unwrap(), 2);
    }

    #[test]
    fn test_errors_and_empty() {
        let mut clusterer: Clusterer2D = Clusterer2D::new(ToleranceKind::Absolute);
        assert_eq!(clusterer.split2d(0.1, 1.0).unwrap(), 0);
        assert_eq!(clusterer.rows_with_one_from_each(), 0);
        assert_eq!(
            clusterer.split2d(0.0, 1.0),
            Err(ClusterError::InvalidTolerance {
                dimension: 1,
                value: 0.0
            })
        );
        assert!(matches!(
            clusterer.split2d(1.0, -2.0),
            Err(ClusterError::InvalidTolerance { dimension: 2, .. })
        ));
        assert!(clusterer.split2d(f64::NAN, 1.0).is_err());
        assert_eq!(
            clusterer.calculate_best_buckets(&[], &[1.0]),
            Err(ClusterError::EmptyCandidates)
        );
    }

    #[test]
    fn test_best_buckets() {
        let mut clusterer = make_clusterer();
        let best = clusterer
            .calculate_best_buckets(&[0.01, 0.05, 0.1, 0.6], &[1.0, 5.0])
            .unwrap();
        assert_eq!(best.dimension1, 0.6);
        assert_eq!(best.dimension2, 5.0);
        assert_eq!(best.score, 2);
        assert_eq!(clusterer.last_tolerances(), Some((0.6, 5.0)));
        assert_eq!(clusterer.rows_with_one_from_each(), 2);

        // Every pair scores the same, so the first is kept
        let best = clusterer
            .calculate_best_buckets_by(&[0.1, 0.6], &[5.0, 10.0], |_| 1)
            .unwrap();
        assert_eq!((best.dimension1, best.dimension2), (0.1, 5.0));
    }
}
