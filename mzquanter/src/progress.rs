use std::iter::Sum;
use std::ops::{Add, AddAssign};

use tracing::info;

use mzquant::deconvolution::DeconvolutionSummary;
use mzquant::grouper::GroupingDiagnostics;

/// Counters reported at the end of a run, accumulated across partitions
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub input_sets: usize,
    pub input_features: usize,
    pub output_features: usize,
    pub merged_buckets: usize,
    pub uncharged_features: usize,
    pub identification_conflicts: usize,
    pub rows: usize,
    pub cells: usize,
    pub conflicting_cells: usize,
    pub pairs: usize,
}

impl ProgressRecord {
    pub fn log_deconvolution(&self) {
        info!("Input Features: {}", self.input_features);
        info!("Output Features: {}", self.output_features);
        info!(
            "Merged Buckets: {} | Uncharged: {}",
            self.merged_buckets, self.uncharged_features
        );
        info!("Identification Conflicts: {}", self.identification_conflicts);
    }

    pub fn log_alignment(&self) {
        info!(
            "Input Sets: {} | Input Features: {}",
            self.input_sets, self.input_features
        );
        info!("Rows: {} | Cells: {}", self.rows, self.cells);
        info!(
            "Conflicting Cells: {} | Identification Conflicts: {}",
            self.conflicting_cells, self.identification_conflicts
        );
    }

    pub fn log_pairs(&self) {
        info!("Input Features: {}", self.input_features);
        info!("Pairs: {}", self.pairs);
    }
}

impl From<DeconvolutionSummary> for ProgressRecord {
    fn from(value: DeconvolutionSummary) -> Self {
        Self {
            input_sets: 1,
            input_features: value.input_features,
            output_features: value.output_features,
            merged_buckets: value.merged_buckets,
            uncharged_features: value.uncharged_features,
            identification_conflicts: value.identification_conflicts,
            ..Default::default()
        }
    }
}

impl From<GroupingDiagnostics> for ProgressRecord {
    fn from(value: GroupingDiagnostics) -> Self {
        Self {
            rows: value.rows,
            cells: value.cells,
            conflicting_cells: value.conflicting_cells,
            identification_conflicts: value.identification_conflicts,
            ..Default::default()
        }
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.input_sets += rhs.input_sets;
        self.input_features += rhs.input_features;
        self.output_features += rhs.output_features;
        self.merged_buckets += rhs.merged_buckets;
        self.uncharged_features += rhs.uncharged_features;
        self.identification_conflicts += rhs.identification_conflicts;
        self.rows += rhs.rows;
        self.cells += rhs.cells;
        self.conflicting_cells += rhs.conflicting_cells;
        self.pairs += rhs.pairs;
    }
}

impl Sum for ProgressRecord {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, x| acc + x)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_accumulate() {
        let a = ProgressRecord {
            input_features: 10,
            pairs: 2,
            ..Default::default()
        };
        let b = ProgressRecord {
            input_features: 5,
            pairs: 1,
            ..Default::default()
        };
        let total: ProgressRecord = [a, b].into_iter().sum();
        assert_eq!(total.input_features, 15);
        assert_eq!(total.pairs, 3);
        assert_eq!(a + b, total);
    }
}
