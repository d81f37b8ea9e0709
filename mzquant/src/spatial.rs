//! A two dimensional point index supporting box queries
use std::cmp::Ordering;

/// A payload stored at a point in the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPoint<T> {
    pub dim1: f64,
    pub dim2: f64,
    pub payload: T,
}

impl<T> IndexedPoint<T> {
    pub fn new(dim1: f64, dim2: f64, payload: T) -> Self {
        Self {
            dim1,
            dim2,
            payload,
        }
    }

    #[inline]
    fn in_box(&self, dim1_min: f64, dim2_min: f64, dim1_max: f64, dim2_max: f64) -> bool {
        dim1_min <= self.dim1 && self.dim1 <= dim1_max && dim2_min <= self.dim2 && self.dim2 <= dim2_max
    }
}

/// Points kept sorted along the first dimension so a box query is a binary search
/// followed by a scan of the matching dimension-1 strip.
///
/// Points with equal `dim1` keep their insertion order, so query results are
/// reproducible for a fixed insertion sequence.
#[derive(Debug, Clone)]
pub struct SpatialBucketIndex<T> {
    points: Vec<IndexedPoint<T>>,
}

impl<T> Default for SpatialBucketIndex<T> {
    fn default() -> Self {
        Self { points: Vec::new() }
    }
}

impl<T> SpatialBucketIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn insert(&mut self, dim1: f64, dim2: f64, payload: T) {
        let i = self
            .points
            .partition_point(|p| p.dim1.total_cmp(&dim1) != Ordering::Greater);
        self.points.insert(i, IndexedPoint::new(dim1, dim2, payload));
    }

    fn lower_bound(&self, dim1: f64) -> usize {
        self.points
            .partition_point(|p| p.dim1.total_cmp(&dim1) == Ordering::Less)
    }

    /// Iterate over the points inside the closed box, in dimension-1 order
    pub fn query_points(
        &self,
        dim1_min: f64,
        dim2_min: f64,
        dim1_max: f64,
        dim2_max: f64,
    ) -> impl Iterator<Item = &IndexedPoint<T>> + '_ {
        let start = self.lower_bound(dim1_min);
        self.points[start..]
            .iter()
            .take_while(move |p| p.dim1 <= dim1_max)
            .filter(move |p| p.in_box(dim1_min, dim2_min, dim1_max, dim2_max))
    }

    /// Collect the payloads inside the closed box, in dimension-1 order
    pub fn range_query(&self, dim1_min: f64, dim2_min: f64, dim1_max: f64, dim2_max: f64) -> Vec<&T> {
        self.query_points(dim1_min, dim2_min, dim1_max, dim2_max)
            .map(|p| &p.payload)
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexedPoint<T>> {
        self.points.iter()
    }
}

impl<T> FromIterator<(f64, f64, T)> for SpatialBucketIndex<T> {
    fn from_iter<I: IntoIterator<Item = (f64, f64, T)>>(iter: I) -> Self {
        let mut points: Vec<_> = iter
            .into_iter()
            .map(|(dim1, dim2, payload)| IndexedPoint::new(dim1, dim2, payload))
            .collect();
        points.sort_by(|a, b| a.dim1.total_cmp(&b.dim1));
        Self { points }
    }
}
