//! Collections of [`Feature`] from a single LC-MS run
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Index;

use crate::feature::Feature;

/// Kinds of optional per-feature annotation present somewhere in a [`FeatureSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExtraInfoKind {
    Identification,
    Quantitation,
}

/// Inclusive bounds used to select a subset of a [`FeatureSet`]. Unset bounds are open.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureSelector {
    pub min_mz: Option<f64>,
    pub max_mz: Option<f64>,
    pub min_mass: Option<f64>,
    pub max_mass: Option<f64>,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
    pub min_scan: Option<i32>,
    pub max_scan: Option<i32>,
    pub min_intensity: Option<f32>,
    pub min_total_intensity: Option<f32>,
    pub min_charge: Option<i32>,
    pub max_charge: Option<i32>,
    pub min_peaks: Option<u32>,
    pub min_scan_count: Option<u32>,
    pub max_kl: Option<f64>,
}

impl FeatureSelector {
    pub fn with_time_range(mut self, start: f64, end: f64) -> Self {
        self.min_time = Some(start);
        self.max_time = Some(end);
        self
    }

    pub fn with_mz_range(mut self, start: f64, end: f64) -> Self {
        self.min_mz = Some(start);
        self.max_mz = Some(end);
        self
    }

    pub fn with_mass_range(mut self, start: f64, end: f64) -> Self {
        self.min_mass = Some(start);
        self.max_mass = Some(end);
        self
    }

    pub fn with_charge_range(mut self, start: i32, end: i32) -> Self {
        self.min_charge = Some(start);
        self.max_charge = Some(end);
        self
    }

    pub fn with_min_intensity(mut self, value: f32) -> Self {
        self.min_intensity = Some(value);
        self
    }

    pub fn is_open(&self) -> bool {
        *self == Self::default()
    }

    pub fn accepts(&self, feature: &Feature) -> bool {
        fn lower<T: PartialOrd>(bound: Option<T>, value: T) -> bool {
            bound.map_or(true, |b| value >= b)
        }
        fn upper<T: PartialOrd>(bound: Option<T>, value: T) -> bool {
            bound.map_or(true, |b| value <= b)
        }

        lower(self.min_mz, feature.mz)
            && upper(self.max_mz, feature.mz)
            && lower(self.min_mass, feature.mass)
            && upper(self.max_mass, feature.mass)
            && lower(self.min_time, feature.time)
            && upper(self.max_time, feature.time)
            && lower(self.min_scan, feature.scan)
            && upper(self.max_scan, feature.scan)
            && lower(self.min_intensity, feature.intensity)
            && lower(self.min_total_intensity, feature.total_intensity)
            && lower(self.min_charge, feature.charge)
            && upper(self.max_charge, feature.charge)
            && lower(self.min_peaks, feature.peaks)
            && lower(self.min_scan_count, feature.scan_count)
            && upper(self.max_kl, feature.kl)
    }
}

/// An ordered list of features with run-level metadata.
///
/// The set of [`ExtraInfoKind`] is derived from the member features and is kept current
/// by every mutating method.
#[derive(Debug, Default, Clone)]
pub struct FeatureSet {
    features: Vec<Feature>,
    pub source: Option<String>,
    pub properties: BTreeMap<String, String>,
    extra_info: BTreeSet<ExtraInfoKind>,
}

impl FeatureSet {
    pub fn new(features: Vec<Feature>) -> Self {
        let mut this = Self {
            features,
            ..Default::default()
        };
        this.refresh_extra_info();
        this
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// An empty set that carries over this set's source and properties
    pub fn empty_like(&self) -> Self {
        Self {
            features: Vec::new(),
            source: self.source.clone(),
            properties: self.properties.clone(),
            extra_info: BTreeSet::new(),
        }
    }

    fn refresh_extra_info(&mut self) {
        self.extra_info.clear();
        for f in self.features.iter() {
            Self::note_extra_info(&mut self.extra_info, f);
        }
    }

    fn note_extra_info(extra_info: &mut BTreeSet<ExtraInfoKind>, feature: &Feature) {
        if feature.has_identification() {
            extra_info.insert(ExtraInfoKind::Identification);
        }
        if feature.has_quantitation() {
            extra_info.insert(ExtraInfoKind::Quantitation);
        }
    }

    pub fn push(&mut self, feature: Feature) {
        Self::note_extra_info(&mut self.extra_info, &feature);
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Feature> {
        self.features.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    pub fn as_slice(&self) -> &[Feature] {
        &self.features
    }

    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }

    pub fn extra_info(&self) -> &BTreeSet<ExtraInfoKind> {
        &self.extra_info
    }

    pub fn has_extra_info(&self, kind: ExtraInfoKind) -> bool {
        self.extra_info.contains(&kind)
    }

    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Feature, &Feature) -> std::cmp::Ordering,
    {
        self.features.sort_by(compare);
    }

    /// The distinct charge states present, ascending
    pub fn charges(&self) -> Vec<i32> {
        let charges: BTreeSet<i32> = self.features.iter().map(|f| f.charge).collect();
        charges.into_iter().collect()
    }

    /// Split the set into one set per charge state. Each part keeps this set's metadata
    /// and the relative order of its features.
    pub fn partition_by_charge(&self) -> BTreeMap<i32, FeatureSet> {
        let mut parts: BTreeMap<i32, FeatureSet> = BTreeMap::new();
        for f in self.features.iter() {
            parts
                .entry(f.charge)
                .or_insert_with(|| self.empty_like())
                .push(f.clone());
        }
        parts
    }

    /// A new set holding clones of the features accepted by `selector`
    pub fn filter(&self, selector: &FeatureSelector) -> FeatureSet {
        let mut dup = self.empty_like();
        for f in self.features.iter().filter(|f| selector.accepts(f)) {
            dup.push(f.clone());
        }
        dup
    }

    /// A copy that shares no consolidated member lists with `self`
    pub fn deep_copy(&self) -> FeatureSet {
        let mut dup = self.empty_like();
        for f in self.features.iter() {
            dup.push(f.deep_copy());
        }
        dup
    }
}

impl Extend<Feature> for FeatureSet {
    fn extend<T: IntoIterator<Item = Feature>>(&mut self, iter: T) {
        for f in iter {
            self.push(f)
        }
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        let mut this = Self::default();
        this.extend(iter);
        this
    }
}

impl Index<usize> for FeatureSet {
    type Output = Feature;

    fn index(&self, index: usize) -> &Self::Output {
        &self.features[index]
    }
}

impl<'a> IntoIterator for &'a FeatureSet {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}

impl IntoIterator for FeatureSet {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

/// A source of [`FeatureSet`]s, e.g. a file format reader
pub trait FeatureSetLoader {
    type Error: std::error::Error;

    fn load(&mut self) -> Result<FeatureSet, Self::Error>;
}

/// A sink for [`FeatureSet`]s, e.g. a file format writer
pub trait FeatureSetWriter {
    type Error: std::error::Error;

    fn write(&mut self, features: &FeatureSet) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::feature::{IdentificationInfo, QuantitationInfo};

    fn make_set() -> FeatureSet {
        let mut set = FeatureSet::new(vec![
            Feature::new(1, 10.0, 400.0, 100.0, 2),
            Feature::new(2, 20.0, 500.0, 200.0, 3),
            Feature::new(3, 30.0, 600.0, 300.0, 2),
            Feature::new(4, 40.0, 700.0, 50.0, 1),
        ])
        .with_source("run1.tsv");
        set.properties.insert("instrument".into(), "orbitrap".into());
        set
    }

    #[test]
    fn test_partition_by_charge() {
        let set = make_set();
        assert_eq!(set.charges(), vec![1, 2, 3]);
        let parts = set.partition_by_charge();
        assert_eq!(parts.len(), 3);
        let z2 = &parts[&2];
        assert_eq!(z2.len(), 2);
        assert_eq!(z2[0].scan, 1);
        assert_eq!(z2[1].scan, 3);
        assert_eq!(z2.source.as_deref(), Some("run1.tsv"));
        assert_eq!(z2.properties["instrument"], "orbitrap");
    }

    #[test]
    fn test_extra_info_tracking() {
        let mut set = make_set();
        assert!(set.extra_info().is_empty());
        let mut f = Feature::new(5, 50.0, 800.0, 10.0, 2);
        f.identification = Some(IdentificationInfo::from_peptide("PEPTIDE", None));
        set.push(f);
        assert!(set.has_extra_info(ExtraInfoKind::Identification));
        assert!(!set.has_extra_info(ExtraInfoKind::Quantitation));

        let mut g = Feature::new(6, 50.0, 800.0, 10.0, 2);
        g.quantitation = Some(QuantitationInfo::new(1.0, 2.0, 1));
        let filtered = set.filter(&FeatureSelector::default().with_time_range(45.0, 60.0));
        assert_eq!(filtered.len(), 1);
        assert!(filtered.has_extra_info(ExtraInfoKind::Identification));
        let mut quant: FeatureSet = vec![g].into_iter().collect();
        assert!(quant.has_extra_info(ExtraInfoKind::Quantitation));
        quant.extend(filtered);
        assert_eq!(quant.extra_info().len(), 2);
    }

    #[test]
    fn test_extra_info_from_construction() {
        let mut f = Feature::new(1, 10.0, 400.0, 100.0, 2);
        f.identification = Some(IdentificationInfo::from_peptide("PEPTIDE", None));
        let mut g = Feature::new(2, 20.0, 500.0, 200.0, 3);
        g.quantitation = Some(QuantitationInfo::new(1.0, 2.0, 1));

        let set = FeatureSet::new(vec![f.clone(), Feature::new(3, 30.0, 600.0, 300.0, 2)]);
        assert!(set.has_extra_info(ExtraInfoKind::Identification));
        assert!(!set.has_extra_info(ExtraInfoKind::Quantitation));

        let set = FeatureSet::new(vec![f, g]);
        assert_eq!(set.extra_info().len(), 2);
        assert!(FeatureSet::new(Vec::new()).extra_info().is_empty());
    }

    #[test]
    fn test_filter() {
        let set = make_set();
        let selector = FeatureSelector::default()
            .with_mz_range(450.0, 650.0)
            .with_min_intensity(150.0);
        let subset = set.filter(&selector);
        assert_eq!(subset.len(), 2);
        assert!(subset.iter().all(|f| f.intensity >= 150.0));

        let subset = set.filter(&FeatureSelector::default().with_charge_range(2, 2));
        assert_eq!(subset.len(), 2);
        assert!(FeatureSelector::default().is_open());
        assert_eq!(set.filter(&FeatureSelector::default()).len(), set.len());
    }

    #[test]
    fn test_deep_copy() {
        let mut set = make_set();
        set.sort_by(crate::feature::ordering::by_intensity_desc);
        assert_eq!(set[0].scan, 3);
        let members: Arc<[Feature]> = Arc::from(vec![set[1].clone()]);
        let mut f = set[0].clone();
        f.comprised = Some(members.clone());
        let set = FeatureSet::new(vec![f]);
        let dup = set.deep_copy();
        assert!(!Arc::ptr_eq(dup[0].comprised.as_ref().unwrap(), &members));
        assert_eq!(dup[0], set[0]);
    }
}
