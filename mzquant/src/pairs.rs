//! Matching of light and heavy isotopically labeled feature pairs
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use identity_hash::{BuildIdentityHasher, IdentityHashable};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::cluster::ToleranceKind;
use crate::feature::{ordering, Feature, QuantitationInfo};
use crate::feature_set::FeatureSet;
use crate::label::IsotopicLabel;
use crate::spatial::SpatialBucketIndex;

/// An ordered two-element association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pair<A, B = A> {
    pub first: A,
    pub second: B,
}

impl<A, B> Pair<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn into_tuple(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<'a> Pair<&'a Feature> {
    /// Build a pair whose `first` member has the lower mass
    pub fn by_mass(a: &'a Feature, b: &'a Feature) -> Self {
        if b.mass < a.mass {
            Self::new(b, a)
        } else {
            Self::new(a, b)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PairingError {
    #[error("The {dimension} tolerance must be a positive finite number, got {value}")]
    InvalidTolerance { dimension: &'static str, value: f64 },
}

/// Which pairing algorithm [`IsotopePairMatcher::find_pairs`] uses
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PairingStrategy {
    /// Anchor on the most intense features and consider every label multiplicity,
    /// see [`IsotopePairMatcher::analyze`]
    #[default]
    MassAnchored,
    /// Walk features in m/z order looking for one heavy partner,
    /// see [`IsotopePairMatcher::analyze1`]
    IntensityAnchored,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairingParams {
    pub mass_tolerance: f64,
    pub tolerance_kind: ToleranceKind,
    pub elution_tolerance: f64,
    pub strategy: PairingStrategy,
}

impl Default for PairingParams {
    fn default() -> Self {
        Self {
            mass_tolerance: 0.1,
            tolerance_kind: ToleranceKind::Absolute,
            elution_tolerance: 30.0,
            strategy: PairingStrategy::MassAnchored,
        }
    }
}

/// The position of a feature in the slice being paired
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FeatureKey(usize);

impl Hash for FeatureKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.0)
    }
}

impl IdentityHashable for FeatureKey {}

/// The features already paired, or given up on, during one pass
#[derive(Debug, Default)]
struct ConsumedSet {
    keys: HashSet<FeatureKey, BuildIdentityHasher<FeatureKey>>,
}

impl ConsumedSet {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: HashSet::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    fn contains(&self, index: usize) -> bool {
        self.keys.contains(&FeatureKey(index))
    }

    fn consume(&mut self, index: usize) {
        self.keys.insert(FeatureKey(index));
    }
}

#[inline]
fn log_intensity(feature: &Feature) -> f64 {
    (feature.intensity.max(f32::MIN_POSITIVE) as f64).ln()
}

/// Finds light/heavy partners among the features of one run for an [`IsotopicLabel`].
///
/// Each pass keeps its own record of consumed features, so the input is never
/// modified and a feature appears in at most one pair per pass.
#[derive(Debug, Clone)]
pub struct IsotopePairMatcher<'a> {
    label: &'a IsotopicLabel,
    params: PairingParams,
}

impl<'a> IsotopePairMatcher<'a> {
    pub fn new(label: &'a IsotopicLabel, params: PairingParams) -> Result<Self, PairingError> {
        for (dimension, value) in [
            ("mass", params.mass_tolerance),
            ("elution", params.elution_tolerance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(PairingError::InvalidTolerance { dimension, value });
            }
        }
        Ok(Self { label, params })
    }

    pub fn label(&self) -> &IsotopicLabel {
        self.label
    }

    pub fn params(&self) -> &PairingParams {
        &self.params
    }

    fn build_index(features: &[Feature]) -> SpatialBucketIndex<usize> {
        features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.mass, f.time, i))
            .collect()
    }

    /// The indices of features with the same charge as `features[anchor]` within tolerance
    /// of `target_mass` and the anchor's retention time, in ascending mass order
    fn candidates<'s>(
        &'s self,
        index: &'s SpatialBucketIndex<usize>,
        features: &'s [Feature],
        anchor: usize,
        target_mass: f64,
    ) -> impl Iterator<Item = usize> + 's {
        let feature = &features[anchor];
        let (mass_lo, mass_hi) = self
            .params
            .tolerance_kind
            .tolerance(self.params.mass_tolerance)
            .bounds(target_mass);
        let time_lo = feature.time - self.params.elution_tolerance;
        let time_hi = feature.time + self.params.elution_tolerance;
        let charge = feature.charge;
        index
            .query_points(mass_lo, time_lo, mass_hi, time_hi)
            .map(|p| p.payload)
            .filter(move |j| *j != anchor && features[*j].charge == charge)
    }

    /// Pair features with the strategy in [`PairingParams::strategy`]
    pub fn find_pairs<'f>(&self, features: &'f [Feature]) -> Vec<Pair<&'f Feature>> {
        match self.params.strategy {
            PairingStrategy::MassAnchored => self.analyze(features),
            PairingStrategy::IntensityAnchored => self.analyze1(features),
        }
    }

    /// Visit features in ascending m/z order, treating each unconsumed feature as light
    /// and pairing it with a same-charge feature one heavy delta above it.
    ///
    /// When several candidates match, the one with the highest mass is taken. This is
    /// simply the last candidate seen, not a judgment of which is best.
    #[instrument(level = "debug", skip_all, fields(features = features.len()))]
    pub fn analyze1<'f>(&self, features: &'f [Feature]) -> Vec<Pair<&'f Feature>> {
        let index = Self::build_index(features);
        let mut order: Vec<usize> = (0..features.len()).collect();
        order.sort_by(|a, b| ordering::by_mz_scan(&features[*a], &features[*b]));

        let mut consumed = ConsumedSet::with_capacity(features.len());
        let mut pairs = Vec::new();
        for light in order {
            if consumed.contains(light) {
                continue;
            }
            let target = features[light].mass + self.label.heavy();
            let heavy = self
                .candidates(&index, features, light, target)
                .filter(|j| !consumed.contains(*j))
                .last();
            if let Some(heavy) = heavy {
                consumed.consume(light);
                consumed.consume(heavy);
                pairs.push(Pair::by_mass(&features[light], &features[heavy]));
            }
        }
        debug!("Found {} pairs", pairs.len());
        pairs
    }

    /// Visit features from most to least intense. For each unconsumed anchor, look for the
    /// most intense unconsumed same-charge feature at every label multiplicity from
    /// `-max_label_count` to `max_label_count`, then decide which of those the anchor
    /// pairs with.
    ///
    /// Two features pair directly. A larger group that exactly fills an even number of
    /// equally spaced mass slots is paired off in adjacent slots. Otherwise the closest
    /// pair by slot, time and log intensity is removed repeatedly until the anchor is
    /// paired or nothing is left. An anchor that ends up without a partner is consumed.
    #[instrument(level = "debug", skip_all, fields(features = features.len()))]
    pub fn analyze<'f>(&self, features: &'f [Feature]) -> Vec<Pair<&'f Feature>> {
        let index = Self::build_index(features);
        let mut order: Vec<usize> = (0..features.len()).collect();
        order.sort_by(|a, b| ordering::by_intensity_desc(&features[*a], &features[*b]));

        let max_count = self.label.max_label_count() as i32;
        let heavy = self.label.heavy();
        let mut consumed = ConsumedSet::with_capacity(features.len());
        let mut pairs = Vec::new();

        for anchor in order {
            if consumed.contains(anchor) {
                continue;
            }
            let anchor_mass = features[anchor].mass;
            let mut group = vec![anchor];
            for n in (-max_count..=max_count).filter(|n| *n != 0) {
                let target = anchor_mass + n as f64 * heavy;
                let mut best: Option<usize> = None;
                for j in self.candidates(&index, features, anchor, target) {
                    if consumed.contains(j) || group.contains(&j) {
                        continue;
                    }
                    if best.map_or(true, |b| features[j].intensity > features[b].intensity) {
                        best = Some(j);
                    }
                }
                if let Some(j) = best {
                    group.push(j);
                }
            }
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| ordering::by_mass(&features[*a], &features[*b]));

            match self.resolve_group(features, &group, anchor) {
                Some((a, b)) => {
                    consumed.consume(a);
                    consumed.consume(b);
                    pairs.push(Pair::by_mass(&features[a], &features[b]));
                }
                None => {
                    trace!("Anchor {} was left without a partner", features[anchor]);
                    consumed.consume(anchor);
                }
            }
        }
        debug!("Found {} pairs", pairs.len());
        pairs
    }

    /// Choose the partner of `anchor` from a mass-sorted group of candidates
    fn resolve_group(&self, features: &[Feature], group: &[usize], anchor: usize) -> Option<(usize, usize)> {
        if group.len() == 2 {
            return Some((group[0], group[1]));
        }
        let heavy = self.label.heavy();
        let min_mass = features[group[0]].mass;
        let max_mass = features[group[group.len() - 1]].mass;
        let slots = ((max_mass - min_mass) / heavy).round() as usize + 1;
        let position = group.iter().position(|i| *i == anchor)?;

        if group.len() == slots && slots % 2 == 0 {
            return Some((group[position], group[position ^ 1]));
        }

        let slot_of = |i: usize| ((features[i].mass - min_mass) / heavy).round();
        let mut remaining: Vec<usize> = group.to_vec();
        while remaining.len() >= 2 {
            let mut best: Option<(f64, usize, usize)> = None;
            for (x, i) in remaining.iter().copied().enumerate() {
                for j in remaining.iter().copied().skip(x + 1) {
                    let (a, b) = (&features[i], &features[j]);
                    let score = (slot_of(i) - slot_of(j)).powi(2)
                        + (a.time - b.time).powi(2)
                        + (log_intensity(a) - log_intensity(b)).powi(2);
                    if best.map_or(true, |(s, _, _)| score < s) {
                        best = Some((score, i, j));
                    }
                }
            }
            let (_, i, j) = best?;
            if i == anchor || j == anchor {
                return Some((i, j));
            }
            remaining.retain(|k| *k != i && *k != j);
        }
        None
    }

    /// Summarize a pair as a copy of its light member carrying the light/heavy measurement
    pub fn quantitate(&self, pair: &Pair<&Feature>) -> Feature {
        let (light, heavy) = (pair.first, pair.second);
        let label_count = ((heavy.mass - light.mass) / self.label.heavy()).round() as i32;
        let mut quantified = light.clone();
        quantified.quantitation = Some(QuantitationInfo::new(
            light.intensity as f64,
            heavy.intensity as f64,
            label_count,
        ));
        quantified.comprised = Some(Arc::from(vec![light.clone(), heavy.clone()]));
        quantified
    }

    /// Find the pairs in `features` and return a set of their quantified light members
    pub fn quantitate_set(&self, features: &FeatureSet) -> FeatureSet {
        let mut quantified = features.empty_like();
        quantified
            .properties
            .insert("label".to_string(), self.label.to_string());
        for pair in self.find_pairs(features.as_slice()) {
            quantified.push(self.quantitate(&pair));
        }
        quantified
    }
}
