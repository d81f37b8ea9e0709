//! The LC-MS feature entity, charge/mass conversions and named orderings
use std::cmp::Ordering;
use std::fmt::Display;
use std::sync::Arc;

use chemical_elements::{neutral_mass, PROTON as _PROTON};
use mzpeaks::{CoordinateLike, IntensityMeasurement, KnownCharge, Mass, MZ};

/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = _PROTON;

/// Convert an m/z to a neutral mass for `charge`.
///
/// Negative charges are treated as deprotonated species. A charge of zero means the
/// charge state is unknown, and the mass is defined to be `0.0`.
#[inline]
pub fn convert_mz_to_mass(mz: f64, charge: i32) -> f64 {
    if charge == 0 {
        return 0.0;
    }
    neutral_mass(mz, charge, PROTON)
}

/// The inverse of [`convert_mz_to_mass`]. A charge of zero yields `0.0`.
#[inline]
pub fn convert_mass_to_mz(mass: f64, charge: i32) -> f64 {
    if charge == 0 {
        return 0.0;
    }
    let z = charge as f64;
    (mass + z * PROTON) / z.abs()
}

/// Peptide and protein assignments attached to a feature, usually from an MS/MS search
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdentificationInfo {
    pub peptides: Vec<String>,
    pub proteins: Vec<String>,
}

impl IdentificationInfo {
    pub fn new(peptides: Vec<String>, proteins: Vec<String>) -> Self {
        Self { peptides, proteins }
    }

    pub fn from_peptide(peptide: impl Into<String>, protein: Option<String>) -> Self {
        Self {
            peptides: vec![peptide.into()],
            proteins: protein.into_iter().collect(),
        }
    }

    pub fn first_peptide(&self) -> Option<&str> {
        self.peptides.first().map(|s| s.as_str())
    }

    pub fn first_protein(&self) -> Option<&str> {
        self.proteins.first().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.peptides.is_empty()
    }
}

/// The light/heavy abundance measurement of an isotopically labeled peptide pair
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantitationInfo {
    pub light_intensity: f64,
    pub heavy_intensity: f64,
    /// `light_intensity / heavy_intensity`
    pub ratio: f64,
    pub label_count: i32,
}

impl QuantitationInfo {
    pub fn new(light_intensity: f64, heavy_intensity: f64, label_count: i32) -> Self {
        Self {
            light_intensity,
            heavy_intensity,
            ratio: light_intensity / heavy_intensity,
            label_count,
        }
    }

    /// Add another measurement's abundances to this one and recompute the ratio
    pub fn merge(&mut self, other: &QuantitationInfo) {
        self.light_intensity += other.light_intensity;
        self.heavy_intensity += other.heavy_intensity;
        self.ratio = self.light_intensity / self.heavy_intensity;
    }
}

/// A detected analyte signal in a single LC-MS run.
///
/// `mass` is kept consistent with `mz` and `charge` by the constructors and the
/// `set_*` methods. Writing the fields directly is allowed, but then it is up to the
/// caller to call [`Feature::update_mass`].
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Feature {
    pub scan: i32,
    pub time: f64,
    pub mz: f64,
    pub accurate_mz: bool,
    pub mass: f64,
    pub intensity: f32,
    pub total_intensity: f32,
    pub charge: i32,
    pub charge_states: u32,
    /// The Kullback-Leibler divergence of the isotopic envelope fit, lower is better
    pub kl: f64,
    pub background: f32,
    pub median: f32,
    /// The number of isotopic peaks observed
    pub peaks: u32,
    pub scan_first: i32,
    pub scan_last: i32,
    pub scan_count: u32,
    pub sum_squares_dist: f64,
    pub description: Option<String>,
    pub identification: Option<IdentificationInfo>,
    pub quantitation: Option<QuantitationInfo>,
    /// The features this feature was consolidated from, if any
    #[cfg_attr(feature = "serde", serde(skip))]
    pub comprised: Option<Arc<[Feature]>>,
}

impl Feature {
    pub fn new(scan: i32, time: f64, mz: f64, intensity: f32, charge: i32) -> Self {
        Self {
            scan,
            time,
            mz,
            mass: convert_mz_to_mass(mz, charge),
            intensity,
            total_intensity: intensity,
            charge,
            charge_states: 1,
            peaks: 1,
            scan_first: scan,
            scan_last: scan,
            scan_count: 1,
            ..Default::default()
        }
    }

    /// Build a feature from a neutral mass rather than an m/z
    pub fn from_mass(scan: i32, time: f64, mass: f64, intensity: f32, charge: i32) -> Self {
        let mut this = Self::new(scan, time, convert_mass_to_mz(mass, charge), intensity, charge);
        this.mass = mass;
        this
    }

    /// Recompute `mass` from `mz` and `charge`
    pub fn update_mass(&mut self) {
        self.mass = convert_mz_to_mass(self.mz, self.charge);
    }

    pub fn set_mz(&mut self, mz: f64) {
        self.mz = mz;
        self.update_mass();
    }

    pub fn set_charge(&mut self, charge: i32) {
        self.charge = charge;
        self.update_mass();
    }

    pub fn has_identification(&self) -> bool {
        self.identification
            .as_ref()
            .is_some_and(|ident| !ident.is_empty())
    }

    pub fn has_quantitation(&self) -> bool {
        self.quantitation.is_some()
    }

    /// The first peptide assigned to this feature, if any
    pub fn peptide(&self) -> Option<&str> {
        self.identification
            .as_ref()
            .and_then(|ident| ident.first_peptide())
    }

    pub fn comprised(&self) -> &[Feature] {
        self.comprised.as_deref().unwrap_or(&[])
    }

    pub fn append_description(&mut self, text: &str) {
        match self.description.as_mut() {
            Some(descr) if !descr.is_empty() => {
                descr.push_str("; ");
                descr.push_str(text);
            }
            _ => self.description = Some(text.to_string()),
        }
    }

    /// A copy of this feature whose `comprised` list is not shared with `self`
    pub fn deep_copy(&self) -> Self {
        let mut dup = self.clone();
        dup.comprised = self
            .comprised
            .as_ref()
            .map(|members| members.iter().map(|f| f.deep_copy()).collect());
        dup
    }
}

impl Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Feature({:0.4}@{}, mass={:0.4}, scan={}, time={:0.3}, intensity={:0.2})",
            self.mz, self.charge, self.mass, self.scan, self.time, self.intensity
        )
    }
}

impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.mass == other.mass
            && self.mz == other.mz
            && self.scan == other.scan
            && self.time == other.time
            && self.charge == other.charge
            && self.intensity == other.intensity
            && self.total_intensity == other.total_intensity
    }
}

impl PartialOrd for Feature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.mass.partial_cmp(&other.mass)? {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        match self.mz.partial_cmp(&other.mz)? {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        match self.scan.cmp(&other.scan) {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        match self.time.partial_cmp(&other.time)? {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        match self.charge.cmp(&other.charge) {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        match self.intensity.partial_cmp(&other.intensity)? {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        self.total_intensity.partial_cmp(&other.total_intensity)
    }
}

impl CoordinateLike<Mass> for Feature {
    fn coordinate(&self) -> f64 {
        self.mass
    }
}

impl CoordinateLike<MZ> for Feature {
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl IntensityMeasurement for Feature {
    fn intensity(&self) -> f32 {
        self.intensity
    }
}

impl KnownCharge for Feature {
    fn charge(&self) -> i32 {
        self.charge
    }
}

/// Total orderings over [`Feature`] for use with `sort_by`.
///
/// Every ordering finishes on the remaining coordinates so two features compare
/// equal only when they are interchangeable for clustering.
pub mod ordering {
    use std::cmp::Ordering;

    use super::Feature;

    fn tail(a: &Feature, b: &Feature) -> Ordering {
        a.time
            .total_cmp(&b.time)
            .then_with(|| a.charge.cmp(&b.charge))
            .then_with(|| a.intensity.total_cmp(&b.intensity))
            .then_with(|| a.mass.total_cmp(&b.mass))
    }

    pub fn by_mz_scan(a: &Feature, b: &Feature) -> Ordering {
        a.mz.total_cmp(&b.mz)
            .then_with(|| a.scan.cmp(&b.scan))
            .then_with(|| tail(a, b))
    }

    pub fn by_scan_mz(a: &Feature, b: &Feature) -> Ordering {
        a.scan
            .cmp(&b.scan)
            .then_with(|| a.mz.total_cmp(&b.mz))
            .then_with(|| tail(a, b))
    }

    pub fn by_mass(a: &Feature, b: &Feature) -> Ordering {
        a.mass
            .total_cmp(&b.mass)
            .then_with(|| a.mz.total_cmp(&b.mz))
            .then_with(|| a.scan.cmp(&b.scan))
            .then_with(|| tail(a, b))
    }

    pub fn by_time(a: &Feature, b: &Feature) -> Ordering {
        a.time
            .total_cmp(&b.time)
            .then_with(|| by_mz_scan(a, b))
    }

    pub fn by_intensity_desc(a: &Feature, b: &Feature) -> Ordering {
        b.intensity
            .total_cmp(&a.intensity)
            .then_with(|| by_mz_scan(a, b))
    }

    pub fn by_total_intensity_desc(a: &Feature, b: &Feature) -> Ordering {
        b.total_intensity
            .total_cmp(&a.total_intensity)
            .then_with(|| by_mz_scan(a, b))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mzpeaks::prelude::*;

    #[test]
    fn test_mass_mz_round_trip() {
        for charge in [1, 2, 3, 5, -1, -2, -4] {
            let mass = 1234.5678;
            let mz = convert_mass_to_mz(mass, charge);
            let back = convert_mz_to_mass(mz, charge);
            assert!((back - mass).abs() < 1e-9, "{charge}: {back} != {mass}");
        }
    }

    #[test]
    fn test_mass_conversion() {
        let mass = convert_mz_to_mass(500.0, 2);
        assert!((mass - (500.0 - PROTON) * 2.0).abs() < 1e-9);
        let mass = convert_mz_to_mass(500.0, -2);
        assert!((mass - (500.0 + PROTON) * 2.0).abs() < 1e-9);
        assert_eq!(convert_mz_to_mass(500.0, 0), 0.0);
        assert_eq!(convert_mass_to_mz(1000.0, 0), 0.0);
    }

    #[test]
    fn test_charge_updates_mass() {
        let mut feature = Feature::new(10, 30.0, 600.0, 1e4, 2);
        let m2 = feature.mass;
        feature.set_charge(3);
        assert!((feature.mass - (600.0 - PROTON) * 3.0).abs() < 1e-9);
        assert!(feature.mass > m2);
        feature.set_charge(0);
        assert_eq!(feature.mass, 0.0);

        let feature = Feature::from_mass(10, 30.0, 1500.0, 1e4, 3);
        assert_eq!(feature.mass, 1500.0);
        assert!((convert_mz_to_mass(feature.mz, 3) - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_orderings() {
        let a = Feature::new(5, 10.0, 400.0, 50.0, 2);
        let b = Feature::new(3, 12.0, 400.0, 80.0, 2);
        let c = Feature::new(1, 8.0, 300.0, 10.0, 1);
        let mut features = vec![a.clone(), b.clone(), c.clone()];

        features.sort_by(ordering::by_mz_scan);
        assert_eq!(features, vec![c.clone(), b.clone(), a.clone()]);

        features.sort_by(ordering::by_intensity_desc);
        assert_eq!(features, vec![b.clone(), a.clone(), c.clone()]);

        features.sort_by(ordering::by_scan_mz);
        assert_eq!(features, vec![c.clone(), b.clone(), a.clone()]);

        assert_eq!(ordering::by_mass(&a, &a), Ordering::Equal);
        assert_eq!(a.partial_cmp(&a), Some(Ordering::Equal));
        assert_ne!(ordering::by_mass(&a, &b), Ordering::Equal);
        assert_ne!(a, b);
    }

    #[test]
    fn test_mzpeaks_traits() {
        let feature = Feature::new(5, 10.0, 400.0, 50.0, 2);
        assert_eq!(feature.neutral_mass(), feature.mass);
        assert_eq!(MZLocated::mz(&feature), 400.0);
        assert_eq!(IntensityMeasurement::intensity(&feature), 50.0);
        assert_eq!(KnownCharge::charge(&feature), 2);
    }

    #[test]
    fn test_description_and_copy() {
        let mut feature = Feature::new(5, 10.0, 400.0, 50.0, 2);
        feature.append_description("first");
        feature.append_description("second");
        assert_eq!(feature.description.as_deref(), Some("first; second"));

        let member = Feature::new(6, 11.0, 401.0, 20.0, 2);
        feature.comprised = Some(Arc::from(vec![member.clone()]));
        let shallow = feature.clone();
        let deep = feature.deep_copy();
        assert!(Arc::ptr_eq(
            shallow.comprised.as_ref().unwrap(),
            feature.comprised.as_ref().unwrap()
        ));
        assert!(!Arc::ptr_eq(
            deep.comprised.as_ref().unwrap(),
            feature.comprised.as_ref().unwrap()
        ));
        assert_eq!(deep.comprised(), &[member]);
    }
}
