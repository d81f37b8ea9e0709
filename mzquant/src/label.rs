//! Isotopic labeling schemes for light/heavy quantitation
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// The residue of a label that is not attached to a specific amino acid, e.g. a terminus
pub const NON_RESIDUE_SPECIFIC: char = ' ';

pub const DEFAULT_MAX_LABEL_COUNT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LabelParseError {
    #[error("Label \"{0}\" is missing the '+' between the light mass and heavy delta")]
    MissingSeparator(String),
    #[error("Label \"{0}\" must give the label count ('#') before the residue ('@')")]
    OutOfOrder(String),
    #[error("Could not parse the {field} of a label from \"{value}\"")]
    InvalidNumber { field: &'static str, value: String },
    #[error("The heavy mass delta must be positive, got {0}")]
    NonPositiveHeavyDelta(f64),
    #[error("The light tag mass cannot be negative, got {0}")]
    NegativeLightMass(f64),
    #[error("The maximum label count must be at least 1, got {0}")]
    NonPositiveMaxLabelCount(i64),
    #[error("\"{0}\" is not an amino acid residue letter")]
    InvalidResidue(String),
    #[error("\"{0}\" is neither a known label name nor a label description")]
    UnknownLabel(String),
}

/// A light/heavy chemical labeling scheme.
///
/// Written as `<light>+<heavy delta>[#<max labels>][@<residue>]`, e.g. `"442.224991+8.0@C"`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsotopicLabel {
    light: f64,
    heavy: f64,
    residue: char,
    max_label_count: u32,
}

impl IsotopicLabel {
    pub fn new(light: f64, heavy: f64, residue: char, max_label_count: u32) -> Result<Self, LabelParseError> {
        if !(light.is_finite() && light >= 0.0) {
            return Err(LabelParseError::NegativeLightMass(light));
        }
        if !(heavy.is_finite() && heavy > 0.0) {
            return Err(LabelParseError::NonPositiveHeavyDelta(heavy));
        }
        if max_label_count == 0 {
            return Err(LabelParseError::NonPositiveMaxLabelCount(0));
        }
        if residue != NON_RESIDUE_SPECIFIC && !residue.is_ascii_uppercase() {
            return Err(LabelParseError::InvalidResidue(residue.to_string()));
        }
        Ok(Self {
            light,
            heavy,
            residue,
            max_label_count,
        })
    }

    /// The mass added by the light form of the tag
    pub fn light(&self) -> f64 {
        self.light
    }

    /// The mass difference between the heavy and light forms of one tag
    pub fn heavy(&self) -> f64 {
        self.heavy
    }

    pub fn residue(&self) -> char {
        self.residue
    }

    pub fn max_label_count(&self) -> u32 {
        self.max_label_count
    }

    pub fn is_residue_specific(&self) -> bool {
        self.residue != NON_RESIDUE_SPECIFIC
    }

    /// The number of labeling sites in a peptide sequence
    pub fn count_sites(&self, sequence: &str) -> usize {
        if self.is_residue_specific() {
            sequence.chars().filter(|c| *c == self.residue).count()
        } else {
            1
        }
    }

    /// The mass of the heavy form of a peptide carrying `label_count` tags
    pub fn heavy_mass(&self, light_mass: f64, label_count: u32) -> f64 {
        light_mass + self.heavy * label_count as f64
    }
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> Result<T, LabelParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| LabelParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

impl FromStr for IsotopicLabel {
    type Err = LabelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (light, rest) = s
            .split_once('+')
            .ok_or_else(|| LabelParseError::MissingSeparator(s.to_string()))?;

        let count_at = rest.find('#');
        let residue_at = rest.find('@');
        if let (Some(c), Some(r)) = (count_at, residue_at) {
            if r < c {
                return Err(LabelParseError::OutOfOrder(s.to_string()));
            }
        }

        let heavy_end = count_at.or(residue_at).unwrap_or(rest.len());
        let heavy: f64 = parse_number("heavy delta", &rest[..heavy_end])?;
        let light: f64 = parse_number("light mass", light)?;

        let max_label_count = match count_at {
            Some(c) => {
                let end = residue_at.unwrap_or(rest.len());
                let count: i64 = parse_number("label count", &rest[c + 1..end])?;
                if count < 1 {
                    return Err(LabelParseError::NonPositiveMaxLabelCount(count));
                }
                u32::try_from(count).map_err(|_| LabelParseError::InvalidNumber {
                    field: "label count",
                    value: count.to_string(),
                })?
            }
            None => DEFAULT_MAX_LABEL_COUNT,
        };

        let residue = match residue_at {
            Some(r) => {
                let token = rest[r + 1..].trim();
                let mut chars = token.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_uppercase() => c,
                    _ => return Err(LabelParseError::InvalidResidue(token.to_string())),
                }
            }
            None => NON_RESIDUE_SPECIFIC,
        };

        Self::new(light, heavy, residue, max_label_count)
    }
}

impl Display for IsotopicLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}#{}", self.light, self.heavy, self.max_label_count)?;
        if self.is_residue_specific() {
            write!(f, "@{}", self.residue)?;
        }
        Ok(())
    }
}

/// A fixed table of named labeling schemes.
///
/// Built once and handed to whatever needs to resolve a label by name.
#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    labels: BTreeMap<String, IsotopicLabel>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the common reagents
    pub fn with_presets() -> Self {
        const PRESETS: &[(&str, f64, f64, char)] = &[
            ("icat", 442.224991, 8.050214, 'C'),
            ("icat-cleavable", 227.126991, 9.030193, 'C'),
            ("acrylamide", 71.037114, 3.01883, 'C'),
            ("silac-k6", 0.0, 6.020129, 'K'),
            ("silac-k8", 0.0, 8.014199, 'K'),
            ("silac-r10", 0.0, 10.008269, 'R'),
            ("o18", 0.0, 4.008491, NON_RESIDUE_SPECIFIC),
        ];
        let mut this = Self::new();
        for (name, light, heavy, residue) in PRESETS.iter().copied() {
            this.labels.insert(
                name.to_string(),
                IsotopicLabel {
                    light,
                    heavy,
                    residue,
                    max_label_count: DEFAULT_MAX_LABEL_COUNT,
                },
            );
        }
        this
    }

    pub fn register(&mut self, name: &str, label: IsotopicLabel) -> Option<IsotopicLabel> {
        self.labels.insert(name.to_lowercase(), label)
    }

    pub fn get(&self, name: &str) -> Option<&IsotopicLabel> {
        self.labels.get(&name.trim().to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.labels.keys().map(|k| k.as_str())
    }

    /// Look up `spec` by name, falling back to parsing it as a label description
    pub fn resolve(&self, spec: &str) -> Result<IsotopicLabel, LabelParseError> {
        if let Some(label) = self.get(spec) {
            return Ok(*label);
        }
        if !spec.contains('+') {
            return Err(LabelParseError::UnknownLabel(spec.to_string()));
        }
        spec.parse()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_full() {
        let label: IsotopicLabel = "100.0+4.05#3@C".parse().unwrap();
        assert_eq!(label.light(), 100.0);
        assert_eq!(label.heavy(), 4.05);
        assert_eq!(label.max_label_count(), 3);
        assert_eq!(label.residue(), 'C');
        assert!(label.is_residue_specific());
        assert_eq!(label.to_string(), "100+4.05#3@C");
        assert_eq!(label.to_string().parse::<IsotopicLabel>().unwrap(), label);
    }

    #[test]
    fn test_parse_defaults() {
        let label: IsotopicLabel = "0.0+4.0085".parse().unwrap();
        assert_eq!(label.light(), 0.0);
        assert_eq!(label.heavy(), 4.0085);
        assert_eq!(label.max_label_count(), DEFAULT_MAX_LABEL_COUNT);
        assert_eq!(label.residue(), NON_RESIDUE_SPECIFIC);
        assert_eq!(label.count_sites("PEPTIDE"), 1);

        let label: IsotopicLabel = "0+8@K".parse().unwrap();
        assert_eq!(label.max_label_count(), 3);
        assert_eq!(label.count_sites("KPEPKTIDEK"), 3);
        assert_eq!(label.heavy_mass(1000.0, 2), 1016.0);

        let label: IsotopicLabel = "1+2#5".parse().unwrap();
        assert_eq!(label.max_label_count(), 5);
        assert_eq!(label.residue(), NON_RESIDUE_SPECIFIC);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "100.0-4.05".parse::<IsotopicLabel>(),
            Err(LabelParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            "100.0+4.05@C#3".parse::<IsotopicLabel>(),
            Err(LabelParseError::OutOfOrder(_))
        ));
        assert!(matches!(
            "100.0+0.0".parse::<IsotopicLabel>(),
            Err(LabelParseError::NonPositiveHeavyDelta(_))
        ));
        assert!(matches!(
            "100.0+-4".parse::<IsotopicLabel>(),
            Err(LabelParseError::NonPositiveHeavyDelta(_))
        ));
        assert!(matches!(
            "100.0+4.05#0".parse::<IsotopicLabel>(),
            Err(LabelParseError::NonPositiveMaxLabelCount(0))
        ));
        assert!(matches!(
            "100.0+4.05#-2@C".parse::<IsotopicLabel>(),
            Err(LabelParseError::NonPositiveMaxLabelCount(-2))
        ));
        assert!(matches!(
            "100.0+4.05@c".parse::<IsotopicLabel>(),
            Err(LabelParseError::InvalidResidue(_))
        ));
        assert!(matches!(
            "100.0+4.05@CK".parse::<IsotopicLabel>(),
            Err(LabelParseError::InvalidResidue(_))
        ));
        assert!(matches!(
            "abc+4.05".parse::<IsotopicLabel>(),
            Err(LabelParseError::InvalidNumber { field: "light mass", .. })
        ));
        assert!(matches!(
            "-1+4.05".parse::<IsotopicLabel>(),
            Err(LabelParseError::NegativeLightMass(_))
        ));
    }

    #[test]
    fn test_registry() {
        let registry = LabelRegistry::with_presets();
        let icat = registry.resolve("ICAT").unwrap();
        assert_eq!(icat.residue(), 'C');
        assert_eq!(icat.light(), 442.224991);
        assert!(registry.names().any(|n| n == "o18"));
        assert!(!registry.get("o18").unwrap().is_residue_specific());

        let custom = registry.resolve("10+2#2@K").unwrap();
        assert_eq!(custom.max_label_count(), 2);
        assert!(matches!(
            registry.resolve("nonsense"),
            Err(LabelParseError::UnknownLabel(_))
        ));

        let mut registry = LabelRegistry::new();
        assert!(registry.register("Mine", custom).is_none());
        assert_eq!(registry.resolve("mine").unwrap(), custom);
    }
}
