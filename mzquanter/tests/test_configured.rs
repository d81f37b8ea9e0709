use std::fs;
use std::path::Path;

use figment::{
    providers::{Format, Toml},
    Figment,
};

use mzquanter::{ArgConflictResolver, DeconvoluteArgs};

fn scratch() {
    fs::create_dir_all("./tmp").unwrap();
}

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_deconvolute_configured() {
    scratch();
    let mut config = Figment::new();
    config = config.merge(Toml::file_exact("./tests/data/deconvolute.toml"));
    let driver: DeconvoluteArgs = config.extract().unwrap();
    assert_eq!(driver.mass_tolerance, 20.0);
    assert_eq!(driver.common.threads, 2);
    assert!(!driver.optimize);

    let progress = driver.main().unwrap();
    assert_eq!(progress.input_features, 7);
    assert_eq!(progress.output_features, 4);
    assert_eq!(progress.merged_buckets, 2);
    assert_eq!(progress.uncharged_features, 1);

    let text = fs::read_to_string("./tmp/charge_states.deconvoluted.tsv").unwrap();
    assert!(text.starts_with("# instrument=test-tof\n"));
    assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 5);
}

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_align_configured() {
    scratch();
    let mut config = Figment::new();
    config = config.merge(Toml::file_exact("./tests/data/align.toml"));
    let driver: mzquanter::AlignArgs = config.extract().unwrap();
    assert_eq!(driver.input_files.len(), 2);
    assert_eq!(driver.conflict_resolution, ArgConflictResolver::Max);

    let progress = driver.main().unwrap();
    assert_eq!(progress.input_sets, 2);
    assert_eq!(progress.rows, 4);
    assert_eq!(progress.cells, 6);
    assert_eq!(progress.identification_conflicts, 0);

    let text = fs::read_to_string("./tmp/aligned.tsv").unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert!(header.contains("intensity_run_a\tpeptide_run_a\tprotein_run_a"));
    assert!(header.ends_with("intensity_run_b\tpeptide_run_b\tprotein_run_b"));
    assert_eq!(lines.count(), 4);
}

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_pairs_configured() {
    scratch();
    let mut config = Figment::new();
    config = config.merge(Toml::file_exact("./tests/data/pairs.toml"));
    let driver: mzquanter::PairsArgs = config.extract().unwrap();
    let progress = driver.main().unwrap();
    assert_eq!(progress.input_features, 6);
    assert_eq!(progress.pairs, 2);

    let set = mzquanter::read_feature_set(Path::new("./tmp/icat_pairs.quantified.tsv")).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.properties["label"], "227.126991+9.030193#3@C");
    let ratios: Vec<f64> = set
        .iter()
        .map(|f| f.quantitation.as_ref().unwrap().ratio)
        .collect();
    assert_eq!(ratios, vec![3.0, 0.5]);
    assert!(set.iter().all(|f| f.quantitation.unwrap().label_count == 1));
}

#[test]
fn test_config_layering() {
    let args = DeconvoluteArgs::default();
    assert_eq!(args.mass_tolerance, 15.0);
    let layered = mzquanter::configure(&args, Some(Path::new("./tests/data/deconvolute.toml"))).unwrap();
    assert_eq!(layered.mass_tolerance, 20.0);
    assert_eq!(layered.elution_tolerance, 30.0);
    assert_eq!(
        layered.input_file,
        Path::new("./tests/data/charge_states.tsv")
    );

    let missing = mzquanter::configure(&args, Some(Path::new("./tests/data/not_real.toml")));
    assert!(matches!(
        missing,
        Err(mzquanter::MZQuanterError::ConfigurationError(_))
    ));
}
