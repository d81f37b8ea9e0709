use std::{error::Error, fs, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzquanter")?;

    cmd.args(["deconvolute", "not_real.tsv", "-o", "-"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read the feature table not_real.tsv"));
    Ok(())
}

#[test]
fn test_malformed_time_range() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzquanter")?;

    cmd.args(["deconvolute", "not_real.tsv", "-o", "-"]).args(["--time-range=10-z"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Failed to parse time range end invalid float literal",
    ));

    let mut cmd = Command::cargo_bin("mzquanter")?;

    cmd.args(["pairs", "not_real.tsv", "-o", "-"]).args(["-r", "a-"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Failed to parse time range start invalid float literal",
    ));

    Ok(())
}

#[test]
fn test_bad_label() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzquanter")?;
    cmd.args(["pairs", "./tests/data/icat_pairs.tsv", "-o", "-", "-L", "100+4@CK"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("is not an amino acid residue letter"));

    let mut cmd = Command::cargo_bin("mzquanter")?;
    cmd.args(["pairs", "./tests/data/icat_pairs.tsv", "-o", "-", "-L", "heavy-water"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("is neither a known label name nor a label description"));
    Ok(())
}

#[test]
fn test_non_positive_tolerance() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzquanter")?;
    cmd.args(["align", "./tests/data/run_a.tsv", "-m", "0"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("is not greater than zero"));
    Ok(())
}

#[test]
fn test_deconvolute_stdout() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzquanter")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["deconvolute", "./tests/data/charge_states.tsv", "-o", "-", "--show-charge-descriptions"]);
    let result = cmd.assert().success();
    result
        .stdout(predicate::str::starts_with("# instrument=test-tof"))
        .stdout(predicate::str::contains("description"))
        .stderr(predicate::str::contains("Output Features: 4"))
        .stderr(predicate::str::contains("Merged Buckets: 2 | Uncharged: 1"));
    Ok(())
}

#[test]
fn test_deconvolute_time_range() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzquanter")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["deconvolute", "./tests/data/charge_states.tsv", "-o", "-", "-r", "500-1000"]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Input Features: 5"))
        .stderr(predicate::str::contains("Output Features: 2"));
    Ok(())
}

#[test]
fn test_align_by_charge() -> Result<(), Box<dyn Error>> {
    fs::create_dir_all("./tmp")?;
    let mut cmd = Command::cargo_bin("mzquanter")?;
    cmd.env("RUST_LOG", "info");
    cmd.args([
        "align",
        "./tests/data/run_a.tsv",
        "./tests/data/run_b.tsv",
        "-z",
        "-o",
        "./tmp/aligned_by_charge.tsv.gz",
    ]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Input Sets: 2 | Input Features: 6"))
        .stderr(predicate::str::contains("Rows: 4 | Cells: 6"));
    let compressed = fs::read("./tmp/aligned_by_charge.tsv.gz")?;
    assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    Ok(())
}

#[test]
fn test_align_optimized() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzquanter")?;
    cmd.env("RUST_LOG", "info");
    cmd.args([
        "align",
        "./tests/data/run_a.tsv",
        "./tests/data/run_b.tsv",
        "--mass-candidates",
        "0.01,0.1",
        "--elution-candidates",
        "10,100",
    ]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Best tolerances: mass=0.1 elution=100"))
        .stdout(predicate::str::contains("PEPTIDEK"));
    Ok(())
}

#[test]
fn test_pairs_stdout() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzquanter")?;
    cmd.env("RUST_LOG", "info");
    cmd.args([
        "pairs",
        "./tests/data/icat_pairs.tsv",
        "-L",
        "icat-cleavable",
        "-s",
        "intensity-anchored",
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("# label=227.126991+9.030193#3@C"))
        .stdout(predicate::str::contains("lightIntensity\theavyIntensity\tratio\tlabelCount"))
        .stderr(predicate::str::contains("Pairs: 2"));
    Ok(())
}
