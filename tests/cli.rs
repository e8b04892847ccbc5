mod common;

use common::evolvd_bin;

#[test]
fn version_flag_prints_version() {
    evolvd_bin()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("evolvd"));
}

#[test]
fn help_flag_prints_usage() {
    evolvd_bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Usage: evolvd"));
}

#[test]
fn unknown_argument_is_rejected() {
    evolvd_bin().arg("--frobnicate").assert().code(2);
}

#[test]
fn missing_config_is_a_startup_error() {
    let dir = tempfile::TempDir::new().unwrap();
    evolvd_bin()
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("Config load failed"));
}
