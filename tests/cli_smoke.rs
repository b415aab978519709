//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use cap_std::{ambient_authority, fs_utf8::Dir};
use camino::Utf8PathBuf;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("scanywhere");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("scan"))
        .stdout(contains("sweep"));
}

#[test]
fn scan_without_profile_is_a_usage_error() {
    let mut cmd = cargo_bin_cmd!("scanywhere");
    cmd.arg("scan");
    cmd.assert().failure().stderr(contains("--profile"));
}

#[test]
fn unknown_profile_exits_with_configuration_status() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Dir::open_ambient_dir(&root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write("profiles.json", r#"{"demo": {"VPN_SERVICE_PROVIDER": "demo"}}"#)
        .unwrap_or_else(|err| panic!("write profiles: {err}"));

    let mut cmd = cargo_bin_cmd!("scanywhere");
    cmd.current_dir(&root);
    cmd.env("SCANYWHERE_PROFILES_PATH", root.join("profiles.json").as_str());
    cmd.args(["scan", "--profile", "nope"]);

    cmd.assert()
        .code(1)
        .stderr(contains("unknown provider profile 'nope'"))
        .stderr(contains("demo"));
}
