use std::path::{Path, PathBuf};

use agent_autoupdate::target::HashAlgorithm;
use agent_autoupdate::verification::ChecksumVerifier;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct CliEnv {
    temp_dir: TempDir,
    config: PathBuf,
}

impl CliEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_dir.path().join("config.toml");
        std::fs::write(&config, "versions_to_keep = 1\n").unwrap();
        Self {
            temp_dir,
            config,
        }
    }

    fn root(&self) -> PathBuf {
        self.temp_dir.path().join("library")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("autoupdate").unwrap();
        cmd.env_remove("AUTOUPDATE_ROOT")
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1")
            .arg("--config")
            .arg(&self.config)
            .arg("--root")
            .arg(self.root());
        cmd
    }

    /// Write an artifact to a download directory and return its path and hash.
    fn artifact(&self, name: &str) -> (PathBuf, String) {
        let dir = self.temp_dir.path().join("downloads");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let bytes = format!("#!/bin/sh\necho {name}\n").into_bytes();
        std::fs::write(&path, &bytes).unwrap();
        (path, ChecksumVerifier::digest_bytes(HashAlgorithm::Sha256, &bytes).to_string())
    }

    fn install(&self, path: &Path, hash: &str) -> assert_cmd::assert::Assert {
        self.cmd().arg("install").arg("agent").arg(path).arg("--hash").arg(hash).assert()
    }
}

#[test]
fn test_status_on_empty_library() {
    let env = CliEnv::new();
    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("agent"))
        .stdout(predicate::str::contains("collector"))
        .stdout(predicate::str::contains("unset"));
}

#[test]
fn test_install_list_select_activate() {
    let env = CliEnv::new();
    let (path, hash) = env.artifact("agent-1.2.0-linux-amd64");

    env.install(&path, &hash).success().stdout(predicate::str::contains("Installed"));
    env.install(&path, &hash).success().stdout(predicate::str::contains("already installed"));

    env.cmd()
        .args(["list", "agent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1.2.0"))
        .stdout(predicate::str::contains("agent-1.2.0-linux-amd64"));

    env.cmd()
        .args(["select", "agent"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("1.2.0\t"));

    env.cmd().args(["activate", "agent"]).assert().success();

    env.cmd()
        .args(["list", "agent", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"current\": true"));
}

#[test]
fn test_install_with_wrong_hash_fails() {
    let env = CliEnv::new();
    let (path, _) = env.artifact("agent-1.2.0");
    let (_, other_hash) = env.artifact("agent-9.9.9");

    env.install(&path, &other_hash)
        .failure()
        .stderr(predicate::str::contains("verification mismatch"));

    env.cmd()
        .args(["list", "agent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No versions of agent installed"));
}

#[test]
fn test_install_rejects_unversioned_file_name() {
    let env = CliEnv::new();
    let (path, hash) = env.artifact("agent-latest");

    env.install(&path, &hash).failure().stderr(predicate::str::contains("invalid target"));
}

#[test]
fn test_activate_missing_version_fails() {
    let env = CliEnv::new();
    let (path, hash) = env.artifact("agent-1.0.0");
    env.install(&path, &hash).success();

    env.cmd()
        .args(["activate", "agent", "2.0.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not installed"));
}

#[test]
fn test_select_on_empty_library_fails() {
    let env = CliEnv::new();
    env.cmd()
        .args(["select", "collector"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no runnable version of collector"));
}

#[test]
fn test_tidy_reports_removed_versions() {
    let env = CliEnv::new();
    for name in ["agent-1.0.0", "agent-1.1.0", "agent-1.2.0"] {
        let (path, hash) = env.artifact(name);
        env.install(&path, &hash).success();
    }

    env.cmd()
        .args(["tidy", "agent", "--current", "1.0.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed agent 1.1.0"))
        .stdout(predicate::str::contains("2 version(s) of agent kept"));
}
