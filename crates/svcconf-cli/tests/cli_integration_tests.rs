//! CLI integration tests
//!
//! These run the `svcconf` binary against a scratch repository file and
//! check what it prints and how it exits.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::json;
use tempfile::TempDir;

fn write_bundle(dir: &Path, file: &str, port: u64) -> PathBuf {
    let path = dir.join(file);
    let bundle = json!({
        "name": "web",
        "source": file,
        "services": [{
            "name": "network/web",
            "property_groups": [{
                "name": "config",
                "pg_type": "application",
                "properties": [{
                    "name": "port",
                    "value_type": "count",
                    "values": [port.to_string()]
                }]
            }],
            "instances": [{
                "name": "default",
                "property_groups": [{
                    "name": "general",
                    "pg_type": "framework",
                    "properties": [{"name": "enabled", "value_type": "boolean", "values": ["true"]}]
                }]
            }]
        }]
    });
    fs::write(&path, serde_json::to_string_pretty(&bundle).unwrap()).unwrap();
    path
}

fn svcconf(dir: &TempDir, args: &[&str]) -> Output {
    let repository = dir.path().join("repo").join("repository.db");
    Command::new(env!("CARGO_BIN_EXE_svcconf"))
        .current_dir(dir.path())
        .env_remove("SVCCONF_CONFIG")
        .env("RUST_LOG", "off")
        .arg("--repository")
        .arg(&repository)
        .args(args)
        .output()
        .expect("Failed to execute CLI")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_import_then_show() {
    // Given: A bundle file
    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(dir.path(), "web.json", 8080);

    // When: It is imported and the service shown
    let import = svcconf(&dir, &["import", bundle.to_str().unwrap()]);
    let show = svcconf(&dir, &["show", "svc:/network/web"]);

    // Then: Both succeed and the declared value is effective at the manifest layer
    assert!(import.status.success(), "import failed: {:?}", import);
    assert!(stdout(&import).contains("svc:/network/web:default: imported (created)"));
    assert!(show.status.success());
    assert!(stdout(&show).contains("port count = 8080 [manifest]"));
}

#[test]
fn test_show_json_is_parseable() {
    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(dir.path(), "web.json", 8080);
    svcconf(&dir, &["import", bundle.to_str().unwrap()]);

    let show = svcconf(&dir, &["show", "svc:/network/web", "--json"]);

    let groups: serde_json::Value = serde_json::from_slice(&show.stdout).unwrap();
    assert_eq!(groups[0]["name"], "config");
}

#[test]
fn test_snapshot_list_take_restore() {
    // Given: An imported instance
    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(dir.path(), "web.json", 8080);
    svcconf(&dir, &["import", bundle.to_str().unwrap()]);

    // When: A named snapshot is taken and later restored
    let take = svcconf(
        &dir,
        &["snapshot", "take", "svc:/network/web:default", "--name", "golden"],
    );
    let restore = svcconf(
        &dir,
        &["snapshot", "restore", "svc:/network/web:default", "golden"],
    );
    let list = svcconf(&dir, &["snapshot", "list", "svc:/network/web:default"]);

    // Then: Each step succeeds and the listing shows every snapshot
    assert!(take.status.success());
    assert!(stdout(&take).contains("Snapshot taken: golden"));
    assert!(restore.status.success());
    assert!(stdout(&restore).contains("Restored golden"));
    let listing = stdout(&list);
    for name in ["golden", "initial", "previous"] {
        assert!(listing.contains(name), "missing {} in {}", name, listing);
    }
}

#[test]
fn test_cleanup_removes_retired_source() {
    // Given: Two imported bundles
    let dir = TempDir::new().unwrap();
    let web = write_bundle(dir.path(), "web.json", 8080);
    let old = dir.path().join("old.json");
    fs::write(
        &old,
        r#"{"name": "old", "source": "old.json", "services": [{"name": "legacy",
            "property_groups": [{"name": "config", "pg_type": "application",
              "properties": [{"name": "size", "value_type": "count", "values": ["1"]}]}]}]}"#,
    )
    .unwrap();
    svcconf(
        &dir,
        &["import", web.to_str().unwrap(), old.to_str().unwrap()],
    );

    // When: Cleanup keeps only web.json
    let cleanup = svcconf(&dir, &["cleanup", "--live-bundle", web.to_str().unwrap()]);

    // Then: The retired service is gone
    assert!(cleanup.status.success());
    assert!(stdout(&cleanup).contains("Removed old.json"));
    let show = svcconf(&dir, &["show", "svc:/legacy"]);
    assert!(!show.status.success());
}

#[test]
fn test_errors_exit_nonzero() {
    let dir = TempDir::new().unwrap();

    let missing_bundle = svcconf(&dir, &["import", "does-not-exist.json"]);
    let bad_fmri = svcconf(&dir, &["show", "not an fmri"]);

    assert_eq!(missing_bundle.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&missing_bundle.stderr).contains("Error: [ERR_IO]"));
    assert_eq!(bad_fmri.status.code(), Some(1));
}

#[test]
fn test_config_file_selects_repository() {
    // Given: A config file naming the repository, passed through the environment
    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(dir.path(), "web.json", 8080);
    let config = dir.path().join("svcconf.toml");
    fs::write(
        &config,
        "[repository]\npath = \"configured.db\"\n\n[logging]\nprofile = \"test\"\n",
    )
    .unwrap();

    // When: Importing without --repository
    let output = Command::new(env!("CARGO_BIN_EXE_svcconf"))
        .current_dir(dir.path())
        .env("SVCCONF_CONFIG", &config)
        .args(["import", bundle.to_str().unwrap()])
        .output()
        .unwrap();

    // Then: The configured file is created
    assert!(output.status.success(), "{:?}", output);
    assert!(dir.path().join("configured.db").exists());
}
