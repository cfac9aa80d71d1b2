//! Integration tests for mimosa-matrix

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;

    const FIELD_VARS: &[&str] = &[
        "MIMOSA_MATRIX_BAKE_DEFINITION",
        "MIMOSA_MATRIX_BAKE_LOCATION",
        "MIMOSA_MATRIX_BUILD_FILE_COUNT",
        "MIMOSA_MATRIX_BUILD_FILE_LOCATION",
        "MIMOSA_MATRIX_TARGETS",
        "MIMOSA_MATRIX_IGNORE",
        "MIMOSA_MATRIX_CONTEXT",
        "MIMOSA_MATRIX_CACHE_SOURCE",
        "MIMOSA_MATRIX_MAX_WORKERS",
    ];

    /// Command isolated from the user's config and field overrides
    fn matrix(config: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("mimosa-matrix");
        for var in FIELD_VARS {
            cmd.env_remove(var);
        }
        cmd.env("MIMOSA_MATRIX_CONFIG", config);
        cmd
    }

    fn missing_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("absent.toml")
    }

    #[test]
    fn help_displays() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("differential cache tests"));
    }

    #[test]
    fn version_displays() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("mimosa-matrix"));
    }

    #[test]
    fn help_hides_worker() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("worker").not());
    }

    #[test]
    fn list_full_space() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("224 configuration(s)"));
    }

    #[test]
    fn list_json_respects_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let output = matrix(&missing_config(&tmp))
            .args(["list", "--json", "--bake-definition", "none"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let entries = entries.as_array().unwrap();
        assert_eq!(entries.len(), 32);
        assert_eq!(entries[0]["number"], 1);
        assert_eq!(entries[0]["configuration"]["bake_definition"], "none");
        assert_eq!(entries[31]["number"], 32);
    }

    #[test]
    fn list_reads_env_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .arg("list")
            .env("MIMOSA_MATRIX_BAKE_DEFINITION", "none")
            .env("MIMOSA_MATRIX_CACHE_SOURCE", "disk")
            .assert()
            .success()
            .stdout(predicate::str::contains("16 configuration(s)"));
    }

    #[test]
    fn list_reads_matrix_table_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join("config.toml");
        std::fs::write(
            &config,
            "[matrix]\nbake_definition = [\"none\"]\ncache_source = [\"memory\"]\n",
        )
        .unwrap();

        matrix(&config)
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("16 configuration(s)"));

        // Flags win over the config table
        matrix(&config)
            .args(["list", "--bake-definition", "single"])
            .assert()
            .success()
            .stdout(predicate::str::contains("48 configuration(s)"));
    }

    #[test]
    fn invalid_field_value_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .args(["list", "--ignore", "several"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }

    #[test]
    fn invalid_config_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join("config.toml");
        std::fs::write(&config, "[run]\nmax_workers = \"many\"\n").unwrap();

        matrix(&config)
            .arg("list")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn run_with_empty_space_fails_before_building() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .args([
                "run",
                "--bake-definition",
                "none",
                "--targets",
                "multiple",
                "--work-root",
            ])
            .arg(tmp.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("no valid configuration"));
    }

    #[test]
    fn worker_rejects_malformed_case() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .args(["worker", "--case", "not json", "--output-dir"])
            .arg(tmp.path().join("case-1"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn completions_generate() {
        let tmp = tempfile::tempdir().unwrap();
        matrix(&missing_config(&tmp))
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("mimosa-matrix"));
    }
}
