//! Integration tests for Rock

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Isolated from the user's config and cache
    fn rock(home: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("rock");
        cmd.env("ROCK_CONFIG", home.join("config.toml"))
            .env("ROCK_CACHE_DIR", home.join("cache"))
            .env("CI", "true")
            .env_remove("GITHUB_TOKEN");
        cmd
    }

    fn android_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("android/app")).unwrap();
        fs::write(dir.path().join("android/app/build.gradle"), "android {}").unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"app","dependencies":{"react-native":"0.76.0"}}"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("native build caching"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("rock"));
    }

    #[test]
    fn fingerprint_raw_is_stable() {
        let home = TempDir::new().unwrap();
        let project = android_project();

        let first = rock(home.path())
            .args(["--no-local", "fingerprint", "-p", "android", "--raw", "--source"])
            .arg(project.path())
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let hash = String::from_utf8(first).unwrap();
        assert_eq!(hash.trim().len(), 64);

        rock(home.path())
            .args(["--no-local", "fingerprint", "-p", "android", "--raw", "--source"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::diff(hash));
    }

    #[test]
    fn fingerprint_debug_lists_sources() {
        let home = TempDir::new().unwrap();
        let project = android_project();
        rock(home.path())
            .args(["--no-local", "fingerprint", "-p", "android", "--debug", "--source"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("android").and(predicate::str::contains("Hash")));
    }

    #[test]
    fn fingerprint_invalid_platform_fails() {
        let home = TempDir::new().unwrap();
        let project = android_project();
        rock(home.path())
            .args(["fingerprint", "-p", "windows", "--source"])
            .arg(project.path())
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Invalid platform"));
    }

    #[test]
    fn fingerprint_missing_platform_fails() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .args(["fingerprint"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("android, ios, harmony"));
    }

    #[test]
    fn resolve_binary_without_cache_prints_nothing() {
        let home = TempDir::new().unwrap();
        let project = android_project();
        rock(home.path())
            .args(["--no-local", "resolve-binary", "-p", "android", "--source"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn saved_build_is_resolved() {
        let home = TempDir::new().unwrap();
        let project = android_project();
        let apk = home.path().join("app-debug.apk");
        fs::write(&apk, "apk bytes").unwrap();

        rock(home.path())
            .args(["--no-local", "cache", "save", "-p", "android", "-t", "debug", "--source"])
            .arg(project.path())
            .arg("--binary-path")
            .arg(&apk)
            .assert()
            .success()
            .stdout(predicate::str::contains("app-debug.apk"));

        rock(home.path())
            .args(["--no-local", "resolve-binary", "-p", "android", "-t", "debug", "--source"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("app-debug.apk"));

        rock(home.path())
            .args(["cache", "list", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("rock-android-debug-"));
    }

    #[test]
    fn remote_cache_requires_provider() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .args(["--no-local", "remote-cache", "get-provider-name"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("not configured"));
    }

    #[test]
    fn remote_cache_conflicting_delete_flags() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .args([
                "remote-cache",
                "delete",
                "--name",
                "rock-ios-abc",
                "--all",
                "--all-but-latest",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Incompatible flags"));
    }

    #[test]
    fn cache_path_honours_env() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("remote-build"));
    }

    #[test]
    fn cache_list_empty() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .args(["cache", "list", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"builds\":[]"));
    }

    #[test]
    fn config_path() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .args(["--no-local", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[remote_cache]"));
    }

    #[test]
    fn config_init_creates_file() {
        let home = TempDir::new().unwrap();
        rock(home.path())
            .args(["config", "init"])
            .assert()
            .success();
        assert!(home.path().join("config.toml").exists());
    }
}
