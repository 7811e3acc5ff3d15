//! End-to-end scenarios for the update engine state machine.

use std::time::Duration;

use appupd::config::ClientCredentials;
use appupd::engine::{UpdateEngine, UpdateOutcome};
use appupd::test_utils::{MockProcessSupervisor, TextVersionProbe};
use url::Url;

use crate::support::{file_url, test_app, test_package, write_test_archive};

fn engine_with(
    manifest_uri: Url,
    credentials: Option<ClientCredentials>,
    supervisor: &MockProcessSupervisor,
) -> UpdateEngine {
    UpdateEngine::new(manifest_uri, credentials)
        .with_supervisor(Box::new(supervisor.clone()))
        .with_version_probe(Box::new(TextVersionProbe))
        .with_settle_delay(Duration::ZERO)
}

fn complete_credentials() -> ClientCredentials {
    ClientCredentials {
        client_id: "device-01".to_string(),
        client_secret: "s3cret".to_string(),
        scope: "appupdates".to_string(),
    }
}

fn dir_file_count(path: &std::path::Path) -> usize {
    match std::fs::read_dir(path) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

/// Scenario A: empty install directory, local package source. The engine
/// must create the directory, verify the checksum, extract everything,
/// and launch the process.
#[tokio::test]
async fn fresh_install_extracts_and_launches() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive);
    let install_dir = temp.path().join("install");

    let package = test_package(file_url(&archive), &checksum);
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(file_url(&archive), None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Updated);

    // All three files extracted; the version oracle reports the new version.
    assert_eq!(
        std::fs::read_to_string(install_dir.join("testapp.dll")).unwrap(),
        "1.0.1.0"
    );
    assert!(install_dir.join("testapp.exe").exists());
    assert!(install_dir.join("assets/readme.txt").exists());

    // Launched once, in the install directory, with the manifest args.
    let started = supervisor.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].install_dir, install_dir);
    assert_eq!(started[0].exe, "testapp.exe");
    assert_eq!(started[0].args, "param1");

    // The local source archive is used in place, never deleted.
    assert!(archive.exists());
}

/// Scenario B: the declared checksum is corrupted. The install directory
/// must stay empty and the process must not be launched.
#[tokio::test]
async fn checksum_mismatch_leaves_install_untouched() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let _good = write_test_archive(&archive);
    let install_dir = temp.path().join("install");

    let package = test_package(file_url(&archive), "00000000000000000000000000000000");
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(file_url(&archive), None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Failed);
    assert_eq!(dir_file_count(&install_dir), 0);
    assert!(supervisor.started().is_empty());
    assert!(supervisor.terminated().is_empty());
}

/// The declared checksum is compared case-insensitively.
#[tokio::test]
async fn uppercase_checksum_still_verifies() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive).to_uppercase();
    let install_dir = temp.path().join("install");

    let package = test_package(file_url(&archive), &checksum);
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(file_url(&archive), None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Updated);
}

/// Scenario C: client credentials configured, token endpoint rejects.
/// Nothing may be written and no unauthenticated download attempted.
#[tokio::test]
async fn rejected_token_exchange_aborts_without_download() {
    let mut server = mockito::Server::new_async().await;
    let token_mock = server
        .mock("POST", "/appupdates/account/token")
        .with_status(401)
        .create_async()
        .await;
    let download_mock = server
        .mock("GET", "/packages/testapp_1010.zip")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let temp = tempfile::TempDir::new().unwrap();
    let install_dir = temp.path().join("install");
    let manifest_uri =
        Url::parse(&format!("{}/app-update-manifest.json", server.url())).unwrap();
    let source_uri =
        Url::parse(&format!("{}/packages/testapp_1010.zip", server.url())).unwrap();

    let package = test_package(source_uri, "00000000000000000000000000000000");
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(manifest_uri, Some(complete_credentials()), &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Failed);
    assert_eq!(dir_file_count(&install_dir), 0);
    assert!(supervisor.started().is_empty());
    token_mock.assert_async().await;
    download_mock.assert_async().await;
}

/// A gated download attaches the bearer token from the exchange.
#[tokio::test]
async fn gated_download_sends_bearer_token() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive);
    let archive_bytes = std::fs::read(&archive).unwrap();
    let install_dir = temp.path().join("install");
    let download_dir = temp.path().join("downloads");
    std::fs::create_dir_all(&download_dir).unwrap();

    let mut server = mockito::Server::new_async().await;
    let token_mock = server
        .mock("POST", "/appupdates/account/token")
        .with_status(200)
        .with_body(r#"{"token":"opaque-bearer"}"#)
        .create_async()
        .await;
    let download_mock = server
        .mock("GET", "/packages/testapp_1010.zip")
        .match_header("authorization", "Bearer opaque-bearer")
        .with_status(200)
        .with_body(archive_bytes)
        .create_async()
        .await;

    let manifest_uri =
        Url::parse(&format!("{}/app-update-manifest.json", server.url())).unwrap();
    let source_uri =
        Url::parse(&format!("{}/packages/testapp_1010.zip", server.url())).unwrap();

    let package = test_package(source_uri, &checksum);
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(manifest_uri, Some(complete_credentials()), &supervisor)
        .with_download_dir(download_dir.clone());

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Updated);
    assert!(install_dir.join("testapp.dll").exists());
    token_mock.assert_async().await;
    download_mock.assert_async().await;

    // The temp download never outlives the update.
    assert_eq!(dir_file_count(&download_dir), 0);
}

/// A package much larger than any single transfer chunk downloads
/// intact and extracts byte for byte.
#[tokio::test]
async fn large_remote_package_downloads_intact() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let install_dir = temp.path().join("install");

    // Incompressible payload so the served body stays at full size.
    let mut payload = vec![0u8; 1 << 20];
    let mut state = 0x2545f4914f6cdd1du64;
    for byte in payload.iter_mut() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *byte = (state >> 56) as u8;
    }
    appupd::test_utils::write_zip(
        &archive,
        &[
            ("testapp.dll", b"1.0.1.0".as_slice()),
            ("payload.bin", payload.as_slice()),
        ],
    );
    let archive_bytes = std::fs::read(&archive).unwrap();
    let checksum = appupd::engine::md5_hex(&archive_bytes);

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/packages/testapp_1010.zip")
        .with_status(200)
        .with_body(archive_bytes)
        .create_async()
        .await;

    let manifest_uri =
        Url::parse(&format!("{}/app-update-manifest.json", server.url())).unwrap();
    let source_uri =
        Url::parse(&format!("{}/packages/testapp_1010.zip", server.url())).unwrap();

    let package = test_package(source_uri, &checksum);
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(manifest_uri, None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Updated);
    assert_eq!(std::fs::read(install_dir.join("payload.bin")).unwrap(), payload);
}

/// A corrupt remote package leaves no temp download behind either.
#[tokio::test]
async fn failed_remote_update_cleans_up_temp_download() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let _checksum = write_test_archive(&archive);
    let archive_bytes = std::fs::read(&archive).unwrap();
    let install_dir = temp.path().join("install");
    let download_dir = temp.path().join("downloads");
    std::fs::create_dir_all(&download_dir).unwrap();

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/packages/testapp_1010.zip")
        .with_status(200)
        .with_body(archive_bytes)
        .create_async()
        .await;

    let manifest_uri =
        Url::parse(&format!("{}/app-update-manifest.json", server.url())).unwrap();
    let source_uri =
        Url::parse(&format!("{}/packages/testapp_1010.zip", server.url())).unwrap();

    let package = test_package(source_uri, "00000000000000000000000000000000");
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(manifest_uri, None, &supervisor)
        .with_download_dir(download_dir.clone());

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Failed);
    assert_eq!(dir_file_count(&download_dir), 0);
    assert_eq!(dir_file_count(&install_dir), 0);
}

/// Scenario D: installed at the latest version but the process is dead.
/// The engine must relaunch it and perform no download or extraction.
#[tokio::test]
async fn up_to_date_but_dead_process_is_relaunched() {
    let temp = tempfile::TempDir::new().unwrap();
    let install_dir = temp.path().join("install");
    std::fs::create_dir_all(&install_dir).unwrap();
    std::fs::write(install_dir.join("testapp.dll"), "1.0.1.0").unwrap();

    // Unroutable source: any fetch attempt would fail the update.
    let source_uri = Url::parse("https://updates.invalid/packages/testapp_1010.zip").unwrap();
    let package = test_package(source_uri.clone(), "00000000000000000000000000000000");
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(source_uri, None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Relaunched);
    assert_eq!(supervisor.started().len(), 1);
    assert!(supervisor.terminated().is_empty());
}

/// Up to date with a live process: no action at all.
#[tokio::test]
async fn up_to_date_and_running_is_a_no_op() {
    let temp = tempfile::TempDir::new().unwrap();
    let install_dir = temp.path().join("install");
    std::fs::create_dir_all(&install_dir).unwrap();
    std::fs::write(install_dir.join("testapp.dll"), "1.0.1.0").unwrap();

    let source_uri = Url::parse("https://updates.invalid/packages/testapp_1010.zip").unwrap();
    let package = test_package(source_uri.clone(), "00000000000000000000000000000000");
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    supervisor.set_running(true);
    let engine = engine_with(source_uri, None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::UpToDate);
    assert!(supervisor.started().is_empty());
    assert!(supervisor.terminated().is_empty());
}

/// Update is idempotent: the second invocation only probes and returns.
#[tokio::test]
async fn repeated_update_is_idempotent() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive);
    let install_dir = temp.path().join("install");

    let package = test_package(file_url(&archive), &checksum);
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(file_url(&archive), None, &supervisor);

    let first = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(first, UpdateOutcome::Updated);
    let mtime = std::fs::metadata(install_dir.join("testapp.dll"))
        .unwrap()
        .modified()
        .unwrap();

    let second = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(second, UpdateOutcome::UpToDate);
    assert_eq!(supervisor.started().len(), 1);
    assert_eq!(
        std::fs::metadata(install_dir.join("testapp.dll")).unwrap().modified().unwrap(),
        mtime
    );
}

/// An existing install at a different version is stopped, overwritten in
/// place, and relaunched.
#[tokio::test]
async fn stale_install_is_stopped_and_overwritten() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive);
    let install_dir = temp.path().join("install");
    std::fs::create_dir_all(&install_dir).unwrap();
    std::fs::write(install_dir.join("testapp.dll"), "1.0.0.0").unwrap();
    std::fs::write(install_dir.join("stale-note.txt"), "left alone").unwrap();

    let package = test_package(file_url(&archive), &checksum);
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    supervisor.set_running(true);
    let engine = engine_with(file_url(&archive), None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Updated);
    assert_eq!(supervisor.terminated(), vec!["testapp.exe".to_string()]);
    assert_eq!(supervisor.started().len(), 1);
    assert_eq!(
        std::fs::read_to_string(install_dir.join("testapp.dll")).unwrap(),
        "1.0.1.0"
    );
    // Files not present in the archive are untouched.
    assert_eq!(
        std::fs::read_to_string(install_dir.join("stale-note.txt")).unwrap(),
        "left alone"
    );
}

/// With installs disabled, a never-installed app is skipped untouched.
#[tokio::test]
async fn fresh_install_refused_when_installs_disabled() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive);
    let install_dir = temp.path().join("install");

    let package = test_package(file_url(&archive), &checksum);
    let app = test_app(package.clone());
    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(file_url(&archive), None, &supervisor).with_allow_installs(false);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Skipped);
    assert_eq!(dir_file_count(&install_dir), 0);
    assert!(supervisor.started().is_empty());
}

/// Install hooks run through the platform shell with the install
/// directory as their working directory.
#[tokio::test]
async fn install_hooks_run_in_install_directory() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive);
    let install_dir = temp.path().join("install");

    let package = test_package(file_url(&archive), &checksum);
    let mut app = test_app(package.clone());
    app.before_install_command = "echo before > hook-before.txt".to_string();
    app.after_install_command = "echo after > hook-after.txt".to_string();

    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(file_url(&archive), None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Updated);
    assert!(install_dir.join("hook-before.txt").exists());
    assert!(install_dir.join("hook-after.txt").exists());
}

/// A process already alive after the after-install hook suppresses the
/// relaunch (no double launch).
#[tokio::test]
async fn running_process_after_hooks_suppresses_relaunch() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive);
    let install_dir = temp.path().join("install");

    let package = test_package(file_url(&archive), &checksum);
    let app = test_app(package.clone());
    let supervisor = ReviveOnTerminate::new();
    let engine = UpdateEngine::new(file_url(&archive), None)
        .with_supervisor(Box::new(supervisor.clone()))
        .with_version_probe(Box::new(TextVersionProbe))
        .with_settle_delay(Duration::ZERO);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Updated);
    // The supervisor reports the process alive again by relaunch time
    // (e.g. the after-install hook restarted it); no start call happens.
    assert!(supervisor.inner.started().is_empty());
}

/// Supervisor double whose process springs back to life after terminate,
/// modelling an after-install hook that starts the application itself.
#[derive(Clone)]
struct ReviveOnTerminate {
    inner: MockProcessSupervisor,
}

impl ReviveOnTerminate {
    fn new() -> Self {
        Self { inner: MockProcessSupervisor::new() }
    }
}

impl appupd::process::ProcessSupervisor for ReviveOnTerminate {
    fn find(&self, exe_filename: &str) -> Vec<appupd::process::ProcessInfo> {
        self.inner.find(exe_filename)
    }

    fn terminate(&self, exe_filename: &str) -> Result<usize, appupd::AgentError> {
        let killed = self.inner.terminate(exe_filename)?;
        self.inner.set_running(true);
        Ok(killed)
    }

    fn start(
        &self,
        install_dir: &std::path::Path,
        exe_filename: &str,
        command_line: &str,
    ) -> Result<(), appupd::AgentError> {
        self.inner.start(install_dir, exe_filename, command_line)
    }
}

/// A failing hook is logged but does not abort the update.
#[tokio::test]
async fn failing_hook_does_not_abort_update() {
    let temp = tempfile::TempDir::new().unwrap();
    let archive = temp.path().join("testapp_1010.zip");
    let checksum = write_test_archive(&archive);
    let install_dir = temp.path().join("install");

    let package = test_package(file_url(&archive), &checksum);
    let mut app = test_app(package.clone());
    app.before_install_command = "exit 7".to_string();

    let supervisor = MockProcessSupervisor::new();
    let engine = engine_with(file_url(&archive), None, &supervisor);

    let outcome = engine.update(&app, &package, &file_url(&install_dir)).await;
    assert_eq!(outcome, UpdateOutcome::Updated);
    assert!(install_dir.join("testapp.dll").exists());
}
