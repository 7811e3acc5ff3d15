//! Shared fixture builders for the integration suite.

use std::path::Path;

use appupd::manifest::{Application, Package};
use chrono::{TimeZone, Utc};
use url::Url;
use uuid::Uuid;

pub const APP_ID: &str = "04fc007e-db18-430f-b4fa-f5b54de1e142";
pub const PACKAGE_ID: &str = "61038014-97c6-418a-9262-94d78db167e8";

/// An application shaped like the manifest wire-format example.
pub fn test_app(package: Package) -> Application {
    Application {
        id: APP_ID.parse().unwrap(),
        name: "Test App 01".to_string(),
        description: "Test App 01".to_string(),
        exe_filename: "testapp.exe".to_string(),
        version_filename: "testapp.dll".to_string(),
        command_line: "param1".to_string(),
        before_install_command: String::new(),
        after_install_command: String::new(),
        packages: vec![package],
    }
}

/// A package pointing at `source_uri` with the given checksum.
pub fn test_package(source_uri: Url, checksum: &str) -> Package {
    Package {
        id: PACKAGE_ID.parse().unwrap(),
        is_available: true,
        file_version: "1.0.1.0".to_string(),
        release_date_utc: Utc.with_ymd_and_hms(2018, 10, 2, 0, 0, 0).unwrap(),
        source_uri,
        checksum: checksum.to_string(),
    }
}

/// Writes the standard three-entry package archive: the version oracle
/// plus two payload files. Returns its MD5.
pub fn write_test_archive(path: &Path) -> String {
    appupd::test_utils::write_zip(
        path,
        &[
            ("testapp.dll", b"1.0.1.0".as_slice()),
            ("testapp.exe", b"stub executable".as_slice()),
            ("assets/readme.txt", b"hello".as_slice()),
        ],
    );
    appupd::engine::md5_hex(&std::fs::read(path).unwrap())
}

pub fn file_url(path: &Path) -> Url {
    Url::from_file_path(path).unwrap()
}

/// Fresh v4 UUID for apps that must be absent from a manifest.
pub fn unknown_app_id() -> Uuid {
    Uuid::new_v4()
}
