use serde::Serialize;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit SHA (short)
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

pub const GIT_COMMIT_TIMESTAMP: &str = env!("VERGEN_GIT_COMMIT_TIMESTAMP");

pub const GIT_BRANCH: &str = env!("VERGEN_GIT_BRANCH");

/// Whether the working tree had uncommitted changes
pub const GIT_DIRTY: &str = env!("VERGEN_GIT_DIRTY");

/// Rust compiler version used to build
pub const RUSTC_VERSION: &str = env!("VERGEN_RUSTC_SEMVER");

pub const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

pub const TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");

/// Returns full version string with git metadata.
/// Format: <version> (<git_sha>) [dirty]
pub fn full_version() -> String {
    let dirty = if GIT_DIRTY == "true" { " dirty" } else { "" };
    format!("{VERSION} ({GIT_SHA}{dirty})")
}

/// Body of `GET /version`
#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub git_branch: &'static str,
    pub git_commit_timestamp: &'static str,
    pub dirty: bool,
    pub built: &'static str,
    pub rustc: &'static str,
    pub target: &'static str,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: VERSION,
        git_sha: GIT_SHA,
        git_branch: GIT_BRANCH,
        git_commit_timestamp: GIT_COMMIT_TIMESTAMP,
        dirty: GIT_DIRTY == "true",
        built: BUILD_TIMESTAMP,
        rustc: RUSTC_VERSION,
        target: TARGET,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version_starts_with_crate_version() {
        assert!(full_version().starts_with(VERSION));
        assert_eq!(version_info().version, VERSION);
    }
}
