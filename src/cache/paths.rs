//! Cache path utilities - uses ~/.cache/lineage/<repo-hash>/

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Cache directory for a repository identifier.
/// ~/.cache/lineage/<name>-<hash>/ on Unix, %LOCALAPPDATA%/lineage/... on Windows.
pub fn get_cache_dir(repository: &str) -> PathBuf {
    let base = if cfg!(windows) {
        std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")))
    } else {
        dirs::cache_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".cache"))
                .unwrap_or_else(|| PathBuf::from("."))
        })
    };

    base.join("lineage").join(repo_dir_name(repository))
}

/// Default location of the redb result cache
pub fn default_redb_path(repository: &str) -> PathBuf {
    get_cache_dir(repository).join("results.redb")
}

fn repo_dir_name(repository: &str) -> String {
    let digest = Sha256::digest(repository.as_bytes());
    let short: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();

    let name = Path::new(repository.trim_end_matches('/'))
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repo")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(20)
        .collect::<String>();

    format!("{}-{}", name, short)
}
