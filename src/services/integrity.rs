// Module Integrity
// Compares loaded module hashes against a published manifest

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// A module loaded into the media runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub file_name: String,
    /// Lowercase hex SHA-256 of the module file
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub file_name: String,
    pub current_hash: String,
    pub expected_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModuleHash {
    algorithm: String,
    hash: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct HashManifest {
    hashes: Vec<ModuleHash>,
}

fn ends_with_ignore_case(path: &str, file_name: &str) -> bool {
    if path.len() < file_name.len() {
        return false;
    }
    path.as_bytes()[path.len() - file_name.len()..].eq_ignore_ascii_case(file_name.as_bytes())
}

fn hash_matches(expected: &str, current: &str) -> bool {
    current
        .as_bytes()
        .get(..expected.len())
        .map(|prefix| prefix.eq_ignore_ascii_case(expected.as_bytes()))
        .unwrap_or(false)
}

/// Compare `modules` against a manifest of the form
/// `{"hashes":[{"Algorithm":"SHA256","Hash":"..","Path":".."}]}`.
///
/// The first SHA256 entry whose path ends with a module's file name decides
/// that module. Returns `None` when the manifest cannot be read.
pub fn check_plugin_hash_mismatches(manifest: &str, modules: &[LoadedModule]) -> Option<Vec<HashMismatch>> {
    let manifest: HashManifest = match serde_json::from_str(manifest) {
        Ok(manifest) => manifest,
        Err(e) => {
            log::error!("Error while processing plugin integrity json: {e}");
            return None;
        }
    };

    let mut mismatches = Vec::new();
    for module in modules {
        if module.file_name.is_empty() || module.sha256.is_empty() {
            continue;
        }

        let entry = manifest.hashes.iter().find(|entry| {
            entry.algorithm.eq_ignore_ascii_case("SHA256")
                && ends_with_ignore_case(&entry.path, &module.file_name)
        });

        if let Some(entry) = entry {
            if !hash_matches(&entry.hash, &module.sha256) {
                mismatches.push(HashMismatch {
                    file_name: module.file_name.clone(),
                    current_hash: module.sha256.clone(),
                    expected_hash: entry.hash.clone(),
                });
            }
        }
    }

    Some(mismatches)
}

/// SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
