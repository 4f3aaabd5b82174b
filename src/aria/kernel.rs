//! Immutable Kernel: loads and checksum-verifies the four named identity/policy
//! blobs (spec §3, §4.8, §9 "Deep-frozen kernel").
//!
//! "Deep frozen" is implemented as a type-level property rather than a runtime
//! guard: [`KernelValue`] has no mutating methods at all, so there is nothing to
//! refuse at runtime — the Rust idiomatic rendition of the original's
//! runtime-wrapped-proxy approach (spec §9).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::aria::error::{AriaError, AriaResult};

/// The four named kernel blobs, in load order.
pub const KERNEL_BLOB_NAMES: [&str; 4] = ["identity", "values", "safety_constraints", "constitution"];

/// A read-only tree of strings/numbers/nested trees. There is no `set`, `insert`,
/// or `remove` anywhere on this type or its variants — any attempt to mutate a
/// loaded kernel simply does not compile.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelValue {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    /// Ordered so that display and hashing stay deterministic.
    Map(BTreeMap<String, KernelValue>),
    List(Vec<KernelValue>),
}

impl KernelValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KernelValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&KernelValue> {
        match self {
            KernelValue::Map(m) => m.get(key),
            _ => None,
        }
    }

    fn from_yaml(value: serde_yaml::Value) -> KernelValue {
        match value {
            serde_yaml::Value::Null => KernelValue::Null,
            serde_yaml::Value::Bool(b) => KernelValue::Bool(b),
            serde_yaml::Value::Number(n) => KernelValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_yaml::Value::String(s) => KernelValue::String(s),
            serde_yaml::Value::Sequence(items) => {
                KernelValue::List(items.into_iter().map(KernelValue::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    if let Some(key) = k.as_str() {
                        out.insert(key.to_string(), KernelValue::from_yaml(v));
                    }
                }
                KernelValue::Map(out)
            }
            serde_yaml::Value::Tagged(tagged) => KernelValue::from_yaml(tagged.value),
        }
    }
}

/// One loaded, checksummed blob.
#[derive(Debug, Clone)]
pub struct KernelBlob {
    pub name: String,
    pub sha256: String,
    pub value: KernelValue,
    source_path: PathBuf,
}

/// A handle over the four loaded blobs. Cheap to clone (`Arc`-free here since the
/// kernel is loaded once at boot and handed out as `Arc<Kernel>` by callers).
#[derive(Debug, Clone)]
pub struct Kernel {
    blobs: BTreeMap<String, KernelBlob>,
    root: PathBuf,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

impl Kernel {
    /// Loads all four named blobs from `root` (each `<root>/<name>.yaml`). Fails
    /// the whole load if any file is missing or fails to parse — the kernel is
    /// all-or-nothing at boot.
    pub fn load(root: impl AsRef<Path>) -> AriaResult<Self> {
        let root = root.as_ref().to_path_buf();
        let mut blobs = BTreeMap::new();
        for name in KERNEL_BLOB_NAMES {
            let path = root.join(format!("{name}.yaml"));
            let bytes = std::fs::read(&path).map_err(|e| {
                AriaError::ConfigurationError(format!("kernel blob '{name}' unreadable at {path:?}: {e}"))
            })?;
            let sha256 = sha256_hex(&bytes);
            let parsed: serde_yaml::Value = serde_yaml::from_slice(&bytes).map_err(|e| {
                AriaError::ConfigurationError(format!("kernel blob '{name}' failed to parse: {e}"))
            })?;
            blobs.insert(
                name.to_string(),
                KernelBlob {
                    name: name.to_string(),
                    sha256,
                    value: KernelValue::from_yaml(parsed),
                    source_path: path,
                },
            );
        }
        log::info!("kernel loaded {} blobs from {:?}", blobs.len(), root);
        Ok(Self { blobs, root })
    }

    pub fn get(&self, name: &str) -> Option<&KernelValue> {
        self.blobs.get(name).map(|b| &b.value)
    }

    pub fn blob(&self, name: &str) -> Option<&KernelBlob> {
        self.blobs.get(name)
    }

    /// The system prompt fragment this kernel contributes to every Chat Engine
    /// turn (spec §4.5 step 3: "the kernel-sourced system prompt"). Concatenates
    /// each blob's `prompt_fragment` string field, if present, in blob order.
    pub fn system_prompt_fragment(&self) -> String {
        KERNEL_BLOB_NAMES
            .iter()
            .filter_map(|name| self.get(name))
            .filter_map(|value| value.get("prompt_fragment"))
            .filter_map(KernelValue::as_str)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Recomputes SHA-256 for every blob and compares against the load-time
    /// digest. Returns `false` on any mismatch or missing file; never reloads.
    pub fn verify_integrity(&self) -> bool {
        for blob in self.blobs.values() {
            let bytes = match std::fs::read(&blob.source_path) {
                Ok(b) => b,
                Err(_) => return false,
            };
            if sha256_hex(&bytes) != blob.sha256 {
                return false;
            }
        }
        true
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_blobs(dir: &Path) {
        for name in KERNEL_BLOB_NAMES {
            fs::write(
                dir.join(format!("{name}.yaml")),
                format!("prompt_fragment: \"{name} fragment\"\nversion: 1\n"),
            )
            .unwrap();
        }
    }

    #[test]
    fn loads_all_four_blobs() {
        let dir = tempdir().unwrap();
        write_blobs(dir.path());
        let kernel = Kernel::load(dir.path()).unwrap();
        for name in KERNEL_BLOB_NAMES {
            assert!(kernel.get(name).is_some());
        }
    }

    #[test]
    fn verify_integrity_true_after_clean_load() {
        let dir = tempdir().unwrap();
        write_blobs(dir.path());
        let kernel = Kernel::load(dir.path()).unwrap();
        assert!(kernel.verify_integrity());
    }

    #[test]
    fn verify_integrity_false_after_tamper() {
        let dir = tempdir().unwrap();
        write_blobs(dir.path());
        let kernel = Kernel::load(dir.path()).unwrap();
        fs::write(dir.path().join("identity.yaml"), "prompt_fragment: \"tampered\"\n").unwrap();
        assert!(!kernel.verify_integrity());
    }

    #[test]
    fn missing_blob_fails_load() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("identity.yaml"), "prompt_fragment: \"x\"\n").unwrap();
        assert!(Kernel::load(dir.path()).is_err());
    }

    #[test]
    fn system_prompt_fragment_concatenates_in_order() {
        let dir = tempdir().unwrap();
        write_blobs(dir.path());
        let kernel = Kernel::load(dir.path()).unwrap();
        let fragment = kernel.system_prompt_fragment();
        assert!(fragment.contains("identity fragment"));
        assert!(fragment.contains("constitution fragment"));
    }
}
