//! The namespaces whose pods get mutated.
//!
//! A policy file is YAML with a single `namespaces` map. The names listed under a namespace are
//! kept for operators reading the file, but only the presence of the namespace key matters:
//!
//! ```yaml
//! namespaces:
//!   storage-tests: []
//!   db:
//!     - postgres
//! ```
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

/// System wide location of the policy file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/power-dev-mutate/config.yaml";
const USER_CONFIG_DIR: &str = ".power-dev-mutate";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Namespace allow list consulted for every admission request
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct NamespacePolicy {
    #[serde(default)]
    namespaces: BTreeMap<String, Vec<String>>,
}

impl NamespacePolicy {
    /// Builds a policy that selects `namespaces`, each with an empty name list.
    pub fn from_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NamespacePolicy {
            namespaces: namespaces
                .into_iter()
                .map(|ns| (ns.into(), Vec::new()))
                .collect(),
        }
    }

    /// Parses a policy from YAML
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("policy is not a valid namespace map")
    }

    /// Reads and parses the policy file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read policy file {}", path.display()))?;
        let policy = Self::from_yaml(&raw)
            .with_context(|| format!("unable to parse policy file {}", path.display()))?;
        info!(path = %path.display(), namespaces = ?policy.namespaces().collect::<Vec<_>>(), "Loaded namespace policy");
        Ok(policy)
    }

    /// Loads the policy from `explicit` if given, otherwise from the first existing file of
    /// [`search_paths`]. Having no policy file at all is an error.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidates = search_paths();
        for candidate in &candidates {
            if candidate.is_file() {
                return Self::load(candidate);
            }
            debug!(path = %candidate.display(), "No policy file here");
        }
        anyhow::bail!(
            "no policy file found, looked in {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    /// Whether pods in `namespace` should be mutated
    pub fn selects(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    /// The selected namespaces, sorted
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }
}

/// Where [`NamespacePolicy::discover`] looks for a policy file, in order: the system config
/// directory, `$HOME/.power-dev-mutate` and the working directory.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(USER_CONFIG_DIR).join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from(CONFIG_FILE_NAME));
    paths
}
