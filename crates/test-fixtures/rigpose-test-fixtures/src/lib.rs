use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Deserialize;

static MANIFEST: Lazy<Manifest> = Lazy::new(|| {
    let raw = include_str!("../../../../fixtures/manifest.json");
    serde_json::from_str(raw).expect("fixtures manifest should parse")
});

#[derive(Debug, Deserialize)]
struct Manifest {
    skeletons: HashMap<String, String>,
    motions: HashMap<String, MotionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MotionEntry {
    Path(String),
    Detailed {
        path: String,
        #[serde(default)]
        skeleton: Option<String>,
    },
}

impl MotionEntry {
    fn as_path(&self) -> &str {
        match self {
            MotionEntry::Path(path) => path,
            MotionEntry::Detailed { path, .. } => path,
        }
    }

    fn skeleton(&self) -> Option<&str> {
        match self {
            MotionEntry::Path(_) => None,
            MotionEntry::Detailed { skeleton, .. } => skeleton.as_deref(),
        }
    }
}

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures")
}

fn read_to_string(rel: &str) -> Result<String> {
    let path = fixtures_root().join(rel);
    fs::read_to_string(&path)
        .with_context(|| format!("failed to read fixture at {}", path.display()))
}

fn load_json<T: DeserializeOwned>(rel: &str) -> Result<T> {
    let text = read_to_string(rel)?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse JSON fixture {rel}"))
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, kind: &str, name: &str) -> Result<&'a T> {
    map.get(name)
        .ok_or_else(|| anyhow!("unknown {kind} fixture '{name}'"))
}

pub mod skeletons {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.skeletons.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        let rel = lookup(&MANIFEST.skeletons, "skeleton", name)?;
        read_to_string(rel)
    }

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        let rel = lookup(&MANIFEST.skeletons, "skeleton", name)?;
        super::load_json(rel)
    }
}

pub mod motions {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.motions.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        let entry = lookup(&MANIFEST.motions, "motion", name)?;
        read_to_string(entry.as_path())
    }

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        let entry = lookup(&MANIFEST.motions, "motion", name)?;
        super::load_json(entry.as_path())
    }

    /// Skeleton fixture the motion was authored against, if recorded.
    pub fn skeleton_key(name: &str) -> Result<Option<String>> {
        let entry = lookup(&MANIFEST.motions, "motion", name)?;
        Ok(entry.skeleton().map(str::to_string))
    }
}
