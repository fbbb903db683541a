//! File-backed scenario persistence.
//!
//! Each saved scenario lives in its own JSON document under the
//! store's root directory, named `<id>.json`. Ids are opaque strings
//! derived from a millisecond timestamp plus a counter, so sorting
//! ids sorts by creation time.

use crate::model::{Scenario, ScenarioStep};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub struct ScenarioStore {
    root: PathBuf,
    counter: AtomicU64,
}

impl ScenarioStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context(format!(
            "Failed to create scenario store directory: {}",
            root.display()
        ))?;
        info!("scenario store opened at {}", root.display());
        Ok(Self {
            root,
            counter: AtomicU64::new(0),
        })
    }

    /// All saved scenarios, newest first.
    pub fn list(&self) -> Result<Vec<Scenario>> {
        let mut scenarios = Vec::new();

        for entry in fs::read_dir(&self.root).context(format!(
            "Failed to read scenario store: {}",
            self.root.display()
        ))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match self.load_file(&path) {
                    Ok(scenario) => scenarios.push(scenario),
                    Err(err) => {
                        debug!("skipping unreadable scenario {}: {}", path.display(), err);
                    }
                }
            }
        }

        scenarios.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(scenarios)
    }

    /// Persist a new scenario and return its id.
    pub fn create(&self, name: &str, steps: Vec<ScenarioStep>) -> Result<String> {
        let id = self.next_id();
        let scenario = Scenario {
            id: Some(id.clone()),
            name: name.to_string(),
            description: None,
            steps,
        };
        self.write(&scenario)?;
        info!("saved scenario '{}' as {}", name, id);
        Ok(id)
    }

    /// Replace the name and steps of an existing scenario.
    pub fn update(&self, id: &str, name: &str, steps: Vec<ScenarioStep>) -> Result<()> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(anyhow!("No saved scenario with id '{id}'"));
        }
        let scenario = Scenario {
            id: Some(id.to_string()),
            name: name.to_string(),
            description: None,
            steps,
        };
        self.write(&scenario)?;
        info!("updated scenario {}", id);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        fs::remove_file(&path)
            .context(format!("Failed to delete scenario '{id}'"))?;
        info!("deleted scenario {}", id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Scenario> {
        self.load_file(&self.path_for(id))
    }

    fn load_file(&self, path: &Path) -> Result<Scenario> {
        let content = fs::read_to_string(path).context(format!(
            "Failed to read scenario file: {}",
            path.display()
        ))?;
        Scenario::from_json(&content).context(format!(
            "Failed to parse scenario JSON from {}",
            path.display()
        ))
    }

    fn write(&self, scenario: &Scenario) -> Result<()> {
        let id = scenario
            .id
            .as_deref()
            .ok_or_else(|| anyhow!("scenario is missing an id"))?;
        let path = self.path_for(id);
        let json = scenario.to_json()?;
        fs::write(&path, json).context(format!(
            "Failed to write scenario file: {}",
            path.display()
        ))
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:04}", Utc::now().timestamp_millis(), seq)
    }
}
