//! Script catalog
//!
//! Scripts come from `*.toml` files in the scripts directory, layered over
//! two built-in scripts so a fresh install always has something to play.
//! A file whose id matches a built-in replaces it.

use mwl_common::{CueType, Error, Instruction, Result, Script};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Lookup of guided scripts by id
pub trait ScriptCatalog: Send + Sync {
    /// Script with `id`, or `Error::NotFound`
    fn get_script(&self, id: &str) -> Result<Script>;

    /// All scripts, ordered by id
    fn list(&self) -> Vec<Script>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    scripts: BTreeMap<String, Script>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding only the built-in scripts
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for script in builtin_scripts() {
            catalog.scripts.insert(script.id.clone(), script);
        }
        catalog
    }

    /// Add or replace a script after normalizing it
    pub fn insert(&mut self, script: Script) -> Result<()> {
        let script = script.normalized()?;
        self.scripts.insert(script.id.clone(), script);
        Ok(())
    }

    /// Load every `*.toml` script in `dir`
    ///
    /// A missing directory is not an error. Files that fail to parse or
    /// validate are skipped with a warning. Returns the number loaded.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            debug!("Scripts directory {} not present", dir.display());
            return Ok(0);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match load_script_file(&path).and_then(|s| self.insert(s)) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Skipping script {}: {}", path.display(), e),
            }
        }
        info!("Loaded {} scripts from {}", loaded, dir.display());
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl ScriptCatalog for InMemoryCatalog {
    fn get_script(&self, id: &str) -> Result<Script> {
        self.scripts
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("script {}", id)))
    }

    fn list(&self) -> Vec<Script> {
        self.scripts.values().cloned().collect()
    }
}

fn load_script_file(path: &Path) -> Result<Script> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

fn builtin_scripts() -> Vec<Script> {
    vec![
        Script {
            id: "breath-awareness".to_string(),
            title: "Breath Awareness".to_string(),
            description: "Five minutes resting attention on the breath.".to_string(),
            category: Some("breathing".to_string()),
            duration: 300,
            instructions: vec![
                Instruction::new(0, "Settle into a comfortable position and close your eyes.", CueType::Guidance),
                Instruction::new(30, "Breathe in slowly through the nose.", CueType::Breathing),
                Instruction::new(90, "Notice where you feel the breath most clearly.", CueType::Guidance),
                Instruction::new(180, "When the mind wanders, gently return to the breath.", CueType::Guidance),
                Instruction::new(270, "Let the breath return to its natural rhythm.", CueType::Breathing),
            ],
            audio_url: None,
        },
        Script {
            id: "body-scan".to_string(),
            title: "Body Scan".to_string(),
            description: "Ten minutes moving attention from head to toe.".to_string(),
            category: Some("relaxation".to_string()),
            duration: 600,
            instructions: vec![
                Instruction::new(0, "Lie down or sit comfortably.", CueType::Guidance),
                Instruction::new(60, "Bring attention to the top of your head.", CueType::Visualization),
                Instruction::new(180, "Soften the shoulders and arms.", CueType::Visualization),
                Instruction::new(330, "Notice the belly rising and falling.", CueType::Breathing),
                Instruction::new(480, "Feel the weight of the legs and feet.", CueType::Visualization),
                Instruction::new(570, "Take a deep breath and slowly open your eyes.", CueType::Breathing),
            ],
            audio_url: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtins_present() {
        let catalog = InMemoryCatalog::with_builtins();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get_script("body-scan").unwrap().duration, 600);
        for script in catalog.list() {
            assert!(script.clone().normalized().is_ok(), "{}", script.id);
        }
    }

    #[test]
    fn test_unknown_script_not_found() {
        let catalog = InMemoryCatalog::with_builtins();
        assert!(matches!(
            catalog.get_script("nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_load_dir_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("evening.toml"),
            r#"
id = "evening"
title = "Evening Wind-Down"
duration = 120
audioUrl = "https://cdn.example.com/evening.mp3"

[[instructions]]
timestamp = 60
text = "Release the day."
type = "guidance"

[[instructions]]
timestamp = 0
text = "Welcome."
type = "breathing"
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "id = ").unwrap();
        std::fs::write(dir.path().join("late.toml"), "id = \"late\"\nduration = 10\n[[instructions]]\ntimestamp = 20\ntext = \"x\"\ntype = \"guidance\"\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut catalog = InMemoryCatalog::with_builtins();
        assert_eq!(catalog.load_dir(dir.path()).unwrap(), 1);

        let evening = catalog.get_script("evening").unwrap();
        assert_eq!(evening.instructions[0].text, "Welcome.");
        assert!(evening.has_audio());
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let mut catalog = InMemoryCatalog::new();
        assert_eq!(catalog.load_dir(Path::new("/nonexistent/scripts")).unwrap(), 0);
        assert!(catalog.is_empty());
    }
}
