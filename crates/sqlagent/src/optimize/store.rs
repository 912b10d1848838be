use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::models::InstructionSet;

#[must_use]
pub fn instruction_file_name(version: u32) -> String {
    format!("instructions.v{version:04}.json")
}

/// One JSON file per instruction set version. Existing versions are never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionStore {
    dir: PathBuf,
}

impl InstructionStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, version: u32) -> PathBuf {
        self.dir.join(instruction_file_name(version))
    }

    pub fn save(&self, set: &InstructionSet) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!(
                "failed to create instructions directory: {}",
                self.dir.display()
            )
        })?;

        let path = self.path_for(set.version);
        let encoded =
            serde_json::to_vec_pretty(set).context("failed to encode instruction set")?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                bail!(
                    "instruction set version {} already exists: {}",
                    set.version,
                    path.display()
                );
            }
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("failed to create instruction set file: {}", path.display())
                });
            }
        };
        file.write_all(&encoded)
            .with_context(|| format!("failed to write instruction set: {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, version: u32) -> Result<InstructionSet> {
        let path = self.path_for(version);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read instruction set: {}", path.display()))?;
        let set: InstructionSet = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse instruction set: {}", path.display()))?;
        if set.version != version {
            bail!(
                "instruction set file {} declares version {}",
                path.display(),
                set.version
            );
        }
        Ok(set)
    }

    /// Stored versions in ascending order. A missing directory holds no versions.
    pub fn versions(&self) -> Result<Vec<u32>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| {
                    format!(
                        "failed to list instructions directory: {}",
                        self.dir.display()
                    )
                });
            }
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.context("failed to read instructions directory entry")?;
            let name = entry.file_name();
            let Some(captures) = name.to_str().and_then(|name| file_name_regex().captures(name))
            else {
                continue;
            };
            if let Ok(version) = captures[1].parse::<u32>() {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn load_latest(&self) -> Result<Option<InstructionSet>> {
        match self.versions()?.last() {
            Some(version) => self.load(*version).map(Some),
            None => Ok(None),
        }
    }

    /// The requested version, else the latest stored one, else the built-in baseline.
    /// The baseline's own version resolves to the built-in set until one is saved.
    pub fn resolve(&self, version: Option<u32>) -> Result<InstructionSet> {
        if let Some(version) = version {
            let baseline = InstructionSet::baseline();
            if version == baseline.version && !self.path_for(version).is_file() {
                return Ok(baseline);
            }
            return self.load(version);
        }
        Ok(self
            .load_latest()?
            .unwrap_or_else(InstructionSet::baseline))
    }
}

fn file_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^instructions\.v(\d{4,})\.json$")
            .expect("instruction file name regex should compile")
    })
}
