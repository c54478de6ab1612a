//! Initialization helpers for `.wfgen/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::backend::VERDICT_SCHEMA;
use super::config::{WfgenConfig, write_config};

const STARTER_RULES: &str = include_str!("templates/rules.yml");
const WFGEN_GITIGNORE: &str = "runs/\n";

/// All canonical paths within `.wfgen/` for a project root.
#[derive(Debug, Clone)]
pub struct WfgenPaths {
    pub root: PathBuf,
    pub wfgen_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub rules_path: PathBuf,
    pub schema_path: PathBuf,
}

impl WfgenPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let wfgen_dir = root.join(".wfgen");
        Self {
            root: root.clone(),
            wfgen_dir: wfgen_dir.clone(),
            runs_dir: wfgen_dir.join("runs"),
            gitignore_path: wfgen_dir.join(".gitignore"),
            config_path: wfgen_dir.join("config.toml"),
            rules_path: wfgen_dir.join("rules.yml"),
            schema_path: wfgen_dir.join("verdict.schema.json"),
        }
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing wfgen-owned files.
    pub force: bool,
}

/// Create `.wfgen/` scaffolding in `root`.
///
/// Fails if `.wfgen/` already exists unless `options.force` is set. Existing
/// run logs are kept either way.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<WfgenPaths> {
    let paths = WfgenPaths::new(root);
    if paths.wfgen_dir.exists() && !paths.wfgen_dir.is_dir() {
        return Err(anyhow!("wfgen init: .wfgen exists but is not a directory"));
    }
    if paths.wfgen_dir.exists() && !options.force {
        return Err(anyhow!(
            "wfgen init: .wfgen already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.wfgen_dir)?;
    create_dir(&paths.runs_dir)?;

    write_file(&paths.gitignore_path, WFGEN_GITIGNORE)?;
    write_config(&paths.config_path, &WfgenConfig::default())?;
    write_file(&paths.rules_path, STARTER_RULES)?;
    write_file(&paths.schema_path, VERDICT_SCHEMA)?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}
