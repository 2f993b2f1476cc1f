use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::flatten::FlattenOptions;
use crate::merge::MergeOptions;

pub const CONFIG_FILE_NAME: &str = "docx-fieldmap.toml";
pub const CONFIG_ENV_VAR: &str = "DOCX_FIELDMAP_CONFIG";
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineSection {
    /// Inputs larger than this are rejected before parsing.
    #[serde(default)]
    pub max_document_bytes: Option<u64>,
    #[serde(default)]
    pub verify_element_ids: Option<bool>,
    #[serde(default)]
    pub verify_structure: Option<bool>,
    /// Emit run formatting as inline CSS in the flattened HTML.
    #[serde(default)]
    pub html_inline_styles: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StoreSection {
    /// Root of the filesystem template store. Relative paths resolve against the config file.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl AppConfig {
    pub fn merge_options(&self) -> MergeOptions {
        let d = MergeOptions::default();
        MergeOptions {
            verify_element_ids: self.engine.verify_element_ids.unwrap_or(d.verify_element_ids),
            verify_structure: self.engine.verify_structure.unwrap_or(d.verify_structure),
        }
    }

    pub fn flatten_options(&self) -> FlattenOptions {
        FlattenOptions {
            inline_styles: self
                .engine
                .html_inline_styles
                .unwrap_or(FlattenOptions::default().inline_styles),
        }
    }

    pub fn max_document_bytes(&self) -> u64 {
        self.engine
            .max_document_bytes
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_DOCUMENT_BYTES)
    }

    pub fn store_root(&self, config_path: Option<&Path>) -> Option<PathBuf> {
        let root = self.store.root.clone()?;
        if root.is_relative() {
            if let Some(dir) = config_path.and_then(Path::parent) {
                return Some(dir.join(root));
            }
        }
        Some(root)
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Explicit path, then `DOCX_FIELDMAP_CONFIG`, then an upward search from the working
/// directory. A missing file yields defaults.
pub fn resolve_config(
    explicit: Option<&Path>,
    workdir: &Path,
) -> anyhow::Result<(AppConfig, Option<PathBuf>)> {
    let cfg_file = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .or_else(|| find_default_config(workdir, CONFIG_FILE_NAME));
    match cfg_file {
        Some(p) if p.exists() => {
            let cfg = load_config(&p)?;
            log::debug!("loaded config {}", p.display());
            Ok((cfg, Some(p)))
        }
        Some(p) => {
            log::debug!("config {} not found, using defaults", p.display());
            Ok((AppConfig::default(), None))
        }
        None => Ok((AppConfig::default(), None)),
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"[engine]
# Inputs larger than this are rejected before parsing (bytes).
max_document_bytes = 52428800
# Skip positions whose stored element id no longer matches the run.
verify_element_ids = true
# Refuse merge output whose document part changed anywhere but run text.
verify_structure = true
# Emit run formatting as inline CSS in the flattened HTML.
html_inline_styles = true

[store]
# Filesystem template store root, relative to this file.
# root = "templates"
"#;

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{init_default_config, load_config, resolve_config, AppConfig, DEFAULT_MAX_DOCUMENT_BYTES};

    #[test]
    fn defaults_without_a_file() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.max_document_bytes(), DEFAULT_MAX_DOCUMENT_BYTES);
        assert!(cfg.merge_options().verify_element_ids);
        assert!(cfg.flatten_options().inline_styles);
        assert!(cfg.store_root(None).is_none());
    }

    #[test]
    fn generated_config_parses_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("init");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_document_bytes(), 52_428_800);
        assert_eq!(cfg.engine.verify_structure, Some(true));
    }

    #[test]
    fn explicit_path_wins_and_store_root_is_relative_to_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[engine]\nverify_element_ids = false\nhtml_inline_styles = false\n[store]\nroot = \"tpl\"\n",
        )
        .expect("write");
        let (cfg, found) = resolve_config(Some(&path), Path::new(".")).expect("resolve");
        assert_eq!(found.as_deref(), Some(path.as_path()));
        assert!(!cfg.merge_options().verify_element_ids);
        assert!(cfg.merge_options().verify_structure);
        assert!(!cfg.flatten_options().inline_styles);
        assert_eq!(cfg.store_root(found.as_deref()), Some(dir.path().join("tpl")));
    }

    #[test]
    fn unknown_keys_are_ignored_but_bad_types_fail() {
        assert!(toml::from_str::<AppConfig>("[engine]\nextra = 1\n").is_ok());
        assert!(toml::from_str::<AppConfig>("[engine]\nverify_structure = \"yes\"\n").is_err());
    }
}
