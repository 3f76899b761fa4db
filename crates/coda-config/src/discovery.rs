//! Finding config files and folding them into one [`CodaConfig`].
//!
//! Two layers, lowest precedence first:
//!
//! | layer   | location                                                    |
//! |---------|-------------------------------------------------------------|
//! | user    | `$CODA_CONFIG_DIR/config.toml`, else `<config dir>/coda/config.toml` |
//! | project | `coda.toml` in the project directory (default: cwd)        |
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use crate::{CodaConfig, ConfigError, Result};

const PROJECT_FILE: &str = "coda.toml";
const USER_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "CODA_CONFIG_DIR";

/// One candidate file and whether it contributed to the merged config.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub loaded: bool,
}

/// Merged configuration plus a record of how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: CodaConfig,
    /// Every candidate that was checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Problems worth surfacing that did not stop loading.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter_map(|s| s.loaded.then_some(s.path.as_path()))
            .collect()
    }
}

/// Discover and merge config using the default user directory.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Discover and merge config. A `config_dir` takes precedence over
/// `CODA_CONFIG_DIR` and the platform default.
///
/// Missing files are skipped. Unreadable or malformed files are reported in
/// [`LoadedConfig::warnings`] and otherwise ignored, so a broken project file
/// never prevents startup.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user = config_dir
        .map(Path::to_path_buf)
        .or_else(user_config_dir)
        .map(|dir| dir.join(USER_FILE));
    let project = project_dir.unwrap_or(Path::new(".")).join(PROJECT_FILE);

    let mut loaded = LoadedConfig {
        config: CodaConfig::new(),
        sources: Vec::new(),
        warnings: Vec::new(),
    };
    for path in user.into_iter().chain([project]) {
        let layer = read_layer(&path);
        let source = ConfigSource {
            loaded: matches!(layer, Ok(Some(_))),
            path,
        };
        match layer {
            Ok(Some(layer)) => loaded.config.merge(layer),
            Ok(None) => {}
            Err(e) => loaded
                .warnings
                .push(format!("Ignoring {}: {e}", source.path.display())),
        }
        loaded.sources.push(source);
    }

    if let Some(llm) = &loaded.config.llm {
        loaded
            .warnings
            .extend(llm.plaintext_key_providers().into_iter().map(|kind| {
                format!(
                    "[llm.{}] holds a plaintext API key; prefer the {} environment variable",
                    kind.as_str(),
                    kind.env_var()
                )
            }));
    }
    Ok(loaded)
}

/// Parse one file with no discovery or merging.
pub fn load_config_file(path: &Path) -> Result<CodaConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    CodaConfig::from_toml(&text)
}

/// `Ok(None)` when the file does not exist.
fn read_layer(path: &Path) -> Result<Option<CodaConfig>> {
    if path.is_file() {
        load_config_file(path).map(Some)
    } else {
        Ok(None)
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|dir| dir.join(USER_FILE))
}

/// Directory holding the user config file and the `logs/` directory.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|dir| dir.join("coda")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn dirs_with(user: Option<&str>, project: Option<&str>) -> (TempDir, TempDir) {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();
        if let Some(text) = user {
            fs::write(user_dir.path().join(USER_FILE), text).unwrap();
        }
        if let Some(text) = project {
            fs::write(project_dir.path().join(PROJECT_FILE), text).unwrap();
        }
        (user_dir, project_dir)
    }

    fn load(user: &TempDir, project: &TempDir) -> LoadedConfig {
        load_config_with_options(Some(project.path()), Some(user.path())).unwrap()
    }

    #[test]
    #[serial]
    fn test_env_var_selects_user_dir() {
        unsafe { std::env::set_var(CONFIG_DIR_ENV, "/srv/coda-conf") };
        let path = user_config_path();
        unsafe { std::env::remove_var(CONFIG_DIR_ENV) };
        assert_eq!(path, Some(PathBuf::from("/srv/coda-conf/config.toml")));
    }

    #[test]
    fn test_load_config_file_errors() {
        let missing = load_config_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadFile { .. }));
        assert!(missing.to_string().contains("/definitely/not/here.toml"));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[server\nbind =").unwrap();
        assert!(matches!(load_config_file(&path).unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_nothing_on_disk_gives_defaults() {
        let (user, project) = dirs_with(None, None);
        let loaded = load(&user, &project);

        assert_eq!(loaded.config, CodaConfig::new());
        assert_eq!(loaded.sources.len(), 2);
        assert!(loaded.loaded_from().is_empty());
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn test_project_layer_wins() {
        let (user, project) = dirs_with(
            Some("[server]\nbind = \"127.0.0.1:8080\"\n\n[agent]\nmax_iterations = 3\n\n[llm.gemini]\nbase_url = \"http://gemini.local\"\n"),
            Some("[server]\nbind = \"0.0.0.0:3000\"\n\n[llm.openai]\nbase_url = \"http://openai.local\"\n"),
        );
        let loaded = load(&user, &project);

        assert_eq!(loaded.config.server().bind, "0.0.0.0:3000");
        assert_eq!(loaded.config.agent().max_iterations, 3);
        assert!(loaded.config.llm().gemini.is_some());
        assert!(loaded.config.llm().openai.is_some());
        assert_eq!(
            loaded.loaded_from(),
            vec![user.path().join(USER_FILE).as_path(), project.path().join(PROJECT_FILE).as_path()]
        );
    }

    #[test]
    fn test_plaintext_key_warns() {
        let (user, project) = dirs_with(None, Some("[llm.openai]\napi_key = \"sk-secret\"\n"));
        let loaded = load(&user, &project);

        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("[llm.openai]"));
        assert!(loaded.warnings[0].contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_broken_project_file_is_skipped() {
        let (user, project) = dirs_with(Some("[agent]\nmax_iterations = 4\n"), Some("not valid toml {{{{"));
        let loaded = load(&user, &project);

        assert_eq!(loaded.config.agent().max_iterations, 4);
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].starts_with("Ignoring"));
        assert_eq!(loaded.loaded_from().len(), 1);
    }
}
