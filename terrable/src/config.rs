//! Configuration management

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use terrable_engine::EngineConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct EngineSection {
    /// Directory `require` resolves against
    #[serde(default)]
    pub module_root: Option<PathBuf>,

    /// Dotenv-style file merged into `process.env`
    #[serde(default)]
    pub env_file: Option<PathBuf>,

    /// Start `process.env` empty instead of inheriting the engine's environment
    #[serde(default)]
    pub clear_env: bool,

    #[serde(default = "default_true")]
    pub envelope_on_failure: bool,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            module_root: None,
            env_file: None,
            clear_env: false,
            envelope_on_failure: default_true(),
            environment: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

/// Settings given on the command line, which win over the config file
#[derive(Debug, Default)]
pub struct Overrides {
    pub module_root: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub clear_env: bool,
    pub no_envelope: bool,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Without an explicit path an optional `terrable.toml` in the working
    /// directory is used. `TERRABLE_ENGINE__MODULE_ROOT` style variables in
    /// `environment` override file values.
    pub fn load(path: Option<&Path>, environment: &[(String, String)]) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("terrable").required(false),
        };

        let variables: config::Map<String, String> = environment.iter().cloned().collect();

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("TERRABLE")
                    .prefix_separator("_")
                    .separator("__")
                    .source(Some(variables)),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    /// Resolve the engine settings, reading the env file if one is configured
    pub fn engine_config(
        &self,
        overrides: Overrides,
        inherited: impl IntoIterator<Item = (String, String)>,
    ) -> anyhow::Result<EngineConfig> {
        let module_root = overrides
            .module_root
            .or_else(|| self.engine.module_root.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let module_root = fs::canonicalize(&module_root)
            .with_context(|| format!("Module root {} does not exist", module_root.display()))?;

        let mut environment = BTreeMap::new();
        if !(overrides.clear_env || self.engine.clear_env) {
            environment.extend(inherited);
        }

        if let Some(env_file) = overrides.env_file.as_ref().or(self.engine.env_file.as_ref()) {
            let contents = fs::read_to_string(env_file)
                .with_context(|| format!("Failed to read env file {}", env_file.display()))?;
            let vars = parse_env_file(&contents)
                .with_context(|| format!("Invalid env file {}", env_file.display()))?;
            environment.extend(vars);
        }

        environment.extend(self.engine.environment.clone());
        environment.extend(overrides.env);

        Ok(EngineConfig {
            environment,
            module_root,
            envelope_on_failure: self.engine.envelope_on_failure && !overrides.no_envelope,
        })
    }
}

/// Environment variables as UTF-8 pairs; entries that are not valid Unicode
/// are skipped
pub fn unicode_environment(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> Vec<(String, String)> {
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and a leading
/// `export` are ignored; matching outer quotes are stripped.
pub fn parse_env_file(contents: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut vars = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            bail!("line {}: expected KEY=VALUE", index + 1);
        };

        let key = key.trim();
        if key.is_empty() {
            bail!("line {}: empty variable name", index + 1);
        }

        vars.push((key.to_string(), unquote(value.trim()).to_string()));
    }

    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// clap value parser for `--env KEY=VALUE`
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_file() {
        let vars = parse_env_file(
            "# database\nTABLE_NAME=orders\n\nexport REGION = eu-west-1\nGREETING=\"hello world\"\nEMPTY=\nQUOTED='a=b'\n",
        )
        .unwrap();

        assert_eq!(
            vars,
            vec![
                ("TABLE_NAME".to_string(), "orders".to_string()),
                ("REGION".to_string(), "eu-west-1".to_string()),
                ("GREETING".to_string(), "hello world".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("QUOTED".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_env_file_rejects_bare_words() {
        let error = parse_env_file("OK=1\nnot an assignment\n").unwrap_err();
        assert!(error.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("STAGE=dev").unwrap(),
            ("STAGE".to_string(), "dev".to_string())
        );
        assert_eq!(
            parse_assignment("URL=a=b").unwrap(),
            ("URL".to_string(), "a=b".to_string())
        );
        assert!(parse_assignment("=value").is_err());
        assert!(parse_assignment("STAGE").is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrable.toml");
        fs::write(
            &path,
            "[engine]\nenvelope_on_failure = false\n\n[engine.environment]\nstage = \"test\"\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path), &[]).unwrap();
        assert!(!config.engine.envelope_on_failure);
        assert_eq!(config.engine.environment["stage"], "test");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrable.toml");
        fs::write(&path, "[engine]\nenvelope_on_failure = true\n").unwrap();

        let environment = vec![
            (
                "TERRABLE_ENGINE__ENVELOPE_ON_FAILURE".to_string(),
                "false".to_string(),
            ),
            ("TERRABLE_LOGGING__LEVEL".to_string(), "warn".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ];
        let config = Config::load(Some(&path), &environment).unwrap();

        assert!(!config.engine.envelope_on_failure);
        assert_eq!(config.logging.level, "warn");
    }

    #[cfg(unix)]
    #[test]
    fn test_unicode_environment_skips_invalid_entries() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("STAGE"), OsString::from("dev")),
            (OsString::from("BROKEN"), OsString::from_vec(vec![0x66, 0xff])),
            (OsString::from_vec(vec![0xfe]), OsString::from("value")),
        ];

        assert_eq!(
            unicode_environment(vars),
            vec![("STAGE".to_string(), "dev".to_string())]
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.engine.envelope_on_failure);
        assert!(!config.engine.clear_env);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_environment_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        fs::write(&env_file, "STAGE=file\nFROM_FILE=1\n").unwrap();

        let mut config = Config::default();
        config.engine.env_file = Some(env_file);
        config
            .engine
            .environment
            .insert("FROM_CONFIG".to_string(), "1".to_string());

        let overrides = Overrides {
            module_root: Some(dir.path().to_path_buf()),
            env: vec![("STAGE".to_string(), "cli".to_string())],
            ..Overrides::default()
        };
        let inherited = vec![
            ("HOME".to_string(), "/home/dev".to_string()),
            ("STAGE".to_string(), "shell".to_string()),
        ];

        let engine = config.engine_config(overrides, inherited).unwrap();
        assert_eq!(engine.environment["STAGE"], "cli");
        assert_eq!(engine.environment["HOME"], "/home/dev");
        assert_eq!(engine.environment["FROM_FILE"], "1");
        assert_eq!(engine.environment["FROM_CONFIG"], "1");
        assert!(engine.envelope_on_failure);
        assert_eq!(engine.module_root, fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_clear_env_and_no_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            module_root: Some(dir.path().to_path_buf()),
            clear_env: true,
            no_envelope: true,
            ..Overrides::default()
        };

        let engine = Config::default()
            .engine_config(overrides, vec![("HOME".to_string(), "/root".to_string())])
            .unwrap();
        assert!(engine.environment.is_empty());
        assert!(!engine.envelope_on_failure);
    }

    #[test]
    fn test_missing_module_root() {
        let overrides = Overrides {
            module_root: Some(PathBuf::from("/definitely/not/here")),
            ..Overrides::default()
        };
        assert!(Config::default()
            .engine_config(overrides, Vec::new())
            .is_err());
    }
}
