use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use switchyard_core::config::MIN_INTERVAL_SECS;
use url::Url;

use crate::{
    ConfigLoadError,
    models::{AppConfig, DatabaseConfig, ServerConfig, default_max_load},
    sources::*,
    util::{parse_bool, parse_csv},
    validation::ConfigWarnings,
};

/// File names probed, in order, when no path is given.
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["switchyard.toml", "config/switchyard.toml"];

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: AppConfig,
    pub warnings: ConfigWarnings,
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
}

/// Composes [`AppConfig`] from defaults, a TOML file and the environment.
///
/// Precedence, highest first: environment (optionally seeded from a `.env`
/// file), TOML file, defaults.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
    use_dotenv: bool,
    search_root: PathBuf,
    env: Option<HashMap<String, String>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_file: None,
            use_dotenv: true,
            search_root: PathBuf::from("."),
            env: None,
        }
    }

    /// Reads the TOML file at `path`. A missing file is an error.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Seeds the environment from `path` instead of `./.env`.
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self.use_dotenv = true;
        self
    }

    pub fn without_dotenv(mut self) -> Self {
        self.use_dotenv = false;
        self
    }

    /// Directory the default config file names are resolved against.
    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_root = root.into();
        self
    }

    /// Uses `vars` instead of the process environment.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();
        let env = self.environment(&mut warnings)?;

        let (file, source) = match self.locate_file(&env)? {
            Some(path) => (read_file(&path)?, Some(path)),
            None => {
                warnings.push(
                    "config_file",
                    "no configuration file found, using defaults and environment",
                );
                (FileConfig::default(), None)
            }
        };

        let mut config = compose(file, &env, &mut warnings);
        validate(&mut config, &mut warnings)?;

        Ok(ConfigLoad {
            config,
            warnings,
            source,
        })
    }

    fn environment(&self, warnings: &mut ConfigWarnings) -> Result<EnvConfig, ConfigLoadError> {
        let mut env = match &self.env {
            Some(vars) => EnvConfig::from_vars(vars.clone()),
            None => EnvConfig::gather(),
        };
        if !self.use_dotenv {
            return Ok(env);
        }

        let path = self
            .env_file
            .clone()
            .unwrap_or_else(|| self.search_root.join(".env"));
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                let mut entries = Vec::new();
                for item in iter {
                    match item {
                        Ok(entry) => entries.push(entry),
                        Err(err) => warnings.push(
                            "env_file",
                            format!("skipping malformed line in {}: {err}", path.display()),
                        ),
                    }
                }
                env.merge_missing(entries);
            }
            Err(err) if err.not_found() && self.env_file.is_none() => {}
            Err(source) => return Err(ConfigLoadError::EnvFile { path, source }),
        }
        Ok(env)
    }

    fn locate_file(&self, env: &EnvConfig) -> Result<Option<PathBuf>, ConfigLoadError> {
        let explicit = self
            .config_path
            .clone()
            .or_else(|| env.get(ENV_CONFIG_PATH).map(PathBuf::from));
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigLoadError::MissingFile { path });
            }
            return Ok(Some(path));
        }

        Ok(DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| self.search_root.join(name))
            .find(|candidate| candidate.is_file()))
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose(file: FileConfig, env: &EnvConfig, warnings: &mut ConfigWarnings) -> AppConfig {
    let host = env
        .get(ENV_HOST)
        .map(str::to_string)
        .or(file.server.host)
        .unwrap_or_else(|| crate::models::DEFAULT_HOST.to_string());
    let port = parse_env::<u16>(env, ENV_PORT, warnings)
        .or(file.server.port)
        .unwrap_or(crate::models::DEFAULT_PORT);
    let public_url = env
        .get(ENV_PUBLIC_URL)
        .map(str::to_string)
        .or(file.server.public_url)
        .unwrap_or_else(|| ServerConfig::derived_public_url(&host, port));
    let max_load = parse_env::<f32>(env, ENV_MAX_LOAD, warnings)
        .or(file.server.max_load)
        .unwrap_or_else(default_max_load);

    let database = DatabaseConfig {
        url: env
            .get(ENV_DATABASE_URL)
            .map(str::to_string)
            .or(file.database.url)
            .filter(|url| !url.trim().is_empty()),
    };

    let mut identity = file.identity.unwrap_or_default();
    if let Some(raw) = env.get(ENV_ORGANIZATIONS) {
        identity.organizations = parse_csv(raw);
    }
    if let Some(raw) = env.get(ENV_ACCEPT_ANY_USER) {
        match parse_bool(raw) {
            Some(value) => identity.accept_any_user = value,
            None => warnings.push(
                ENV_ACCEPT_ANY_USER,
                format!("'{raw}' is not a boolean, keeping {}", identity.accept_any_user),
            ),
        }
    }

    let mut registry = file.registry;
    if let Some(secs) = parse_interval(env, ENV_DISPATCH_INTERVAL, warnings) {
        registry.dispatch.interval_secs = secs;
    }
    if let Some(secs) = parse_interval(env, ENV_HEARTBEAT_INTERVAL, warnings) {
        registry.heartbeat.interval_secs = secs;
    }
    if let Some(attempts) = parse_env::<u32>(env, ENV_MAX_ATTEMPTS_BEFORE_ERROR, warnings) {
        registry.health.max_attempts_before_error = attempts;
    }
    if let Some(load) = parse_env::<f32>(env, ENV_DEFAULT_JOB_LOAD, warnings) {
        registry.jobs.default_job_load = load;
    }

    AppConfig {
        server: ServerConfig {
            host,
            port,
            public_url,
            max_load,
        },
        database,
        identity,
        registry,
    }
}

fn parse_env<T: FromStr>(env: &EnvConfig, key: &str, warnings: &mut ConfigWarnings) -> Option<T> {
    let raw = env.get(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warnings.push(key, format!("ignoring unparsable value '{raw}'"));
            None
        }
    }
}

/// Interval in whole seconds from a humantime value. Zero disables the task;
/// anything shorter than the floor is raised to it.
fn parse_interval(env: &EnvConfig, key: &str, warnings: &mut ConfigWarnings) -> Option<u64> {
    let raw = env.get(key)?;
    let duration = match humantime::parse_duration(raw.trim()) {
        Ok(duration) => duration,
        Err(err) => {
            warnings.push(key, format!("ignoring invalid duration '{raw}': {err}"));
            return None;
        }
    };
    if duration.is_zero() {
        return Some(0);
    }
    let floor = Duration::from_secs(MIN_INTERVAL_SECS);
    if duration < floor {
        warnings.push(
            key,
            format!("{raw} is below the minimum of {MIN_INTERVAL_SECS}s, using {MIN_INTERVAL_SECS}s"),
        );
        return Some(MIN_INTERVAL_SECS);
    }
    Some(duration.as_secs())
}

/// Guard rails. Recoverable problems become warnings; a bad public URL is
/// fatal because the node could not register itself.
fn validate(config: &mut AppConfig, warnings: &mut ConfigWarnings) -> Result<(), ConfigLoadError> {
    let raw = config.server.public_url.trim().to_string();
    let parsed = Url::parse(&raw).map_err(|err| ConfigLoadError::InvalidPublicUrl {
        value: raw.clone(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigLoadError::InvalidPublicUrl {
            value: raw,
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    if parsed.host_str().is_none() {
        return Err(ConfigLoadError::InvalidPublicUrl {
            value: raw,
            reason: "missing host".into(),
        });
    }
    config.server.public_url = raw.trim_end_matches('/').to_string();

    if !config.server.max_load.is_finite() || config.server.max_load <= 0.0 {
        let fallback = default_max_load();
        warnings.push(
            "server.max_load",
            format!(
                "{} is not a positive capacity, using {fallback}",
                config.server.max_load
            ),
        );
        config.server.max_load = fallback;
    }

    let dispatch = &mut config.registry.dispatch;
    if dispatch.batch_size == 0 {
        warnings.push("registry.dispatch.batch_size", "batch size of 0 raised to 1");
        dispatch.batch_size = 1;
    }
    if dispatch.connect_timeout_ms == 0 || dispatch.request_timeout_ms == 0 {
        warnings.push(
            "registry.dispatch.timeouts",
            "zero timeouts would fail every worker call, using defaults",
        );
        let defaults = switchyard_core::config::DispatchConfig::default();
        dispatch.connect_timeout_ms = defaults.connect_timeout_ms;
        dispatch.request_timeout_ms = defaults.request_timeout_ms;
    }
    if dispatch.interval_secs == 0 {
        warnings.push("registry.dispatch.interval_secs", "dispatching is disabled");
    }
    if config.registry.heartbeat.interval_secs == 0 {
        warnings.push("registry.heartbeat.interval_secs", "heartbeat monitor is disabled");
    }

    let jobs = &mut config.registry.jobs;
    if !jobs.default_job_load.is_finite() || jobs.default_job_load < 0.0 {
        warnings.push(
            "registry.jobs.default_job_load",
            format!("{} is not a valid load, using 0.1", jobs.default_job_load),
        );
        jobs.default_job_load = switchyard_core::config::JobDefaults::default().default_job_load;
    }

    if config.identity.organizations.is_empty() {
        warnings.push(
            "identity.organizations",
            "no organisations configured, the dispatcher will skip every job",
        );
    }

    Ok(())
}
