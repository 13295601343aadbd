use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub genie: GenieConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Identity-authority settings shared by both OAuth grant flows.
#[derive(Clone, Debug)]
pub struct IdentityConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Downstream resource identifier the acquired tokens are scoped to.
    pub resource_id: String,
}

#[derive(Clone, Debug)]
pub struct GenieConfig {
    pub workspace_url: String,
    pub space_id: String,
    pub request_timeout_secs: u64,
    pub poll_max_attempts: u32,
    pub poll_initial_delay_ms: u64,
    pub poll_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub resource_id: Option<String>,
    pub workspace_url: Option<String>,
    pub space_id: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig {
                tenant_id: String::new(),
                client_id: String::new(),
                client_secret: String::new().into(),
                resource_id: String::new(),
            },
            genie: GenieConfig {
                workspace_url: String::new(),
                space_id: String::new(),
                request_timeout_secs: 30,
                poll_max_attempts: 60,
                poll_initial_delay_ms: 250,
                poll_max_delay_ms: 5_000,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                health_check_port: 8080,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("geniebridge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(identity) = patch.identity {
            if let Some(tenant_id) = identity.tenant_id {
                self.identity.tenant_id = tenant_id;
            }
            if let Some(client_id) = identity.client_id {
                self.identity.client_id = client_id;
            }
            if let Some(client_secret_value) = identity.client_secret {
                self.identity.client_secret = secret_value(client_secret_value);
            }
            if let Some(resource_id) = identity.resource_id {
                self.identity.resource_id = resource_id;
            }
        }

        if let Some(genie) = patch.genie {
            if let Some(workspace_url) = genie.workspace_url {
                self.genie.workspace_url = workspace_url;
            }
            if let Some(space_id) = genie.space_id {
                self.genie.space_id = space_id;
            }
            if let Some(request_timeout_secs) = genie.request_timeout_secs {
                self.genie.request_timeout_secs = request_timeout_secs;
            }
            if let Some(poll_max_attempts) = genie.poll_max_attempts {
                self.genie.poll_max_attempts = poll_max_attempts;
            }
            if let Some(poll_initial_delay_ms) = genie.poll_initial_delay_ms {
                self.genie.poll_initial_delay_ms = poll_initial_delay_ms;
            }
            if let Some(poll_max_delay_ms) = genie.poll_max_delay_ms {
                self.genie.poll_max_delay_ms = poll_max_delay_ms;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("GENIEBRIDGE_TENANT_ID") {
            self.identity.tenant_id = value;
        }
        if let Some(value) = read_env("GENIEBRIDGE_CLIENT_ID") {
            self.identity.client_id = value;
        }
        if let Some(value) = read_env("GENIEBRIDGE_CLIENT_SECRET") {
            self.identity.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("GENIEBRIDGE_RESOURCE_ID") {
            self.identity.resource_id = value;
        }

        if let Some(value) = read_env("GENIEBRIDGE_WORKSPACE_URL") {
            self.genie.workspace_url = value;
        }
        if let Some(value) = read_env("GENIEBRIDGE_SPACE_ID") {
            self.genie.space_id = value;
        }
        if let Some(value) = read_env("GENIEBRIDGE_REQUEST_TIMEOUT_SECS") {
            self.genie.request_timeout_secs =
                parse_u64("GENIEBRIDGE_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("GENIEBRIDGE_POLL_MAX_ATTEMPTS") {
            self.genie.poll_max_attempts = parse_u32("GENIEBRIDGE_POLL_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("GENIEBRIDGE_POLL_INITIAL_DELAY_MS") {
            self.genie.poll_initial_delay_ms =
                parse_u64("GENIEBRIDGE_POLL_INITIAL_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("GENIEBRIDGE_POLL_MAX_DELAY_MS") {
            self.genie.poll_max_delay_ms = parse_u64("GENIEBRIDGE_POLL_MAX_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("GENIEBRIDGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("GENIEBRIDGE_SERVER_PORT") {
            self.server.port = parse_u16("GENIEBRIDGE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("GENIEBRIDGE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("GENIEBRIDGE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        let log_level =
            read_env("GENIEBRIDGE_LOGGING_LEVEL").or_else(|| read_env("GENIEBRIDGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("GENIEBRIDGE_LOGGING_FORMAT").or_else(|| read_env("GENIEBRIDGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(tenant_id) = overrides.tenant_id {
            self.identity.tenant_id = tenant_id;
        }
        if let Some(client_id) = overrides.client_id {
            self.identity.client_id = client_id;
        }
        if let Some(client_secret) = overrides.client_secret {
            self.identity.client_secret = secret_value(client_secret);
        }
        if let Some(resource_id) = overrides.resource_id {
            self.identity.resource_id = resource_id;
        }
        if let Some(workspace_url) = overrides.workspace_url {
            self.genie.workspace_url = workspace_url;
        }
        if let Some(space_id) = overrides.space_id {
            self.genie.space_id = space_id;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identity(&self.identity)?;
        validate_genie(&self.genie)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("geniebridge.toml"), PathBuf::from("config/geniebridge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_identity(identity: &IdentityConfig) -> Result<(), ConfigError> {
    if identity.tenant_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "identity.tenant_id is required (the identity authority tenant)".to_string(),
        ));
    }
    if identity.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "identity.client_id is required (the registered application id)".to_string(),
        ));
    }
    if identity.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation("identity.client_secret is required".to_string()));
    }
    if identity.resource_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "identity.resource_id is required (the downstream resource identifier tokens are \
             scoped to)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_genie(genie: &GenieConfig) -> Result<(), ConfigError> {
    let url = genie.workspace_url.trim();
    if url.is_empty() {
        return Err(ConfigError::Validation("genie.workspace_url is required".to_string()));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "genie.workspace_url must start with http:// or https://".to_string(),
        ));
    }

    if genie.space_id.trim().is_empty() {
        return Err(ConfigError::Validation("genie.space_id is required".to_string()));
    }

    if genie.request_timeout_secs == 0 || genie.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "genie.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if genie.poll_max_attempts == 0 {
        return Err(ConfigError::Validation(
            "genie.poll_max_attempts must be greater than zero".to_string(),
        ));
    }

    if genie.poll_initial_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "genie.poll_initial_delay_ms must be greater than zero (tight polling against the \
             remote service is not allowed)"
                .to_string(),
        ));
    }

    if genie.poll_max_delay_ms < genie.poll_initial_delay_ms {
        return Err(ConfigError::Validation(
            "genie.poll_max_delay_ms must be >= genie.poll_initial_delay_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    identity: Option<IdentityPatch>,
    genie: Option<GeniePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentityPatch {
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    resource_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GeniePatch {
    workspace_url: Option<String>,
    space_id: Option<String>,
    request_timeout_secs: Option<u64>,
    poll_max_attempts: Option<u32>,
    poll_initial_delay_ms: Option<u64>,
    poll_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn required_overrides() -> ConfigOverrides {
        ConfigOverrides {
            tenant_id: Some("tenant-1".to_string()),
            client_id: Some("client-1".to_string()),
            client_secret: Some("secret-1".to_string()),
            resource_id: Some("resource-1".to_string()),
            workspace_url: Some("https://adb-test.example.net".to_string()),
            space_id: Some("space-1".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GENIE_CLIENT_SECRET", "secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("geniebridge.toml");
            fs::write(
                &path,
                r#"
[identity]
tenant_id = "tenant-file"
client_id = "client-file"
client_secret = "${TEST_GENIE_CLIENT_SECRET}"
resource_id = "resource-file"

[genie]
workspace_url = "https://adb-file.example.net"
space_id = "space-file"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.identity.client_secret.expose_secret() == "secret-from-env",
                "client secret should be loaded from environment",
            )?;
            ensure(
                config.genie.workspace_url == "https://adb-file.example.net",
                "workspace url should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_GENIE_CLIENT_SECRET"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GENIEBRIDGE_SPACE_ID", "space-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("geniebridge.toml");
            fs::write(
                &path,
                r#"
[identity]
tenant_id = "tenant-file"
client_id = "client-file"
client_secret = "secret-file"
resource_id = "resource-file"

[genie]
workspace_url = "https://adb-file.example.net"
space_id = "space-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.genie.space_id == "space-from-env",
                "env space id should win over the file",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should win over env")?;
            ensure(
                config.identity.tenant_id == "tenant-file",
                "file tenant id should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["GENIEBRIDGE_SPACE_ID"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let mut overrides = required_overrides();
        overrides.workspace_url = Some("adb-test.example.net".to_string());

        let error = match AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("genie.workspace_url")
        );
        ensure(has_message, "validation failure should mention genie.workspace_url")
    }

    #[test]
    fn zero_poll_delay_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GENIEBRIDGE_POLL_INITIAL_DELAY_MS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions {
                overrides: required_overrides(),
                ..LoadOptions::default()
            }) {
                Ok(_) => return Err("tight polling config should be rejected".to_string()),
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("poll_initial_delay_ms")
            );
            ensure(has_message, "validation failure should mention poll_initial_delay_ms")
        })();

        clear_vars(&["GENIEBRIDGE_POLL_INITIAL_DELAY_MS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let mut overrides = required_overrides();
        overrides.client_secret = Some("super-secret-value".to_string());

        let config = AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() })
            .map_err(|err| format!("config load failed: {err}"))?;
        let debug = format!("{config:?}");

        ensure(!debug.contains("super-secret-value"), "debug output should not contain the secret")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }
}
