//! Persisted settings – reads/writes `~/.sensorbridge/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sensorbridge_hal::SourceKind;
use sensorbridge_hal::sim::SimRates;
use sensorbridge_middleware::{DEFAULT_PORT, TypeNaming};
use sensorbridge_runtime::SessionConfig;

/// Which event sources each session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub inertial: bool,
    pub orientation: bool,
    pub location: bool,
    pub step_count: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            inertial: true,
            orientation: true,
            location: true,
            step_count: true,
        }
    }
}

impl SourcesConfig {
    pub fn enabled(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                SourceKind::Inertial => self.inertial,
                SourceKind::Orientation => self.orientation,
                SourceKind::Location => self.location,
                SourceKind::StepCount => self.step_count,
            })
            .collect()
    }
}

/// Output rates of the simulated platform (Hz).  `0` disables a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub imu_hz: f64,
    pub attitude_hz: f64,
    pub gps_hz: f64,
    pub step_hz: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let rates = SimRates::default();
        Self {
            imu_hz: rates.imu_hz,
            attitude_hz: rates.attitude_hz,
            gps_hz: rates.gps_hz,
            step_hz: rates.step_hz,
        }
    }
}

impl SimulationConfig {
    pub fn rates(&self) -> SimRates {
        SimRates {
            imu_hz: self.imu_hz,
            attitude_hz: self.attitude_hz,
            gps_hz: self.gps_hz,
            step_hz: self.step_hz,
        }
    }
}

/// Persisted user configuration stored in `~/.sensorbridge/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// rosbridge server port.
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    /// Address used by `/start` when none is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_host: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default)]
    pub type_naming: TypeNaming,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_bridge_port() -> u16 {
    DEFAULT_PORT
}
fn default_connect_timeout_ms() -> u64 {
    2000
}
fn default_settle_delay_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_port: default_bridge_port(),
            default_host: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            type_naming: TypeNaming::default(),
            sources: SourcesConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// `self` with the `SENSORBRIDGE_*` overrides applied.
    pub fn with_env_overrides(mut self) -> Self {
        apply_env_overrides(&mut self);
        self
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            port: self.bridge_port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            type_naming: self.type_naming,
            sources: self.sources.enabled(),
        }
    }
}

/// Return the path to `~/.sensorbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sensorbridge").join("config.toml")
}

/// Outcome of resolving the startup configuration.
///
/// Environment overrides are already applied in every variant.
#[derive(Debug)]
pub enum Startup {
    /// The config file was read.
    Loaded(Config),
    /// No config file yet; defaults for the first-run wizard.
    FirstRun(Config),
    /// The config file is unusable; defaults are used instead.
    Fallback { cfg: Config, error: String },
}

/// Resolve the startup configuration from `~/.sensorbridge/config.toml`.
pub fn startup() -> Startup {
    startup_from(&config_path())
}

pub(crate) fn startup_from(path: &Path) -> Startup {
    match load_from(path) {
        Ok(Some(cfg)) => Startup::Loaded(cfg),
        Ok(None) => Startup::FirstRun(Config::default().with_env_overrides()),
        Err(error) => Startup::Fallback {
            cfg: Config::default().with_env_overrides(),
            error,
        },
    }
}

/// Load the config at `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SENSORBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SENSORBRIDGE_PORT` | `bridge_port` |
/// | `SENSORBRIDGE_HOST` | `default_host` |
/// | `SENSORBRIDGE_CONNECT_TIMEOUT_MS` | `connect_timeout_ms` |
/// | `SENSORBRIDGE_SETTLE_DELAY_MS` | `settle_delay_ms` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SENSORBRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.bridge_port = port;
    }
    if let Ok(v) = std::env::var("SENSORBRIDGE_HOST")
        && !v.trim().is_empty()
    {
        cfg.default_host = Some(v.trim().to_string());
    }
    if let Ok(v) = std::env::var("SENSORBRIDGE_CONNECT_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.connect_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("SENSORBRIDGE_SETTLE_DELAY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.settle_delay_ms = ms;
    }
}

/// Save the config to disk, creating `~/.sensorbridge/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env overrides are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_var<T>(key: &str, value: &str, f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        // SAFETY: guarded by ENV_LOCK; no other test touches this variable.
        unsafe { std::env::set_var(key, value) };
        let out = f();
        unsafe { std::env::remove_var(key) };
        out
    }

    fn with_env(key: &str, value: &str) -> Config {
        with_env_var(key, value, || Config::default().with_env_overrides())
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");

        assert_eq!(loaded.bridge_port, 9090);
        assert_eq!(loaded.connect_timeout_ms, 2000);
        assert_eq!(loaded.settle_delay_ms, 1000);
        assert_eq!(loaded.type_naming, TypeNaming::Ros1);
        assert_eq!(loaded.sources, SourcesConfig::default());
        assert!(loaded.default_host.is_none());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "bridge_port = 9191\ntype_naming = \"ros2\"\n[sources]\nstep_count = false\n",
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.bridge_port, 9191);
        assert_eq!(cfg.type_naming, TypeNaming::Ros2);
        assert!(!cfg.sources.step_count);
        assert!(cfg.sources.inertial);
        assert_eq!(cfg.simulation, SimulationConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "bridge_port = \"nope\"").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn config_path_points_to_sensorbridge_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".sensorbridge"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn env_overrides_port_and_host() {
        let cfg = with_env("SENSORBRIDGE_PORT", "9999");
        assert_eq!(cfg.bridge_port, 9999);

        let cfg = with_env("SENSORBRIDGE_HOST", " 10.0.0.7 ");
        assert_eq!(cfg.default_host.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn env_overrides_delays() {
        let cfg = with_env("SENSORBRIDGE_CONNECT_TIMEOUT_MS", "750");
        assert_eq!(cfg.connect_timeout_ms, 750);

        let cfg = with_env("SENSORBRIDGE_SETTLE_DELAY_MS", "0");
        assert_eq!(cfg.settle_delay_ms, 0);
    }

    #[test]
    fn env_overrides_ignore_invalid_numbers() {
        let cfg = with_env("SENSORBRIDGE_PORT", "not-a-port");
        assert_eq!(cfg.bridge_port, 9090);

        let cfg = with_env("SENSORBRIDGE_SETTLE_DELAY_MS", "-5");
        assert_eq!(cfg.settle_delay_ms, 1000);
    }

    #[test]
    fn missing_file_still_honours_env_overrides() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let startup = with_env_var("SENSORBRIDGE_PORT", "9300", || startup_from(&path));
        match startup {
            Startup::FirstRun(cfg) => assert_eq!(cfg.bridge_port, 9300),
            other => panic!("expected first run, got {other:?}"),
        }
        assert!(!path.exists(), "resolving must not write the file");
    }

    #[test]
    fn malformed_file_falls_back_with_env_overrides() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "bridge_port = \"nope\"").unwrap();

        let startup = with_env_var("SENSORBRIDGE_HOST", "10.1.2.3", || startup_from(&path));
        match startup {
            Startup::Fallback { cfg, error } => {
                assert_eq!(cfg.default_host.as_deref(), Some("10.1.2.3"));
                assert!(error.contains("Failed to parse config"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn existing_file_is_loaded() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "bridge_port = 9191\n").unwrap();

        let startup = with_env_var("SENSORBRIDGE_CONNECT_TIMEOUT_MS", "450", || {
            startup_from(&path)
        });
        match startup {
            Startup::Loaded(cfg) => {
                assert_eq!(cfg.bridge_port, 9191);
                assert_eq!(cfg.connect_timeout_ms, 450);
            }
            other => panic!("expected loaded, got {other:?}"),
        }
    }

    #[test]
    fn session_config_reflects_settings() {
        let mut cfg = Config::default();
        cfg.sources.orientation = false;
        cfg.connect_timeout_ms = 300;
        let session = cfg.session_config();

        assert_eq!(session.connect_timeout, Duration::from_millis(300));
        assert_eq!(
            session.sources,
            vec![SourceKind::Inertial, SourceKind::Location, SourceKind::StepCount]
        );
    }
}
