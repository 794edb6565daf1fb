use std::path::PathBuf;
use std::time::Duration;

use connector_docker::MountKind;

/// Errors raised while loading [`WorkerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker configuration loaded from environment variables.
///
/// All fields except the database URL have defaults suitable for local
/// development, where the staging root is bind-mounted at the same path
/// inside connector containers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bind address of the run trigger server (default: `0.0.0.0`).
    pub host: String,
    /// Bind port of the run trigger server (default: `8090`).
    pub port: u16,
    pub database_url: String,
    /// Host directory where configuration and catalog files are staged.
    pub staging_root: PathBuf,
    /// Bind source or volume name exposing the staging root to containers.
    pub mount_source: String,
    /// Path at which the staging root appears inside containers.
    pub mount_target: String,
    pub mount_kind: MountKind,
    /// Optional shared data volume mounted into write runs.
    pub shared_mount_source: Option<String>,
    pub shared_mount_target: String,
    /// Start-to-close timeout of one activity (default: 120s).
    pub activity_timeout: Duration,
    /// Container-launching activities allowed at once (default: 2).
    pub max_concurrent_activities: usize,
    /// Dispatch cache entry lifetime (default: 3600s).
    pub dispatch_ttl: Duration,
    /// Graceful stop period before a container is force-removed (default: 10s).
    pub stop_grace: Duration,
    /// HTTP request timeout of the trigger server (default: 30s).
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight runs (default: 30s).
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default              |
    /// |-----------------------------|----------------------|
    /// | `HOST`                      | `0.0.0.0`            |
    /// | `PORT`                      | `8090`               |
    /// | `DATABASE_URL`              | required             |
    /// | `STAGING_ROOT`              | `<tmp>/vdp`          |
    /// | `MOUNT_SOURCE`              | `STAGING_ROOT`       |
    /// | `MOUNT_TARGET`              | `STAGING_ROOT`       |
    /// | `MOUNT_TYPE`                | `bind`               |
    /// | `SHARED_MOUNT_SOURCE`       | unset                |
    /// | `SHARED_MOUNT_TARGET`       | `/local`             |
    /// | `ACTIVITY_TIMEOUT_SECS`     | `120`                |
    /// | `MAX_CONCURRENT_ACTIVITIES` | `2`                  |
    /// | `DISPATCH_TTL_SECS`         | `3600`               |
    /// | `STOP_GRACE_SECS`           | `10`                 |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                 |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse(&var, "PORT", 8090u16)?;
        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let staging_root = var("STAGING_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("vdp"));
        let staging_str = staging_root.to_string_lossy().into_owned();
        let mount_source = var("MOUNT_SOURCE").unwrap_or_else(|| staging_str.clone());
        let mount_target = var("MOUNT_TARGET").unwrap_or(staging_str);

        let mount_kind = match var("MOUNT_TYPE") {
            None => MountKind::Bind,
            Some(value) => MountKind::from_name(&value).ok_or_else(|| ConfigError::Invalid {
                name: "MOUNT_TYPE",
                value,
                reason: "must be 'bind' or 'volume'".to_string(),
            })?,
        };

        let max_concurrent_activities = parse(&var, "MAX_CONCURRENT_ACTIVITIES", 2usize)?;
        if max_concurrent_activities == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_CONCURRENT_ACTIVITIES",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            database_url,
            staging_root,
            mount_source,
            mount_target,
            mount_kind,
            shared_mount_source: var("SHARED_MOUNT_SOURCE"),
            shared_mount_target: var("SHARED_MOUNT_TARGET").unwrap_or_else(|| "/local".into()),
            activity_timeout: secs(&var, "ACTIVITY_TIMEOUT_SECS", 120)?,
            max_concurrent_activities,
            dispatch_ttl: secs(&var, "DISPATCH_TTL_SECS", 3600)?,
            stop_grace: secs(&var, "STOP_GRACE_SECS", 10)?,
            request_timeout: secs(&var, "REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout: secs(&var, "SHUTDOWN_TIMEOUT_SECS", 30)?,
        })
    }
}

fn parse<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

fn secs<F>(var: &F, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(var, name, default).map(Duration::from_secs)
}
