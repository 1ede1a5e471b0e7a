//! Bootstrap configuration resolution.
//!
//! Exactly one of three modes configures a session, selected once per
//! invocation and never retried across modes:
//!
//! 1. A cluster name given directly loads credentials from the local
//!    vault (`~/.hazelcast/configs/<name>` or the Windows profile
//!    equivalent).
//! 2. Otherwise, `VIRIDIAN_SECRETS_DIR` in the environment selects the
//!    cloud path; all four `VIRIDIAN_*` variables are then required.
//! 3. Otherwise, a plain unauthenticated multi-member connection from
//!    `HZ_SERVERS` and `HZ_CLUSTER_NAME`.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use connection_monitor_transport::TlsSettings;

pub const VIRIDIAN_SECRETS_DIR: &str = "VIRIDIAN_SECRETS_DIR";
pub const VIRIDIAN_CLUSTER_ID: &str = "VIRIDIAN_CLUSTER_ID";
pub const VIRIDIAN_PASSWORD: &str = "VIRIDIAN_PASSWORD";
pub const VIRIDIAN_DISCOVERY_TOKEN: &str = "VIRIDIAN_DISCOVERY_TOKEN";
pub const HZ_SERVERS: &str = "HZ_SERVERS";
pub const HZ_CLUSTER_NAME: &str = "HZ_CLUSTER_NAME";

/// Fixed discovery endpoint for cloud clusters.
pub const CLOUD_DISCOVERY_ENDPOINT: &str = "https://api.viridian.hazelcast.com";

const KEYSTORE_FILE: &str = "client.keystore";
const TRUSTSTORE_FILE: &str = "client.truststore";

/// Configuration error: fatal, pre-connect, and never a reason to fall
/// back to another bootstrap mode.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable ({0}) was not provided")]
    MissingEnv(&'static str),
    #[error("could not configure connection to cluster {cluster} from local vault: {reason}")]
    Vault { cluster: String, reason: String },
    #[error("secrets directory {} does not exist or is not a directory", .0.display())]
    SecretsDir(PathBuf),
    #[error("key material not found or unreadable: {}", .0.display())]
    KeyMaterial(PathBuf),
    #[error("no usable member in server list: {0}")]
    BadMembers(String),
    #[error("no home directory available for vault lookup")]
    NoHome,
}

/// Token-based cloud member discovery.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub token: String,
    pub endpoint: String,
}

/// Everything a session needs to come up, plus the one-line confirmation
/// to print once it has.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub cluster: String,
    pub members: Vec<String>,
    pub discovery: Option<Discovery>,
    pub tls: Option<TlsSettings>,
    pub confirmation: String,
}

/// Source of environment variables, seamed out so mode selection is
/// testable without touching the process environment.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Which bootstrap mode an invocation selects. Selection is pure: it
/// looks only at the presence of the selectors, never their validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapMode {
    /// A cluster name was given directly: local vault credentials.
    LocalVault(String),
    /// `VIRIDIAN_SECRETS_DIR` is present: cloud credentials from the
    /// environment.
    CloudEnvironment,
    /// Plain unauthenticated members.
    Plain,
}

/// Pick the bootstrap mode for this invocation.
#[must_use]
pub fn select_mode(cluster_name: Option<&str>, env: &dyn EnvSource) -> BootstrapMode {
    match cluster_name {
        Some(name) => BootstrapMode::LocalVault(name.to_owned()),
        None if env.var(VIRIDIAN_SECRETS_DIR).is_some() => BootstrapMode::CloudEnvironment,
        None => BootstrapMode::Plain,
    }
}

/// Resolve the bootstrap configuration. One-shot and deterministic: the
/// selected mode either succeeds or fails, no other mode is attempted.
///
/// # Errors
/// `ConfigError` when the selected mode is missing or holds invalid
/// inputs.
pub fn resolve(
    cluster_name: Option<&str>,
    env: &dyn EnvSource,
) -> Result<BootstrapConfig, ConfigError> {
    match select_mode(cluster_name, env) {
        BootstrapMode::LocalVault(name) => from_local_vault(&name),
        BootstrapMode::CloudEnvironment => from_cloud_env(env),
        BootstrapMode::Plain => from_plain_env(env),
    }
}

#[derive(Deserialize)]
struct VaultDescriptor {
    cluster: VaultCluster,
    ssl: VaultSsl,
}

#[derive(Deserialize)]
struct VaultCluster {
    name: String,
    #[serde(rename = "discovery-token")]
    discovery_token: String,
}

#[derive(Deserialize)]
struct VaultSsl {
    #[serde(rename = "key-password")]
    key_password: String,
}

fn vault_configs_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    let vault = if cfg!(windows) {
        home.join("AppData").join("Roaming").join("Hazelcast")
    } else {
        home.join(".hazelcast")
    };
    Ok(vault.join("configs"))
}

/// Mode 1: credentials pre-downloaded into the local vault.
///
/// # Errors
/// `ConfigError::Vault` when the layout is absent or unreadable.
pub fn from_local_vault(cluster_name: &str) -> Result<BootstrapConfig, ConfigError> {
    from_vault_dir(cluster_name, &vault_configs_dir()?)
}

/// Vault resolution against an explicit configs directory.
///
/// # Errors
/// See [`from_local_vault`].
pub fn from_vault_dir(cluster_name: &str, configs: &Path) -> Result<BootstrapConfig, ConfigError> {
    let vault = |reason: String| ConfigError::Vault {
        cluster: cluster_name.to_owned(),
        reason,
    };

    let dir = configs.join(cluster_name);
    if !dir.is_dir() {
        return Err(vault(format!("{} is not a directory", dir.display())));
    }

    let descriptor_path = dir.join("config.json");
    let raw = fs::read_to_string(&descriptor_path)
        .map_err(|e| vault(format!("{}: {e}", descriptor_path.display())))?;
    let descriptor: VaultDescriptor =
        serde_json::from_str(&raw).map_err(|e| vault(format!("bad descriptor: {e}")))?;

    let tls = key_material(&dir, descriptor.ssl.key_password)?;

    Ok(BootstrapConfig {
        cluster: descriptor.cluster.name,
        members: Vec::new(),
        discovery: Some(Discovery {
            token: descriptor.cluster.discovery_token,
            endpoint: CLOUD_DISCOVERY_ENDPOINT.to_owned(),
        }),
        tls: Some(tls),
        confirmation: format!("Connected to Viridian Cluster: {cluster_name}"),
    })
}

/// Mode 2: cloud credentials from the environment.
///
/// # Errors
/// `ConfigError` when any of the four variables is missing or the key
/// material is absent.
pub fn from_cloud_env(env: &dyn EnvSource) -> Result<BootstrapConfig, ConfigError> {
    let secrets_dir = PathBuf::from(required(env, VIRIDIAN_SECRETS_DIR)?);
    let password = required(env, VIRIDIAN_PASSWORD)?;
    let cluster = required(env, VIRIDIAN_CLUSTER_ID)?;
    let token = required(env, VIRIDIAN_DISCOVERY_TOKEN)?;

    if !secrets_dir.is_dir() {
        return Err(ConfigError::SecretsDir(secrets_dir));
    }
    let tls = key_material(&secrets_dir, password)?;

    Ok(BootstrapConfig {
        cluster: cluster.clone(),
        members: Vec::new(),
        discovery: Some(Discovery {
            token,
            endpoint: CLOUD_DISCOVERY_ENDPOINT.to_owned(),
        }),
        tls: Some(tls),
        confirmation: format!("Connected to Viridian Cluster: {cluster}"),
    })
}

/// Mode 3: plain unauthenticated members from the environment.
///
/// # Errors
/// `ConfigError::MissingEnv` when either variable is absent.
pub fn from_plain_env(env: &dyn EnvSource) -> Result<BootstrapConfig, ConfigError> {
    let servers = required(env, HZ_SERVERS)?;
    let cluster = required(env, HZ_CLUSTER_NAME)?;

    let members: Vec<String> = servers
        .split(',')
        .map(|member| member.trim().to_owned())
        .filter(|member| !member.is_empty())
        .collect();
    if members.is_empty() {
        return Err(ConfigError::BadMembers(servers));
    }

    Ok(BootstrapConfig {
        cluster: cluster.clone(),
        members,
        discovery: None,
        tls: None,
        confirmation: format!("Connected to cluster [{cluster}] at {servers}"),
    })
}

fn required(env: &dyn EnvSource, name: &'static str) -> Result<String, ConfigError> {
    env.var(name).ok_or(ConfigError::MissingEnv(name))
}

fn key_material(dir: &Path, password: String) -> Result<TlsSettings, ConfigError> {
    let keystore = dir.join(KEYSTORE_FILE);
    let truststore = dir.join(TRUSTSTORE_FILE);
    for store in [&keystore, &truststore] {
        fs::File::open(store).map_err(|_| ConfigError::KeyMaterial(store.clone()))?;
    }
    Ok(TlsSettings {
        keystore,
        truststore,
        password,
    })
}
