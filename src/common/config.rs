//! Configuration for segmentd components
//!
//! Settings are read once at startup (optional TOML file, then `SEGMENTD_*`
//! environment variables) and validated for the mode the process runs in.
//! Every problem is collected so a misconfigured host reports all of them at
//! once instead of failing on the first.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix (`SEGMENTD_HOSTNAME`, `SEGMENTD_CONSUL_PORT`, ...)
pub const ENV_PREFIX: &str = "SEGMENTD";

/// Which loop or server this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Elected sync master: placement and rebalancing
    Master,
    /// Per-host reconciliation of assigned segments
    Local,
    /// HTTP write server
    Write,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Master => write!(f, "master"),
            SyncMode::Local => write!(f, "local"),
            SyncMode::Write => write!(f, "write"),
        }
    }
}

/// Settings as they come out of the file/environment, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub hostname: Option<String>,
    pub external_ip: Option<String>,
    pub consul_address: Option<String>,
    pub consul_port: Option<u16>,
    pub hdfs_host: Option<String>,
    pub hdfs_port: Option<u16>,
    pub hdfs_path: Option<String>,
    pub election_cycle_secs: Option<u64>,
    pub host_check_wait_secs: Option<u64>,
    pub sync_port: Option<u16>,
    pub read_port: Option<u16>,
    pub write_port: Option<u16>,
    pub storage_in_bytes: Option<u64>,
    pub sync_loop_timing_secs: Option<u64>,
    pub local_data: Option<PathBuf>,
    pub segment_extension: Option<String>,
    pub allowed_write_verbs: Option<Vec<String>>,
    pub log_level: Option<String>,
}

impl RawSettings {
    /// Read the optional config file, then overlay `SEGMENTD_*` env vars.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let raw = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_write_verbs"),
            )
            .build()?
            .try_deserialize()?;
        Ok(raw)
    }
}

/// Consul agent endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsulSettings {
    pub address: String,
    pub port: u16,
}

impl ConsulSettings {
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            format!("{}:{}", self.address.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }
}

/// WebHDFS namenode endpoint and the directory holding segment files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdfsSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Validated, immutable settings shared by every component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub mode: SyncMode,
    pub hostname: String,
    pub external_ip: String,
    pub consul: ConsulSettings,
    pub hdfs: HdfsSettings,
    pub election_cycle: Duration,
    pub host_check_wait: Duration,
    pub sync_port: u16,
    pub read_port: u16,
    pub write_port: u16,
    pub storage_in_bytes: u64,
    pub sync_loop_timing: Duration,
    pub local_data: PathBuf,
    pub segment_extension: String,
    pub allowed_write_verbs: Vec<String>,
    pub log_level: String,
}

fn default_local_data() -> PathBuf {
    PathBuf::from("/var/tmp/segmentd")
}

fn default_allowed_write_verbs() -> Vec<String> {
    ["INSERT", "UPDATE", "DELETE"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}

/// Collects violations while pulling required fields out of `RawSettings`
struct Violations {
    mode: SyncMode,
    messages: Vec<String>,
}

impl Violations {
    fn require<T: Default>(&mut self, value: Option<T>, needed: bool, message: &str) -> T {
        match value {
            Some(v) => v,
            None => {
                if needed {
                    self.messages.push(message.to_string());
                }
                T::default()
            }
        }
    }

    fn require_text(&mut self, value: Option<String>, needed: bool, message: &str) -> String {
        let value = value.filter(|v| !v.trim().is_empty());
        self.require(value, needed, message)
    }

    fn require_positive(&mut self, value: Option<u64>, needed: bool, message: &str) -> u64 {
        let value = value.filter(|v| *v > 0);
        self.require(value, needed, message)
    }

    fn finish(self) -> crate::Result<()> {
        if self.messages.is_empty() {
            return Ok(());
        }
        Err(crate::Error::InvalidConfig(format!(
            "{} mode: {}",
            self.mode,
            self.messages.join("; ")
        )))
    }
}

impl Settings {
    /// Validate raw settings for `mode`, reporting every violation together.
    pub fn validate(raw: RawSettings, mode: SyncMode) -> crate::Result<Self> {
        let master = mode == SyncMode::Master;
        let local = mode == SyncMode::Local;
        let write = mode == SyncMode::Write;
        let mut v = Violations {
            mode,
            messages: Vec::new(),
        };

        let hostname = v.require_text(
            raw.hostname,
            true,
            "HOSTNAME must be set, or I can't figure out my own hostname",
        );
        let external_ip = v.require_text(
            raw.external_ip,
            true,
            "EXTERNAL_IP must be set. We need to know which IP to use",
        );
        let consul_address = v.require_text(
            raw.consul_address,
            true,
            "CONSUL_ADDRESS must be set. Where can I contact the coordination store?",
        );
        let consul_port = v.require(
            raw.consul_port,
            true,
            "CONSUL_PORT must be set. Where can I contact the coordination store?",
        );
        let hdfs_host = v.require_text(
            raw.hdfs_host,
            master || local,
            "HDFS_HOST must be set, or I can't communicate with HDFS",
        );
        let hdfs_port = v.require(
            raw.hdfs_port,
            master || local,
            "HDFS_PORT must be set, or I can't communicate with HDFS",
        );
        let hdfs_path = v.require_text(
            raw.hdfs_path,
            master || local,
            "HDFS_PATH must be set, otherwise I don't know where to look for segment files",
        );
        let election_cycle = v.require_positive(
            raw.election_cycle_secs,
            master,
            "ELECTION_CYCLE must be greater than zero. It governs the number of seconds in a sync master election period",
        );
        let sync_port = v.require(
            raw.sync_port,
            master,
            "SYNC_PORT must be set. We need to know the output port",
        );
        let read_port = v.require(
            raw.read_port,
            local,
            "READ_PORT must be set. We need to know the read port",
        );
        let write_port = v.require(
            raw.write_port,
            write,
            "WRITE_PORT must be set. We need to know where to accept writes",
        );
        let storage_in_bytes = v.require(
            raw.storage_in_bytes,
            local,
            "STORAGE_IN_BYTES must be set. We need this host's storage quota",
        );
        let sync_loop_timing = v.require_positive(
            raw.sync_loop_timing_secs,
            local,
            "SYNC_LOOP_TIMING must be greater than zero. It governs the seconds between local sync passes",
        );

        let allowed_write_verbs: Vec<String> = raw
            .allowed_write_verbs
            .unwrap_or_else(default_allowed_write_verbs)
            .into_iter()
            .map(|verb| verb.trim().to_ascii_uppercase())
            .filter(|verb| !verb.is_empty())
            .collect();
        if write && allowed_write_verbs.is_empty() {
            v.messages
                .push("ALLOWED_WRITE_VERBS must name at least one statement verb".to_string());
        }

        v.finish()?;

        Ok(Self {
            mode,
            hostname,
            external_ip,
            consul: ConsulSettings {
                address: consul_address,
                port: consul_port,
            },
            hdfs: HdfsSettings {
                host: hdfs_host,
                port: hdfs_port,
                path: hdfs_path,
            },
            election_cycle: Duration::from_secs(election_cycle),
            host_check_wait: Duration::from_secs(raw.host_check_wait_secs.unwrap_or(5)),
            sync_port,
            read_port,
            write_port,
            storage_in_bytes,
            sync_loop_timing: Duration::from_secs(sync_loop_timing),
            local_data: raw.local_data.unwrap_or_else(default_local_data),
            segment_extension: raw
                .segment_extension
                .unwrap_or_else(|| "sqlite".to_string()),
            allowed_write_verbs,
            log_level: raw.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Load and validate in one step
    pub fn load(path: Option<&Path>, mode: SyncMode) -> crate::Result<Self> {
        Self::validate(RawSettings::load(path)?, mode)
    }

    /// Local path of a segment file
    pub fn segment_path(&self, segment_id: &str) -> PathBuf {
        self.local_data
            .join(format!("{}.{}", segment_id, self.segment_extension))
    }
}

#[cfg(test)]
pub(crate) fn test_settings(hostname: &str, mode: SyncMode) -> Settings {
    Settings {
        mode,
        hostname: hostname.to_string(),
        external_ip: "10.0.0.1".to_string(),
        consul: ConsulSettings {
            address: "127.0.0.1".to_string(),
            port: 8500,
        },
        hdfs: HdfsSettings {
            host: "namenode".to_string(),
            port: 50070,
            path: "/segments".to_string(),
        },
        election_cycle: Duration::from_secs(10),
        host_check_wait: Duration::from_secs(1),
        sync_port: 6111,
        read_port: 6222,
        write_port: 6333,
        storage_in_bytes: 1_000,
        sync_loop_timing: Duration::from_secs(60),
        local_data: PathBuf::from("/tmp/segmentd-test"),
        segment_extension: "sqlite".to_string(),
        allowed_write_verbs: default_allowed_write_verbs(),
        log_level: "debug".to_string(),
    }
}
