//! # Hub Configuration
//!
//! The hub reads a single TOML file. Key names follow the cloud-side conventions:
//!
//! ```toml
//! projectID = "e632aba927ea4ac2b575ec1603d56f10"
//! nodeName = "edge-1"
//! tlsCaFile = "/etc/kubeedge/ca/rootCA.crt"
//! tlsCertFile = "/etc/kubeedge/certs/edge.crt"
//! tlsPrivateKeyFile = "/etc/kubeedge/certs/edge.key"
//! handshakeTimeout = 30
//! writeDeadline = 15
//! readDeadline = 0
//! heartbeat = 15
//! messageQPS = 30
//! messageBurst = 60
//! rotateCertificates = false
//!
//! [websocket]
//! server = "cloudhub.example.com:10000"
//!
//! [restartPolicy]
//! policy = "always"
//! intervalSecond = 1
//! ```
//!
//! Times are whole seconds. A `readDeadline` of `0` disables the read deadline.
//! Loading validates everything the link needs at dial time, so a broken
//! configuration fails at boot instead of inside the reconnect loop.

use crate::error::ConfigError;
use beehive::RestartPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kubeedge/config/edgehub.toml";

const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WRITE_DEADLINE_SECS: u64 = 15;
const DEFAULT_READ_DEADLINE_SECS: u64 = 0;
const DEFAULT_HEARTBEAT_SECS: u64 = 15;
const DEFAULT_MESSAGE_QPS: f64 = 30.0;
const DEFAULT_MESSAGE_BURST: u32 = 60;
/// Smallest positive `messageQPS` accepted; zero or less still means unlimited.
pub const MIN_MESSAGE_QPS: f64 = 0.001;

/// Pause after a failed connection attempt before the next cycle.
pub const WAIT_CONNECTION_PERIOD: Duration = Duration::from_secs(60);
/// Dial attempts made by one `init`.
pub const RETRY_COUNT: u32 = 5;
/// Pause between two dial attempts.
pub const CLOUD_ACCESS_SLEEP: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    websocket: RawWebSocket,
    #[serde(rename = "projectID")]
    project_id: Option<String>,
    node_name: Option<String>,
    tls_ca_file: Option<PathBuf>,
    tls_cert_file: Option<PathBuf>,
    tls_private_key_file: Option<PathBuf>,
    handshake_timeout: Option<u64>,
    write_deadline: Option<u64>,
    read_deadline: Option<u64>,
    heartbeat: Option<u64>,
    #[serde(rename = "messageQPS")]
    message_qps: Option<f64>,
    message_burst: Option<u32>,
    #[serde(default)]
    rotate_certificates: bool,
    restart_policy: Option<RestartPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct RawWebSocket {
    server: Option<String>,
}

/// Paths of the mutual-TLS material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Validated hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Cloud hub `host:port`.
    pub server: String,
    pub project_id: String,
    pub node_name: String,
    /// `wss://<server>/<projectID>/<nodeName>/events`.
    pub url: Url,
    pub tls: TlsFiles,
    pub handshake_timeout: Duration,
    pub write_deadline: Duration,
    /// Zero disables the read deadline.
    pub read_deadline: Duration,
    pub heartbeat: Duration,
    /// Refill rate of the uplink token bucket. Zero or less means unlimited.
    pub message_qps: f64,
    pub message_burst: u32,
    pub rotate_certificates: bool,
    pub restart_policy: Option<RestartPolicy>,
    pub wait_connection_period: Duration,
    pub retry_count: u32,
    pub cloud_access_sleep: Duration,
}

impl HubConfig {
    /// Builds a configuration with default timings for the given cloud identity.
    ///
    /// TLS paths are left empty; this is the entry point for tests and embedders
    /// that supply their own link.
    pub fn new(
        server: impl Into<String>,
        project_id: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let server = server.into();
        let project_id = project_id.into();
        let node_name = node_name.into();
        let url = cloud_hub_url(&server, &project_id, &node_name)?;

        Ok(Self {
            server,
            project_id,
            node_name,
            url,
            tls: TlsFiles::default(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            write_deadline: Duration::from_secs(DEFAULT_WRITE_DEADLINE_SECS),
            read_deadline: Duration::from_secs(DEFAULT_READ_DEADLINE_SECS),
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            message_qps: DEFAULT_MESSAGE_QPS,
            message_burst: DEFAULT_MESSAGE_BURST,
            rotate_certificates: false,
            restart_policy: None,
            wait_connection_period: WAIT_CONNECTION_PERIOD,
            retry_count: RETRY_COUNT,
            cloud_access_sleep: CLOUD_ACCESS_SLEEP,
        })
    }

    /// Reads and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), node = %config.node_name, url = %config.url, "config loaded");
        Ok(config)
    }

    /// Parses and validates a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let server = required(raw.websocket.server, "websocket.server")?;
        let project_id = required(raw.project_id, "projectID")?;
        let node_name = required(raw.node_name, "nodeName")?;
        let mut config = Self::new(server, project_id, node_name)?;

        config.tls = TlsFiles {
            ca_file: existing_file(raw.tls_ca_file, "tlsCaFile")?,
            cert_file: existing_file(raw.tls_cert_file, "tlsCertFile")?,
            key_file: existing_file(raw.tls_private_key_file, "tlsPrivateKeyFile")?,
        };

        if let Some(secs) = raw.handshake_timeout {
            config.handshake_timeout = positive_secs(secs, "handshakeTimeout")?;
        }
        if let Some(secs) = raw.write_deadline {
            config.write_deadline = positive_secs(secs, "writeDeadline")?;
        }
        if let Some(secs) = raw.read_deadline {
            config.read_deadline = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.heartbeat {
            config.heartbeat = positive_secs(secs, "heartbeat")?;
        }
        if let Some(qps) = raw.message_qps {
            if !qps.is_finite() {
                return Err(ConfigError::Invalid {
                    key: "messageQPS",
                    reason: format!("{qps} is not a finite number"),
                });
            }
            if qps > 0.0 && qps < MIN_MESSAGE_QPS {
                return Err(ConfigError::Invalid {
                    key: "messageQPS",
                    reason: format!("{qps} is below the minimum of {MIN_MESSAGE_QPS}"),
                });
            }
            config.message_qps = qps;
        }
        if let Some(burst) = raw.message_burst {
            if burst == 0 {
                return Err(ConfigError::Invalid {
                    key: "messageBurst",
                    reason: "must be at least 1".to_string(),
                });
            }
            config.message_burst = burst;
        }
        config.rotate_certificates = raw.rotate_certificates;
        config.restart_policy = raw.restart_policy;

        Ok(config)
    }

    /// Read deadline, if enabled.
    pub fn read_deadline(&self) -> Option<Duration> {
        (!self.read_deadline.is_zero()).then_some(self.read_deadline)
    }

    /// How long a cloud-bound sync request stays in the sync-keeper.
    pub fn sync_keeper_ttl(&self) -> Duration {
        self.heartbeat * 2
    }
}

/// `wss://<server>/<projectID>/<nodeName>/events`
pub fn cloud_hub_url(server: &str, project_id: &str, node_name: &str) -> Result<Url, ConfigError> {
    let raw = format!("wss://{server}/{project_id}/{node_name}/events");
    Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { url: raw, source })
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn existing_file(path: Option<PathBuf>, key: &'static str) -> Result<PathBuf, ConfigError> {
    let path = path.ok_or(ConfigError::Missing(key))?;
    if !path.is_file() {
        return Err(ConfigError::MissingTlsFile { key, path });
    }
    Ok(path)
}

fn positive_secs(secs: u64, key: &'static str) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    struct Fixture {
        _dir: TempDir,
        ca: PathBuf,
        cert: PathBuf,
        key: PathBuf,
    }

    fn tls_fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let touch = |name: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, "pem").unwrap();
            path
        };
        Fixture {
            ca: touch("rootCA.crt"),
            cert: touch("edge.crt"),
            key: touch("edge.key"),
            _dir: dir,
        }
    }

    fn document(f: &Fixture, extra: &str) -> String {
        format!(
            r#"
projectID = "proj"
nodeName = "edge-1"
tlsCaFile = "{}"
tlsCertFile = "{}"
tlsPrivateKeyFile = "{}"
{extra}

[websocket]
server = "cloudhub.example.com:10000"
"#,
            f.ca.display(),
            f.cert.display(),
            f.key.display(),
        )
    }

    #[test]
    fn minimal_document_gets_defaults() {
        let fixture = tls_fixture();
        let config = HubConfig::from_toml_str(&document(&fixture, "")).unwrap();

        assert_eq!(
            config.url.as_str(),
            "wss://cloudhub.example.com:10000/proj/edge-1/events"
        );
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.write_deadline, Duration::from_secs(15));
        assert_eq!(config.read_deadline(), None);
        assert_eq!(config.heartbeat, Duration::from_secs(15));
        assert_eq!(config.message_qps, 30.0);
        assert_eq!(config.message_burst, 60);
        assert!(!config.rotate_certificates);
        assert!(config.restart_policy.is_none());
        assert_eq!(config.sync_keeper_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let fixture = tls_fixture();
        let extra = r#"
heartbeat = 5
readDeadline = 20
messageQPS = 10
messageBurst = 3
rotateCertificates = true

[restartPolicy]
policy = "onFailure"
retries = 4
"#;
        let config = HubConfig::from_toml_str(&document(&fixture, extra)).unwrap();
        assert_eq!(config.heartbeat, Duration::from_secs(5));
        assert_eq!(config.read_deadline(), Some(Duration::from_secs(20)));
        assert_eq!(config.message_qps, 10.0);
        assert_eq!(config.message_burst, 3);
        assert!(config.rotate_certificates);
        assert_eq!(config.restart_policy.map(|p| p.retries), Some(4));
    }

    #[test]
    fn missing_node_name_is_rejected() {
        let fixture = tls_fixture();
        let text = document(&fixture, "").replace("nodeName = \"edge-1\"", "");
        let err = HubConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("nodeName")));
    }

    #[test]
    fn missing_tls_file_is_rejected() {
        let fixture = tls_fixture();
        std::fs::remove_file(&fixture.key).unwrap();
        let err = HubConfig::from_toml_str(&document(&fixture, "")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingTlsFile {
                key: "tlsPrivateKeyFile",
                ..
            }
        ));
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let fixture = tls_fixture();
        let err = HubConfig::from_toml_str(&document(&fixture, "heartbeat = 0")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "heartbeat", .. }));
    }

    #[test]
    fn vanishing_message_qps_is_rejected() {
        let fixture = tls_fixture();
        let err = HubConfig::from_toml_str(&document(&fixture, "messageQPS = 1e-30")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "messageQPS", .. }));

        let unlimited = HubConfig::from_toml_str(&document(&fixture, "messageQPS = 0")).unwrap();
        assert_eq!(unlimited.message_qps, 0.0);
    }

    #[test]
    fn unparsable_server_is_rejected() {
        let err = HubConfig::new("bad host:port", "proj", "edge-1").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn load_reads_from_disk() {
        let fixture = tls_fixture();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(document(&fixture, "").as_bytes()).unwrap();

        let config = HubConfig::load(file.path()).unwrap();
        assert_eq!(config.node_name, "edge-1");
        assert_eq!(config.tls.key_file, fixture.key);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = HubConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
