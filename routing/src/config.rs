use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("bad peer entry '{0}', expected 'dcid,URL'")]
    BadPeer(String),

    #[error("bad update time '{0}', expected 'HH:MM'")]
    BadUpdateTime(String),
}

/// A peer routing service, written as `dcid,URL` in the configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Peer {
    pub dcid: String,
    pub url: String,
}

impl Peer {
    fn parse(raw: &str) -> Result<Peer, ConfigError> {
        let (dcid, url) = raw
            .split_once(',')
            .ok_or_else(|| ConfigError::BadPeer(raw.to_string()))?;
        let (dcid, url) = (dcid.trim(), url.trim());
        if dcid.is_empty() || url.is_empty() {
            return Err(ConfigError::BadPeer(raw.to_string()));
        }
        Ok(Peer {
            dcid: dcid.to_string(),
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

impl<'de> Deserialize<'de> for Peer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Peer::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Deserialize, Debug)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct ServiceConfig {
    /// Endpoint advertised to peers and clients.
    pub baseurl: String,

    /// The locally authored routing document; the snapshot file lives next to
    /// it.
    pub routing_file: PathBuf,

    /// This center's descriptor JSON, served on `/dc`.
    pub datacenter_file: Option<PathBuf>,

    /// Peer routing services to pull during a harvest.
    #[serde(default)]
    pub synchronize: Vec<Peer>,

    // Both historical spellings of the overlap flag are accepted.
    #[serde(default, alias = "allowoverlap", alias = "allowOverlaps")]
    pub allow_overlap: bool,

    /// Log level name fed to the subscriber's filter.
    pub verbosity: Option<String>,

    /// `HH:MM` instants at which the refresh worker re-harvests.
    #[serde(default)]
    pub update_time: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    pub service: ServiceConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for instant in &self.service.update_time {
            if chrono::NaiveTime::parse_from_str(instant, "%H:%M").is_err() {
                return Err(ConfigError::BadUpdateTime(instant.clone()));
            }
        }
        Ok(())
    }
}
