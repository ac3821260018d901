use std::{io::ErrorKind, path::Path, time::Duration};

use getset::Getters;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs::read_to_string;
use tracing::debug;

use crate::session::Timeouts;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Getters)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// `host:port` or `ws://` URL of the signaling server. Without one the
    /// offer and answer are relayed by hand.
    #[getset(get = "pub")]
    signaling_address: Option<String>,
    stun_server: Option<String>,
    gather_timeout_secs: u64,
    answer_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_address: None,
            stun_server: Some(DEFAULT_STUN_SERVER.to_owned()),
            gather_timeout_secs: 30,
            answer_timeout_secs: 300,
        }
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reads `path`, falling back to the defaults when it does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let text = match read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{} not found, using defaults", path_str);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path_str,
                    source,
                })
            }
        };
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })
    }

    pub fn with_signaling_address(mut self, address: Option<String>) -> Self {
        if address.is_some() {
            self.signaling_address = address;
        }
        self
    }

    pub fn with_stun_server(mut self, stun_server: Option<String>) -> Self {
        if stun_server.is_some() {
            self.stun_server = stun_server;
        }
        self
    }

    /// The single STUN server to use, if any. An empty value disables it.
    pub fn ice_server(&self) -> Option<&str> {
        self.stun_server
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts::new(
            Duration::from_secs(self.gather_timeout_secs),
            Duration::from_secs(self.answer_timeout_secs),
        )
    }
}
