mod types;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use take_mut::take;
use thiserror::Error;
use tracing::{debug, info};

pub use self::types::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{key}` is not set")]
    Missing { key: &'static str },

    #[error("`{key}` is not a valid URL (`{value}`): {reason}")]
    InvalidUrl {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn default_poll_interval() -> Duration {
    Config::default().poll_interval
}

fn default_recency_window() -> Duration {
    Config::default().recency_window
}

fn default_max_post_length() -> usize {
    Config::default().max_post_length
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: PathBuf,

    #[serde(default)]
    pub feed_url: String,

    #[serde(default)]
    pub instance_url: String,

    #[serde(default)]
    pub access_token: String,

    pub user_agent: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,

    #[serde(default = "default_recency_window")]
    pub recency_window: Duration,

    #[serde(default = "default_max_post_length")]
    pub max_post_length: usize,
}

impl Config {
    pub fn update(&mut self, args: &crate::cli::Args) {
        fn set_if_some<T: Clone>(dst: &mut T, v: &Option<T>) {
            if let Some(v) = v {
                *dst = v.clone();
            }
        }

        set_if_some(&mut self.bind_addr, &args.bind_addr);
        set_if_some(&mut self.db_path, &args.db_path);
        set_if_some(&mut self.feed_url, &args.feed_url);
        set_if_some(&mut self.instance_url, &args.instance_url);
        set_if_some(&mut self.access_token, &args.access_token);
    }

    pub fn resolve_relative_paths(&mut self, config_dir: impl AsRef<Path>) {
        let config_dir = config_dir.as_ref();

        // spelled out so that a new field can't be forgotten here.
        take(self, |this| Self {
            bind_addr: this.bind_addr,
            db_path: config_dir.join(&this.db_path),
            feed_url: this.feed_url,
            instance_url: this.instance_url,
            access_token: this.access_token,
            user_agent: this.user_agent,
            poll_interval: this.poll_interval,
            recency_window: this.recency_window,
            max_post_length: this.max_post_length,
        })
    }

    pub fn feed_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("feed-url", &self.feed_url)
    }

    pub fn instance_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("instance-url", &self.instance_url)
    }

    pub fn access_token(&self) -> Result<&str, ConfigError> {
        match self.access_token.trim() {
            "" => Err(ConfigError::Missing {
                key: "access-token",
            }),
            token => Ok(token),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:20655".into(),
            db_path: "./tootfeed.sqlite3".into(),
            feed_url: String::new(),
            instance_url: String::new(),
            access_token: String::new(),
            user_agent: None,
            poll_interval: Duration::from_secs(600),
            recency_window: Duration::from_secs(1800),
            max_post_length: 500,
        }
    }
}

fn parse_http_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ConfigError::Missing { key });
    }

    let invalid = |reason: String| ConfigError::InvalidUrl {
        key,
        value: value.into(),
        reason,
    };
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme `{scheme}`"))),
    }
}

pub fn load(search_paths: &[PathBuf]) -> Result<Config> {
    for path in search_paths {
        debug!("Trying to load {}", path.display());
        let mut contents = String::new();

        {
            let mut f = match File::open(path) {
                Ok(f) => f,

                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File not found, skipping");
                    continue;
                }

                Err(e) => {
                    return Err(e)
                        .context(anyhow!("could not load a config file `{}`", path.display()));
                }
            };

            f.read_to_string(&mut contents).with_context(|| {
                anyhow!(
                    "could not read the contents of a config file `{}`",
                    path.display()
                )
            })?;
        }

        let mut cfg: Config = toml::from_str(&contents)
            .with_context(|| anyhow!("could not load the config file `{}`", path.display()))?;

        if let Some(parent) = path.parent() {
            cfg.resolve_relative_paths(parent);
        }

        info!("Loaded a config file `{}`", path.display());

        return Ok(cfg);
    }

    info!("Using the default config");

    Ok(Default::default())
}
