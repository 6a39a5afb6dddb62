use clap::ValueHint;

use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Path to the config file.
    ///
    /// By default, tootfeed looks for a file named `tootfeed.toml` in the following directories
    /// (in order):
    ///
    /// - `./` (the current directory)
    /// - `/etc`
    #[arg(
        short,
        env = "TOOTFEED_CONFIG",
        value_hint(ValueHint::FilePath)
    )]
    pub config_path: Option<PathBuf>,

    /// Address the liveness endpoint binds to.
    #[arg(long, env = "TOOTFEED_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Path to the database file holding the last published link.
    #[arg(long, env = "TOOTFEED_DB", value_hint(ValueHint::FilePath))]
    pub db_path: Option<PathBuf>,

    /// URL of the RSS feed to poll.
    #[arg(long, env = "TOOTFEED_FEED_URL", value_hint(ValueHint::Url))]
    pub feed_url: Option<String>,

    /// Base URL of the instance to post to.
    #[arg(long, env = "TOOTFEED_INSTANCE_URL", value_hint(ValueHint::Url))]
    pub instance_url: Option<String>,

    /// Bearer token used to create statuses.
    #[arg(long, env = "TOOTFEED_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Run a single polling cycle and exit.
    #[arg(long)]
    pub once: bool,
}

impl Args {
    pub fn parse() -> Self {
        clap::Parser::parse()
    }
}
