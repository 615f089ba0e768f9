use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use streamgate::FormatTag;

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify which stream candidates of a media item are playable")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[arg(long, global = true, env = "STREAMGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Proxy URL (http://, https:// or socks5://)
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    #[arg(long, global = true, requires = "proxy")]
    pub proxy_username: Option<String>,

    #[arg(long, global = true, requires = "proxy")]
    pub proxy_password: Option<String>,

    /// Deadline for all probes of one media item, in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Maximum number of probes in flight per media item
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify the candidates of one or more media descriptors
    Verify {
        /// Descriptor document (JSON object or array). Reads stdin when omitted or `-`
        input: Option<PathBuf>,

        /// Only verify the descriptor with this identifier
        #[arg(long)]
        id: Option<String>,

        /// Cookies sent with every probe, e.g. "SID=abc; HSID=xyz"
        #[arg(long)]
        cookies: Option<String>,

        /// Preferred formats, best first (e.g. 37,22,18,live)
        #[arg(long, value_delimiter = ',')]
        prefer: Vec<FormatTag>,

        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Show or reset the configuration file
    Config {
        #[arg(long)]
        show: bool,

        #[arg(long)]
        reset: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Json,
    JsonCompact,
}
