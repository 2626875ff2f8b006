//! Command-line surface

use clap::{ArgAction, Args, Parser, Subcommand};
use pmosiriusxm::{Channel, NowPlaying, Quality, Region};

#[derive(Debug, Parser)]
#[command(name = "PMOSiriusXM", version, about = "Local caching HLS proxy for SiriusXM")]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// SiriusXM username (falls back to the configuration)
    #[arg(short = 'U', long, env = "SXM_USERNAME", global = true)]
    pub username: Option<String>,

    /// SiriusXM password (falls back to the configuration)
    #[arg(
        short = 'P',
        long,
        env = "SXM_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub password: Option<String>,

    /// Account region: US or CA
    #[arg(short = 'r', long, env = "SXM_REGION", global = true)]
    pub region: Option<Region>,

    /// Stream quality: SMALL, MEDIUM or LARGE
    #[arg(short = 'q', long, env = "SXM_QUALITY", global = true)]
    pub quality: Option<Quality>,

    /// Enable debug logging
    #[arg(short = 'v', long, env = "SXM_DEBUG", global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(
        short = 'Q',
        long,
        env = "SXM_QUIET",
        global = true,
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the caching proxy
    #[command(disable_help_flag = true)]
    Server {
        /// Port to listen on (default from the configuration, 9999)
        #[arg(short = 'p', long, env = "SXM_PORT")]
        port: Option<u16>,

        /// IP address to bind to (default from the configuration, 127.0.0.1)
        #[arg(short = 'h', long, env = "SXM_HOST")]
        host: Option<String>,

        /// Do not pre-fetch segments of the active channel
        ///
        /// SXM_PRECACHE=false has the same effect.
        #[arg(
            short = 'n',
            long = "no-precache",
            env = "SXM_PRECACHE",
            action = ArgAction::SetFalse
        )]
        precache: bool,

        /// Print help
        #[arg(long, action = ArgAction::Help)]
        help: Option<bool>,
    },

    /// List the channels available to the account
    ListChannels,

    /// Show what is currently playing on a channel
    NowPlaying {
        /// Channel id, name or number
        channel: String,
    },
}

/// `ID | Num | Name` table with padded columns
pub fn format_channel_table(channels: &[Channel]) -> String {
    let id_width = channels.iter().map(|c| c.id.len()).max().unwrap_or(0).max(2);
    let num_width = channels
        .iter()
        .map(|c| c.channel_number.to_string().len())
        .max()
        .unwrap_or(0)
        .max(3);

    let mut lines = vec![format!("{:<id_width$} | {:<num_width$} | Name", "ID", "Num")];
    lines.extend(channels.iter().map(|c| {
        format!(
            "{:<id_width$} | {:<num_width$} | {}",
            c.id, c.channel_number, c.name
        )
    }));
    lines.join("\n")
}

pub fn format_now_playing(channel: &str, now_playing: &NowPlaying) -> String {
    let mut out = format!(
        "Currently playing on {}:\n  Title: {}\n  Artist: {}",
        channel, now_playing.title, now_playing.artist
    );
    if let Some(album) = &now_playing.album {
        out.push_str(&format!("\n  Album: {}", album));
    }
    out
}
