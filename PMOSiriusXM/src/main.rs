mod cli;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use cli::{Cli, Command, CommonArgs, format_channel_table, format_now_playing};
use pmoconfig::{Config, get_config};
use pmoserver::{LoggingOptions, ServerBuilder, init_logging};
use pmosiriusxm::{
    Channel, Error, NowPlayingError, SiriusXmApi, SiriusXmClient, SiriusXmConfigExt, SiriusXmExt,
    parse_now_playing,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(LoggingOptions::from_flags(cli.common.verbose, cli.common.quiet));

    let config = get_config();
    let client = build_client(&config, &cli.common)?;

    match cli.command {
        Command::Server {
            port,
            host,
            precache,
            ..
        } => run_server(&config, client, port, host, precache).await,
        Command::ListChannels => list_channels(&client).await,
        Command::NowPlaying { channel } => now_playing(&client, &channel).await,
    }
}

/// Builds the upstream client from the command line, then the configuration
///
/// Credentials given on the command line are saved for later runs.
fn build_client(config: &Config, args: &CommonArgs) -> Result<SiriusXmClient> {
    let username = match &args.username {
        Some(username) => {
            if let Err(e) = config.set_siriusxm_username(username) {
                warn!("Could not save the username: {}", e);
            }
            Some(username.clone())
        }
        None => config.get_siriusxm_username()?,
    };

    let password = match &args.password {
        Some(password) => {
            if let Err(e) = config.set_siriusxm_password(password) {
                warn!("Could not save the password: {}", e);
            }
            Some(password.clone())
        }
        None => config.get_siriusxm_password()?,
    };

    let (Some(username), Some(password)) = (username, password) else {
        bail!(
            "SiriusXM credentials missing: pass --username/--password, \
             set SXM_USERNAME/SXM_PASSWORD, or store them under sources.siriusxm in {}",
            config.config_dir_path()
        );
    };

    let region = match args.region {
        Some(region) => region,
        None => config.get_siriusxm_region()?,
    };
    let quality = match args.quality {
        Some(quality) => quality,
        None => config.get_siriusxm_quality()?,
    };

    SiriusXmClient::builder()
        .credentials(username, password)
        .region(region)
        .quality(quality)
        .build()
        .context("Failed to create the SiriusXM client")
}

async fn run_server(
    config: &Config,
    client: SiriusXmClient,
    port: Option<u16>,
    host: Option<String>,
    precache: bool,
) -> Result<()> {
    match client.authenticate().await {
        Ok(true) => info!("Authenticated with SiriusXM"),
        Ok(false) => {
            error!("SiriusXM rejected the credentials");
            bail!("authentication failed");
        }
        Err(e) => {
            error!("Could not reach SiriusXM: {}", e);
            return Err(anyhow!(e).context("authentication failed"));
        }
    }

    let mut settings = config.get_siriusxm_proxy_settings()?;
    if !precache {
        settings.precache = false;
    }

    let mut builder = ServerBuilder::new_configured();
    if let Some(port) = port {
        builder = builder.http_port(port);
    }
    if let Some(host) = host {
        builder = builder.bind_address(host);
    }
    let mut server = builder.build();

    server.init_siriusxm(Arc::new(client), settings).await?;
    server.start().await?;

    let info = server.info();
    info!(
        "Playlists available at http://{}:{}/<channel>.m3u8",
        info.bind_address, info.http_port
    );

    server.wait().await;
    Ok(())
}

async fn list_channels(client: &SiriusXmClient) -> Result<()> {
    let channels: Vec<Channel> = client
        .get_channels()
        .await?
        .into_iter()
        .filter_map(|raw| match serde_json::from_value(raw) {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("Skipping malformed channel entry: {}", e);
                None
            }
        })
        .collect();

    if channels.is_empty() {
        bail!("No channel available for this account");
    }

    println!("{}", format_channel_table(&channels));
    Ok(())
}

async fn now_playing(client: &SiriusXmClient, identifier: &str) -> Result<()> {
    let channel = client
        .get_channel(identifier)
        .await?
        .ok_or_else(|| Error::ChannelNotFound(identifier.to_string()))?;

    let envelope = client
        .get_now_playing(&channel)
        .await?
        .ok_or_else(|| anyhow!("Could not get live channel data for {}", identifier))?;

    let now_ms = chrono::Utc::now().timestamp_millis();
    let now_playing = match parse_now_playing(&channel.id, &envelope, now_ms) {
        Ok(now_playing) => now_playing,
        Err(e @ NowPlayingError::Unavailable { .. }) => return Err(e.into()),
        Err(e) => {
            return Err(anyhow!(e).context(format!("Could not get the latest cut for {}", identifier)));
        }
    };

    println!("{}", format_now_playing(identifier, &now_playing));
    Ok(())
}
