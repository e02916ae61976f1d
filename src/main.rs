use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use device_gateway::api::{ApiServer, WsEventSink, WsSenders};
use device_gateway::db;
use device_gateway::plugins::{AdapterIndex, ManifestIndex};
use device_gateway::security::Whitelist;
use device_gateway::{BrokerContext, Config};

/// Devgate - Local API gateway and event broker for device plugins
#[derive(Parser)]
#[command(name = "devgate", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "DEVGATE_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// Manage the origin whitelist
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },
    /// List installed plugins
    Plugins,
    /// Revoke every issued access token
    ResetTokens,
}

#[derive(Subcommand)]
enum WhitelistAction {
    /// Show whitelisted origins
    List,
    /// Allow an origin
    Add {
        /// Origin, e.g. `https://app.example.com`
        origin: String,
        /// Display title
        #[arg(short, long, default_value = "")]
        title: String,
    },
    /// Remove an origin by ID or origin text
    Remove { id_or_origin: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,device_gateway=info",
        1 => "info,device_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Whitelist { action } => whitelist(&config, action).await,
        Command::Plugins => {
            list_plugins(&config);
            Ok(())
        }
        Command::ResetTokens => {
            let pool = db::init(config.db_path())?;
            let clients = WsSenders::default();
            let ctx = BrokerContext::new(config, pool, Arc::new(WsEventSink::new(clients)))?;
            let revoked = ctx.reset_authorizations().await?;
            println!("Revoked {revoked} access token(s)");
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        require_origin = config.require_origin,
        block_origin = config.block_origin,
        local_oauth = config.local_oauth,
        "starting device gateway"
    );

    let pool = db::init(config.db_path())?;
    let clients = WsSenders::default();
    let sink = Arc::new(WsEventSink::new(Arc::clone(&clients)));

    let index = ManifestIndex::new(config.plugin_dirs.clone());
    let ctx = BrokerContext::new(config, pool, sink)?;
    ctx.discover_plugins(&index).await?;

    let plugins = ctx.registry().list().await;
    tracing::info!(count = plugins.len(), "plugins discovered");

    ApiServer::new(Arc::new(ctx), clients).run().await?;
    Ok(())
}

async fn whitelist(config: &Config, action: WhitelistAction) -> anyhow::Result<()> {
    let pool = db::init(config.db_path())?;
    let whitelist = Whitelist::load(pool)?;

    match action {
        WhitelistAction::List => {
            let entries = whitelist.list().await;
            if entries.is_empty() {
                println!("Whitelist is empty");
            }
            for entry in entries {
                println!("{}  {}  {}", entry.id, entry.origin, entry.title);
            }
        }
        WhitelistAction::Add { origin, title } => {
            let entry = whitelist.add(&origin, &title).await?;
            println!("Added {} ({})", entry.origin, entry.id);
        }
        WhitelistAction::Remove { id_or_origin } => {
            if whitelist.remove(&id_or_origin).await? {
                println!("Removed {id_or_origin}");
            } else {
                anyhow::bail!("no whitelist entry matches '{id_or_origin}'");
            }
        }
    }
    Ok(())
}

fn list_plugins(config: &Config) {
    let index = ManifestIndex::new(config.plugin_dirs.clone());
    let plugins = index.installed();
    if plugins.is_empty() {
        println!("No plugins installed");
        for dir in index.dirs() {
            println!("  searched: {}", dir.display());
        }
        return;
    }
    for plugin in plugins {
        println!(
            "{}  {}  sdk {}  [{}]",
            plugin.plugin_id,
            plugin.name,
            plugin.sdk_version,
            plugin.profiles.join(", ")
        );
    }
}
