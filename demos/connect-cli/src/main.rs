//! Command-line wallet session.
//!
//! Connects to a Coin98 relay, prints (and optionally opens) the wallet deep
//! links, and sends one request once the wallet has accepted the session.
//!
//!   coin98-connect --relay wss://relay.example --name "My dapp" eth_accounts
//!   coin98-connect --config connect.toml --variant native --open sol_signMessage '["hello"]'

mod opener;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use coin98_connect_client::{
    ClientConfig, ConnectOptions, HostCallbackTransport, NativeLinkTransport, RelaySocketTransport,
    SessionController, Variant,
};
use coin98_connect_core::{ConnectError, FileSessionStore, Param};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VariantArg {
    Web,
    Native,
    Lite,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Web => Variant::Web,
            VariantArg::Native => Variant::Native,
            VariantArg::Lite => Variant::Lite,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "coin98-connect")]
#[command(about = "Open a Coin98 wallet session and send one request")]
struct Args {
    /// Relay base URL
    #[arg(long, env = "COIN98_RELAY_URL")]
    relay: Option<String>,

    /// TOML client config; flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    variant: Option<VariantArg>,

    /// Chain namespace for the session
    #[arg(long, default_value = "ether")]
    chain: String,

    /// Dapp name shown by the wallet
    #[arg(long, default_value = "coin98-connect")]
    name: String,

    #[arg(long)]
    page_url: Option<String>,

    #[arg(long)]
    callback_url: Option<String>,

    /// Persist the session record in this directory
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Hand deep links to the OS opener instead of only printing them
    #[arg(long)]
    open: bool,

    /// Method to call after connecting
    method: Option<String>,

    /// JSON array of params for the method
    params: Option<String>,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match (&self.config, &self.relay) {
            (Some(path), _) => ClientConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            (None, Some(relay)) => ClientConfig::new(relay.clone()),
            (None, None) => anyhow::bail!("either --relay or --config is required"),
        };
        if let (Some(_), Some(relay)) = (&self.config, &self.relay) {
            config.relay_url = relay.clone();
        }
        if let Some(variant) = self.variant {
            config.variant = variant.into();
        }
        if self.page_url.is_some() {
            config.page_url = self.page_url.clone();
        }
        if self.callback_url.is_some() {
            config.callback_url = self.callback_url.clone();
        }
        Ok(config)
    }

    fn params(&self) -> Result<Vec<Param>> {
        let Some(raw) = &self.params else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(raw).context("params must be JSON")? {
            Value::Array(items) => Ok(items.into_iter().map(Param::Json).collect()),
            other => Ok(vec![Param::Json(other)]),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("coin98_connect=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = args.client_config()?;
    let params = args.params()?;
    let variant = config.variant;
    tracing::info!(relay = %config.relay_url, ?variant, "starting session");

    let open = args.open;
    let show = move |link: &str| -> Result<(), ConnectError> {
        println!("{link}");
        if open {
            opener::open(link)?;
        }
        Ok(())
    };
    let mut builder = SessionController::builder(config);
    builder = match variant {
        Variant::Web => builder.transport(RelaySocketTransport::new(show)),
        Variant::Native => builder.transport(NativeLinkTransport::new(show)),
        Variant::Lite => builder.transport(HostCallbackTransport::new(move |link| {
            if let Err(e) = show(link) {
                tracing::warn!("failed to present link: {}", e);
            }
        })),
    };
    if let Some(dir) = &args.session_dir {
        builder = builder.session_store(FileSessionStore::in_dir(dir));
    }
    let client = builder.build()?;

    if args.session_dir.is_some() {
        if let Some(record) = client.restore()? {
            tracing::info!(chain = %record.chain, "found a previous session record");
        }
    }

    let options = ConnectOptions {
        callback_url: args.callback_url.clone(),
        ..ConnectOptions::named(args.name.clone())
    };
    let session = client.connect(&args.chain, options).await?;
    tracing::info!(identity = %session.identity, "wallet connected");

    if let Some(method) = &args.method {
        let response = client.request_named(method, params).await?;
        println!("{}", serde_json::to_string_pretty(&response.into_value())?);
    }

    client.disconnect().await;
    Ok(())
}
