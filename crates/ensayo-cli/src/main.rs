//! Ensayo CLI: pair as requester, answer as responder, local demo.

#![forbid(unsafe_code)]

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use ensayo_bridge::{
    AccountsHandler, BridgeClient, BridgeConfig, MemoryRelay, Responder, SessionEvent,
    SessionEvents, WsConnector,
};
use ensayo_common::{PairingDescriptor, PeerMetadata};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ensayo")]
#[command(about = "Encrypted request/response bridge over an untrusted relay")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct Common {
    /// JSON config file; flags override its values
    #[arg(short, long, env = "ENSAYO_CONFIG")]
    config: Option<PathBuf>,

    /// Relay WebSocket URL
    #[arg(short, long, env = "ENSAYO_RELAY_URL")]
    relay: Option<String>,

    /// Display name announced to the peer
    #[arg(short, long, env = "ENSAYO_NAME")]
    name: Option<String>,
}

impl Common {
    fn load(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(relay) = &self.relay {
            config.relay_url = relay.clone();
        }
        if let Some(name) = &self.name {
            config.metadata.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a session as requester and ask the responder for its accounts
    Pair {
        #[command(flatten)]
        common: Common,

        /// URL announced in the pairing descriptor
        #[arg(long)]
        url: Option<String>,

        /// Icon announced in the pairing descriptor
        #[arg(long)]
        icon: Option<String>,

        /// Seconds to wait for the responder at each step
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },

    /// Answer a pairing URI as responder
    Respond {
        #[command(flatten)]
        common: Common,

        /// Pairing URI shown by the requester
        #[arg(short, long)]
        uri: String,

        /// Account to expose (repeatable)
        #[arg(short, long = "account")]
        accounts: Vec<String>,
    },

    /// Run requester and responder in-process over a local relay
    Demo {
        /// Account the demo responder exposes (repeatable)
        #[arg(short, long = "account", default_value = "ADDR1")]
        accounts: Vec<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    ensayo_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Pair {
            common,
            url,
            icon,
            timeout,
        } => {
            let mut config = common.load()?;
            config.metadata.url = url.or(config.metadata.url);
            config.metadata.icon = icon.or(config.metadata.icon);

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(pair(config, Duration::from_secs(timeout)))?;
        }
        Command::Respond {
            common,
            uri,
            accounts,
        } => {
            let config = common.load()?;
            let descriptor = PairingDescriptor::parse_with_scheme(&uri, &config.pairing_scheme)
                .context("invalid pairing URI")?;

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(respond(config, descriptor, accounts))?;
        }
        Command::Demo { accounts } => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(demo(accounts))?;
        }
        Command::Version => {
            println!("ensayo {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn pair(config: BridgeConfig, step_timeout: Duration) -> Result<()> {
    let connector = Arc::new(WsConnector::new(config.relay_url.clone()));
    let (client, mut events) = BridgeClient::new(config, connector)?;

    let descriptor = client.connect()?;
    println!("Pairing URI:\n{}", descriptor.to_uri());

    tokio::time::timeout(step_timeout, wait_established(&mut events))
        .await
        .map_err(|_| anyhow!("no responder within {:?}", step_timeout))??;

    let accounts = client
        .request_with_timeout(
            ensayo_common::METHOD_REQUEST_ACCOUNTS,
            json!({}),
            step_timeout,
        )
        .await?;
    println!("Accounts: {}", accounts);

    client.disconnect();
    Ok(())
}

async fn respond(
    config: BridgeConfig,
    descriptor: PairingDescriptor,
    accounts: Vec<String>,
) -> Result<()> {
    let connector = WsConnector::new(config.relay_url.clone());
    let mut responder = Responder::pair(&descriptor, &connector, &config)?;
    println!(
        "Paired with {} (session {})",
        descriptor.metadata.name, descriptor.session_id
    );

    responder.accept_session(json!({ "accounts": accounts }))?;
    let served = responder.serve(&AccountsHandler::new(accounts)).await?;
    println!("Session closed after {} request(s)", served);
    Ok(())
}

async fn demo(accounts: Vec<String>) -> Result<()> {
    let relay = MemoryRelay::new();
    let requester = BridgeConfig::default().with_metadata(PeerMetadata {
        name: "Ensayo demo".into(),
        url: Some("https://example.invalid".into()),
        icon: None,
    });
    let (client, mut events) = BridgeClient::new(requester, Arc::new(relay.clone()))?;

    let descriptor = client.connect()?;
    println!("Pairing URI:\n{}", descriptor.to_uri());

    let wallet = BridgeConfig::default().with_metadata(PeerMetadata::named("Ensayo wallet"));
    let mut responder = Responder::pair(&descriptor, &relay, &wallet)?;
    wait_established(&mut events).await?;

    let server = tokio::spawn(async move {
        let handler = AccountsHandler::new(accounts);
        responder.serve(&handler).await
    });

    let accounts = client.request_accounts().await?;
    println!("Accounts: {}", accounts.join(", "));

    match client.sign_transactions(vec!["dHgx".into()]).await {
        Ok(signed) => println!("Signed: {}", signed.join(", ")),
        Err(e) => println!("Signing refused: {}", e),
    }

    client.disconnect();
    relay.shutdown_session(&descriptor.session_id, "demo finished");
    let served = server.await??;
    info!("demo responder answered {} request(s)", served);
    Ok(())
}

async fn wait_established(events: &mut SessionEvents) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Established { peer } => {
                let name = peer.metadata.map(|m| m.name).unwrap_or_default();
                println!("Session established with {}", name);
                return Ok(());
            }
            SessionEvent::Disconnected { reason } => bail!("session ended: {}", reason),
            SessionEvent::Error(e) => info!("session error: {}", e),
            _ => {}
        }
    }
    bail!("event stream closed")
}
