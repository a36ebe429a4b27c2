use crate::cli::Commands;
use crate::config::load_config;
use crate::error::{BullyError, BullyResult};
use crate::p2p::{self, BullyNode, NetworkConfig, NodeConfig, P2PError};
use colored::*;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

pub fn execute_command(command: Commands, debug: bool, verbose: bool) -> BullyResult<()> {
    match command {
        Commands::Node {
            gcd_host,
            gcd_port,
            listen_port,
            tiebreak,
            birthday,
            config,
            listen_host,
            no_probe,
            simulate_failures,
        } => {
            let options = NodeOptions {
                gcd_host,
                gcd_port,
                listen_host,
                listen_port,
                config,
                no_probe,
                simulate_failures,
            };
            let config = options.into_config()?;
            execute_node(config, &birthday, tiebreak, debug, verbose)
        }
        Commands::Directory { port, host } => execute_directory(&host, port, verbose),
    }
}

/// Command-line values that override the configuration file
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub gcd_host: String,
    pub gcd_port: u16,
    pub listen_host: String,
    pub listen_port: u16,
    pub config: Option<PathBuf>,
    pub no_probe: bool,
    pub simulate_failures: bool,
}

impl NodeOptions {
    pub fn into_config(self) -> BullyResult<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => NodeConfig::default(),
        };

        config.directory_address = format!("{}:{}", self.gcd_host, self.gcd_port);
        config.listen_address = resolve(&self.listen_host, self.listen_port)?;
        if self.no_probe {
            config.probe.enabled = false;
        }
        if self.simulate_failures {
            config.fault_injection.enabled = true;
        }
        config.validate()?;
        Ok(config)
    }
}

fn resolve(host: &str, port: u16) -> BullyResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| P2PError::Configuration(format!("cannot resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| P2PError::Configuration(format!("{} resolved to no address", host)).into())
}

fn runtime() -> BullyResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BullyError::Other(format!("Failed to create async runtime: {}", e)))
}

fn execute_node(config: NodeConfig, birthday: &str, tiebreak: u64, debug: bool, verbose: bool) -> BullyResult<()> {
    if verbose {
        println!("{} Directory: {}", "Info:".bright_blue().bold(), config.directory_address);
        println!("  Listen: {}", config.listen_address);
        println!("  Probing: {}", config.probe.enabled);
        println!("  Simulated failures: {}", config.fault_injection.enabled);
    }
    if debug {
        println!("{} {:#?}", "Debug:".bright_yellow().bold(), config);
    }

    runtime()?.block_on(run_node(config, birthday, tiebreak, verbose))
}

async fn run_node(config: NodeConfig, birthday: &str, tiebreak: u64, verbose: bool) -> BullyResult<()> {
    let node = p2p::start_node(birthday, tiebreak, config).await?;
    println!(
        "{} Node {} listening on {}",
        "Success:".bright_green().bold(),
        node.local_key(),
        node.local_addr()
    );

    wait_for_interrupt().await?;
    report(&node, verbose).await;
    node.shutdown().await;
    Ok(())
}

fn execute_directory(host: &str, port: u16, verbose: bool) -> BullyResult<()> {
    let addr = resolve(host, port)?;

    runtime()?.block_on(run_directory(addr, verbose))
}

async fn run_directory(addr: SocketAddr, verbose: bool) -> BullyResult<()> {
    let directory = p2p::start_directory(addr, NetworkConfig::default()).await?;
    println!("{} Directory listening on {}", "Success:".bright_green().bold(), directory.local_addr());

    wait_for_interrupt().await?;
    if verbose {
        println!("{} Members: {}", "Info:".bright_blue().bold(), directory.members().await);
    }
    directory.shutdown().await;
    Ok(())
}

async fn wait_for_interrupt() -> BullyResult<()> {
    tokio::signal::ctrl_c().await?;
    println!("{} Interrupted, shutting down", "Info:".bright_blue().bold());
    Ok(())
}

async fn report(node: &BullyNode, verbose: bool) {
    match node.leader() {
        Some(leader) => println!("{} Last known leader: {}", "Info:".bright_blue().bold(), leader),
        None => println!("{} No leader known", "Info:".bright_blue().bold()),
    }
    if verbose {
        println!("{} {:#?}", "Stats:".bright_blue().bold(), node.stats().await);
    }
}
