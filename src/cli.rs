use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ream-bully - bully leader election over TCP
#[derive(Parser, Debug)]
#[command(name = "ream-bully")]
#[command(version)]
#[command(about = "Group member that elects a leader with the bully algorithm")]
#[command(long_about = "
Each node joins a group through a directory process, then elects the member
with the largest (rank, tiebreak) key as leader. Followers probe the leader
and re-elect when it stops answering.

Usage examples:
  ream-bully directory 50600
  ream-bully node localhost 50600 0 1234567 05-14
  ream-bully node localhost 50600 0 2345678 11-02 --simulate-failures
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available commands for the ream-bully CLI
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a group member
    Node {
        /// Directory host
        #[arg(value_name = "GCD_HOST")]
        gcd_host: String,

        /// Directory port
        #[arg(value_name = "GCD_PORT")]
        gcd_port: u16,

        /// Port to listen on for peers (0 picks a free port)
        #[arg(value_name = "LISTEN_PORT")]
        listen_port: u16,

        /// Identifier breaking ties between equal ranks
        #[arg(value_name = "TIEBREAK")]
        tiebreak: u64,

        /// Birthday as MM-DD; rank is the number of days until it
        #[arg(value_name = "BIRTHDAY")]
        birthday: String,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Host to bind the peer listener on
        #[arg(long, default_value = "127.0.0.1")]
        listen_host: String,

        /// Do not probe the leader
        #[arg(long)]
        no_probe: bool,

        /// Periodically simulate crashes
        #[arg(long)]
        simulate_failures: bool,
    },

    /// Run the directory nodes join through
    Directory {
        /// Port to listen on
        #[arg(value_name = "PORT")]
        port: u16,

        /// Host to bind on
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}
