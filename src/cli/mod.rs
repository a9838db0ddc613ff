//! Command-line interface for Blockyard.

mod commands;

use clap::{Parser, Subcommand};

/// Blockyard - control plane for tenant Minecraft servers on Kubernetes
#[derive(Parser)]
#[command(name = "blockyard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API (default)
    Serve,

    /// Create default config file
    #[command(alias = "--init")]
    Init,

    /// Create an account directly in the database
    CreateUser {
        username: String,

        email: String,

        #[arg(long)]
        password: String,

        /// Grant every capability, including administration
        #[arg(long)]
        admin: bool,
    },
}

pub use commands::*;
