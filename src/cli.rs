use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Parser)]
#[command(name = "coinsync")]
#[command(about = "Market data sync proxy CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server and background workers
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8888)]
        port: u16,
    },
    /// Fetch and print the current market snapshot
    Top {
        /// Number of rows to print
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

pub async fn run() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            commands::serve::run(port).await;
        }
        Commands::Top { limit } => {
            commands::top::run(limit).await;
        }
    }
}
