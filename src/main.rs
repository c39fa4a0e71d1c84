use std::path::PathBuf;

use clap::Parser;

use bot_launcher::LaunchOptions;

#[derive(Debug, Parser)]
#[command(name = "bot-launcher", version, about = "Deploy and supervise chat bot instances")]
struct Cli {
    /// Configuration file (default: <data-dir>/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory (default: ~/.bot_launcher)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Keep instance records in memory only
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let options = LaunchOptions {
        config: cli.config,
        data_dir: cli.data_dir,
        host: cli.host,
        port: cli.port,
        ephemeral: cli.ephemeral,
    };

    if let Err(e) = bot_launcher::run(options).await {
        log::error!("{}", e);
        eprintln!("bot-launcher: {}", e);
        std::process::exit(1);
    }
}
