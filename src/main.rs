//! VoltKV server entry point: load configuration, set up logging, serve.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use voltkv::config::ServerConfig;
use voltkv::server;

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
        __     __    _ _   _  ____   __
        \ \   / /__ | | |_| |/ /\ \ / /
         \ \ / / _ \| | __| ' /  \ V /
          \ V / (_) | | |_| . \   | |
           \_/ \___/|_|\__|_|\_\  |_|

VoltKV v{} - In-Memory Key-Value Server with Transactions
─────────────────────────────────────────────────────────
Listening on {}
"#,
        voltkv::VERSION,
        config.address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("VoltKV version {}", voltkv::VERSION);
        return Ok(());
    }

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    // CONFIG env var, then ./redis.conf, then defaults
    let config = ServerConfig::resolve();
    print_banner(&config);

    server::run(config).await
}
