use clap::{CommandFactory, Parser};
use colored::*;
use tracing_subscriber::EnvFilter;

use live_event_relay::cli::{Args, Command};
use live_event_relay::config::RelayConfig;
use live_event_relay::connector::factory_for;
use live_event_relay::error::RelayError;
use live_event_relay::{watch, web};

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    if let Err(e) = run(args).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), RelayError> {
    let mut config = RelayConfig::load(args.config.as_deref())?;

    match args.into_command() {
        Command::Serve(serve) => {
            config.apply_serve(&serve)?;
            let factory = factory_for(&config.upstream);
            web::serve(&config, factory).await
        }
        Command::Watch(watch_args) => {
            config.apply_watch(&watch_args)?;
            watch::watch(&watch_args, &config.presentation).await
        }
        Command::Status(status) => {
            let report = watch::query_status(&status.url).await?;
            println!(
                "{} {}  {} {}",
                "status:".bold(),
                report.status.bright_green(),
                "connections:".bold(),
                report.connections
            );
            Ok(())
        }
        Command::Completions { shell } => {
            let mut cmd = Args::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}
