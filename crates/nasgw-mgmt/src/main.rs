use anyhow::Result;
use clap::Parser;
use nasgw_export::privilege::{drop_privileges, is_superuser};
use nasgw_mgmt::{build_backend, exit_code, Cli};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if !is_superuser() {
        anyhow::bail!("This program requires superuser privileges");
    }

    let config = cli.resolve_config()?;
    drop_privileges()?;

    let backend = build_backend(&config);
    tracing::info!("Invoking {}", cli.command.describe());
    if let Some(output) = cli.command.execute(&*backend)? {
        println!("{}", output);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli) {
        tracing::error!("{:#}", e);
        std::process::exit(exit_code(&e));
    }
}
