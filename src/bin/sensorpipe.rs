use clap::Parser;
use sensorpipe::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => commands::execute_serve(args).await?,
        Commands::Tail(args) => commands::execute_tail(args).await?,
        Commands::Sensors(args) => commands::execute_sensors(args).await?,
        Commands::Readings(args) => commands::execute_readings(args).await?,
        Commands::Simulate(args) => commands::execute_simulate(args).await?,
    }

    Ok(())
}
