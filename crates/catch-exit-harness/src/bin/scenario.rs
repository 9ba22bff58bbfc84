//! CLI entrypoint for catch-exit scenarios.

use clap::{Parser, Subcommand};

use catch_exit_harness::{Scenario, expectations, run};

/// Runs catch-exit guard scenarios inside a real process.
#[derive(Debug, Parser)]
#[command(name = "catch-exit-scenario")]
#[command(about = "Exercise catch-exit guards across process teardown")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one scenario. The process usually ends inside the scenario.
    Run {
        #[arg(value_enum)]
        scenario: Scenario,
    },
    /// Print every scenario's expected stdout and exit status as JSON.
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { scenario } => run(scenario)?,
        Command::List => {
            let body = serde_json::to_string_pretty(&expectations())?;
            println!("{body}");
        }
    }

    Ok(())
}
