pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tabula_core::flows::QuestionCategory;

#[derive(Debug, Parser)]
#[command(
    name = "tabula",
    about = "Tabula question-answering CLI",
    long_about = "Ask questions about the commerce sheets, inspect configuration and check readiness.",
    after_help = "Examples:\n  tabula ask \"top 5 artists in Japan over the last 7 days\"\n  tabula config\n  tabula doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Answer one question and print the JSON response")]
    Ask(AskArgs),
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Validate config, schema registry, agent graph and data source")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Clone, Debug, Default, clap::Args)]
pub struct AskArgs {
    #[arg(help = "Question in natural language")]
    pub query: String,
    #[arg(long, help = "Conversation session id")]
    pub session: Option<String>,
    #[arg(long, value_parser = parse_category, help = "Skip classification and use this category")]
    pub category: Option<QuestionCategory>,
    #[arg(long, help = "Pin today's date (YYYY-MM-DD) for relative periods")]
    pub today: Option<NaiveDate>,
    #[arg(long, help = "JSON fixture to answer from instead of the configured source")]
    pub data: Option<PathBuf>,
}

fn parse_category(value: &str) -> Result<QuestionCategory, String> {
    value.parse()
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Ask(args) => commands::ask::run(&args),
        Command::Config => commands::CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
