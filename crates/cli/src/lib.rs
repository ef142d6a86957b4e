pub mod commands;
pub mod transcript;

use std::path::PathBuf;
use std::process::ExitCode;

use betweenus_core::config::ReasonerKind;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "betweenus",
    about = "BetweenUs operator CLI",
    long_about = "Inspect BetweenUs configuration, check readiness, and run mediations over transcript files.",
    after_help = "Examples:\n  betweenus doctor --json\n  betweenus config\n  betweenus mediate --transcript thread.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack credentials, reasoner and tool readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one mediation over a JSON transcript without Slack")]
    Mediate {
        #[arg(long, help = "Path to a transcript file")]
        transcript: PathBuf,
        #[arg(long, help = "Request text, as if typed after the bot mention")]
        request: Option<String>,
        #[arg(long, value_enum, help = "Reasoner to use (default: heuristic)")]
        reasoner: Option<ReasonerArg>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReasonerArg {
    Heuristic,
    Llm,
}

impl From<ReasonerArg> for ReasonerKind {
    fn from(value: ReasonerArg) -> Self {
        match value {
            ReasonerArg::Heuristic => ReasonerKind::Heuristic,
            ReasonerArg::Llm => ReasonerKind::Llm,
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Mediate { transcript, request, reasoner, json } => {
            commands::mediate::run(commands::mediate::MediateArgs {
                transcript: &transcript,
                request: request.as_deref(),
                reasoner: reasoner.map(ReasonerKind::from),
                json,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
