//! # espcraft CLI
//!
//! Command-line front end for the ESP32 component compatibility assistant.
//!
//! Usage:
//!   espcraft [chat]
//!   espcraft run <message>...
//!   espcraft prompts
//!
//! Examples:
//!   espcraft
//!   espcraft --provider ollama --model llama3 chat
//!   espcraft run "#### bme280, ssd1306, mpu6050 #### #### i2c ####" "no"
//!   espcraft --tier powerful --stream run "#### mfrc522, st7735 #### #### spi ####" "yes" "proceed"

use clap::{ArgAction, Parser, Subcommand};
use espcraft_agent::{Advance, Agent, AgentConfig, ProviderCaller, StepOutput};
use espcraft_core::prompts;
use espcraft_core::{
    AppConfig, ConversationState, Error, LlmProvider, Overrides, Provider, Result, Step,
    ValidationReport,
};
use std::io::Write;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Attempts per step in `run` mode when the error is retryable
const MAX_ATTEMPTS: usize = 3;

type CliAgent = Agent<ProviderCaller<Provider>>;

#[derive(Parser)]
#[command(name = "espcraft")]
#[command(author, version, about = "espcraft - ESP32 component compatibility assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Model provider: groq, openai, anthropic, ollama
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Explicit model id (overrides --tier)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Groq model preset: fast, balanced, powerful
    #[arg(long, global = true)]
    tier: Option<String>,

    /// API base URL override
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Model call timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Print model replies as they stream in
    #[arg(long, global = true)]
    stream: bool,

    /// Session ID
    #[arg(short, long, global = true, default_value = "default")]
    session: String,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show model replies
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation on stdin (default)
    Chat,
    /// Scripted conversation; each message answers the next question
    Run {
        /// Messages in order: components, review answer, review decision
        #[arg(trailing_var_arg = true, required = true)]
        messages: Vec<String>,
    },
    /// Show the system prompt and per-step instructions
    Prompts,
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "espcraft=error",
        (false, 0) => "espcraft=warn",
        (false, 1) => "espcraft=info",
        (false, _) => "espcraft=debug",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn build_agent(cli: &Cli) -> Result<CliAgent> {
    let overrides = Overrides {
        provider: cli.provider.clone(),
        model: cli.model.clone(),
        tier: cli.tier.clone(),
        base_url: cli.base_url.clone(),
        timeout_secs: cli.timeout,
    };
    let config = AppConfig::from_env(&overrides)?;
    let provider = Provider::from_config(config.provider.clone())?;

    tracing::info!(
        provider = provider.name(),
        model = provider.default_model(),
        temperature = config.temperature,
        timeout = ?config.call_timeout,
        "configured"
    );

    let mut caller = ProviderCaller::new(provider).with_temperature(config.temperature);
    if cli.stream {
        caller = caller.with_streaming(|text| {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        });
    }

    Ok(Agent::with_config(
        caller,
        AgentConfig { call_timeout: config.call_timeout },
    ))
}

/// The question shown before a step, or `None` when the step runs without input
fn question_for(state: &ConversationState) -> Option<&'static str> {
    match state.step() {
        Step::Collect => Some(
            "List at least two components and a protocol, e.g.\n  \
             #### bme280, ssd1306 #### #### i2c ####",
        ),
        Step::AskReview => Some("Do you want to review compatibility manually? (yes/no)"),
        Step::Validate if state.manual_review_requested() => Some(
            "Run the compatibility check now, or change something first? \
             (proceed/modify/different protocol)",
        ),
        Step::Validate | Step::Done => None,
    }
}

fn print_report(report: &ValidationReport) {
    if report.unparsed {
        println!("\n(could not read a validation report; treating all components as incompatible)");
        return;
    }

    let adapters: Vec<_> = report.adapters().collect();
    if !adapters.is_empty() {
        println!("\nAdapters:");
        for (component, adapter) in adapters {
            println!("  - {}: {}", component, adapter);
        }
    }

    if report.all_compatible() {
        println!("\nAll components work on {}.", report.protocol);
    } else {
        let failed: Vec<&str> = report
            .validated_components
            .iter()
            .filter(|c| !c.compatible_with_selected && c.adapter().is_none())
            .map(|c| c.component.as_str())
            .collect();
        if !failed.is_empty() {
            println!("\nIncompatible: {}", failed.join(", "));
        }
    }
}

fn print_advance(advance: &Advance, streamed: bool, verbose: bool, quiet: bool) {
    if streamed {
        println!();
    } else {
        println!("\n{}", advance.reply());
    }

    if verbose {
        if let Ok(json) = serde_json::to_string_pretty(&advance.output) {
            println!("\n{}", json);
        }
    }
    if quiet {
        return;
    }

    match &advance.output {
        StepOutput::Collected { request: Some(request) } if !request.is_complete() => {
            println!("\n(that looks incomplete: name at least two components and i2c or spi)");
        }
        StepOutput::Collected { .. } => {}
        StepOutput::ReviewDecision { manual_review } => {
            println!(
                "\nManual review: {}",
                if *manual_review { "on" } else { "off" }
            );
        }
        StepOutput::ReturnToCollection { request } => {
            println!("\nBack to component collection ({}).", request.keyword());
        }
        StepOutput::Validated { report } => print_report(report),
    }
}

fn print_usage(agent: &CliAgent) {
    let usage = agent.caller().usage();
    if usage.total_calls == 0 {
        return;
    }
    println!(
        "\n--- {} calls, {} tokens ({} prompt, {} completion) ---",
        usage.total_calls,
        usage.total_tokens(),
        usage.total_prompt_tokens,
        usage.total_completion_tokens
    );
}

/// Interactive loop: ask the step's question, send the answer, print the reply
async fn chat(cli: &Cli, agent: &CliAgent) -> ExitCode {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let session = cli.session.as_str();

    if !cli.quiet {
        println!("espcraft - ESP32 component compatibility assistant");
        println!("Type /reset to start over, /quit to leave.\n");
    }

    loop {
        let state = agent.state(session).await;
        if state.is_done() {
            break;
        }

        let input = match question_for(&state) {
            Some(question) => {
                println!("\n{}", question);
                print!("> ");
                let _ = std::io::stdout().flush();

                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("Error: {}", Error::from(e).with_operation("cli::chat"));
                        return ExitCode::FAILURE;
                    }
                };
                match line.trim() {
                    "" => continue,
                    "/quit" | "/exit" => break,
                    "/reset" => {
                        agent.reset(session).await;
                        continue;
                    }
                    text => Some(text.to_string()),
                }
            }
            None => None,
        };

        match agent.respond(session, input.as_deref()).await {
            Ok(advance) => print_advance(&advance, cli.stream, cli.verbose > 0, cli.quiet),
            Err(e) if e.is_retryable() => {
                if cli.stream {
                    println!();
                }
                eprintln!("Error: {} (try again)", e);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if !cli.quiet {
        print_usage(agent);
    }
    ExitCode::SUCCESS
}

/// Final form of an error once `run` stops retrying it
fn give_up(err: Error, attempts: usize) -> Error {
    if err.is_retryable() {
        err.with_context("attempts", attempts.to_string()).persist()
    } else {
        err
    }
}

/// Scripted loop: every step that asks a question consumes the next message
async fn run_messages(cli: &Cli, agent: &CliAgent, messages: &[String]) -> ExitCode {
    let session = cli.session.as_str();
    let mut messages = messages.iter();

    loop {
        let state = agent.state(session).await;
        if state.is_done() {
            break;
        }

        let input = match question_for(&state) {
            Some(question) => match messages.next() {
                Some(message) => {
                    if !cli.quiet {
                        println!("\n{}\n> {}", question, message);
                    }
                    Some(message.as_str())
                }
                None => {
                    if !cli.quiet {
                        println!("\n(out of messages at step '{}')", state.step());
                    }
                    break;
                }
            },
            None => None,
        };

        let mut attempt = 1;
        let advance = loop {
            match agent.respond(session, input).await {
                Ok(advance) => break advance,
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "retrying step");
                    attempt += 1;
                }
                Err(e) => {
                    eprintln!("Error: {}", give_up(e, attempt));
                    return ExitCode::FAILURE;
                }
            }
        };
        print_advance(&advance, cli.stream, cli.verbose > 0, cli.quiet);
    }

    if !cli.quiet {
        print_usage(agent);
    }
    ExitCode::SUCCESS
}

fn show_prompts() {
    for (name, text) in prompts::catalog() {
        println!("=== {} ===\n{}\n", name, text);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Some(Commands::Prompts) = cli.command {
        show_prompts();
        return ExitCode::SUCCESS;
    }

    let agent = match build_agent(&cli) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match &cli.command {
        Some(Commands::Run { messages }) => run_messages(&cli, &agent, messages).await,
        Some(Commands::Chat) | None | Some(Commands::Prompts) => chat(&cli, &agent).await,
    }
}
