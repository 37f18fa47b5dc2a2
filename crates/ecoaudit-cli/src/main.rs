use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ecoaudit_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use ecoaudit_contracts::events::EventWriter;
use ecoaudit_contracts::images::{ImageId, NewImage, UploadedImage, MAX_IMAGES};
use ecoaudit_contracts::report::{AuditReport, ImpactLevel};
use ecoaudit_contracts::schema::audit_report_schema;
use ecoaudit_engine::{
    clamp_request_timeout, AuditConfig, AuditController, AuditSession, Auditor, Phase,
    SessionSnapshot, SubmitOutcome, GENERIC_FAILURE_MESSAGE, VALIDATION_MESSAGE,
};

#[derive(Debug, Parser)]
#[command(name = "ecoaudit", version, about = "AI sustainability audits for small businesses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Audit up to three photos against a business description.
    Audit(AuditArgs),
    /// Interactive session driven by slash commands.
    Chat(ChatArgs),
    /// Print the structured-output schema sent to the model.
    Schema,
}

#[derive(Debug, Clone, Args)]
struct ProviderArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    timeout_s: Option<f64>,
    #[arg(long)]
    api_base: Option<String>,
    /// Directory for receipts and the default event log.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct AuditArgs {
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    provider: ProviderArgs,
}

const EXIT_FAILED: i32 = 1;
const EXIT_INVALID: i32 = 2;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("ecoaudit error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Audit(args) => run_audit(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(&audit_report_schema())?);
            Ok(0)
        }
    }
}

fn audit_config(args: &ProviderArgs) -> AuditConfig {
    let mut config = AuditConfig::from_env();
    if let Some(model) = args.model.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        config = config.with_model(model);
    }
    if let Some(api_base) = args.api_base.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        config = config.with_api_base(api_base);
    }
    if args.timeout_s.is_some() {
        config = config.with_request_timeout(clamp_request_timeout(args.timeout_s));
    }
    config
}

/// Builds the auditor and a session sharing one event log.
fn build_session(args: &ProviderArgs) -> Result<(AuditSession, Auditor)> {
    let config = audit_config(args);
    let mut auditor = Auditor::gemini(config.clone());
    let mut session = AuditSession::new().with_audit_timeout(config.request_timeout);

    if let Some(out) = args.out.as_ref() {
        std::fs::create_dir_all(out)
            .with_context(|| format!("failed creating {}", out.display()))?;
        auditor = auditor.with_receipts_dir(out);
    }
    let events_path = args
        .events
        .clone()
        .or_else(|| args.out.as_ref().map(|out| out.join("events.jsonl")));
    if let Some(path) = events_path {
        let events = EventWriter::new(path, uuid::Uuid::new_v4().to_string());
        auditor = auditor.with_events(events.clone());
        session = session.with_events(events);
    }
    Ok((session, auditor))
}

fn run_audit(args: AuditArgs) -> Result<i32> {
    let (mut session, auditor) = build_session(&args.provider)?;
    if let Some(notice) = session
        .add_images(args.images.into_iter().map(NewImage::from_path))
        .and_then(|outcome| outcome.notice())
    {
        eprintln!("{notice}");
    }
    session.set_description(&args.description);

    match session.submit_and_wait(&auditor) {
        Phase::Success => {
            let Some(report) = session.report() else {
                eprintln!("{GENERIC_FAILURE_MESSAGE}");
                return Ok(EXIT_FAILED);
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(report)?);
            } else {
                print!("{}", render_report(report));
            }
            Ok(0)
        }
        Phase::Idle => {
            eprintln!("{}", session.validation_message().unwrap_or(VALIDATION_MESSAGE));
            Ok(EXIT_INVALID)
        }
        Phase::Error | Phase::Loading => {
            eprintln!("{}", session.error_message().unwrap_or(GENERIC_FAILURE_MESSAGE));
            Ok(EXIT_FAILED)
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let (session, auditor) = build_session(&args.provider)?;
    let controller = AuditController::new(session, auditor);

    let stdin = io::stdin();
    let mut line = String::new();
    println!("EcoAudit chat started. Describe your business, /add photos, then /audit. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "add_images" => {
                let paths = intent.arg_strings("paths");
                if paths.is_empty() {
                    println!("/add requires at least one path");
                    continue;
                }
                match controller.add_images(paths.into_iter().map(NewImage::from_path)) {
                    Some(outcome) => {
                        if let Some(notice) = outcome.notice() {
                            println!("{notice}");
                        }
                        print!("{}", render_images(&controller.snapshot().images));
                    }
                    None => println!("{}", busy_message(&controller.snapshot())),
                }
            }
            "remove_image" => {
                let Some(id) = intent.arg_str("id").and_then(ImageId::parse) else {
                    println!("/remove requires an image id such as #2");
                    continue;
                };
                if controller.remove_image(id) {
                    print!("{}", render_images(&controller.snapshot().images));
                } else if controller.snapshot().phase.accepts_edits() {
                    println!("No image {id}");
                } else {
                    println!("{}", busy_message(&controller.snapshot()));
                }
            }
            "set_description" | "append_description" => {
                let text = intent.arg_str("text").unwrap_or_default();
                let applied = if intent.action == "set_description" {
                    controller.set_description(text)
                } else {
                    controller.append_description(text)
                };
                if !applied {
                    println!("{}", busy_message(&controller.snapshot()));
                }
            }
            "list_images" => {
                print!("{}", render_images(&controller.snapshot().images));
            }
            "submit" => match controller.submit() {
                SubmitOutcome::Started(job) => {
                    println!(
                        "Analyzing {} image(s)... use /wait to block, /cancel to abort",
                        job.images.len()
                    );
                }
                SubmitOutcome::Rejected(message) => println!("{message}"),
                SubmitOutcome::Ignored => println!("{}", busy_message(&controller.snapshot())),
            },
            "status" => {
                print!("{}", render_snapshot(&controller.snapshot()));
            }
            "wait" => {
                print!("{}", render_snapshot(&controller.wait()));
            }
            "cancel" => {
                if controller.cancel() {
                    println!("Cancelling the running audit");
                } else {
                    println!("No audit is running");
                }
            }
            "reset" => {
                if controller.reset() {
                    println!("Started a new audit");
                } else {
                    println!("An audit is running; /cancel it first");
                }
            }
            "schema" => {
                println!("{}", serde_json::to_string_pretty(&audit_report_schema())?);
            }
            "unknown" => {
                let command = intent.arg_str("command").unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            other => {
                println!("Unhandled action {other}");
            }
        }
    }

    controller.cancel();
    controller.wait();
    Ok(())
}

fn busy_message(snapshot: &SessionSnapshot) -> String {
    match snapshot.phase {
        Phase::Loading => "An audit is running; /wait for it or /cancel it".to_string(),
        Phase::Success => "The audit is done; use /new to start another".to_string(),
        Phase::Idle | Phase::Error => "Nothing to do".to_string(),
    }
}

fn render_images(images: &[UploadedImage]) -> String {
    if images.is_empty() {
        return format!("No images yet (up to {MAX_IMAGES})\n");
    }
    let mut out = format!("Images ({}/{MAX_IMAGES}):\n", images.len());
    for image in images {
        let mime = image.mime_type.as_deref().unwrap_or("unknown type");
        out.push_str(&format!("  {} {} [{mime}]\n", image.id, image.preview()));
    }
    out
}

fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut out = format!("Status: {}\n", snapshot.phase.as_str());
    if let Some(notice) = snapshot.notice.as_deref() {
        out.push_str(&format!("{notice}\n"));
    }
    match snapshot.phase {
        Phase::Idle => {
            out.push_str(&render_images(&snapshot.images));
            let description = snapshot.description.trim();
            if description.is_empty() {
                out.push_str("Description: (empty)\n");
            } else {
                out.push_str(&format!("Description: {description}\n"));
            }
            if let Some(message) = snapshot.validation_message.as_deref() {
                out.push_str(&format!("{message}\n"));
            }
        }
        Phase::Loading => out.push_str("Analyzing your business...\n"),
        Phase::Success => {
            if let Some(report) = snapshot.report.as_ref() {
                out.push_str(&render_report(report));
            }
        }
        Phase::Error => {
            let message = snapshot
                .error_message
                .as_deref()
                .unwrap_or(GENERIC_FAILURE_MESSAGE);
            out.push_str(&format!("{message}\n"));
        }
    }
    out
}

fn impact_badge(level: ImpactLevel) -> String {
    format!("[{} Impact]", level.as_str())
}

fn render_report(report: &AuditReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Eco Score: {} out of 100 ({})\n\n",
        report.eco_score, report.score_label
    ));
    out.push_str("Executive Summary\n");
    out.push_str(&format!("  {}\n\n", report.summary));
    out.push_str("Environmental Context\n");
    out.push_str(&format!("  \"{}\"\n\n", report.impact_context));

    out.push_str("Key Observations\n");
    if report.key_observations.is_empty() {
        out.push_str("  (none)\n");
    }
    for observation in &report.key_observations {
        out.push_str(&format!("  - {}: {}\n", observation.issue, observation.detail));
    }

    let high_impact = report.high_impact_steps().count();
    if high_impact > 0 {
        out.push_str(&format!("\nRecommended Actions ({high_impact} high impact)\n"));
    } else {
        out.push_str("\nRecommended Actions\n");
    }
    if report.actionable_steps.is_empty() {
        out.push_str("  (none)\n");
    }
    for (idx, step) in report.actionable_steps.iter().enumerate() {
        out.push_str(&format!(
            "  {}. {} {}\n     {}\n",
            idx + 1,
            step.title,
            impact_badge(step.impact_level),
            step.description
        ));
    }
    out
}
