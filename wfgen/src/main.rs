//! Workflow document generator.
//!
//! Drafts a workflow definition from a natural-language request, judges it
//! against the rule set in `.wfgen/rules.yml`, and retries until it passes or
//! an operator accepts it. The extracted YAML document goes to stdout.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use wfgen::agents::generator::{Generator, GeneratorConfig};
use wfgen::agents::judge::judge_answer;
use wfgen::core::fenced::extract_fenced_block;
use wfgen::core::types::LoopMode;
use wfgen::exit_codes;
use wfgen::io::backend::{CommandGenerationBackend, CommandJudgmentBackend};
use wfgen::io::config::{WfgenConfig, load_config};
use wfgen::io::init::{InitOptions, WfgenPaths, init_workspace};
use wfgen::io::operator::ConsoleGate;
use wfgen::io::rules::RuleSet;
use wfgen::io::run_log::RunLog;
use wfgen::logging;
use wfgen::looping::{CancelFlag, Gate, LoopController, LoopEvent, LoopLimits, LoopStop};

#[derive(Parser)]
#[command(
    name = "wfgen",
    version,
    about = "Generate workflow documents with a generate-judge-retry loop"
)]
struct Cli {
    /// Log node progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.wfgen/` with a default config, starter rules, and the verdict schema.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Generate a workflow document for a request.
    Run(RunArgs),
    /// Judge an existing answer once and print the verdict.
    Check(CheckArgs),
}

#[derive(Args)]
struct RequestArgs {
    /// Request text.
    #[arg(long, conflicts_with = "request_file")]
    request: Option<String>,

    /// Read the request from a file.
    #[arg(long, value_name = "PATH")]
    request_file: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// Ask an operator before regenerating a failing answer.
    #[arg(long, conflicts_with = "auto")]
    gated: bool,

    /// Regenerate failing answers without asking.
    #[arg(long)]
    auto: bool,

    /// Write the extracted document here instead of stdout.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Abort after this many generations.
    #[arg(long)]
    max_iterations: Option<u32>,
}

#[derive(Args)]
struct CheckArgs {
    /// Answer to judge (the full model output, fenced block included).
    #[arg(long, value_name = "PATH")]
    answer_file: PathBuf,

    #[command(flatten)]
    request: RequestArgs,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run(args) => cmd_run(&root, args),
        Command::Check(args) => cmd_check(&root, args),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    eprintln!("initialized {}", paths.wfgen_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, args: RunArgs) -> Result<i32> {
    let paths = WfgenPaths::new(root);
    let mut cfg = load_config(&paths.config_path)?;
    if args.gated {
        cfg.mode = LoopMode::Gated;
    } else if args.auto {
        cfg.mode = LoopMode::Auto;
    }
    if args.max_iterations.is_some() {
        cfg.max_iterations = args.max_iterations;
    }
    cfg.validate().context("invalid command-line overrides")?;

    let request = args
        .request
        .read()?
        .context("a request is required (--request or --request-file)")?;
    let rules = RuleSet::load(&cfg.rules_path_in(root))?;

    let generation = CommandGenerationBackend::new(cfg.generation.clone(), root);
    let judgment = CommandJudgmentBackend::new(cfg.judgment.clone(), root, &paths.schema_path);
    let generator = Generator::new(generator_config(&cfg));
    let controller = LoopController {
        generator: &generator,
        generation: &generation,
        judgment: &judgment,
        rules: &rules,
        limits: LoopLimits {
            max_iterations: cfg.max_iterations,
            cancel: CancelFlag::new(),
        },
    };

    let log = RunLog::create(&paths.runs_dir, cfg.mode)?;
    info!(run_id = log.run_id(), mode = ?cfg.mode, "run started");

    // Operator prompts go to stderr; stdout carries only the document.
    let mut console = ConsoleGate::new(io::stdin().lock(), io::stderr());
    let gate = match cfg.mode {
        LoopMode::Auto => Gate::Auto,
        LoopMode::Gated => Gate::Operator(&mut console),
    };

    let mut log_error = None;
    let result = controller.run(&request, gate, |event: &LoopEvent<'_>| {
        if let Err(err) = log.record(event) {
            warn!(error = %format!("{err:#}"), "failed to write run log");
            log_error.get_or_insert(err);
        }
    });
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Err(log_err) = log.fail(&err) {
                warn!(error = %format!("{log_err:#}"), "failed to write run result");
            }
            return Err(err);
        }
    };
    if let Some(err) = log_error {
        return Err(err.context("write run log"));
    }
    let result_path = log.finish(&outcome.state, outcome.stop)?;
    info!(
        run_id = log.run_id(),
        generations = outcome.state.history().len(),
        result = %result_path.display(),
        "run finished"
    );

    let answer = outcome.state.latest_answer().unwrap_or_default();
    let Some(document) = extract_fenced_block(answer, "yaml") else {
        eprintln!(
            "final answer has no yaml fenced block; see {}",
            result_path.display()
        );
        return Ok(exit_codes::NO_DOCUMENT);
    };
    write_document(args.out.as_deref(), document)?;

    Ok(match outcome.stop {
        LoopStop::Passed => exit_codes::OK,
        LoopStop::AcceptedByOperator => {
            eprintln!("accepted with unresolved issues: {}", outcome.state.reason());
            exit_codes::ACCEPTED_WITH_ISSUES
        }
    })
}

fn cmd_check(root: &Path, args: CheckArgs) -> Result<i32> {
    let paths = WfgenPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let rules = RuleSet::load(&cfg.rules_path_in(root))?;
    let answer = fs::read_to_string(&args.answer_file)
        .with_context(|| format!("read answer {}", args.answer_file.display()))?;
    let request = args.request.read()?.unwrap_or_default();

    let judgment = CommandJudgmentBackend::new(cfg.judgment, root, &paths.schema_path);
    let verdict = judge_answer(&judgment, &rules, &request, &answer)?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", serde_json::to_string_pretty(&verdict)?)?;
    Ok(if verdict.judge {
        exit_codes::OK
    } else {
        exit_codes::CHECK_FAILED
    })
}

impl RequestArgs {
    /// The request text, if one was given. Blank requests are rejected.
    fn read(&self) -> Result<Option<String>> {
        let request = match (&self.request, &self.request_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("read request {}", path.display()))?,
            (None, None) => return Ok(None),
        };
        if request.trim().is_empty() {
            bail!("request is empty");
        }
        Ok(Some(request))
    }
}

fn generator_config(cfg: &WfgenConfig) -> GeneratorConfig {
    GeneratorConfig {
        role: cfg.role.clone(),
        max_output_tokens: cfg.max_output_tokens,
        continuation: cfg.continuation,
    }
}

fn write_document(out: Option<&Path>, document: &str) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(path, document).with_context(|| format!("write {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(document.as_bytes())?;
            stdout.flush().context("flush stdout")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["wfgen", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "wfgen",
            "-v",
            "run",
            "--request",
            "summarize emails",
            "--gated",
            "--max-iterations",
            "3",
        ]);
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.gated);
        assert_eq!(args.max_iterations, Some(3));
        assert_eq!(args.request.request.as_deref(), Some("summarize emails"));
    }

    #[test]
    fn gated_and_auto_conflict() {
        let parsed = Cli::try_parse_from(["wfgen", "run", "--request", "x", "--gated", "--auto"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn blank_request_is_rejected() {
        let args = RequestArgs {
            request: Some("   \n".to_string()),
            request_file: None,
        };
        let err = args.read().unwrap_err();
        assert!(err.to_string().contains("request is empty"));
    }

    #[test]
    fn request_file_is_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("request.txt");
        fs::write(&path, "build a translator").expect("write");
        let args = RequestArgs {
            request: None,
            request_file: Some(path),
        };
        assert_eq!(
            args.read().expect("read").as_deref(),
            Some("build a translator")
        );
    }
}
