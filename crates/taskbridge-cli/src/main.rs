use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use taskbridge_core::error::{Component, TaskError};
use taskbridge_core::impls::{InMemoryEventSink, JsonLinesEventSink, LocalArtifactStore};
use taskbridge_core::pipeline::{parse_message, validate};
use taskbridge_core::ports::EventSink;
use taskbridge_core::{AdapterConfig, TaskAdapter};

const EXIT_SUCCEEDED: u8 = 0;
const EXIT_FAILED: u8 = 1;
/// Exit code for usage and configuration errors, before any task runs.
const EXIT_USAGE: u8 = 2;

#[derive(Parser)]
#[command(name = "taskbridge", version, about = "Run queue tasks against an external engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task instance and print the final status payload
    Run {
        #[command(flatten)]
        source: MessageSource,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Engine executable, .dll or .jar (overrides config and environment)
        #[arg(long)]
        engine: Option<PathBuf>,

        /// Root directory of the local artifact store
        #[arg(long)]
        storage_root: Option<PathBuf>,

        /// Append every status event to this JSON Lines file
        #[arg(long)]
        events: Option<PathBuf>,

        /// Engine wall-clock timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Validate a task message without running it
    Validate {
        #[command(flatten)]
        source: MessageSource,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct MessageSource {
    /// Message file (`-` for stdin)
    #[arg(long)]
    message: Option<PathBuf>,

    /// Message as an inline JSON string
    #[arg(long)]
    inline: Option<String>,
}

impl MessageSource {
    fn read(&self) -> Result<Vec<u8>> {
        match (&self.message, &self.inline) {
            (_, Some(inline)) => Ok(inline.as_bytes().to_vec()),
            (Some(path), None) if path == Path::new("-") => {
                let mut buf = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut buf)
                    .context("failed to read message from stdin")?;
                Ok(buf)
            }
            (Some(path), None) => std::fs::read(path)
                .with_context(|| format!("failed to read message file {}", path.display())),
            (None, None) => anyhow::bail!("either --message or --inline is required"),
        }
    }
}

struct RunOptions {
    config: Option<PathBuf>,
    engine: Option<PathBuf>,
    storage_root: Option<PathBuf>,
    events: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    let result = match cli.command {
        Commands::Run {
            source,
            config,
            engine,
            storage_root,
            events,
            timeout_secs,
        } => {
            let options = RunOptions {
                config,
                engine,
                storage_root,
                events,
                timeout_secs,
            };
            run(&source, options, &mut stdout).await
        }
        Commands::Validate { source } => validate_only(&source, &mut stdout),
    };

    ExitCode::from(exit_code(result))
}

fn exit_code(result: Result<u8>) -> u8 {
    result.unwrap_or_else(|e| {
        eprintln!("error: {e:#}");
        EXIT_USAGE
    })
}

fn load_config(options: &RunOptions) -> Result<AdapterConfig> {
    let config = match &options.config {
        Some(path) => AdapterConfig::load(path)?,
        None => AdapterConfig::default(),
    };
    let mut config = config.with_env(|key| std::env::var(key).ok())?;

    if let Some(engine) = &options.engine {
        config.engine.path = Some(engine.clone());
    }
    if let Some(root) = &options.storage_root {
        config.storage.root = root.clone();
    }
    if let Some(secs) = options.timeout_secs {
        config.engine.timeout_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

/// Runs one task instance. Only the final payload goes to `out`.
async fn run(source: &MessageSource, options: RunOptions, out: &mut impl Write) -> Result<u8> {
    let config = load_config(&options)?;
    let raw = source.read()?;

    let store = Arc::new(LocalArtifactStore::new(&config.storage.root));
    let sink: Arc<dyn EventSink> = match &options.events {
        Some(path) => Arc::new(JsonLinesEventSink::new(path)),
        None => Arc::new(InMemoryEventSink::new()),
    };
    let adapter = TaskAdapter::new(&config, store, sink).context("invalid engine configuration")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling task");
            on_signal.cancel();
        }
    });

    let outcome = adapter.handle_raw(&raw, cancel).await;
    let payload = outcome
        .final_event
        .payload
        .clone()
        .unwrap_or(serde_json::Value::Null);
    writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;

    if !outcome.terminal_delivered {
        tracing::warn!("terminal event was not delivered to the event sink");
    }
    Ok(if outcome.succeeded() {
        EXIT_SUCCEEDED
    } else {
        EXIT_FAILED
    })
}

fn validate_only(source: &MessageSource, out: &mut impl Write) -> Result<u8> {
    let raw = source.read()?;
    let checked = parse_message(&raw)
        .map_err(|e| TaskError::for_raw("", Component::PayloadValidator, e))
        .and_then(|message| validate(&message));

    match checked {
        Ok(request) => {
            writeln!(out, "{}", serde_json::to_string_pretty(&request)?)?;
            Ok(EXIT_SUCCEEDED)
        }
        Err(err) => {
            writeln!(out, "{}", serde_json::to_string_pretty(&err.payload())?)?;
            Ok(EXIT_FAILED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn message_and_inline_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["taskbridge", "validate"]).is_err());
        assert!(
            Cli::try_parse_from(["taskbridge", "validate", "--message", "m.json", "--inline", "{}"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["taskbridge", "validate", "--inline", "{}"]).is_ok());
    }

    #[test]
    fn run_accepts_overrides() {
        let cli = Cli::try_parse_from([
            "taskbridge",
            "run",
            "--message",
            "task.json",
            "--engine",
            "/opt/mcra.dll",
            "--timeout-secs",
            "30",
        ])
        .unwrap();
        let Commands::Run {
            source,
            engine,
            timeout_secs,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(source.message, Some(PathBuf::from("task.json")));
        assert_eq!(engine, Some(PathBuf::from("/opt/mcra.dll")));
        assert_eq!(timeout_secs, Some(30));
    }

    #[test]
    fn message_is_read_from_file_or_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        std::fs::write(&path, br#"{"task_id":"t1"}"#).unwrap();

        let from_file = MessageSource {
            message: Some(path),
            inline: None,
        };
        assert_eq!(from_file.read().unwrap(), br#"{"task_id":"t1"}"#);

        let inline = MessageSource {
            message: None,
            inline: Some("{}".into()),
        };
        assert_eq!(inline.read().unwrap(), b"{}");
    }

    #[test]
    fn cli_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("taskbridge.toml");
        std::fs::write(
            &config_path,
            "[engine]\npath = \"/opt/from-file\"\ntimeout_secs = 600\n",
        )
        .unwrap();

        let config = load_config(&RunOptions {
            config: Some(config_path),
            engine: Some(PathBuf::from("/opt/from-flag")),
            storage_root: Some(dir.path().join("store")),
            events: None,
            timeout_secs: Some(5),
        })
        .unwrap();

        assert_eq!(config.engine.path, Some(PathBuf::from("/opt/from-flag")));
        assert_eq!(config.engine.timeout_secs, 5);
        assert_eq!(config.storage.root, dir.path().join("store"));
    }

    #[cfg(unix)]
    fn options(dir: &Path, engine_body: &str) -> RunOptions {
        use std::os::unix::fs::PermissionsExt;

        let engine = dir.join("engine.sh");
        std::fs::write(
            &engine,
            format!(
                "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in --output) out=\"$2\"; shift 2 ;; *) shift ;; esac\ndone\n{engine_body}\n"
            ),
        )
        .unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::create_dir_all(dir.join("store")).unwrap();

        RunOptions {
            config: None,
            engine: Some(engine),
            storage_root: Some(dir.join("store")),
            events: Some(dir.join("events.jsonl")),
            timeout_secs: Some(10),
        }
    }

    fn inline(json: &str) -> MessageSource {
        MessageSource {
            message: None,
            inline: Some(json.to_string()),
        }
    }

    const TASK: &str = r#"{"task_id":"t1","user_id":"u1","inputs":[],"parameters":{"mode":"quick"}}"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn run_prints_only_the_final_payload_and_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path(), r#"echo "id,value" > "$out/result.csv""#);
        let mut out = Vec::new();

        let code = exit_code(run(&inline(TASK), options, &mut out).await);

        assert_eq!(code, EXIT_SUCCEEDED);
        let payload: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(payload["artifacts"], serde_json::json!(["result.csv"]));

        let events = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(events.lines().count(), 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_task_exits_one_with_the_failure_payload() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path(), "echo 'unsupported mode' >&2; exit 2");
        let mut out = Vec::new();

        let code = exit_code(run(&inline(TASK), options, &mut out).await);

        assert_eq!(code, EXIT_FAILED);
        let payload: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(payload["error_kind"], "EngineExecutionError");
        assert_eq!(payload["detail"]["exit_code"], 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn configuration_errors_exit_two_before_any_task_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options(dir.path(), "true");
        options.timeout_secs = Some(0);
        let mut out = Vec::new();

        let code = exit_code(run(&inline(TASK), options, &mut out).await);

        assert_eq!(code, EXIT_USAGE);
        assert!(out.is_empty());
        assert!(!dir.path().join("events.jsonl").exists());
    }

    #[test]
    fn validate_reports_the_offending_field() {
        let mut out = Vec::new();
        let code = validate_only(&inline(r#"{"user_id":"u1","inputs":[],"parameters":{}}"#), &mut out)
            .unwrap();

        assert_eq!(code, EXIT_FAILED);
        let payload: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(payload["error_kind"], "ValidationError");
        assert_eq!(payload["detail"]["field"], "task_id");
    }
}
