//! omics-jobs: drive omics analysis jobs from the command line.
//!
//! Results and failure reports are printed to stdout as JSON; logs go to
//! stderr.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use omics_client::{
    AnalysisError, AnalysisWorkflow, ArtifactCategory, ArtifactFile, Backend, GatewayConfig,
    HttpGateway, JobStatus, PollPolicy,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
Usage: omics-jobs [options] <command> [args]

Commands:
  create <patient_id>                       Create an analysis request
  submit <patient_id> <category=path>...    Create, upload artifacts and start the pipeline
  run <patient_id> <category=path>...       Submit, wait for completion and print the result
  status <request_id>                       Query the current status once
  wait <request_id>                         Poll a started request and print its result
  result <request_id>                       Fetch the result of a completed request
  history <patient_id>                      List the patient's requests, newest first

Categories: RNA-seq, Methylation, Mutation, CNV, miRNA

Options:
  --api-url <url>            Backend base URL [env: OMICS_API_URL]
  --interval-ms <ms>         Poll interval [env: OMICS_POLL_INTERVAL_MS, default: 5000]
  --max-attempts <n>         Poll attempt budget [env: OMICS_POLL_MAX_ATTEMPTS, default: 60]";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Create { patient_id: String },
    Submit { patient_id: String, artifacts: Vec<(ArtifactCategory, PathBuf)> },
    Run { patient_id: String, artifacts: Vec<(ArtifactCategory, PathBuf)> },
    Status { request_id: String },
    Wait { request_id: String },
    Result { request_id: String },
    History { patient_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cli {
    command: Command,
    api_url: Option<String>,
    interval_ms: Option<u64>,
    max_attempts: Option<u32>,
}

impl Cli {
    fn gateway_config(&self) -> GatewayConfig {
        let config = GatewayConfig::default();
        match self.api_url {
            Some(ref url) => config.with_base_url(url.clone()),
            None => config,
        }
    }

    fn poll_policy(&self) -> PollPolicy {
        let mut policy = PollPolicy::default();
        if let Some(ms) = self.interval_ms {
            policy.interval = Duration::from_millis(ms);
        }
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        policy
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    let cancel_token = CancellationToken::new();
    {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling");
                cancel_token.cancel();
            }
        });
    }

    match run(&cli, &cancel_token).await {
        Ok(output) => println!("{}", render(&output)),
        Err(e) => {
            if let Some(err) = e.downcast_ref::<AnalysisError>() {
                println!("{}", render(&serde_json::json!({ "error": err.report() })));
            } else {
                eprintln!("error: {e:#}");
            }
            process::exit(1);
        }
    }
}

fn render(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("OMICS_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!(
            "omics_client={level},omics_cli={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

async fn run(cli: &Cli, cancel_token: &CancellationToken) -> anyhow::Result<serde_json::Value> {
    let config = cli.gateway_config();
    let gateway = HttpGateway::new(&config)
        .with_context(|| format!("invalid backend configuration for {}", config.base_url))?;
    tracing::debug!(base_url = %gateway.base_url(), "Using analysis backend");
    let backend: Arc<dyn Backend> = Arc::new(gateway);
    let workflow = AnalysisWorkflow::new(Arc::clone(&backend), cli.poll_policy());

    let output = match cli.command {
        Command::Create { ref patient_id } => {
            let request = workflow.requests().create_request(patient_id).await?;
            serde_json::to_value(request)?
        }
        Command::Submit {
            ref patient_id,
            ref artifacts,
        } => {
            let artifacts = load_artifacts(artifacts).await?;
            let request = workflow.submit(patient_id, &artifacts).await?;
            let uploaded = workflow.uploads().artifacts(&request.id);
            serde_json::json!({ "request": request, "artifacts": uploaded })
        }
        Command::Run {
            ref patient_id,
            ref artifacts,
        } => {
            let artifacts = load_artifacts(artifacts).await?;
            let result = workflow.run(patient_id, &artifacts, cancel_token).await?;
            serde_json::to_value(result)?
        }
        Command::Status { ref request_id } => {
            let report = backend
                .get_status(request_id)
                .await
                .map_err(AnalysisError::from)?;
            let status = JobStatus::from_wire(&report.status);
            if status.is_none() {
                tracing::warn!(request_id = %request_id, status = %report.status, "Unrecognised status");
            }
            serde_json::json!({
                "requestId": request_id,
                "status": status.map(|s| s.as_str()).unwrap_or(report.status.as_str()),
                "recognised": status.is_some(),
                "message": report.message,
            })
        }
        Command::Wait { ref request_id } => {
            let result = workflow.await_result(request_id, cancel_token).await?;
            serde_json::to_value(result)?
        }
        Command::Result { ref request_id } => {
            let result = workflow
                .resolver()
                .fetch_until_cancelled(request_id, cancel_token)
                .await?;
            serde_json::to_value(result)?
        }
        Command::History { ref patient_id } => {
            let requests = workflow.requests().list_requests_for_patient(patient_id).await?;
            serde_json::to_value(requests)?
        }
    };
    Ok(output)
}

async fn load_artifacts(
    specs: &[(ArtifactCategory, PathBuf)],
) -> anyhow::Result<Vec<(ArtifactCategory, ArtifactFile)>> {
    let mut artifacts = Vec::with_capacity(specs.len());
    for (category, path) in specs {
        let file = ArtifactFile::read(path)
            .await
            .with_context(|| format!("failed to read {} artifact {}", category, path.display()))?;
        artifacts.push((*category, file));
    }
    Ok(artifacts)
}

fn parse_artifact(arg: &str) -> Result<(ArtifactCategory, PathBuf), String> {
    let (category, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected <category=path>, got: {arg}"))?;
    let category = category.parse::<ArtifactCategory>().map_err(|e| e.to_string())?;
    if path.trim().is_empty() {
        return Err(format!("missing path for {category} artifact"));
    }
    Ok((category, PathBuf::from(path)))
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut api_url = None;
    let mut interval_ms = None;
    let mut max_attempts = None;
    let mut positional: Vec<&str> = Vec::new();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--api-url" => {
                i += 1;
                api_url = Some(args.get(i).ok_or("--api-url requires a value")?.clone());
            }
            "--interval-ms" => {
                i += 1;
                let raw = args.get(i).ok_or("--interval-ms requires a value")?;
                interval_ms = Some(
                    raw.parse::<u64>()
                        .map_err(|_| format!("invalid --interval-ms: {raw}"))?,
                );
            }
            "--max-attempts" => {
                i += 1;
                let raw = args.get(i).ok_or("--max-attempts requires a value")?;
                max_attempts = Some(
                    raw.parse::<u32>()
                        .map_err(|_| format!("invalid --max-attempts: {raw}"))?,
                );
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with("--") => return Err(format!("unknown flag: {arg}")),
            arg => positional.push(arg),
        }
        i += 1;
    }

    let (name, rest) = positional.split_first().ok_or("missing command")?;
    let single = |what: &str| -> Result<String, String> {
        match rest {
            [value] => Ok(value.to_string()),
            [] => Err(format!("{name} requires <{what}>")),
            [_, extra, ..] => Err(format!("unexpected argument: {extra}")),
        }
    };
    let with_artifacts = || -> Result<(String, Vec<(ArtifactCategory, PathBuf)>), String> {
        let (patient_id, specs) = rest
            .split_first()
            .ok_or_else(|| format!("{name} requires <patient_id>"))?;
        if specs.is_empty() {
            return Err(format!("{name} requires at least one <category=path>"));
        }
        let artifacts = specs
            .iter()
            .map(|s| parse_artifact(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((patient_id.to_string(), artifacts))
    };

    let command = match *name {
        "create" => Command::Create {
            patient_id: single("patient_id")?,
        },
        "submit" => {
            let (patient_id, artifacts) = with_artifacts()?;
            Command::Submit {
                patient_id,
                artifacts,
            }
        }
        "run" => {
            let (patient_id, artifacts) = with_artifacts()?;
            Command::Run {
                patient_id,
                artifacts,
            }
        }
        "status" => Command::Status {
            request_id: single("request_id")?,
        },
        "wait" => Command::Wait {
            request_id: single("request_id")?,
        },
        "result" => Command::Result {
            request_id: single("request_id")?,
        },
        "history" => Command::History {
            patient_id: single("patient_id")?,
        },
        other => return Err(format!("unknown command: {other}")),
    };

    Ok(Cli {
        command,
        api_url,
        interval_ms,
        max_attempts,
    })
}
