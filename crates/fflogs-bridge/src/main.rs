use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fflogs_bridge::config::parse_seconds;
use fflogs_bridge::{
    BridgeConfig, BundleFile, InvocationRequest, Outcome, Region, read_log_lines, run_invocation,
};

struct Args {
    log_file: PathBuf,
    report_code: String,
    region: i64,
    bundle: Option<PathBuf>,
    runtime: Option<PathBuf>,
    timeout: Option<Duration>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!(
                "Usage: fflogs-parse <log_file> <report_code> <region> [--bundle <path>] [--runtime <program>] [--timeout <secs>]"
            );
            eprintln!();
            eprintln!("Arguments:");
            eprintln!("  <log_file>           Combat log to parse");
            eprintln!("  <report_code>        Report code the worker tags its results with");
            eprintln!("  <region>             1=NA 2=EU 3=JP 4=CN 5=KR (others fall back to NA)");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --bundle <path>      Parser bundle [env: FFLOGS_WORKER_BUNDLE]");
            eprintln!("  --runtime <program>  Program that runs the bundle [default: node]");
            eprintln!("  --timeout <secs>     Wait for results [default: 10]");
            eprintln!();
            eprintln!("Prints one JSON document on stdout. Exits 0 whenever a result is printed,");
            eprintln!("including failures (check the \"error\" field), and 1 on usage errors.");
            print_outcome(&Outcome::failed(if msg.is_empty() {
                "usage".to_string()
            } else {
                msg
            }));
            process::exit(1);
        }
    };

    print_outcome(&outcome_for(args).await);
}

/// Initialize tracing with FFLOGS_LOG and LOG_FORMAT support.
///
/// Logs go to stderr; stdout carries only the outcome document.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("FFLOGS_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "fflogs_bridge={level},fflogs_parse={level}",
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

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut positional: Vec<&str> = Vec::new();
    let mut bundle = None;
    let mut runtime = None;
    let mut timeout = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--bundle" => {
                i += 1;
                bundle = Some(PathBuf::from(
                    args.get(i).ok_or("--bundle requires a value")?,
                ));
            }
            "--runtime" => {
                i += 1;
                runtime = Some(PathBuf::from(
                    args.get(i).ok_or("--runtime requires a value")?,
                ));
            }
            "--timeout" => {
                i += 1;
                let raw = args.get(i).ok_or("--timeout requires a value")?;
                timeout = Some(
                    parse_seconds(raw).ok_or_else(|| format!("invalid --timeout value: {raw}"))?,
                );
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with("--") => return Err(format!("unknown flag: {arg}")),
            arg => positional.push(arg),
        }
        i += 1;
    }

    let [log_file, report_code, region] = positional[..] else {
        return Err(format!(
            "expected <log_file> <report_code> <region>, got {} argument(s)",
            positional.len()
        ));
    };
    let region = region
        .parse::<i64>()
        .map_err(|_| format!("region must be an integer, got '{region}'"))?;

    Ok(Args {
        log_file: PathBuf::from(log_file),
        report_code: report_code.to_string(),
        region,
        bundle,
        runtime,
        timeout,
    })
}

async fn run(args: Args) -> anyhow::Result<Outcome> {
    let mut config = BridgeConfig::from_env();
    if let Some(bundle) = args.bundle {
        config = config.with_bundle_path(bundle);
    }
    if let Some(runtime) = args.runtime {
        config = config.with_runtime(runtime);
    }
    if let Some(timeout) = args.timeout {
        config = config.with_collect_timeout(timeout);
    }

    let lines = read_log_lines(&args.log_file)
        .await
        .with_context(|| format!("Failed to read log file {}", args.log_file.display()))?;

    let provider = BundleFile::new(config.bundle_path.clone());
    let request = InvocationRequest {
        lines,
        report_code: args.report_code,
        region: Region::from_code(args.region),
    };

    let outcome = run_invocation(&config, &provider, request).await?;
    Ok(outcome)
}

/// Every error past argument parsing is reported as a failure outcome.
async fn outcome_for(args: Args) -> Outcome {
    match run(args).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Parse failed");
            Outcome::failed(format!("{e:#}"))
        }
    }
}

fn print_outcome(outcome: &Outcome) {
    match serde_json::to_string(outcome) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize outcome");
            println!("{{\"error\": \"failed to serialize outcome\"}}");
        }
    }
}
