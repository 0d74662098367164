//! One end-to-end parse: resolve the bundle, drive the worker, assemble the
//! outcome.
//!
//! Flow:
//! 1. Resolve the worker image (the only step that can abort the invocation)
//! 2. Spawn the worker and start draining its output
//! 3. Send the phase plan, pipelined
//! 4. Collect both result channels until satisfied or the deadline passes
//! 5. Terminate the worker and assemble the outcome

use std::io;
use std::path::Path;

use tokio::time::Instant;

use crate::bridge::protocol::{FIGHTS_CHANNEL, MASTER_INFO_CHANNEL, Region};
use crate::config::BridgeConfig;
use crate::image::WorkerImageProvider;
use crate::outcome::Outcome;
use crate::sequencer::{self, CorrelationIds, ParseJob};
use crate::supervisor::{LaunchError, RuntimeSpawner, Session, WorkerSpawner};

/// Channels that must both report for a successful outcome.
pub const REQUIRED_CHANNELS: [&str; 2] = [FIGHTS_CHANNEL, MASTER_INFO_CHANNEL];

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub lines: Vec<String>,
    pub report_code: String,
    pub region: Region,
}

/// Read a combat log as lines.
///
/// Invalid UTF-8 sequences are dropped. `\n`, `\r\n` and a lone `\r` all end
/// a line, and terminators are not part of the returned lines.
pub async fn read_log_lines(path: &Path) -> io::Result<Vec<String>> {
    let bytes = tokio::fs::read(path).await?;
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    Ok(split_lines(&text))
}

fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let Some(end) = rest.find(['\r', '\n']) else {
            lines.push(rest.to_string());
            break;
        };
        lines.push(rest[..end].to_string());
        let terminator = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[end + terminator..];
    }
    lines
}

/// Run one invocation with the runtime named in `config`.
///
/// Only a [`LaunchError`] is returned as an error; every later failure is
/// folded into the [`Outcome`].
pub async fn run_invocation(
    config: &BridgeConfig,
    provider: &dyn WorkerImageProvider,
    request: InvocationRequest,
) -> Result<Outcome, LaunchError> {
    tracing::info!("Resolving worker image");
    let image = provider.resolve().await?;

    let spawner = RuntimeSpawner::new(&config.runtime).with_args(config.runtime_args.clone());
    run_with_spawner(config, &spawner, &image, request).await
}

/// Run one invocation against an already resolved image.
pub async fn run_with_spawner(
    config: &BridgeConfig,
    spawner: &dyn WorkerSpawner,
    image: &Path,
    request: InvocationRequest,
) -> Result<Outcome, LaunchError> {
    let mut session = Session::start(spawner, image, config.terminate_grace)?
        .with_send_timeout(config.send_timeout);
    let session_id = session.id();

    tracing::info!(
        session = %session_id,
        report_code = %request.report_code,
        region = request.region.as_str(),
        lines = request.lines.len(),
        "Submitting log to worker"
    );

    let job = ParseJob {
        report_code: request.report_code,
        region: request.region,
        lines: request.lines,
    };
    let commands = sequencer::plan(job, &mut CorrelationIds::new());
    let report = sequencer::run(&mut session, commands, config.settle).await;
    if let Some(ref e) = report.error {
        tracing::warn!(
            session = %session_id,
            sent = report.sent,
            total = report.total,
            error = %e,
            "Worker stopped accepting commands, collecting what arrived"
        );
    }

    let deadline = Instant::now() + config.collect_timeout;
    let state = session.collect(&REQUIRED_CHANNELS, deadline).await;
    session.terminate().await;

    let outcome = Outcome::assemble(state);
    if outcome.is_success() {
        tracing::info!(session = %session_id, "Worker returned fights and master info");
    } else {
        tracing::warn!(
            session = %session_id,
            has_fights = outcome.fights().is_some(),
            has_master = outcome.master().is_some(),
            "Worker returned incomplete data"
        );
    }
    Ok(outcome)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::image::BundleFile;
    use crate::outcome::INCOMPLETE_DATA;
    use crate::sequencer::SettleDelays;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    const RESPONDS_TO_BOTH: &str = r#"echo "parser bundle loaded"
while IFS= read -r line; do
  case "$line" in
    *'"collect-fights"'*)
      echo '__IPC__:{"channel":"ipc-collect-fights","id":2,"data":{"fights":[{"id":1,"name":"Boss"}]}}' ;;
    *'"collect-master-info"'*)
      echo '__IPC__:{"channel":"ipc-collect-master-info","id":3,"data":{"reportCode":"abc","lang":"en"}}' ;;
  esac
done"#;

    fn worker(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{body}").unwrap();
        file.flush().unwrap();
        file
    }

    fn config(timeout: Duration) -> BridgeConfig {
        BridgeConfig::new()
            .with_runtime("sh")
            .with_collect_timeout(timeout)
            .with_send_timeout(Duration::from_secs(5))
            .with_settle(SettleDelays::NONE)
            .with_terminate_grace(Duration::from_millis(500))
    }

    fn request() -> InvocationRequest {
        InvocationRequest {
            lines: vec!["01|2024-05-01T20:00:00.000|zone".to_string()],
            report_code: "abc".to_string(),
            region: Region::from_code(1),
        }
    }

    #[tokio::test]
    async fn both_channels_succeed_well_before_deadline() {
        let image = worker(RESPONDS_TO_BOTH);
        let provider = BundleFile::new(image.path());

        let started = std::time::Instant::now();
        let outcome = run_invocation(&config(Duration::from_secs(10)), &provider, request())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(
            outcome.fights(),
            Some(&json!({"fights": [{"id": 1, "name": "Boss"}]}))
        );
        assert_eq!(
            outcome.master(),
            Some(&json!({"reportCode": "abc", "lang": "en"}))
        );
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn responses_in_reverse_order_still_succeed() {
        let image = worker(
            r#"while IFS= read -r line; do
  case "$line" in
    *'"collect-master-info"'*)
      echo '__IPC__:{"channel":"ipc-collect-master-info","data":{"m":1}}'
      echo '__IPC__:{"channel":"ipc-collect-fights","data":{"f":1}}' ;;
  esac
done"#,
        );

        let outcome = run_invocation(
            &config(Duration::from_secs(10)),
            &BundleFile::new(image.path()),
            request(),
        )
        .await
        .unwrap();

        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn worker_exiting_after_fights_yields_partial_failure() {
        let image = worker(
            r#"while IFS= read -r line; do
  case "$line" in
    *'"collect-fights"'*)
      echo '__IPC__:{"channel":"ipc-collect-fights","id":2,"data":{"fights":[]}}'
      exit 0 ;;
  esac
done"#,
        );
        let timeout = Duration::from_millis(300);

        let started = std::time::Instant::now();
        let outcome = run_invocation(&config(timeout), &BundleFile::new(image.path()), request())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome.error(), Some(INCOMPLETE_DATA));
        assert_eq!(outcome.fights(), Some(&json!({"fights": []})));
        assert_eq!(outcome.master(), None);
        assert!(elapsed >= timeout, "returned before deadline: {elapsed:?}");
    }

    #[tokio::test]
    async fn silent_worker_times_out_with_nothing() {
        let image = worker("while IFS= read -r line; do :; done");
        let timeout = Duration::from_millis(200);

        let outcome = run_invocation(&config(timeout), &BundleFile::new(image.path()), request())
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"error": INCOMPLETE_DATA, "fights": null, "master": null})
        );
    }

    #[tokio::test]
    async fn worker_receives_submitted_lines() {
        // Reflects the parse-lines command back as the fights payload.
        let image = worker(
            r#"while IFS= read -r line; do
  case "$line" in
    *'"parse-lines"'*) echo "__IPC__:{\"channel\":\"ipc-collect-fights\",\"data\":$line}" ;;
    *'"collect-master-info"'*) echo '__IPC__:{"channel":"ipc-collect-master-info","data":{"lang":"en"}}' ;;
  esac
done"#,
        );
        let mut req = request();
        req.lines = vec!["a|1".to_string(), "b|2".to_string()];
        req.region = Region::from_code(3);

        let outcome = run_invocation(
            &config(Duration::from_secs(10)),
            &BundleFile::new(image.path()),
            req,
        )
        .await
        .unwrap();

        let submitted = outcome.fights().unwrap();
        assert_eq!(submitted["message"], "parse-lines");
        assert_eq!(submitted["id"], 1);
        assert_eq!(submitted["lines"], json!(["a|1", "b|2"]));
        assert_eq!(submitted["region"], "JP");
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn worker_not_reading_stdin_cannot_hang_the_invocation() {
        let image = worker("exec sleep 20");
        let config =
            config(Duration::from_millis(300)).with_send_timeout(Duration::from_millis(200));
        let mut req = request();
        req.lines = vec!["y".repeat(63); 16 * 1024];

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(6),
            run_invocation(&config, &BundleFile::new(image.path()), req),
        )
        .await
        .expect("invocation hung on a stuck worker")
        .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome.error(), Some(INCOMPLETE_DATA));
        assert_eq!(outcome.fights(), None);
        assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn empty_master_info_is_incomplete() {
        let image = worker(
            r#"while IFS= read -r line; do
  case "$line" in
    *'"collect-fights"'*) echo '__IPC__:{"channel":"ipc-collect-fights","data":{"fights":[1]}}' ;;
    *'"collect-master-info"'*) echo '__IPC__:{"channel":"ipc-collect-master-info","data":{}}' ;;
  esac
done"#,
        );

        let outcome = run_invocation(
            &config(Duration::from_millis(300)),
            &BundleFile::new(image.path()),
            request(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.error(), Some(INCOMPLETE_DATA));
        assert_eq!(outcome.fights(), Some(&json!({"fights": [1]})));
        assert_eq!(outcome.master(), None);
    }

    #[tokio::test]
    async fn missing_image_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let provider = BundleFile::new(dir.path().join("missing.js"));
        // A spawn attempt would surface as LaunchError::Spawn instead.
        let config = config(Duration::from_secs(1)).with_runtime("/nonexistent/runtime");

        let err = run_invocation(&config, &provider, request())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::ImageUnavailable(_)));
    }

    #[tokio::test]
    async fn missing_runtime_is_a_launch_error() {
        let image = worker(RESPONDS_TO_BOTH);
        let config = config(Duration::from_secs(1)).with_runtime("/nonexistent/runtime");

        let err = run_invocation(&config, &BundleFile::new(image.path()), request())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn(_)));
    }

    #[tokio::test]
    async fn read_log_lines_strips_terminators_and_bad_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"first|1\r\nsecond|2\n\xffthird|\xc3\xa93\rfourth|4\n\nlast")
            .unwrap();
        file.flush().unwrap();

        let lines = read_log_lines(file.path()).await.unwrap();
        assert_eq!(
            lines,
            ["first|1", "second|2", "third|\u{e9}3", "fourth|4", "", "last"]
        );
    }

    #[test]
    fn split_lines_handles_each_terminator() {
        assert_eq!(split_lines(""), Vec::<String>::new());
        assert_eq!(split_lines("a\n"), ["a"]);
        assert_eq!(split_lines("a\r\rb"), ["a", "", "b"]);
        assert_eq!(split_lines("a\r\n\r\nb\r"), ["a", "", "b"]);
    }

    #[tokio::test]
    async fn read_log_lines_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_log_lines(&dir.path().join("nope.log")).await.is_err());
    }
}
