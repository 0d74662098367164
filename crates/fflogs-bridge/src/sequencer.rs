//! Command sequencing for one invocation.
//!
//! Commands are pipelined: each is written once the previous write returns,
//! without waiting for any response. Responses are matched by channel, not by
//! pairing them with requests.

use std::time::Duration;

use async_trait::async_trait;

use crate::bridge::protocol::{Command, CorrelationId, Region, Request};
use crate::supervisor::SessionError;

/// Destination for commands. Implemented by [`Session`](crate::supervisor::Session).
#[async_trait]
pub trait CommandSink: Send {
    async fn send(&mut self, command: Command) -> Result<(), SessionError>;
}

/// Hands out correlation ids in increasing order, starting at 0.
#[derive(Debug, Default)]
pub struct CorrelationIds {
    next: u64,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> CorrelationId {
        let id = CorrelationId::new(self.next);
        self.next += 1;
        id
    }
}

/// Inputs the phase plan is built from.
#[derive(Debug, Clone)]
pub struct ParseJob {
    pub report_code: String,
    pub region: Region,
    pub lines: Vec<String>,
}

/// Build the fixed phase order: set the report code, submit the log, then ask
/// for fights and master info.
pub fn plan(job: ParseJob, ids: &mut CorrelationIds) -> Vec<Command> {
    let ParseJob {
        report_code,
        region,
        lines,
    } = job;

    vec![
        Command::new(
            ids.next_id(),
            Request::SetReportCode {
                report_code: report_code.clone(),
            },
        ),
        Command::new(
            ids.next_id(),
            Request::ParseLines {
                lines,
                is_live: false,
                region,
                selected_fights: Vec::new(),
            },
        ),
        Command::new(
            ids.next_id(),
            Request::CollectFights {
                is_live: false,
                for_report: false,
            },
        ),
        Command::new(ids.next_id(), Request::CollectMasterInfo { report_code }),
    ]
}

/// Pause after each send.
///
/// The worker acknowledges nothing, and it expects the report code to be in
/// place before lines arrive and parsing to finish before collection requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    /// After the first command.
    pub context: Duration,
    /// After every later command.
    pub phase: Duration,
}

impl SettleDelays {
    pub const NONE: Self = Self {
        context: Duration::ZERO,
        phase: Duration::ZERO,
    };
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            context: Duration::from_millis(100),
            phase: Duration::from_millis(500),
        }
    }
}

/// How far a sequence got.
#[derive(Debug)]
pub struct SequenceReport {
    pub sent: usize,
    pub total: usize,
    pub error: Option<SessionError>,
}

impl SequenceReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.sent == self.total
    }
}

/// Send `commands` in order, stopping at the first failed write.
pub async fn run<S>(sink: &mut S, commands: Vec<Command>, delays: SettleDelays) -> SequenceReport
where
    S: CommandSink + ?Sized,
{
    let total = commands.len();
    let mut sent = 0;

    for command in commands {
        let kind = command.kind();
        let id = command.id;
        if let Err(e) = sink.send(command).await {
            tracing::warn!(kind, %id, error = %e, "Command send failed, skipping remaining phases");
            return SequenceReport {
                sent,
                total,
                error: Some(e),
            };
        }
        tracing::debug!(kind, %id, "Command sent");

        let settle = if sent == 0 { delays.context } else { delays.phase };
        sent += 1;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
    }

    SequenceReport {
        sent,
        total,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<(Command, std::time::Instant)>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send(&mut self, command: Command) -> Result<(), SessionError> {
            if self.fail_after == Some(self.sent.len()) {
                return Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "worker exited",
                )));
            }
            self.sent.push((command, std::time::Instant::now()));
            Ok(())
        }
    }

    fn job() -> ParseJob {
        ParseJob {
            report_code: "xYz".to_string(),
            region: Region::Korea,
            lines: vec!["1".to_string(), "2".to_string()],
        }
    }

    #[test]
    fn plan_follows_phase_order_with_increasing_ids() {
        let mut ids = CorrelationIds::new();
        let commands = plan(job(), &mut ids);

        let kinds: Vec<_> = commands.iter().map(Command::kind).collect();
        assert_eq!(
            kinds,
            ["set-report-code", "parse-lines", "collect-fights", "collect-master-info"]
        );
        let ids_seen: Vec<_> = commands.iter().map(|c| c.id.get()).collect();
        assert_eq!(ids_seen, [0, 1, 2, 3]);
        assert_eq!(ids.next_id(), CorrelationId::new(4));
    }

    #[test]
    fn plan_carries_job_fields() {
        let commands = plan(job(), &mut CorrelationIds::new());
        assert_eq!(
            commands[1].request,
            Request::ParseLines {
                lines: vec!["1".to_string(), "2".to_string()],
                is_live: false,
                region: Region::Korea,
                selected_fights: vec![],
            }
        );
        assert_eq!(
            commands[3].request,
            Request::CollectMasterInfo {
                report_code: "xYz".to_string()
            }
        );
    }

    #[tokio::test]
    async fn sends_everything_in_order() {
        let mut sink = RecordingSink::default();
        let commands = plan(job(), &mut CorrelationIds::new());

        let report = run(&mut sink, commands, SettleDelays::NONE).await;

        assert!(report.is_complete());
        assert_eq!(report.sent, 4);
        let ids: Vec<_> = sink.sent.iter().map(|(c, _)| c.id.get()).collect();
        assert_eq!(ids, [0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn stops_at_first_failed_send() {
        let mut sink = RecordingSink {
            fail_after: Some(2),
            ..Default::default()
        };
        let commands = plan(job(), &mut CorrelationIds::new());

        let report = run(&mut sink, commands, SettleDelays::NONE).await;

        assert!(!report.is_complete());
        assert_eq!(report.sent, 2);
        assert_eq!(report.total, 4);
        assert!(matches!(report.error, Some(SessionError::Io(_))));
        assert_eq!(sink.sent.len(), 2);
    }

    #[tokio::test]
    async fn settle_delays_space_out_sends() {
        let mut sink = RecordingSink::default();
        let commands = plan(job(), &mut CorrelationIds::new());
        let delays = SettleDelays {
            context: Duration::from_millis(30),
            phase: Duration::from_millis(60),
        };

        run(&mut sink, commands, delays).await;

        let gaps: Vec<Duration> = sink
            .sent
            .windows(2)
            .map(|w| w[1].1.duration_since(w[0].1))
            .collect();
        assert!(gaps[0] >= Duration::from_millis(30));
        assert!(gaps[1] >= Duration::from_millis(60));
        assert!(gaps[2] >= Duration::from_millis(60));
    }
}
