//! Response collection with a bounded wait.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::bridge::protocol::Event;

/// What happened to an event offered to [`CollectionState::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Accepted,
    /// The channel already has a payload; the first one is kept.
    Duplicate,
    /// Not a channel this collection waits for.
    Unexpected,
    /// Expected channel, but the payload was empty (see [`is_empty_payload`]).
    Empty,
}

/// Payloads received so far for the channels a collection waits on.
#[derive(Debug, Clone)]
pub struct CollectionState {
    payloads: BTreeMap<String, Option<serde_json::Value>>,
    deadline: Instant,
    timed_out: bool,
}

impl CollectionState {
    pub fn new(expected: &[&str], deadline: Instant) -> Self {
        Self {
            payloads: expected.iter().map(|c| (c.to_string(), None)).collect(),
            deadline,
            timed_out: false,
        }
    }

    /// Record an event's payload. A recorded payload is never overwritten.
    pub fn record(&mut self, event: Event) -> Recorded {
        let Some(slot) = self.payloads.get_mut(&event.channel) else {
            return Recorded::Unexpected;
        };
        if slot.is_some() {
            return Recorded::Duplicate;
        }
        if is_empty_payload(&event.data) {
            return Recorded::Empty;
        }
        *slot = Some(event.data);
        Recorded::Accepted
    }

    /// Every expected channel has a payload.
    pub fn is_satisfied(&self) -> bool {
        self.payloads.values().all(Option::is_some)
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        self.is_satisfied() || now >= self.deadline
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn payload(&self, channel: &str) -> Option<&serde_json::Value> {
        self.payloads.get(channel).and_then(Option::as_ref)
    }

    /// Move a payload out of the state.
    pub fn take(&mut self, channel: &str) -> Option<serde_json::Value> {
        self.payloads.get_mut(channel).and_then(Option::take)
    }

    pub fn missing(&self) -> Vec<&str> {
        self.payloads
            .iter()
            .filter(|(_, payload)| payload.is_none())
            .map(|(channel, _)| channel.as_str())
            .collect()
    }
}

/// A payload that carries no result: null, false, zero, or an empty string,
/// array or object. The worker answers with these when it has nothing to
/// report, so they never satisfy a channel.
pub fn is_empty_payload(value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Wait for `expected` channels until all have reported or `deadline` passes.
///
/// Returns as soon as the last expected payload arrives. If the event channel
/// closes first (the worker exited), nothing more can arrive, but the call
/// still returns at the deadline so callers see one timing contract.
pub async fn collect(
    events: &mut mpsc::UnboundedReceiver<Event>,
    expected: &[&str],
    deadline: Instant,
) -> CollectionState {
    let mut state = CollectionState::new(expected, deadline);

    while !state.is_satisfied() {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => {
                let channel = event.channel.clone();
                match state.record(event) {
                    Recorded::Accepted => tracing::debug!(%channel, "Collected payload"),
                    Recorded::Duplicate => {
                        tracing::debug!(%channel, "Ignoring repeated payload for channel")
                    }
                    Recorded::Unexpected => tracing::debug!(%channel, "Ignoring unexpected channel"),
                    Recorded::Empty => tracing::debug!(%channel, "Ignoring empty payload"),
                }
            }
            Ok(None) => {
                tracing::debug!(missing = ?state.missing(), "Event stream closed before collection completed");
                tokio::time::sleep_until(deadline).await;
                state.timed_out = true;
                break;
            }
            Err(_) => {
                state.timed_out = true;
                break;
            }
        }
    }

    if state.timed_out {
        tracing::warn!(missing = ?state.missing(), "Collection deadline elapsed");
    }
    state
}
