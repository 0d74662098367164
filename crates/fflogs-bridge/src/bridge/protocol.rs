//! Wire protocol types for host-worker communication.
//!
//! One channel in each direction:
//! - **stdin** (host -> worker): [`Command`]s, one JSON object per line
//! - **stdout** (worker -> host): [`Event`]s behind the `__IPC__:` sentinel,
//!   interleaved with free-form diagnostic output that is not protocol traffic

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Channel carrying the fight/segment list.
pub const FIGHTS_CHANNEL: &str = "ipc-collect-fights";

/// Channel carrying the report master metadata.
pub const MASTER_INFO_CHANNEL: &str = "ipc-collect-master-info";

/// Unique identifier for a worker session, used only for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ties a response back to the command that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Region the log was recorded in, as understood by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    #[default]
    #[serde(rename = "NA")]
    NorthAmerica,
    #[serde(rename = "EU")]
    Europe,
    #[serde(rename = "JP")]
    Japan,
    #[serde(rename = "CN")]
    China,
    #[serde(rename = "KR")]
    Korea,
}

impl Region {
    /// Map the numeric region code used by the game client.
    ///
    /// Unknown codes fall back to NA, which is what the worker assumes when
    /// no region is given.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::NorthAmerica,
            2 => Self::Europe,
            3 => Self::Japan,
            4 => Self::China,
            5 => Self::Korea,
            _ => Self::NorthAmerica,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NorthAmerica => "NA",
            Self::Europe => "EU",
            Self::Japan => "JP",
            Self::China => "CN",
            Self::Korea => "KR",
        }
    }
}

/// Kind-specific part of a command sent to the worker.
///
/// The `message` tag carries the kind; field names are camelCase on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "message", rename_all = "kebab-case")]
pub enum Request {
    /// Establishes the report code the worker echoes back in later responses.
    #[serde(rename_all = "camelCase")]
    SetReportCode { report_code: String },

    /// Transmits the whole input log in one message.
    #[serde(rename_all = "camelCase")]
    ParseLines {
        lines: Vec<String>,
        is_live: bool,
        region: Region,
        selected_fights: Vec<u64>,
    },

    #[serde(rename_all = "camelCase")]
    CollectFights { is_live: bool, for_report: bool },

    #[serde(rename_all = "camelCase")]
    CollectMasterInfo { report_code: String },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetReportCode { .. } => "set-report-code",
            Self::ParseLines { .. } => "parse-lines",
            Self::CollectFights { .. } => "collect-fights",
            Self::CollectMasterInfo { .. } => "collect-master-info",
        }
    }
}

/// A single command sent to the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CorrelationId,
    pub request: Request,
}

impl Command {
    pub fn new(id: CorrelationId, request: Request) -> Self {
        Self { id, request }
    }

    pub fn kind(&self) -> &'static str {
        self.request.kind()
    }

    /// Parse an encoded command line back into a [`Command`].
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Envelope {
            id: CorrelationId,
            #[serde(flatten)]
            request: Request,
        }

        let envelope: Envelope = serde_json::from_str(line.trim_end())?;
        Ok(Self {
            id: envelope.id,
            request: envelope.request,
        })
    }
}

// Written by hand so `message` and `id` lead the object, matching the order
// the worker has always received.
impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("message", self.kind())?;
        map.serialize_entry("id", &self.id)?;
        match &self.request {
            Request::SetReportCode { report_code } => {
                map.serialize_entry("reportCode", report_code)?;
            }
            Request::ParseLines {
                lines,
                is_live,
                region,
                selected_fights,
            } => {
                map.serialize_entry("lines", lines)?;
                map.serialize_entry("isLive", is_live)?;
                map.serialize_entry("region", region)?;
                map.serialize_entry("selectedFights", selected_fights)?;
            }
            Request::CollectFights {
                is_live,
                for_report,
            } => {
                map.serialize_entry("isLive", is_live)?;
                map.serialize_entry("forReport", for_report)?;
            }
            Request::CollectMasterInfo { report_code } => {
                map.serialize_entry("reportCode", report_code)?;
            }
        }
        map.end()
    }
}

/// A tagged response emitted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Response type, used for demultiplexing.
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(channel: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            id: None,
            data,
        }
    }

    pub fn with_id(mut self, id: CorrelationId) -> Self {
        self.id = Some(id);
        self
    }
}
