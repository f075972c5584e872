//! Typed requests, responses, and updates of the control protocol.
//!
//! Each request type names its address path and the response it expects;
//! bodies are JSON with camelCase keys. Updates are built from their
//! address path by [`ControlUpdate::parse`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address paths understood by the control service
pub mod paths {
    /// Liveness check
    pub const KEEP_ALIVE: &str = "/session/keepAlive";
    /// Establish a session
    pub const START_SESSION: &str = "/session/start";
    /// End the current session
    pub const STOP_SESSION: &str = "/session/stop";
    /// Server identity and software versions
    pub const SERVER_INFO: &str = "/server/info";
    /// Start receiving updates
    pub const SUBSCRIBE: &str = "/events/subscribe";
    /// Stop receiving updates
    pub const UNSUBSCRIBE: &str = "/events/unsubscribe";
    /// Current device state
    pub const GET_STATE: &str = "/state";
    /// Begin recording a take
    pub const START_RECORDING: &str = "/recording/start";
    /// Finish recording the current take
    pub const STOP_RECORDING: &str = "/recording/stop";
    /// Discard the take being recorded
    pub const ABORT_RECORDING: &str = "/recording/abort";
    /// Names of the takes stored on the device
    pub const TAKE_LIST: &str = "/takes";
    /// Metadata for a set of takes
    pub const TAKE_METADATA: &str = "/takes/metadata";

    /// The server ended the session
    pub const SESSION_STOPPED: &str = "/session/stopped";
    /// Recording began
    pub const RECORDING_STARTED: &str = "/recording/started";
    /// Recording ended
    pub const RECORDING_STOPPED: &str = "/recording/stopped";
    /// A take was stored
    pub const TAKE_ADDED: &str = "/take/added";
    /// A take was deleted
    pub const TAKE_REMOVED: &str = "/take/removed";
    /// A take's metadata changed
    pub const TAKE_UPDATED: &str = "/take/updated";
    /// Storage capacity report
    pub const DISK_CAPACITY: &str = "/state/diskCapacity";
    /// Battery report
    pub const BATTERY: &str = "/state/battery";
    /// Thermal state report
    pub const THERMALS: &str = "/state/thermals";
}

/// A request that can be sent through the messenger
pub trait ControlRequest: Serialize + Send + 'static {
    /// Body type of a successful response
    type Response: DeserializeOwned + Send + 'static;

    /// Address path the request is sent to
    const ADDRESS_PATH: &'static str;
}

/// Response with no payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResponse {}

macro_rules! empty_request {
    ($(#[$doc:meta])* $name:ident, $path:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {}

        impl ControlRequest for $name {
            type Response = EmptyResponse;
            const ADDRESS_PATH: &'static str = $path;
        }
    };
}

empty_request!(
    /// Periodic liveness check
    KeepAlive,
    paths::KEEP_ALIVE
);
empty_request!(
    /// End the current session
    StopSession,
    paths::STOP_SESSION
);
empty_request!(
    /// Start receiving update messages
    Subscribe,
    paths::SUBSCRIBE
);
empty_request!(
    /// Stop receiving update messages
    Unsubscribe,
    paths::UNSUBSCRIBE
);
empty_request!(
    /// Discard the take being recorded
    AbortRecordingTake,
    paths::ABORT_RECORDING
);

/// Establish a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSession {}

/// Server-issued session identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    /// Identifier of the new session
    pub session_id: String,
}

impl ControlRequest for StartSession {
    type Response = StartSessionResponse;
    const ADDRESS_PATH: &'static str = paths::START_SESSION;
}

/// Ask for server identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetServerInformation {}

/// Server identity and software versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfoResponse {
    /// Stable device identifier
    pub id: String,
    /// User-visible device name
    pub name: String,
    /// Hardware model
    pub model: String,
    /// Operating system name
    pub platform_name: String,
    /// Operating system version
    pub platform_version: String,
    /// Capture application name
    pub software_name: String,
    /// Capture application version
    pub software_version: String,
}

impl ControlRequest for GetServerInformation {
    type Response = ServerInfoResponse;
    const ADDRESS_PATH: &'static str = paths::SERVER_INFO;
}

/// Ask for the current device state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetState {}

/// Device state snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    /// Whether a take is being recorded
    pub is_recording: bool,
    /// Platform-specific state, passed through untouched
    #[serde(default)]
    pub platform_state: serde_json::Value,
}

impl ControlRequest for GetState {
    type Response = StateResponse;
    const ADDRESS_PATH: &'static str = paths::GET_STATE;
}

/// Begin recording a take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingTake {
    /// Slate name
    pub slate_name: String,
    /// Take number within the slate
    pub take_number: u32,
    /// Optional free-form description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ControlRequest for StartRecordingTake {
    type Response = EmptyResponse;
    const ADDRESS_PATH: &'static str = paths::START_RECORDING;
}

/// Finish recording the current take
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRecordingTake {}

/// Name under which the finished take was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordingTakeResponse {
    /// Stored take name
    pub take_name: String,
}

impl ControlRequest for StopRecordingTake {
    type Response = StopRecordingTakeResponse;
    const ADDRESS_PATH: &'static str = paths::STOP_RECORDING;
}

/// List stored takes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTakeList {}

/// Stored take names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeListResponse {
    /// Take names
    pub names: Vec<String>,
}

impl ControlRequest for GetTakeList {
    type Response = TakeListResponse;
    const ADDRESS_PATH: &'static str = paths::TAKE_LIST;
}

/// Fetch metadata for named takes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTakeMetadata {
    /// Takes to describe
    pub names: Vec<String>,
}

/// Metadata of a single take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeMetadata {
    /// Stored take name
    pub name: String,
    /// Slate name
    pub slate_name: String,
    /// Take number within the slate
    pub take_number: u32,
    /// Recording start as an ISO-8601 timestamp
    pub date_time: String,
    /// Length in frames
    pub num_frames: u64,
    /// Files making up the take
    #[serde(default)]
    pub files: Vec<TakeFile>,
}

/// One file belonging to a take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeFile {
    /// File name relative to the take
    pub name: String,
    /// Size in bytes
    pub length: u64,
}

/// Metadata for the requested takes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeMetadataResponse {
    /// One entry per known take
    pub takes: Vec<TakeMetadata>,
}

impl ControlRequest for GetTakeMetadata {
    type Response = TakeMetadataResponse;
    const ADDRESS_PATH: &'static str = paths::TAKE_METADATA;
}

/// Take name carried by recording and take updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeNameUpdate {
    /// Affected take
    pub take_name: String,
}

/// Storage capacity report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskCapacityUpdate {
    /// Total capacity in bytes
    pub total: u64,
    /// Free capacity in bytes
    pub remaining: u64,
}

/// Battery report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryUpdate {
    /// Charge level in `0.0..=1.0`
    pub level: f32,
}

/// Thermal state report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermalsUpdate {
    /// Platform thermal state, e.g. `nominal` or `serious`
    pub state: String,
}

/// An update message parsed according to its address path
#[derive(Debug, Clone, PartialEq)]
pub enum ControlUpdate {
    /// The server ended the session
    SessionStopped,
    /// Recording began
    RecordingStarted,
    /// Recording ended and the take was stored
    RecordingStopped(TakeNameUpdate),
    /// A take was stored
    TakeAdded(TakeNameUpdate),
    /// A take was deleted
    TakeRemoved(TakeNameUpdate),
    /// A take's metadata changed
    TakeUpdated(TakeNameUpdate),
    /// Storage capacity report
    DiskCapacity(DiskCapacityUpdate),
    /// Battery report
    Battery(BatteryUpdate),
    /// Thermal state report
    Thermals(ThermalsUpdate),
}

/// Failure to build an update from a message
#[derive(Error, Debug)]
pub enum UpdateParseError {
    /// No update type is known for the address path
    #[error("unknown update address path: {0}")]
    UnknownPath(String),
    /// The body did not match the update type
    #[error("invalid body for {path}: {source}")]
    Body {
        /// Address path of the update
        path: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

impl ControlUpdate {
    /// Build the update registered for `address_path` from its JSON body
    pub fn parse(address_path: &str, body: &[u8]) -> Result<Self, UpdateParseError> {
        let update = match address_path {
            paths::SESSION_STOPPED => ControlUpdate::SessionStopped,
            paths::RECORDING_STARTED => ControlUpdate::RecordingStarted,
            paths::RECORDING_STOPPED => ControlUpdate::RecordingStopped(parse_body(address_path, body)?),
            paths::TAKE_ADDED => ControlUpdate::TakeAdded(parse_body(address_path, body)?),
            paths::TAKE_REMOVED => ControlUpdate::TakeRemoved(parse_body(address_path, body)?),
            paths::TAKE_UPDATED => ControlUpdate::TakeUpdated(parse_body(address_path, body)?),
            paths::DISK_CAPACITY => ControlUpdate::DiskCapacity(parse_body(address_path, body)?),
            paths::BATTERY => ControlUpdate::Battery(parse_body(address_path, body)?),
            paths::THERMALS => ControlUpdate::Thermals(parse_body(address_path, body)?),
            other => return Err(UpdateParseError::UnknownPath(other.to_string())),
        };
        Ok(update)
    }

    /// Address path this update is delivered on
    pub fn address_path(&self) -> &'static str {
        match self {
            ControlUpdate::SessionStopped => paths::SESSION_STOPPED,
            ControlUpdate::RecordingStarted => paths::RECORDING_STARTED,
            ControlUpdate::RecordingStopped(_) => paths::RECORDING_STOPPED,
            ControlUpdate::TakeAdded(_) => paths::TAKE_ADDED,
            ControlUpdate::TakeRemoved(_) => paths::TAKE_REMOVED,
            ControlUpdate::TakeUpdated(_) => paths::TAKE_UPDATED,
            ControlUpdate::DiskCapacity(_) => paths::DISK_CAPACITY,
            ControlUpdate::Battery(_) => paths::BATTERY,
            ControlUpdate::Thermals(_) => paths::THERMALS,
        }
    }
}

fn parse_body<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T, UpdateParseError> {
    serde_json::from_slice(body).map_err(|source| UpdateParseError::Body {
        path: path.to_string(),
        source,
    })
}

/// Decode a JSON response body, treating an empty body as `{}`
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_slice(b"{}")
    } else {
        serde_json::from_slice(body)
    }
}
