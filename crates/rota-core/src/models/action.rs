//! Action record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::status::OrderStatus;
use crate::util::now_millis;

/// A unique identifier for a queued action, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The courier action a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Delivery,
    Return,
    FailedAttempt,
    Collection,
}

impl ActionKind {
    pub const ALL: [Self; 4] = [
        Self::Delivery,
        Self::Return,
        Self::FailedAttempt,
        Self::Collection,
    ];

    /// Stable storage/log identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Return => "return",
            Self::FailedAttempt => "failed_attempt",
            Self::Collection => "collection",
        }
    }

    /// Slug used in deterministic asset names.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Return => "return",
            Self::FailedAttempt => "failed-attempt",
            Self::Collection => "collection",
        }
    }

    /// Remote status the order must be in for this action to apply.
    #[must_use]
    pub const fn precondition(self) -> OrderStatus {
        match self {
            Self::Delivery | Self::FailedAttempt => OrderStatus::EmRota,
            Self::Return => OrderStatus::Devolucao,
            Self::Collection => OrderStatus::AguardandoColeta,
        }
    }

    /// Remote status this action transitions the order to.
    #[must_use]
    pub const fn target(self) -> OrderStatus {
        match self {
            Self::Delivery => OrderStatus::Entregue,
            Self::Return => OrderStatus::Devolvido,
            Self::FailedAttempt => OrderStatus::TentativaFalha,
            Self::Collection => OrderStatus::Coletado,
        }
    }

    /// Whether a capture of this kind must carry a photo.
    #[must_use]
    pub const fn requires_photo(self) -> bool {
        matches!(self, Self::Delivery | Self::Return)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown action kind '{s}'"))
    }
}

/// Who signed for a delivery or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiverType {
    #[serde(rename = "self")]
    Recipient,
    #[serde(rename = "family")]
    Family,
    #[serde(rename = "friend")]
    Friend,
    #[serde(rename = "neighbor")]
    Neighbor,
}

impl ReceiverType {
    /// Label stored in the remote ledger.
    #[must_use]
    pub const fn ledger_label(self) -> &'static str {
        match self {
            Self::Recipient => "O próprio",
            Self::Family => "Familiar",
            Self::Friend => "Amigo",
            Self::Neighbor => "Vizinho",
        }
    }
}

impl FromStr for ReceiverType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "self" | "recipient" => Ok(Self::Recipient),
            "family" => Ok(Self::Family),
            "friend" => Ok(Self::Friend),
            "neighbor" | "neighbour" => Ok(Self::Neighbor),
            other => Err(format!("unknown receiver type '{other}'")),
        }
    }
}

/// Kind-specific payload of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionFields {
    /// Delivery and return confirmations.
    Receiver {
        receiver_name: String,
        receiver_type: ReceiverType,
    },
    /// Failed delivery attempts.
    Failure { reason: String },
    /// Collections carry no payload.
    Empty,
}

/// Remote location of an uploaded photo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRef(pub String);

impl RemoteRef {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Photo attached to an action.
///
/// `remote_ref` is set once the upload succeeded, independently of whether
/// the status change has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoAsset {
    pub local_path: String,
    pub remote_ref: Option<RemoteRef>,
}

impl PhotoAsset {
    #[must_use]
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            local_path: path.into(),
            remote_ref: None,
        }
    }

    #[must_use]
    pub const fn is_uploaded(&self) -> bool {
        self.remote_ref.is_some()
    }
}

/// Why a record stopped being retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Remote order never reached the expected pre-condition.
    StaleState,
    /// Remote kept failing transiently past the retry bound.
    NetworkExhausted(String),
    /// Photo cannot be uploaded; needs recapture.
    Asset(String),
    /// Remote rejected the write permanently.
    Rejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleState => f.write_str("remote order is not in the expected state"),
            Self::NetworkExhausted(detail) => write!(f, "remote unreachable: {detail}"),
            Self::Asset(detail) => write!(f, "photo needs recapture: {detail}"),
            Self::Rejected(detail) => write!(f, "remote rejected the update: {detail}"),
        }
    }
}

/// Sync progress of a queued record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Pending,
    Uploading,
    Applying,
    Synced,
    Failed(FailureReason),
}

impl SyncState {
    /// Storage tag for the state column.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Applying => "applying",
            Self::Synced => "synced",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether a drain is currently working on the record.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Uploading | Self::Applying)
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One courier-initiated state change waiting to reach the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Stable identifier
    pub id: RecordId,
    /// Insertion sequence (FIFO order), assigned by the store
    pub seq: i64,
    /// Normalized order barcode
    pub barcode: String,
    pub kind: ActionKind,
    pub fields: ActionFields,
    pub photo: Option<PhotoAsset>,
    /// Capture timestamp (Unix ms)
    pub created_at: i64,
    pub sync_state: SyncState,
    /// Retry-later outcomes so far
    pub attempts: u32,
    /// Earliest retry time (Unix ms)
    pub next_attempt_at: Option<i64>,
    /// Last transient error, for display
    pub last_error: Option<String>,
    /// Bumped by the store on every in-place re-capture
    #[serde(default)]
    pub revision: u32,
}

impl ActionRecord {
    /// Create a pending record; `seq` is assigned on append.
    #[must_use]
    pub fn new(
        barcode: impl Into<String>,
        kind: ActionKind,
        fields: ActionFields,
        photo: Option<PhotoAsset>,
    ) -> Self {
        Self {
            id: RecordId::new(),
            seq: 0,
            barcode: barcode.into(),
            kind,
            fields,
            photo,
            created_at: now_millis(),
            sync_state: SyncState::Pending,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            revision: 0,
        }
    }

    /// Remote reference of the uploaded photo, if any.
    #[must_use]
    pub fn photo_ref(&self) -> Option<&RemoteRef> {
        self.photo.as_ref().and_then(|photo| photo.remote_ref.as_ref())
    }

    /// Whether the photo still has to be uploaded before applying.
    #[must_use]
    pub fn needs_upload(&self) -> bool {
        self.photo
            .as_ref()
            .is_some_and(|photo| !photo.is_uploaded())
    }

    /// Whether backoff allows an attempt at `now_ms`.
    #[must_use]
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now_ms)
    }
}
