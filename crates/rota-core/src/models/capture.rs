//! Capture input and validation

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ValidationError};

use super::action::{ActionFields, ActionKind, ActionRecord, PhotoAsset};

/// Default order identifier format, applied after normalization.
pub const DEFAULT_BARCODE_PATTERN: &str = r"^[A-Z0-9]{8,32}$";

/// Raw capture handed over by the scanning screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    /// Scanned or typed barcode
    pub barcode: String,
    /// Barcode of the order the courier opened, when the capture came from an order screen
    #[serde(default)]
    pub expected_barcode: Option<String>,
    pub kind: ActionKind,
    pub fields: ActionFields,
    #[serde(default)]
    pub photo_path: Option<String>,
}

/// Normalize a barcode the way the ledger stores it.
#[must_use]
pub fn normalize_barcode(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Validates captures before they may enter the queue.
#[derive(Debug, Clone)]
pub struct CaptureValidator {
    pattern: Regex,
}

impl CaptureValidator {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|error| Error::InvalidInput(format!("Invalid barcode pattern: {error}")))?;
        Ok(Self { pattern })
    }

    /// Turn a request into a pending record, or explain why it is rejected.
    pub fn validate(
        &self,
        request: CaptureRequest,
    ) -> std::result::Result<ActionRecord, ValidationError> {
        let barcode = normalize_barcode(&request.barcode);
        if barcode.is_empty() {
            return Err(ValidationError::EmptyBarcode);
        }
        if !self.pattern.is_match(&barcode) {
            return Err(ValidationError::MalformedBarcode(barcode));
        }
        if let Some(expected) = request.expected_barcode.as_deref() {
            let expected = normalize_barcode(expected);
            if expected != barcode {
                return Err(ValidationError::BarcodeMismatch {
                    scanned: barcode,
                    expected,
                });
            }
        }

        let fields = normalize_fields(request.kind, request.fields)?;

        let photo_path = request
            .photo_path
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty());
        if request.kind.requires_photo() && photo_path.is_none() {
            return Err(ValidationError::MissingPhoto);
        }

        Ok(ActionRecord::new(
            barcode,
            request.kind,
            fields,
            photo_path.map(PhotoAsset::local),
        ))
    }
}

fn normalize_fields(
    kind: ActionKind,
    fields: ActionFields,
) -> std::result::Result<ActionFields, ValidationError> {
    match (kind, fields) {
        (
            ActionKind::Delivery | ActionKind::Return,
            ActionFields::Receiver {
                receiver_name,
                receiver_type,
            },
        ) => {
            let receiver_name = receiver_name.trim().to_string();
            if receiver_name.is_empty() {
                return Err(ValidationError::MissingReceiverName);
            }
            Ok(ActionFields::Receiver {
                receiver_name,
                receiver_type,
            })
        }
        (ActionKind::Delivery | ActionKind::Return, _) => {
            Err(ValidationError::MissingReceiverName)
        }
        (ActionKind::FailedAttempt, ActionFields::Failure { reason }) => {
            let reason = reason.trim().to_string();
            if reason.is_empty() {
                return Err(ValidationError::MissingFailureReason);
            }
            Ok(ActionFields::Failure { reason })
        }
        (ActionKind::FailedAttempt, _) => Err(ValidationError::MissingFailureReason),
        (ActionKind::Collection, ActionFields::Empty) => Ok(ActionFields::Empty),
        (ActionKind::Collection, _) => Err(ValidationError::FieldsMismatch("collection")),
    }
}
