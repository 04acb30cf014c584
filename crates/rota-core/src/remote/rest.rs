//! PostgREST client for the orders table.
//!
//! Lookups filter on `codigo_barras`. Writes are conditional PATCHes that
//! also filter on the expected `status`, with `Prefer: return=representation`
//! so an empty result means another writer moved the order first.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{ApplyOutcome, ApplyRequest, RemoteError, RemoteLedger, RemoteResult};
use crate::config::RemoteConfig;
use crate::models::{ActionFields, OrderStatus, RemoteOrder};
use crate::util::compact_text;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RestLedgerClient {
    base_url: String,
    table: String,
    api_key: String,
    bearer: String,
    client: reqwest::Client,
}

impl RestLedgerClient {
    /// `access_token` is the courier session token; without one the API key
    /// is used as the bearer.
    pub fn new(config: &RemoteConfig, access_token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|error| {
                Error::InvalidInput(format!("Failed to construct HTTP client: {error}"))
            })?;
        Ok(Self {
            base_url: config.ledger_url.clone(),
            table: config.table.clone(),
            api_key: config.api_key.clone(),
            bearer: access_token.unwrap_or(&config.api_key).to_string(),
            client,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }
}

impl RemoteLedger for RestLedgerClient {
    async fn fetch_status(&self, barcode: &str) -> RemoteResult<Option<RemoteOrder>> {
        let url = format!(
            "{}?codigo_barras=eq.{}&select=*&limit=1",
            self.table_url(),
            urlencoding::encode(barcode)
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.bearer)
            .header("apikey", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| RemoteError::Network(format!("Order lookup failed: {error}")))?;

        let rows = read_rows(response).await?;
        rows.into_iter().next().map(OrderRow::into_order).transpose()
    }

    async fn apply(&self, request: &ApplyRequest) -> RemoteResult<ApplyOutcome> {
        let url = format!(
            "{}?codigo_barras=eq.{}&status=eq.{}",
            self.table_url(),
            urlencoding::encode(&request.barcode),
            urlencoding::encode(request.expected.as_str())
        );
        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.bearer)
            .header("apikey", &self.api_key)
            .header("Accept", "application/json")
            .header("Prefer", "return=representation")
            .json(&update_payload(request))
            .send()
            .await
            .map_err(|error| RemoteError::Network(format!("Order update failed: {error}")))?;

        let rows = read_rows(response).await?;
        if rows.is_empty() {
            Ok(ApplyOutcome::Conflict)
        } else {
            Ok(ApplyOutcome::Applied)
        }
    }
}

/// Row shape of the orders table; unknown columns are ignored.
#[derive(Debug, Deserialize)]
struct OrderRow {
    codigo_barras: String,
    status: String,
    #[serde(default)]
    motorista_id: Option<Value>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl OrderRow {
    fn into_order(self) -> RemoteResult<RemoteOrder> {
        let assigned_courier = match self.motorista_id {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id),
            Some(Value::Number(id)) => Some(id.to_string()),
            Some(other) => {
                return Err(RemoteError::InvalidPayload(format!(
                    "unexpected motorista_id value: {other}"
                )))
            }
        };
        let updated_at = self
            .updated_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.timestamp_millis());

        Ok(RemoteOrder {
            barcode: self.codigo_barras,
            status: OrderStatus::parse(&self.status),
            assigned_courier,
            updated_at,
        })
    }
}

async fn read_rows(response: reqwest::Response) -> RemoteResult<Vec<OrderRow>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Http {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        });
    }
    response
        .json::<Vec<OrderRow>>()
        .await
        .map_err(|error| RemoteError::InvalidPayload(error.to_string()))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

fn iso_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

/// Column updates for a status transition.
///
/// A return only records its date and photo; the receiver columns belong
/// to the delivery.
fn update_payload(request: &ApplyRequest) -> Value {
    let mut body = Map::new();
    body.insert("status".into(), json!(request.new_status.as_str()));

    let occurred_at = iso_timestamp(request.occurred_at);
    if request.new_status == OrderStatus::Devolvido {
        body.insert("data_devolucao".into(), json!(occurred_at));
        if let Some(photo_ref) = &request.photo_ref {
            body.insert("imagem_entrega".into(), json!(photo_ref.as_str()));
        }
        return Value::Object(body);
    }

    let (date_column, courier_column) = match request.new_status {
        OrderStatus::Coletado => ("data_coleta", "motorista_coleta_id"),
        _ => ("data_entrega", "motorista_id"),
    };
    body.insert(date_column.into(), json!(occurred_at));
    body.insert(courier_column.into(), json!(request.courier_id));

    match &request.fields {
        ActionFields::Receiver {
            receiver_name,
            receiver_type,
        } => {
            body.insert("Nome_recebedor_entrega".into(), json!(receiver_name));
            body.insert(
                "Tipo_recebedor_entrega".into(),
                json!(receiver_type.ledger_label()),
            );
        }
        ActionFields::Failure { reason } => {
            body.insert("motivo_falha".into(), json!(reason));
        }
        ActionFields::Empty => {}
    }

    if let Some(photo_ref) = &request.photo_ref {
        body.insert("imagem_entrega".into(), json!(photo_ref.as_str()));
    }

    Value::Object(body)
}
