//! Remote order status model

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Order status as stored by the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    AguardandoColeta,
    Coletado,
    EmRota,
    Entregue,
    Devolucao,
    Devolvido,
    TentativaFalha,
    /// Any status this client does not know about.
    Other(String),
}

impl OrderStatus {
    /// Wire value used by the ledger.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AguardandoColeta => "aguardando coleta",
            Self::Coletado => "coletado",
            Self::EmRota => "em rota",
            Self::Entregue => "entregue",
            Self::Devolucao => "devolucao",
            Self::Devolvido => "devolvido",
            Self::TentativaFalha => "tentativa falha",
            Self::Other(value) => value,
        }
    }

    /// Parse a wire value, case- and whitespace-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "aguardando coleta" => Self::AguardandoColeta,
            "coletado" => Self::Coletado,
            "em rota" => Self::EmRota,
            "entregue" => Self::Entregue,
            "devolucao" | "devolução" => Self::Devolucao,
            "devolvido" => Self::Devolvido,
            "tentativa falha" => Self::TentativaFalha,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// No courier action applies past a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Entregue | Self::Devolvido | Self::TentativaFalha)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Current state of an order in the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub barcode: String,
    pub status: OrderStatus,
    /// Courier the order is currently assigned to, when the ledger tracks it.
    pub assigned_courier: Option<String>,
    /// Last remote modification (Unix ms), when known.
    pub updated_at: Option<i64>,
}
