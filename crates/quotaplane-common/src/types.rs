//! Common value types shared across the control plane.

use serde::{Deserialize, Serialize};

/// Upstream provider an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    Mistral,
    Groq,
}

impl Provider {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Mistral => "mistral",
            Self::Groq => "groq",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "mistral" => Ok(Self::Mistral),
            "groq" => Ok(Self::Groq),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Rate-limit dimension tracked per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    /// Requests per minute.
    Rpm,
    /// Tokens per minute.
    Tpm,
    /// Requests per day.
    Rpd,
    /// Tokens per day.
    Tpd,
    /// Concurrent in-flight requests.
    Concurrent,
}

impl DimensionType {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rpm => "rpm",
            Self::Tpm => "tpm",
            Self::Rpd => "rpd",
            Self::Tpd => "tpd",
            Self::Concurrent => "concurrent",
        }
    }
}

impl std::fmt::Display for DimensionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed rate-limit dimension of an account's quota.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaDimension {
    /// Dimension being measured.
    #[serde(rename = "type")]
    pub kind: DimensionType,
    /// Upper bound reported by the provider.
    pub limit: i64,
    /// Amount consumed in the current window.
    pub used: i64,
    /// Amount still available in the current window.
    pub remaining: i64,
}

impl QuotaDimension {
    /// Create a dimension with `remaining` derived from limit and used.
    pub fn new(kind: DimensionType, limit: i64, used: i64) -> Self {
        Self {
            kind,
            limit,
            used,
            remaining: (limit - used).max(0),
        }
    }

    /// Whether this dimension still has headroom.
    pub fn has_headroom(&self) -> bool {
        self.remaining > 0
    }
}

/// Where a quota observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuotaSource {
    /// Inferred from response headers seen by a passive observer.
    #[default]
    Passive,
    /// Probed by an active checker.
    Active,
    /// Pushed through the ingest surface.
    Ingest,
    /// Written directly by an administrative call.
    Direct,
}

impl QuotaSource {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Active => "active",
            Self::Ingest => "ingest",
            Self::Direct => "direct",
        }
    }
}
