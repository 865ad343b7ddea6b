use apiary_core::{ApiaryError, ApiaryResult};
use serde::{Deserialize, Deserializer, Serialize};

/// Risk classification attached to recommendations and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    /// Routine, reversible work.
    Low,
    /// Reversible but user-visible work.
    Medium,
    /// Hard-to-reverse or externally visible work.
    High,
    /// Irreversible or safety-relevant work.
    Critical,
    /// Tier missing or unrecognized. Treated with maximum caution.
    Unknown,
}

impl RiskTier {
    /// Lenient parser: unrecognized strings map to [`RiskTier::Unknown`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" => RiskTier::Low,
            "medium" => RiskTier::Medium,
            "high" => RiskTier::High,
            "critical" => RiskTier::Critical,
            _ => RiskTier::Unknown,
        }
    }

    /// Whether this tier defaults to requiring human approval.
    pub fn defaults_to_approval(self) -> bool {
        matches!(self, RiskTier::High | RiskTier::Critical | RiskTier::Unknown)
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Low => write!(f, "low"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
            RiskTier::Critical => write!(f, "critical"),
            RiskTier::Unknown => write!(f, "unknown"),
        }
    }
}

impl<'de> Deserialize<'de> for RiskTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(RiskTier::parse(&raw))
    }
}

/// Untrusted risk metadata, as produced by upstream scorers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetadata {
    /// Claimed risk tier.
    #[serde(default)]
    pub risk_tier: Option<String>,
    /// Claimed confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Supporting evidence; must be non-empty to be trusted.
    #[serde(default)]
    pub evidence: Vec<serde_json::Value>,
}

/// Outcome of fail-closed risk metadata validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskValidation {
    /// Whether the metadata is complete and in range.
    pub ok: bool,
    /// Why validation failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The validated tier, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<RiskTier>,
    /// The validated confidence, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl RiskValidation {
    fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            risk_tier: None,
            confidence: None,
        }
    }
}

/// Fail-closed check of risk metadata: a missing tier, missing or
/// out-of-range confidence, or empty evidence rejects the metadata.
/// Incompleteness is never a pass.
pub fn validate_risk_metadata(metadata: &RiskMetadata) -> RiskValidation {
    let Some(tier_raw) = metadata.risk_tier.as_deref().map(str::trim).filter(|t| !t.is_empty())
    else {
        return RiskValidation::fail("missing risk tier (fail-closed)");
    };

    let tier = RiskTier::parse(tier_raw);
    if tier == RiskTier::Unknown {
        return RiskValidation::fail(format!("unknown risk tier \"{tier_raw}\" (fail-closed)"));
    }

    let Some(confidence) = metadata.confidence.filter(|c| c.is_finite()) else {
        return RiskValidation::fail("missing confidence score (fail-closed)");
    };
    if !(0.0..=1.0).contains(&confidence) {
        return RiskValidation::fail("confidence must be between 0 and 1 (fail-closed)");
    }

    if metadata.evidence.is_empty() {
        return RiskValidation::fail("missing evidence payload (fail-closed)");
    }

    RiskValidation {
        ok: true,
        reason: None,
        risk_tier: Some(tier),
        confidence: Some(confidence),
    }
}

/// Throwing form of [`validate_risk_metadata`].
pub fn assert_risk_metadata(metadata: &RiskMetadata) -> ApiaryResult<(RiskTier, f64)> {
    let validation = validate_risk_metadata(metadata);
    match (validation.risk_tier, validation.confidence) {
        (Some(tier), Some(confidence)) if validation.ok => Ok((tier, confidence)),
        _ => Err(ApiaryError::Policy(
            validation
                .reason
                .unwrap_or_else(|| "risk metadata validation failed".to_owned()),
        )),
    }
}
