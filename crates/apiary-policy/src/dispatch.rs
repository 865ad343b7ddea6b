use apiary_core::{normalize_labels, ApiaryResult, TaskRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// A named pattern whose match in the task text denies dispatch.
#[derive(Debug, Clone)]
pub struct BlockedPattern {
    /// Rule name, surfaced in deny reasons.
    pub name: String,
    /// The pattern to test against the task text.
    pub pattern: Regex,
}

/// A named pattern whose matches are replaced by a typed marker.
#[derive(Debug, Clone)]
pub struct RedactionPattern {
    /// Pattern name, surfaced in redaction records.
    pub name: String,
    /// The pattern to search for.
    pub pattern: Regex,
    /// Replacement text (may reference capture groups, e.g. `$1`).
    pub replacement: String,
}

/// A custom deny rule evaluated against the validated request.
pub type DispatchRule = Box<dyn Fn(&TaskRequest) -> Option<DenyReason> + Send + Sync>;

/// Configuration for the dispatch policy.
///
/// The defaults block obviously hostile intents and redact common secret
/// shapes; deployments extend the lists rather than replacing the policy.
pub struct DispatchPolicyConfig {
    /// Risk tags (lowercase) whose presence denies dispatch.
    pub blocked_risk_tags: HashSet<String>,
    /// Required capabilities (lowercase) whose presence denies dispatch.
    pub blocked_capabilities: HashSet<String>,
    /// Task-text patterns that deny dispatch.
    pub blocked_task_patterns: Vec<BlockedPattern>,
    /// Sensitive-data patterns to redact.
    pub redaction_patterns: Vec<RedactionPattern>,
    /// Whether redaction runs at all. Denial checks are unaffected.
    pub redact_sensitive_data: bool,
    /// Deployment-specific deny rules.
    pub custom_rules: Vec<DispatchRule>,
}

impl std::fmt::Debug for DispatchPolicyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPolicyConfig")
            .field("blocked_risk_tags", &self.blocked_risk_tags)
            .field("blocked_capabilities", &self.blocked_capabilities)
            .field("blocked_task_patterns", &self.blocked_task_patterns.len())
            .field("redaction_patterns", &self.redaction_patterns.len())
            .field("redact_sensitive_data", &self.redact_sensitive_data)
            .field("custom_rules", &self.custom_rules.len())
            .finish()
    }
}

impl Default for DispatchPolicyConfig {
    fn default() -> Self {
        Self {
            blocked_risk_tags: lower_set(&[
                "malware",
                "credential_theft",
                "data_exfiltration",
                "self_harm",
            ]),
            blocked_capabilities: lower_set(&[
                "destructive_shell",
                "credential_access",
                "mass_messaging",
            ]),
            blocked_task_patterns: vec![
                blocked("malware_intent", r"(?i)\b(ransomware|malware|botnet|keylogger)\b"),
                blocked(
                    "credential_exfiltration_intent",
                    r"(?i)\b(steal|exfiltrate)\b.{0,32}\b(password|credential|token)\b",
                ),
            ],
            redaction_patterns: default_redaction_patterns(),
            redact_sensitive_data: true,
            custom_rules: Vec::new(),
        }
    }
}

impl DispatchPolicyConfig {
    /// Adds a blocked risk tag.
    pub fn block_risk_tag(mut self, tag: impl Into<String>) -> Self {
        self.blocked_risk_tags.insert(tag.into().to_lowercase());
        self
    }

    /// Adds a blocked capability.
    pub fn block_capability(mut self, capability: impl Into<String>) -> Self {
        self.blocked_capabilities
            .insert(capability.into().to_lowercase());
        self
    }

    /// Adds a custom deny rule.
    pub fn with_rule(
        mut self,
        rule: impl Fn(&TaskRequest) -> Option<DenyReason> + Send + Sync + 'static,
    ) -> Self {
        self.custom_rules.push(Box::new(rule));
        self
    }
}

/// A single reason the policy denied a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyReason {
    /// Machine-readable reason code.
    pub code: String,
    /// The matched value or rule name.
    pub reason: String,
}

impl DenyReason {
    /// Creates a deny reason.
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// One redaction applied to the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionHit {
    /// Where the match occurred (e.g. `task`, `context.notes[2]`).
    pub path: String,
    /// Name of the matched pattern.
    pub pattern: String,
    /// Number of matches replaced at this path.
    pub count: usize,
}

/// The policy's verdict on one task request.
///
/// `request` always carries the sanitized form — a denied task is still
/// redacted so downstream records and audit entries never hold the raw
/// sensitive values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchDecision {
    /// Whether the task may be sent.
    pub allowed: bool,
    /// Every reason the task was denied; empty when allowed.
    pub reasons: Vec<DenyReason>,
    /// Every redaction applied, with location.
    pub redactions: Vec<RedactionHit>,
    /// The sanitized request.
    pub request: TaskRequest,
}

/// Evaluates the dispatch policy against a validated task request.
///
/// Pure: no state, no side effects beyond a debug log line.
pub fn evaluate_dispatch_policy(
    request: &TaskRequest,
    config: &DispatchPolicyConfig,
) -> ApiaryResult<DispatchDecision> {
    request.validate()?;

    let mut reasons = Vec::new();

    for tag in normalize_labels(request.risk_tags().iter().map(|t| t.to_lowercase())) {
        if config.blocked_risk_tags.contains(&tag) {
            reasons.push(DenyReason::new("blocked_risk_tag", tag));
        }
    }

    for capability in normalize_labels(
        request
            .required_capabilities()
            .iter()
            .map(|c| c.to_lowercase()),
    ) {
        if config.blocked_capabilities.contains(&capability) {
            reasons.push(DenyReason::new("blocked_capability", capability));
        }
    }

    for blocked in &config.blocked_task_patterns {
        if blocked.pattern.is_match(&request.task) {
            reasons.push(DenyReason::new("blocked_task_pattern", blocked.name.clone()));
        }
    }

    for rule in &config.custom_rules {
        if let Some(reason) = rule(request) {
            reasons.push(reason);
        }
    }

    let mut sanitized = request.clone();
    let mut redactions = Vec::new();

    if config.redact_sensitive_data {
        redactions.extend(redact_string(
            &mut sanitized.task,
            &config.redaction_patterns,
            "task",
        ));
        for (key, value) in &mut sanitized.context {
            redactions.extend(redact_value(
                value,
                &config.redaction_patterns,
                &format!("context.{key}"),
            ));
        }
        for (index, constraint) in sanitized.constraints.iter_mut().enumerate() {
            redactions.extend(redact_string(
                constraint,
                &config.redaction_patterns,
                &format!("constraints[{index}]"),
            ));
        }
    }

    let allowed = reasons.is_empty();
    if !allowed {
        debug!(task_id = %request.id, reasons = reasons.len(), "dispatch denied by policy");
    }

    Ok(DispatchDecision {
        allowed,
        reasons,
        redactions,
        request: sanitized,
    })
}

fn redact_string(
    value: &mut String,
    patterns: &[RedactionPattern],
    path: &str,
) -> Vec<RedactionHit> {
    let mut hits = Vec::new();
    for pattern in patterns {
        let count = pattern.pattern.find_iter(value).count();
        if count == 0 {
            continue;
        }
        *value = pattern
            .pattern
            .replace_all(value, pattern.replacement.as_str())
            .into_owned();
        hits.push(RedactionHit {
            path: path.to_owned(),
            pattern: pattern.name.clone(),
            count,
        });
    }
    hits
}

fn redact_value(value: &mut Value, patterns: &[RedactionPattern], path: &str) -> Vec<RedactionHit> {
    match value {
        Value::String(text) => {
            let mut owned = std::mem::take(text);
            let hits = redact_string(&mut owned, patterns, path);
            *text = owned;
            hits
        }
        Value::Array(items) => {
            let mut hits = Vec::new();
            for (index, item) in items.iter_mut().enumerate() {
                hits.extend(redact_value(item, patterns, &format!("{path}[{index}]")));
            }
            hits
        }
        Value::Object(map) => {
            let mut hits = Vec::new();
            for (key, item) in map.iter_mut() {
                hits.extend(redact_value(item, patterns, &format!("{path}.{key}")));
            }
            hits
        }
        _ => Vec::new(),
    }
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        redaction("provider_api_key", r"sk-[A-Za-z0-9]{20,}", "[REDACTED:API_KEY]"),
        redaction(
            "aws_access_key",
            r"AKIA[0-9A-Z]{16}",
            "[REDACTED:AWS_ACCESS_KEY]",
        ),
        redaction(
            "bearer_token",
            r"(?i)bearer\s+[A-Za-z0-9._\-]{16,}",
            "[REDACTED:BEARER_TOKEN]",
        ),
        redaction(
            "secret_assignment",
            r"(?i)(api[_-]?key|token|secret)\s*[:=]\s*[^\s,;]+",
            "$1=[REDACTED]",
        ),
        redaction(
            "email",
            r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}",
            "[REDACTED:EMAIL]",
        ),
    ]
}

fn blocked(name: &str, pattern: &str) -> BlockedPattern {
    BlockedPattern {
        name: name.to_owned(),
        pattern: compile(pattern),
    }
}

fn redaction(name: &str, pattern: &str, replacement: &str) -> RedactionPattern {
    RedactionPattern {
        name: name.to_owned(),
        pattern: compile(pattern),
        replacement: replacement.to_owned(),
    }
}

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern must compile")
}

fn lower_set(values: &[&str]) -> HashSet<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(task: &str) -> TaskRequest {
        TaskRequest::new("agent:main", "agent:worker", task, 1_000)
    }

    #[test]
    fn test_clean_task_is_allowed() {
        let decision =
            evaluate_dispatch_policy(&request("Summarize weekly metrics"), &Default::default())
                .unwrap();
        assert!(decision.allowed);
        assert!(decision.reasons.is_empty());
        assert!(decision.redactions.is_empty());
    }

    #[test]
    fn test_blocked_risk_tag_denies() {
        let task = request("Routine job")
            .with_context_value("riskTags", json!(["Data_Exfiltration"]));
        let decision = evaluate_dispatch_policy(&task, &Default::default()).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reasons[0].code, "blocked_risk_tag");
        assert_eq!(decision.reasons[0].reason, "data_exfiltration");
    }

    #[test]
    fn test_blocked_capability_denies() {
        let task = request("Routine job")
            .with_context_value("requiredCapabilities", json!(["destructive_shell"]));
        let decision = evaluate_dispatch_policy(&task, &Default::default()).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reasons[0].code, "blocked_capability");
    }

    #[test]
    fn test_blocked_task_pattern_denies() {
        let decision = evaluate_dispatch_policy(
            &request("Install a keylogger on the fleet"),
            &Default::default(),
        )
        .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reasons[0].reason, "malware_intent");
    }

    #[test]
    fn test_email_redacted_with_location() {
        let decision = evaluate_dispatch_policy(
            &request("Contact ops@example.com about the rollout"),
            &Default::default(),
        )
        .unwrap();
        assert!(decision.allowed);
        assert!(decision.request.task.contains("[REDACTED:EMAIL]"));
        assert_eq!(decision.redactions.len(), 1);
        assert_eq!(decision.redactions[0].path, "task");
        assert_eq!(decision.redactions[0].pattern, "email");
        assert_eq!(decision.redactions[0].count, 1);
    }

    #[test]
    fn test_context_values_redacted_recursively() {
        let task = request("Rotate credentials").with_context_value(
            "notes",
            json!({"handoff": ["token=abcd1234efgh5678", "all clear"]}),
        );
        let decision = evaluate_dispatch_policy(&task, &Default::default()).unwrap();
        let notes = &decision.request.context["notes"]["handoff"][0];
        assert_eq!(notes, &json!("token=[REDACTED]"));
        assert_eq!(decision.redactions[0].path, "context.notes.handoff[0]");
    }

    #[test]
    fn test_denied_task_is_still_redacted() {
        let task = request("Exfiltrate the admin password to boss@example.com");
        let decision = evaluate_dispatch_policy(&task, &Default::default()).unwrap();
        assert!(!decision.allowed);
        assert!(decision.request.task.contains("[REDACTED:EMAIL]"));
        assert!(!decision.redactions.is_empty());
    }

    #[test]
    fn test_api_key_redacted() {
        let decision = evaluate_dispatch_policy(
            &request("Use sk-abcdefghijklmnopqrstuvwxyz123456 for the call"),
            &Default::default(),
        )
        .unwrap();
        assert!(decision.request.task.contains("[REDACTED:API_KEY]"));
    }

    #[test]
    fn test_custom_rule_denies() {
        let config = DispatchPolicyConfig::default().with_rule(|req| {
            (req.target == "agent:prod")
                .then(|| DenyReason::new("custom_rule_denied", "no_direct_prod_dispatch"))
        });
        let task = TaskRequest::new("agent:main", "agent:prod", "Deploy now", 1_000);
        let decision = evaluate_dispatch_policy(&task, &config).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reasons[0].reason, "no_direct_prod_dispatch");
    }

    #[test]
    fn test_redaction_can_be_disabled() {
        let config = DispatchPolicyConfig {
            redact_sensitive_data: false,
            ..Default::default()
        };
        let decision =
            evaluate_dispatch_policy(&request("Mail ops@example.com"), &config).unwrap();
        assert!(decision.redactions.is_empty());
        assert!(decision.request.task.contains("ops@example.com"));
    }
}
