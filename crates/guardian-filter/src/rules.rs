//! Static regex rule set - the fast first line of defence.
//!
//! Every rule is named, compiled once and case-insensitive. `check` always
//! evaluates the full set: rule ordering never changes the verdict, only the
//! order of the reported names, and the complete match list feeds telemetry.
//!
//! The families covered here track the attacks documented against
//! LLM-integrated agents: classic command/SQL injection, prompt injection
//! and jailbreaks, exfiltration staging, reverse shells, container escape,
//! crypto mining and supply-chain tampering.

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Errors raised when extending the rule set at runtime.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The supplied pattern failed to compile.
    #[error("invalid rule '{name}': {source}")]
    InvalidRule {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Result of running the rule set over a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOutcome {
    /// True iff at least one rule matched.
    pub blocked: bool,
    /// Names of every rule that matched, in rule-table order.
    pub matched: Vec<String>,
}

struct Rule {
    name: String,
    pattern: Regex,
}

/// Builtin rule table: `(name, case-insensitive pattern)`.
///
/// Grouped by attack family. Names are stable identifiers that surface in
/// block reasons and trigger records, so renaming one is a breaking change
/// for downstream log consumers.
const BUILTIN_RULES: &[(&str, &str)] = &[
    // Command injection / destructive shell
    ("rm_rf", r"\brm\s+-[a-z]*r[a-z]*f|\brm\s+-[a-z]*f[a-z]*r"),
    ("curl_pipe_sh", r"\b(curl|wget)\b[^|\n]*\|\s*(ba|z|da)?sh\b"),
    ("fork_bomb", r":\(\)\s*\{\s*:\|:&\s*\}\s*;?:"),
    ("dd_wipe", r"\bdd\s+if=\S+\s+of=/dev/(sd|hd|nvme|vd)"),
    ("mkfs_device", r"\bmkfs(\.\w+)?\s+/dev/"),
    ("chmod_world", r"\bchmod\s+(-[a-z]+\s+)*777\s+/"),
    // Privilege escalation
    ("sudo_shell", r"\bsudo\s+(su|bash|sh|-i)\b"),
    ("setuid_root", r"\b(setuid|seteuid)\s*\(\s*0\s*\)"),
    ("shadow_access", r"/etc/(passwd|shadow|sudoers)"),
    // Prompt injection / jailbreak
    (
        "ignore_instructions",
        r"ignore\s+(all\s+)?(previous|prior|above|earlier)\s+(instructions?|prompts?|rules?)",
    ),
    (
        "disregard_instructions",
        r"disregard\s+(all\s+)?(your\s+)?(previous|prior|above)\s+(instructions?|prompts?|rules?|guidelines?)",
    ),
    (
        "forget_everything",
        r"forget\s+(everything|all|what)\s+(you|i)?\s*(know|said|told|learned)",
    ),
    (
        "system_prompt_probe",
        r"(show|reveal|display|print|output|repeat)\s+(me\s+)?(your|the)\s+(system\s+)?prompt",
    ),
    ("jailbreak_mode", r"\bDAN\b|do\s+anything\s+now|jailbreak|developer\s+mode"),
    ("role_hijack", r"you\s+are\s+now\s+(a|an|in)\b"),
    // Data-layer injection
    (
        "sql_injection",
        r"union\s+(all\s+)?select|;\s*drop\s+table|'\s*or\s+'?1'?\s*=\s*'?1|\bor\s+1\s*=\s*1\s*--",
    ),
    ("nosql_injection", r"\$\s*(where|ne|gt|lt|regex)\b\s*:"),
    ("ldap_injection", r"\(\s*[|&]\s*\("),
    ("xxe_entity", r"<!(ENTITY|DOCTYPE)[^>]*(SYSTEM|PUBLIC)"),
    ("ssti_template", r"\{\{[^}]*(__|config|self|class)[^}]*\}\}|\$\{\s*jndi:"),
    ("xss_script", r"<script[\s>]|javascript:\s*\w|on(error|load|click)\s*="),
    ("path_traversal", r"\.\./\.\./|\.\.\\\.\.\\|%2e%2e%2f"),
    (
        "ssrf_internal",
        r"https?://(127\.0\.0\.1|0\.0\.0\.0|localhost|\[?::1\]?|169\.254\.169\.254|metadata\.google\.internal)",
    ),
    ("jwt_alg_none", r#"["']?alg["']?\s*:\s*["']?none"#),
    // Remote access / exfiltration
    (
        "reverse_shell",
        r"\bnc\b[^|\n]*\s-e\s|/dev/tcp/\d|bash\s+-i\s*>&|\bsocat\b[^|\n]*exec",
    ),
    (
        "container_escape",
        r"/var/run/docker\.sock|--privileged\b|\bnsenter\b[^\n]*-t\s*1\b|/proc/1/root",
    ),
    (
        "credential_exfil",
        r"aws_secret_access_key|\.ssh/id_rsa|\b(cat|less|head)\s+\S*\.(pem|key|env)\b",
    ),
    (
        "data_exfil",
        r"(send|post|upload|transmit)\s+(this\s+)?(data|info|information|contents?|secrets?)\s+to|exfiltrat\w*\s+(the\s+)?(data|secrets?|credentials?|files?)",
    ),
    // Resource abuse / supply chain
    ("crypto_mining", r"\b(xmrig|minerd|coinhive)\b|stratum\+tcp://"),
    (
        "supply_chain",
        r"(npm\s+install|pip\s+install)[^|\n]*(--registry\s+http://|--index-url\s+http://)|curl[^|\n]*\|\s*sudo\b",
    ),
    (
        "encoded_exec",
        r"base64\s+(-d|--decode)[^|\n]*\|\s*(ba)?sh|echo\s+[A-Za-z0-9+/=]{40,}\s*\|",
    ),
];

/// The compiled rule set.
///
/// Construction compiles every builtin rule; new rules can be appended at
/// runtime with [`RuleSet::add_rule`].
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compiles the builtin rule table.
    pub fn builtin() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(name, pattern)| Rule {
                name: (*name).to_string(),
                pattern: Regex::new(&format!("(?i){pattern}")).unwrap(),
            })
            .collect();
        Self { rules }
    }

    /// Appends a rule at runtime.
    pub fn add_rule(&mut self, name: &str, pattern: &str) -> Result<(), FilterError> {
        let compiled =
            Regex::new(&format!("(?i){pattern}")).map_err(|source| FilterError::InvalidRule {
                name: name.to_string(),
                source,
            })?;
        debug!("rule '{name}' added at runtime");
        self.rules.push(Rule {
            name: name.to_string(),
            pattern: compiled,
        });
        Ok(())
    }

    /// Runs every rule over `text`.
    pub fn check(&self, text: &str) -> FilterOutcome {
        let matched: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| rule.pattern.is_match(text))
            .map(|rule| rule.name.clone())
            .collect();
        FilterOutcome {
            blocked: !matched.is_empty(),
            matched,
        }
    }

    /// Number of active rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the rule set is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}
