//! PII partition routing.
//!
//! A new user's partition resolves through a trust hierarchy; each source
//! is consulted only when everything above it stays silent:
//!
//! 1. Tenant policy (`tenant_partitions[tenant_id]`)
//! 2. The user's declared residence attribute
//! 3. Custom rules, ascending priority, first match whose target is
//!    registered
//! 4. Geo routing from the request country, when enabled
//! 5. The default partition

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use oxidp_core::clock::UnixMillis;

use crate::DirectoryResult;

/// How a partition was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Pinned by tenant policy.
    TenantPolicy,
    /// From the user's declared residence.
    DeclaredResidence,
    /// A custom rule matched.
    CustomRule,
    /// Geo mapping from the request country.
    IpRouting,
    /// Nothing matched; the default partition.
    Default,
    /// An existing user's recorded partition.
    Stored,
}

/// A resolved partition with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDecision {
    /// The selected partition.
    pub partition: String,

    /// Which level of the hierarchy decided.
    pub method: ResolutionMethod,
}

/// Operators available to custom partition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Value is one of the rule's list.
    In,
    /// Value is none of the rule's list.
    NotIn,
    /// Numeric greater-than.
    Gt,
    /// Numeric less-than.
    Lt,
    /// Numeric greater-or-equal.
    Gte,
    /// Numeric less-or-equal.
    Lte,
}

/// A custom routing rule over user attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRule {
    /// Evaluation order; lower runs first.
    pub priority: i64,

    /// Attribute path in the user's attribute document.
    pub attribute: String,

    /// Comparison operator.
    pub operator: RuleOperator,

    /// Comparison operand.
    pub value: Value,

    /// Partition selected when the rule matches.
    pub target_partition: String,

    /// Disabled rules are skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Partition routing settings, versioned through the settings engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSettings {
    /// Fallback partition.
    pub default_partition: String,

    /// Whether geo routing participates in resolution.
    pub ip_routing_enabled: bool,

    /// Registered partitions. Rules targeting anything else are skipped.
    pub available_partitions: Vec<String>,

    /// Tenant pins: `tenant_id -> partition`.
    #[serde(default)]
    pub tenant_partitions: HashMap<String, String>,

    /// Custom rules.
    #[serde(default)]
    pub partition_rules: Vec<PartitionRule>,

    /// Last update, epoch milliseconds.
    #[serde(default)]
    pub updated_at: UnixMillis,

    /// Actor of the last update.
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl PartitionSettings {
    fn is_registered(&self, partition: &str) -> bool {
        partition == self.default_partition
            || self.available_partitions.iter().any(|p| p == partition)
    }
}

/// Source of the current partition settings (the versioned settings store).
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Loads the current partition settings.
    async fn load(&self) -> DirectoryResult<PartitionSettings>;
}

/// Geo mapping: ISO country code to partition.
///
/// Grouped by data-residency region; anything unlisted falls through to
/// the next resolution level.
pub fn country_partition(country: &str) -> Option<&'static str> {
    let partition = match country {
        // EU / EEA
        "AT" | "BE" | "BG" | "HR" | "CY" | "CZ" | "DK" | "EE" | "FI" | "FR" | "DE" | "GR"
        | "HU" | "IE" | "IT" | "LV" | "LT" | "LU" | "MT" | "NL" | "PL" | "PT" | "RO" | "SK"
        | "SI" | "ES" | "SE" | "IS" | "LI" | "NO" | "CH" | "GB" => "eu",
        // Asia-Pacific
        "JP" | "KR" | "CN" | "TW" | "HK" | "SG" | "AU" | "NZ" | "IN" | "ID" | "MY" | "PH"
        | "TH" | "VN" => "apac",
        // Americas
        "US" | "CA" | "MX" | "BR" | "AR" | "CL" | "CO" => "us",
        _ => return None,
    };
    Some(partition)
}

/// The partition router.
pub struct PartitionRouter;

impl PartitionRouter {
    /// Resolves the partition for a new user.
    ///
    /// `attrs` is the user's attribute document (declared residence, plan,
    /// custom attributes); `country` is the request's ISO country code when
    /// the edge supplied one.
    #[must_use]
    pub fn resolve_new_user(
        settings: &PartitionSettings,
        tenant_id: &str,
        attrs: &Value,
        country: Option<&str>,
    ) -> PartitionDecision {
        // 1. Tenant policy.
        if let Some(pinned) = settings.tenant_partitions.get(tenant_id)
            && settings.is_registered(pinned)
        {
            return decided(pinned, ResolutionMethod::TenantPolicy);
        }

        // 2. Declared residence.
        if let Some(declared) = attrs.get("declared_residence").and_then(Value::as_str)
            && settings.is_registered(declared)
        {
            return decided(declared, ResolutionMethod::DeclaredResidence);
        }

        // 3. Custom rules, ascending priority.
        let mut rules: Vec<&PartitionRule> = settings
            .partition_rules
            .iter()
            .filter(|r| r.enabled)
            .collect();
        rules.sort_by_key(|r| r.priority);
        for rule in rules {
            if !settings.is_registered(&rule.target_partition) {
                continue;
            }
            if rule_matches(rule, attrs) {
                debug!(
                    attribute = %rule.attribute,
                    target = %rule.target_partition,
                    "partition rule matched"
                );
                return decided(&rule.target_partition, ResolutionMethod::CustomRule);
            }
        }

        // 4. Geo routing.
        if settings.ip_routing_enabled
            && let Some(country) = country
            && let Some(partition) = country_partition(country)
            && settings.is_registered(partition)
        {
            return decided(partition, ResolutionMethod::IpRouting);
        }

        // 5. Default.
        decided(&settings.default_partition, ResolutionMethod::Default)
    }

    /// Resolves the partition for an existing user from the CORE row.
    #[must_use]
    pub fn resolve_existing(
        settings: &PartitionSettings,
        pii_partition: Option<&str>,
    ) -> PartitionDecision {
        match pii_partition {
            Some(partition) if settings.is_registered(partition) => {
                decided(partition, ResolutionMethod::Stored)
            }
            _ => decided(&settings.default_partition, ResolutionMethod::Default),
        }
    }
}

fn decided(partition: &str, method: ResolutionMethod) -> PartitionDecision {
    PartitionDecision {
        partition: partition.to_string(),
        method,
    }
}

fn rule_matches(rule: &PartitionRule, attrs: &Value) -> bool {
    let Some(actual) = lookup_attribute(attrs, &rule.attribute) else {
        return false;
    };

    match rule.operator {
        RuleOperator::Eq => actual == &rule.value,
        RuleOperator::Ne => actual != &rule.value,
        RuleOperator::In => rule
            .value
            .as_array()
            .is_some_and(|list| list.contains(actual)),
        RuleOperator::NotIn => rule
            .value
            .as_array()
            .is_some_and(|list| !list.contains(actual)),
        RuleOperator::Gt | RuleOperator::Lt | RuleOperator::Gte | RuleOperator::Lte => {
            let (Some(a), Some(b)) = (actual.as_f64(), rule.value.as_f64()) else {
                return false;
            };
            match rule.operator {
                RuleOperator::Gt => a > b,
                RuleOperator::Lt => a < b,
                RuleOperator::Gte => a >= b,
                RuleOperator::Lte => a <= b,
                _ => unreachable!(),
            }
        }
    }
}

/// Dot-path lookup into the attribute document. Only keys present in the
/// document are consulted; rule evaluation never copies attributes
/// anywhere.
fn lookup_attribute<'a>(attrs: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = attrs;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> PartitionSettings {
        PartitionSettings {
            default_partition: "default".into(),
            ip_routing_enabled: true,
            available_partitions: vec![
                "default".into(),
                "eu".into(),
                "apac".into(),
                "us".into(),
                "premium".into(),
                "tenant-acme".into(),
            ],
            tenant_partitions: HashMap::from([("acme".to_string(), "tenant-acme".to_string())]),
            partition_rules: vec![PartitionRule {
                priority: 10,
                attribute: "plan".into(),
                operator: RuleOperator::Eq,
                value: json!("premium"),
                target_partition: "premium".into(),
                enabled: true,
            }],
            updated_at: 0,
            updated_by: None,
        }
    }

    fn attrs() -> Value {
        json!({"declared_residence": "eu", "plan": "premium"})
    }

    #[test]
    fn test_trust_hierarchy_walkthrough() {
        let mut settings = settings();

        // Tenant policy wins over everything.
        let decision =
            PartitionRouter::resolve_new_user(&settings, "acme", &attrs(), Some("JP"));
        assert_eq!(decision.partition, "tenant-acme");
        assert_eq!(decision.method, ResolutionMethod::TenantPolicy);

        // Remove the tenant pin: declared residence.
        settings.tenant_partitions.clear();
        let decision =
            PartitionRouter::resolve_new_user(&settings, "acme", &attrs(), Some("JP"));
        assert_eq!(decision.partition, "eu");
        assert_eq!(decision.method, ResolutionMethod::DeclaredResidence);

        // Remove the declared residence: the premium rule.
        let attrs = json!({"plan": "premium"});
        let decision = PartitionRouter::resolve_new_user(&settings, "acme", &attrs, Some("JP"));
        assert_eq!(decision.partition, "premium");
        assert_eq!(decision.method, ResolutionMethod::CustomRule);

        // Disable the rule: geo routing sees JP.
        settings.partition_rules[0].enabled = false;
        let decision = PartitionRouter::resolve_new_user(&settings, "acme", &attrs, Some("JP"));
        assert_eq!(decision.partition, "apac");
        assert_eq!(decision.method, ResolutionMethod::IpRouting);

        // Disable geo routing: the default.
        settings.ip_routing_enabled = false;
        let decision = PartitionRouter::resolve_new_user(&settings, "acme", &attrs, Some("JP"));
        assert_eq!(decision.partition, "default");
        assert_eq!(decision.method, ResolutionMethod::Default);
    }

    #[test]
    fn test_unregistered_targets_are_skipped() {
        let mut settings = settings();
        settings.tenant_partitions
            .insert("acme".into(), "ghost-partition".into());
        settings.partition_rules[0].target_partition = "also-ghost".into();

        let decision =
            PartitionRouter::resolve_new_user(&settings, "acme", &json!({"plan": "premium"}), None);
        assert_eq!(decision.method, ResolutionMethod::Default);
    }

    #[test]
    fn test_rule_priority_order() {
        let mut settings = settings();
        settings.partition_rules = vec![
            PartitionRule {
                priority: 20,
                attribute: "plan".into(),
                operator: RuleOperator::Eq,
                value: json!("premium"),
                target_partition: "us".into(),
                enabled: true,
            },
            PartitionRule {
                priority: 5,
                attribute: "plan".into(),
                operator: RuleOperator::Eq,
                value: json!("premium"),
                target_partition: "premium".into(),
                enabled: true,
            },
        ];
        settings.tenant_partitions.clear();

        let decision =
            PartitionRouter::resolve_new_user(&settings, "t", &json!({"plan": "premium"}), None);
        assert_eq!(decision.partition, "premium");
    }

    #[test]
    fn test_rule_operators() {
        let case = |operator, value: Value, attrs: Value, expected: bool| {
            let rule = PartitionRule {
                priority: 0,
                attribute: "a".into(),
                operator,
                value,
                target_partition: "eu".into(),
                enabled: true,
            };
            assert_eq!(rule_matches(&rule, &attrs), expected, "{operator:?}");
        };

        case(RuleOperator::Eq, json!("x"), json!({"a": "x"}), true);
        case(RuleOperator::Ne, json!("x"), json!({"a": "y"}), true);
        case(RuleOperator::In, json!(["x", "y"]), json!({"a": "y"}), true);
        case(RuleOperator::In, json!(["x", "y"]), json!({"a": "z"}), false);
        case(RuleOperator::NotIn, json!(["x"]), json!({"a": "z"}), true);
        case(RuleOperator::Gt, json!(10), json!({"a": 11}), true);
        case(RuleOperator::Gt, json!(10), json!({"a": 10}), false);
        case(RuleOperator::Lt, json!(10), json!({"a": 9}), true);
        case(RuleOperator::Gte, json!(10), json!({"a": 10}), true);
        case(RuleOperator::Lte, json!(10), json!({"a": 11}), false);
        // Numeric operators over non-numbers never match.
        case(RuleOperator::Gt, json!(10), json!({"a": "11"}), false);
        // Missing attribute never matches.
        case(RuleOperator::Eq, json!("x"), json!({}), false);
    }

    #[test]
    fn test_nested_attribute_paths() {
        let rule = PartitionRule {
            priority: 0,
            attribute: "billing.plan".into(),
            operator: RuleOperator::Eq,
            value: json!("pro"),
            target_partition: "eu".into(),
            enabled: true,
        };
        assert!(rule_matches(&rule, &json!({"billing": {"plan": "pro"}})));
        assert!(!rule_matches(&rule, &json!({"billing": "pro"})));
    }

    #[test]
    fn test_existing_user_resolution() {
        let settings = settings();

        let decision = PartitionRouter::resolve_existing(&settings, Some("eu"));
        assert_eq!(decision.partition, "eu");
        assert_eq!(decision.method, ResolutionMethod::Stored);

        let decision = PartitionRouter::resolve_existing(&settings, None);
        assert_eq!(decision.partition, "default");
        assert_eq!(decision.method, ResolutionMethod::Default);

        // A partition that has been deregistered falls back.
        let decision = PartitionRouter::resolve_existing(&settings, Some("ghost"));
        assert_eq!(decision.partition, "default");
    }

    #[test]
    fn test_country_mapping() {
        assert_eq!(country_partition("DE"), Some("eu"));
        assert_eq!(country_partition("JP"), Some("apac"));
        assert_eq!(country_partition("US"), Some("us"));
        assert_eq!(country_partition("ZZ"), None);
    }
}
