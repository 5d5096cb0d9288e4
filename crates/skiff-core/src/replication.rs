// Copyright 2026 The Skiff Authors
// SPDX-License-Identifier: Apache-2.0

//! S3 bucket replication configuration: wire schema, validation, and
//! rule matching.
//!
//! A `PutBucketReplication` request body arrives as a semi-structured
//! document. The raw document types here track per-field presence with
//! `Option`, so the required/optional distinction lives in the data model
//! and is enforced by a single ordered validation pass. Successful
//! validation yields an immutable [`ReplicationConfiguration`] ready for
//! rule matching.
//!
//! # Example XML
//!
//! ```xml
//! <ReplicationConfiguration>
//!     <Role>arn:aws:iam::123456789:role/replication</Role>
//!     <Rule>
//!         <ID>rule-1</ID>
//!         <Prefix>logs/</Prefix>
//!         <Status>Enabled</Status>
//!         <Destination>
//!             <Bucket>arn:aws:s3:::dest-bucket</Bucket>
//!             <StorageClass>STANDARD</StorageClass>
//!         </Destination>
//!     </Rule>
//! </ReplicationConfiguration>
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, S3ErrorCode};

/// Storage class applied to replicas when a rule does not name one.
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// Storage classes accepted by the default [`ValidationPolicy`].
pub const DEFAULT_ALLOWED_STORAGE_CLASSES: &[&str] = &[
    "STANDARD",
    "STANDARD_IA",
    "ONEZONE_IA",
    "REDUCED_REDUNDANCY",
    "INTELLIGENT_TIERING",
    "GLACIER",
    "DEEP_ARCHIVE",
];

/// Raw `ReplicationConfiguration` request body as received from the wire.
///
/// Every field is optional; validation decides what is required. Field
/// names follow the S3 XML tags so this deserializes directly from a
/// request body via quick-xml (or any other serde format).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename = "ReplicationConfiguration")]
pub struct ReplicationConfigurationDocument {
    /// IAM role ARN for replication.
    #[serde(rename = "Role")]
    pub role: Option<String>,

    /// Replication rules, in declared order.
    #[serde(rename = "Rule", default)]
    pub rules: Vec<RuleDocument>,
}

/// A raw replication rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleDocument {
    /// Rule identifier.
    #[serde(rename = "ID")]
    pub id: Option<String>,

    /// Key prefix selecting objects. Present-but-empty matches every key;
    /// absent fails validation.
    #[serde(rename = "Prefix")]
    pub prefix: Option<String>,

    /// Rule status literal ("Enabled" or "Disabled").
    #[serde(rename = "Status")]
    pub status: Option<String>,

    /// Destination for replicated objects.
    #[serde(rename = "Destination")]
    pub destination: Option<DestinationDocument>,
}

/// A raw replication destination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DestinationDocument {
    /// Destination bucket ARN.
    #[serde(rename = "Bucket")]
    pub bucket: Option<String>,

    /// Storage class for replicas.
    #[serde(rename = "StorageClass")]
    pub storage_class: Option<String>,
}

/// Validated, normalized replication configuration for a bucket.
///
/// Replaced wholesale on every valid `PutBucketReplication`; never
/// partially mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfiguration {
    /// IAM role ARN assumed when replicating.
    pub role: String,
    /// Replication rules, in declared order. Order is semantically
    /// meaningful: it breaks ties between equally specific prefixes.
    pub rules: Vec<ReplicationRule>,
}

/// A single validated replication rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRule {
    /// Unique identifier within the configuration.
    pub id: String,
    /// Key prefix selecting objects. Empty matches every key.
    pub prefix: String,
    /// Whether the rule is active.
    pub status: RuleStatus,
    /// Destination for replicated objects.
    pub destination: Destination,
}

/// Status of a replication rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStatus {
    /// Rule is active.
    #[default]
    Enabled,
    /// Rule is inactive.
    Disabled,
}

impl RuleStatus {
    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Enabled" => Some(Self::Enabled),
            "Disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    /// Convert to string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
        }
    }
}

/// Validated destination for replicated objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Destination bucket ARN.
    pub bucket: String,

    /// Storage class for replicas. `None` means the rule left it
    /// unspecified; the pipeline resolves the service default when it
    /// builds a task, not here.
    #[serde(default)]
    pub storage_class: Option<String>,
}

/// The rule selected for an object write, as handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    /// Identifier of the matched rule.
    pub rule_id: String,
    /// Destination bucket ARN.
    pub destination_bucket: String,
    /// Storage class configured on the rule, if any.
    pub storage_class: Option<String>,
}

/// Semantic validation policy.
///
/// The structural required/optional field matrix is fixed; everything
/// beyond it (ARN strictness, the allowed storage-class set, duplicate id
/// rejection) is service policy and configurable here.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    /// Storage-class literals accepted in a destination.
    pub allowed_storage_classes: HashSet<String>,
    /// Whether duplicate rule ids are rejected.
    pub reject_duplicate_ids: bool,
    /// Whether role and destination bucket must be ARN-shaped.
    pub require_arns: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            allowed_storage_classes: DEFAULT_ALLOWED_STORAGE_CLASSES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            reject_duplicate_ids: true,
            require_arns: true,
        }
    }
}

impl ValidationPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the allowed storage-class set.
    #[must_use]
    pub fn allowed_storage_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_storage_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether duplicate rule ids are rejected.
    #[must_use]
    pub fn reject_duplicate_ids(mut self, reject: bool) -> Self {
        self.reject_duplicate_ids = reject;
        self
    }

    /// Sets whether role and bucket values must be ARN-shaped.
    #[must_use]
    pub fn require_arns(mut self, require: bool) -> Self {
        self.require_arns = require;
        self
    }
}

/// Errors from replication configuration validation.
///
/// Structural failures (a required element absent, or an empty
/// configuration) surface as `MalformedXml`; values that are present but
/// invalid surface as `InvalidArgument`. Both map onto the matching S3
/// error code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required element is missing from the configuration.
    #[error("malformed replication configuration: missing {field}")]
    MalformedXml {
        /// Name of the missing element.
        field: &'static str,
    },

    /// An element is present but its value is invalid.
    #[error("invalid replication configuration: {message}")]
    InvalidArgument {
        /// Description of the invalid value.
        message: String,
    },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Returns the S3 error code for this validation failure.
    #[must_use]
    pub const fn code(&self) -> S3ErrorCode {
        match self {
            Self::MalformedXml { .. } => S3ErrorCode::MalformedXML,
            Self::InvalidArgument { .. } => S3ErrorCode::InvalidArgument,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::s3(err.code(), err.to_string())
    }
}

impl ReplicationConfigurationDocument {
    /// Validates this document against the structural schema and the
    /// given semantic policy, producing a normalized configuration.
    ///
    /// Structural checks run first, in document order, and the first
    /// failure wins. Semantic checks (status literals, duplicate ids,
    /// ARN shape, storage-class membership) run only once the document is
    /// structurally complete. Pure and synchronous; performs no I/O.
    pub fn validate(
        &self,
        policy: &ValidationPolicy,
    ) -> Result<ReplicationConfiguration, ConfigError> {
        let role = match &self.role {
            Some(role) => role.clone(),
            None => return Err(ConfigError::MalformedXml { field: "Role" }),
        };
        if self.rules.is_empty() {
            return Err(ConfigError::MalformedXml { field: "Rule" });
        }

        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            rules.push(validate_rule(rule)?);
        }

        // Structural pass complete; semantic checks from here on.
        if policy.require_arns && !is_arn_shaped(&role) {
            return Err(ConfigError::invalid(format!("Role is not a valid ARN: {role}")));
        }

        if policy.reject_duplicate_ids {
            let mut seen = HashSet::new();
            for rule in &rules {
                if !seen.insert(rule.id.as_str()) {
                    return Err(ConfigError::invalid(format!("duplicate rule ID: {}", rule.id)));
                }
            }
        }

        for rule in &rules {
            if policy.require_arns && !is_arn_shaped(&rule.destination.bucket) {
                return Err(ConfigError::invalid(format!(
                    "destination Bucket is not a valid ARN: {}",
                    rule.destination.bucket
                )));
            }
            if let Some(class) = &rule.destination.storage_class {
                if !policy.allowed_storage_classes.contains(class) {
                    return Err(ConfigError::invalid(format!("unknown StorageClass: {class}")));
                }
            }
        }

        Ok(ReplicationConfiguration { role, rules })
    }
}

/// Structural check of one rule, plus parsing of its status literal.
fn validate_rule(rule: &RuleDocument) -> Result<ReplicationRule, ConfigError> {
    let id = match &rule.id {
        Some(id) => id.clone(),
        None => return Err(ConfigError::MalformedXml { field: "ID" }),
    };
    // Present-but-empty prefix is valid and matches every key.
    let prefix = match &rule.prefix {
        Some(prefix) => prefix.clone(),
        None => return Err(ConfigError::MalformedXml { field: "Prefix" }),
    };
    let raw_status = match &rule.status {
        Some(status) => status.as_str(),
        None => return Err(ConfigError::MalformedXml { field: "Status" }),
    };
    let destination = match &rule.destination {
        Some(destination) => destination,
        None => return Err(ConfigError::MalformedXml { field: "Destination" }),
    };
    let bucket = match &destination.bucket {
        Some(bucket) => bucket.clone(),
        None => return Err(ConfigError::MalformedXml { field: "Bucket" }),
    };

    // A present Status tag with a bad literal is a semantic failure,
    // distinct from the missing-tag case above.
    let status = RuleStatus::parse(raw_status)
        .ok_or_else(|| ConfigError::invalid(format!("invalid rule Status: {raw_status}")))?;

    Ok(ReplicationRule {
        id,
        prefix,
        status,
        destination: Destination {
            bucket,
            storage_class: destination.storage_class.clone(),
        },
    })
}

/// Checks that a value looks like an ARN:
/// `arn:<partition>:<service>:<region>:<account>:<resource>`.
///
/// Region and account may be empty (S3 bucket ARNs leave both blank);
/// partition, service, and resource may not.
fn is_arn_shaped(value: &str) -> bool {
    let mut parts = value.splitn(6, ':');
    let (Some(prefix), Some(partition), Some(service), Some(_region), Some(_account), Some(resource)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    prefix == "arn" && !partition.is_empty() && !service.is_empty() && !resource.is_empty()
}

impl ReplicationConfiguration {
    /// Iterates over rules with `status = Enabled`.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &ReplicationRule> {
        self.rules.iter().filter(|r| r.status == RuleStatus::Enabled)
    }

    /// Selects the rule applying to `object_key`, if any.
    ///
    /// Only enabled rules are considered. A rule matches when the key
    /// starts with its prefix (empty prefix matches everything). The
    /// longest matching prefix wins; among equally long prefixes the rule
    /// declared first wins. No match is not an error.
    #[must_use]
    pub fn match_rule(&self, object_key: &str) -> Option<MatchedRule> {
        let mut best: Option<&ReplicationRule> = None;
        for rule in self.enabled_rules() {
            if !object_key.starts_with(&rule.prefix) {
                continue;
            }
            // Strictly-greater keeps the earliest rule on prefix ties.
            match best {
                Some(current) if rule.prefix.len() <= current.prefix.len() => {}
                _ => best = Some(rule),
            }
        }
        best.map(|rule| MatchedRule {
            rule_id: rule.id.clone(),
            destination_bucket: rule.destination.bucket.clone(),
            storage_class: rule.destination.storage_class.clone(),
        })
    }
}
