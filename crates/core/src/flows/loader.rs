//! Normalization boundary for flow configuration.
//!
//! Flow rows and import files carry node lists in several historical shapes:
//! the step index under `step` or `order`, the approver kind under
//! `approverType` or `type`, the target under `targetId` or `approverRole`, and
//! the node array either inline or JSON-encoded as a string. Everything is
//! mapped to [`ApprovalNode`] here and nowhere else.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::document::BizType;
use crate::domain::flow::{ApprovalNode, ApproverType, FlowCode, FlowDefinition};

pub const DEFAULT_MANAGER_ROLE_CODES: [&str; 5] =
    ["admin", "manager", "dept_manager", "sales_manager", "lab_director"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowConfigError {
    #[error("flow code is required")]
    MissingCode,
    #[error("flow `{code}` has no bizType")]
    MissingBizType { code: String },
    #[error("node list is not valid JSON: {0}")]
    MalformedNodes(String),
    #[error("step {step} appears more than once")]
    DuplicateStep { step: u32 },
    #[error("steps must run contiguously from 1; expected {expected}, found {found}")]
    NonContiguousSteps { expected: u32, found: u32 },
}

/// A scalar that older rows store either as text or as a number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Text(String),
    Number(i64),
}

impl RawScalar {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Number(number) => number.to_string(),
        }
    }
}

/// Enabled flag as stored: a bool, a 0/1 status column, or a status word.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFlag {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl RawFlag {
    fn is_enabled(&self) -> bool {
        match self {
            Self::Bool(flag) => *flag,
            Self::Number(value) => *value != 0,
            Self::Text(text) => {
                matches!(text.trim(), "1" | "true" | "enabled" | "active")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawApprovalNode {
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub approver_type: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub legacy_type: Option<String>,
    #[serde(default)]
    pub target_id: Option<RawScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_role: Option<RawScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<RawScalar>,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub manager_role_codes: Option<Vec<String>>,
    #[serde(default)]
    pub required: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNodes {
    Encoded(String),
    List(Vec<RawApprovalNode>),
}

impl Default for RawNodes {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFlowDefinition {
    #[serde(alias = "flowCode")]
    pub code: String,
    #[serde(default, alias = "flowName")]
    pub name: Option<String>,
    #[serde(default, alias = "businessType")]
    pub biz_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "status")]
    pub enabled: Option<RawFlag>,
    #[serde(default)]
    pub nodes: RawNodes,
}

#[derive(Clone, Debug)]
pub struct FlowLoader {
    manager_role_codes: BTreeSet<String>,
}

impl Default for FlowLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MANAGER_ROLE_CODES.iter().map(|code| code.to_string()))
    }
}

impl FlowLoader {
    /// `manager_role_codes` is applied to department_manager nodes that do not
    /// list their own.
    pub fn new(manager_role_codes: impl IntoIterator<Item = String>) -> Self {
        Self { manager_role_codes: manager_role_codes.into_iter().collect() }
    }

    pub fn manager_role_codes(&self) -> &BTreeSet<String> {
        &self.manager_role_codes
    }

    /// Builds a definition at version 1; stores decide the persisted version.
    pub fn load(
        &self,
        raw: RawFlowDefinition,
        now: DateTime<Utc>,
    ) -> Result<FlowDefinition, FlowConfigError> {
        let code = raw.code.trim().to_string();
        if code.is_empty() {
            return Err(FlowConfigError::MissingCode);
        }

        let biz_type = raw
            .biz_type
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| FlowConfigError::MissingBizType { code: code.clone() })?;

        let nodes = match raw.nodes {
            RawNodes::Encoded(encoded) => self.parse_nodes_json(&encoded)?,
            RawNodes::List(nodes) => self.normalize_nodes(nodes)?,
        };

        Ok(FlowDefinition {
            name: raw
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| code.clone()),
            code: FlowCode(code),
            biz_type: BizType::new(biz_type),
            description: raw.description.filter(|text| !text.trim().is_empty()),
            enabled: raw.enabled.as_ref().map_or(true, RawFlag::is_enabled),
            version: 1,
            nodes,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn parse_nodes_json(&self, encoded: &str) -> Result<Vec<ApprovalNode>, FlowConfigError> {
        if encoded.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawApprovalNode> = serde_json::from_str(encoded)
            .map_err(|error| FlowConfigError::MalformedNodes(error.to_string()))?;
        self.normalize_nodes(raw)
    }

    pub fn normalize_nodes(
        &self,
        raw: Vec<RawApprovalNode>,
    ) -> Result<Vec<ApprovalNode>, FlowConfigError> {
        let mut nodes: Vec<ApprovalNode> =
            raw.into_iter().map(|node| self.normalize(node)).collect();
        nodes.sort_by_key(|node| node.step);

        let mut expected = 1;
        let mut previous = None;
        for node in &nodes {
            if previous == Some(node.step) {
                return Err(FlowConfigError::DuplicateStep { step: node.step });
            }
            previous = Some(node.step);
            if node.step != expected {
                return Err(FlowConfigError::NonContiguousSteps { expected, found: node.step });
            }
            expected += 1;
        }

        Ok(nodes)
    }

    fn normalize(&self, raw: RawApprovalNode) -> ApprovalNode {
        let step = raw.step.or(raw.order).unwrap_or(0);
        // Canonical keys win; historical spellings only fill gaps.
        let approver_type =
            ApproverType::from(raw.approver_type.or(raw.legacy_type).unwrap_or_default());
        let target_id = raw
            .target_id
            .or(raw.approver_role)
            .or(raw.approver_id)
            .map(RawScalar::into_text)
            .unwrap_or_default();

        let listed: BTreeSet<String> = raw
            .manager_role_codes
            .unwrap_or_default()
            .into_iter()
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect();
        let manager_role_codes = match approver_type {
            ApproverType::DepartmentManager if listed.is_empty() => self.manager_role_codes.clone(),
            ApproverType::DepartmentManager => listed,
            _ => BTreeSet::new(),
        };

        ApprovalNode {
            step,
            name: raw
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("Step {step}")),
            approver_type,
            target_id,
            target_name: raw.target_name.filter(|name| !name.trim().is_empty()),
            manager_role_codes,
            required: raw.required.unwrap_or(true),
        }
    }
}
