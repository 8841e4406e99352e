use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::document::BizType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowCode(pub String);

impl FlowCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who may act at a node.
///
/// `Unsupported` keeps whatever type string the configuration carried so the
/// flow still loads; such nodes never admit anyone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApproverType {
    Role,
    SpecificUser,
    DepartmentManager,
    Unsupported(String),
}

impl ApproverType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Role => "role",
            Self::SpecificUser => "specific_user",
            Self::DepartmentManager => "department_manager",
            Self::Unsupported(kind) => kind,
        }
    }
}

impl From<String> for ApproverType {
    fn from(value: String) -> Self {
        match value.trim() {
            "role" => Self::Role,
            "specific_user" | "user" => Self::SpecificUser,
            "department_manager" | "department" => Self::DepartmentManager,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

impl From<ApproverType> for String {
    fn from(value: ApproverType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ApproverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a flow in canonical form.
///
/// `target_id` is a role code, a user id or a department id depending on
/// `approver_type`. `manager_role_codes` is only meaningful for
/// `DepartmentManager` nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalNode {
    pub step: u32,
    pub name: String,
    pub approver_type: ApproverType,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub manager_role_codes: BTreeSet<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ApprovalNode {
    pub fn is_configured(&self) -> bool {
        !self.target_id.trim().is_empty()
            && !matches!(self.approver_type, ApproverType::Unsupported(_))
    }
}

/// Node list frozen into an instance at submission time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSnapshot {
    pub version: u32,
    pub nodes: Vec<ApprovalNode>,
}

impl FlowSnapshot {
    pub fn node_at(&self, step: u32) -> Option<&ApprovalNode> {
        self.nodes.iter().find(|node| node.step == step)
    }

    pub fn last_step(&self) -> u32 {
        self.nodes.iter().map(|node| node.step).max().unwrap_or(0)
    }
}

/// A named, versioned approval flow. Built by the flow loader, which guarantees
/// node steps are unique and run contiguously from 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub code: FlowCode,
    pub name: String,
    pub biz_type: BizType,
    pub description: Option<String>,
    pub enabled: bool,
    pub version: u32,
    pub nodes: Vec<ApprovalNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowDefinition {
    pub fn node_at(&self, step: u32) -> Option<&ApprovalNode> {
        self.nodes.iter().find(|node| node.step == step)
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot { version: self.version, nodes: self.nodes.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::ApproverType;

    #[test]
    fn approver_type_accepts_historical_aliases() {
        assert_eq!(ApproverType::from("user".to_string()), ApproverType::SpecificUser);
        assert_eq!(
            ApproverType::from("department".to_string()),
            ApproverType::DepartmentManager
        );
        assert_eq!(ApproverType::from(" role ".to_string()), ApproverType::Role);
        assert_eq!(
            ApproverType::from("Role".to_string()),
            ApproverType::Unsupported("Role".to_string())
        );
    }

    #[test]
    fn approver_type_serializes_canonical_names() {
        let json = serde_json::to_string(&ApproverType::DepartmentManager).expect("serialize");
        assert_eq!(json, "\"department_manager\"");
    }
}
