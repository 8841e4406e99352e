use serde::{Deserialize, Serialize};

use crate::domain::flow::{ApprovalNode, ApproverType};
use crate::domain::user::UserContext;

/// Why a user was admitted at a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantBasis {
    /// Super-admin escape hatch. Callers audit every use.
    AdminOverride,
    Role,
    SpecificUser,
    DepartmentManager,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EligibilityDenial {
    UnconfiguredNode { step: u32 },
    UnsupportedApproverType { step: u32, approver_type: String },
    MissingRole { role_code: String },
    NotDesignatedUser { user_id: String },
    WrongDepartment { expected: String, actual: Option<String> },
    NotDepartmentManager { dept_id: String },
}

impl EligibilityDenial {
    pub fn reason(&self) -> String {
        match self {
            Self::UnconfiguredNode { step } => format!("step {step} has no approver target"),
            Self::UnsupportedApproverType { step, approver_type } => {
                format!("step {step} uses unsupported approver type `{approver_type}`")
            }
            Self::MissingRole { role_code } => format!("approver lacks role `{role_code}`"),
            Self::NotDesignatedUser { user_id } => {
                format!("step is assigned to user `{user_id}`")
            }
            Self::WrongDepartment { expected, actual } => match actual {
                Some(actual) => {
                    format!("step belongs to department `{expected}`, approver is in `{actual}`")
                }
                None => format!("step belongs to department `{expected}`, approver has none"),
            },
            Self::NotDepartmentManager { dept_id } => {
                format!("approver is not a manager of department `{dept_id}`")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eligibility {
    Granted { basis: GrantBasis },
    Denied(EligibilityDenial),
}

impl Eligibility {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    pub fn basis(&self) -> Option<GrantBasis> {
        match self {
            Self::Granted { basis } => Some(*basis),
            Self::Denied(_) => None,
        }
    }
}

/// Decides whether one user may act at one node.
///
/// An unconfigured node (empty target or unsupported type) admits nobody, the
/// super admin included. The admin escape hatch is reported only when the
/// per-type rules would have refused, so an admin who also holds the node's
/// role is granted on that role.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApproverResolver;

impl ApproverResolver {
    pub fn resolve(&self, node: &ApprovalNode, user: &UserContext) -> Eligibility {
        let target = node.target_id.trim();
        if let ApproverType::Unsupported(kind) = &node.approver_type {
            return Eligibility::Denied(EligibilityDenial::UnsupportedApproverType {
                step: node.step,
                approver_type: kind.clone(),
            });
        }
        if target.is_empty() {
            return Eligibility::Denied(EligibilityDenial::UnconfiguredNode { step: node.step });
        }

        let eligibility = Self::by_approver_type(node, target, user);
        if !eligibility.is_granted() && user.is_super_admin() {
            return Eligibility::Granted { basis: GrantBasis::AdminOverride };
        }
        eligibility
    }

    fn by_approver_type(node: &ApprovalNode, target: &str, user: &UserContext) -> Eligibility {
        match &node.approver_type {
            ApproverType::Role => {
                if user.has_role(target) {
                    Eligibility::Granted { basis: GrantBasis::Role }
                } else {
                    Eligibility::Denied(EligibilityDenial::MissingRole {
                        role_code: target.to_string(),
                    })
                }
            }
            ApproverType::SpecificUser => {
                if user.id.as_str() == target {
                    Eligibility::Granted { basis: GrantBasis::SpecificUser }
                } else {
                    Eligibility::Denied(EligibilityDenial::NotDesignatedUser {
                        user_id: target.to_string(),
                    })
                }
            }
            ApproverType::DepartmentManager => {
                if user.dept_id.as_deref() != Some(target) {
                    return Eligibility::Denied(EligibilityDenial::WrongDepartment {
                        expected: target.to_string(),
                        actual: user.dept_id.clone(),
                    });
                }
                if node.manager_role_codes.iter().any(|code| user.has_role(code)) {
                    Eligibility::Granted { basis: GrantBasis::DepartmentManager }
                } else {
                    Eligibility::Denied(EligibilityDenial::NotDepartmentManager {
                        dept_id: target.to_string(),
                    })
                }
            }
            ApproverType::Unsupported(kind) => {
                Eligibility::Denied(EligibilityDenial::UnsupportedApproverType {
                    step: node.step,
                    approver_type: kind.clone(),
                })
            }
        }
    }

    pub fn is_eligible(&self, node: &ApprovalNode, user: &UserContext) -> bool {
        self.resolve(node, user).is_granted()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{ApproverResolver, Eligibility, EligibilityDenial, GrantBasis};
    use crate::domain::flow::{ApprovalNode, ApproverType};
    use crate::domain::user::UserContext;

    fn node(approver_type: ApproverType, target: &str, managers: &[&str]) -> ApprovalNode {
        ApprovalNode {
            step: 1,
            name: "Review".to_string(),
            approver_type,
            target_id: target.to_string(),
            target_name: None,
            manager_role_codes: managers
                .iter()
                .map(|code| code.to_string())
                .collect::<BTreeSet<_>>(),
            required: true,
        }
    }

    #[test]
    fn role_node_requires_exact_role_code() {
        let resolver = ApproverResolver;
        let node = node(ApproverType::Role, "sales_manager", &[]);

        let holder = UserContext::new("u1", "bob").with_role("sales_manager");
        let other_case = UserContext::new("u2", "carol").with_role("Sales_Manager");

        assert_eq!(
            resolver.resolve(&node, &holder),
            Eligibility::Granted { basis: GrantBasis::Role }
        );
        assert!(!resolver.is_eligible(&node, &other_case));
    }

    #[test]
    fn specific_user_node_matches_user_id_only() {
        let resolver = ApproverResolver;
        let node = node(ApproverType::SpecificUser, "u7", &[]);

        assert!(resolver.is_eligible(&node, &UserContext::new("u7", "dana")));
        assert!(!resolver.is_eligible(&node, &UserContext::new("u8", "u7")));
    }

    #[test]
    fn department_is_a_hard_gate_before_manager_roles() {
        let resolver = ApproverResolver;
        let node = node(ApproverType::DepartmentManager, "D1", &["dept_manager"]);

        let wrong_dept = UserContext::new("c", "c").with_role("dept_manager").with_dept("D2");
        let no_role = UserContext::new("e", "e").with_role("tester").with_dept("D1");
        let manager = UserContext::new("d", "d").with_role("dept_manager").with_dept("D1");

        assert_eq!(
            resolver.resolve(&node, &wrong_dept),
            Eligibility::Denied(EligibilityDenial::WrongDepartment {
                expected: "D1".to_string(),
                actual: Some("D2".to_string()),
            })
        );
        assert!(matches!(
            resolver.resolve(&node, &no_role),
            Eligibility::Denied(EligibilityDenial::NotDepartmentManager { .. })
        ));
        assert_eq!(
            resolver.resolve(&node, &manager).basis(),
            Some(GrantBasis::DepartmentManager)
        );
    }

    #[test]
    fn admin_is_admitted_through_an_explicit_override() {
        let resolver = ApproverResolver;
        let node = node(ApproverType::Role, "lab_director", &[]);

        let by_role = UserContext::new("a1", "root").with_role("admin");
        let by_username = UserContext::new("a2", "admin");

        assert_eq!(resolver.resolve(&node, &by_role).basis(), Some(GrantBasis::AdminOverride));
        assert_eq!(resolver.resolve(&node, &by_username).basis(), Some(GrantBasis::AdminOverride));
    }

    #[test]
    fn admin_holding_the_node_role_is_not_an_override() {
        let resolver = ApproverResolver;
        let node = node(ApproverType::Role, "sales_manager", &[]);
        let admin = UserContext::new("a1", "root").with_role("admin").with_role("sales_manager");

        assert_eq!(resolver.resolve(&node, &admin).basis(), Some(GrantBasis::Role));
    }

    #[test]
    fn unconfigured_nodes_admit_nobody() {
        let resolver = ApproverResolver;
        let users = [
            UserContext::new("admin", "admin").with_role("admin"),
            UserContext::new("", "").with_role(""),
            UserContext::new("u1", "bob").with_role("sales_manager").with_dept(""),
        ];
        let nodes = [
            node(ApproverType::Role, "", &[]),
            node(ApproverType::SpecificUser, "   ", &[]),
            node(ApproverType::DepartmentManager, "", &["admin"]),
            node(ApproverType::Unsupported("committee".to_string()), "sales_manager", &[]),
        ];

        for node in &nodes {
            for user in &users {
                assert!(!resolver.is_eligible(node, user), "{node:?} admitted {user:?}");
            }
        }
    }
}
