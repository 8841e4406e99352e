use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Role code and username that short-circuit approver resolution.
pub const SUPER_ADMIN: &str = "admin";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Facts about a user that approver resolution and visibility depend on.
///
/// Always loaded fresh from the user directory for the request at hand; role and
/// department membership may change between submission and decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub role_codes: BTreeSet<String>,
    pub dept_id: Option<String>,
}

impl UserContext {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: UserId(id.into()),
            name: username.clone(),
            username,
            role_codes: BTreeSet::new(),
            dept_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_role(mut self, role_code: impl Into<String>) -> Self {
        self.role_codes.insert(role_code.into());
        self
    }

    pub fn with_roles<I, S>(mut self, role_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_codes.extend(role_codes.into_iter().map(Into::into));
        self
    }

    pub fn with_dept(mut self, dept_id: impl Into<String>) -> Self {
        self.dept_id = Some(dept_id.into());
        self
    }

    pub fn has_role(&self, role_code: &str) -> bool {
        self.role_codes.contains(role_code)
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(SUPER_ADMIN) || self.username == SUPER_ADMIN
    }
}
