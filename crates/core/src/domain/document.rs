use std::fmt;

use serde::{Deserialize, Serialize};

/// Business document class an approval is attached to (`quotation`, `contract`, ...).
///
/// The set is open: any document type with a registered status handler can take
/// part in approvals.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BizType(pub String);

impl BizType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn quotation() -> Self {
        Self::new("quotation")
    }

    pub fn contract() -> Self {
        Self::new("contract")
    }

    pub fn test_report() -> Self {
        Self::new("test_report")
    }

    pub fn client_report() -> Self {
        Self::new("client_report")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BizType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite key of the business document owning an approval instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub biz_type: BizType,
    pub biz_id: String,
}

impl DocumentRef {
    pub fn new(biz_type: BizType, biz_id: impl Into<String>) -> Self {
        Self { biz_type, biz_id: biz_id.into() }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.biz_type, self.biz_id)
    }
}
