//! Persistence and directory boundaries the approval service depends on.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::{ApprovalInstance, ApprovalRecord, ApprovalStatus, InstanceId};
use crate::domain::document::{BizType, DocumentRef};
use crate::domain::flow::{FlowCode, FlowDefinition};
use crate::domain::user::{UserContext, UserId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("a pending approval already exists for {0}")]
    PendingExists(DocumentRef),
    #[error("instance {0} changed underneath this update")]
    StaleInstance(InstanceId),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub status: Option<ApprovalStatus>,
    pub submitter_id: Option<UserId>,
    pub biz_type: Option<BizType>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &ApprovalInstance) -> bool {
        self.status.map_or(true, |status| instance.status == status)
            && self.submitter_id.as_ref().map_or(true, |id| &instance.submitter_id == id)
            && self
                .biz_type
                .as_ref()
                .map_or(true, |biz_type| &instance.document.biz_type == biz_type)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowFilter {
    pub biz_type: Option<BizType>,
    pub enabled: Option<bool>,
}

impl FlowFilter {
    pub fn matches(&self, flow: &FlowDefinition) -> bool {
        self.biz_type.as_ref().map_or(true, |biz_type| &flow.biz_type == biz_type)
            && self.enabled.map_or(true, |enabled| flow.enabled == enabled)
    }
}

#[async_trait]
pub trait FlowDefinitionStore: Send + Sync {
    async fn find_flow(&self, code: &FlowCode) -> Result<Option<FlowDefinition>, StoreError>;

    async fn list_flows(&self, filter: &FlowFilter) -> Result<Vec<FlowDefinition>, StoreError>;

    /// Inserts or replaces a flow. The stored version is one past the previous
    /// version (1 for a new code) and `created_at` of an existing flow is kept.
    async fn save_flow(&self, flow: FlowDefinition) -> Result<FlowDefinition, StoreError>;
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Fails with [`StoreError::PendingExists`] when the document already has a
    /// pending instance. The check and the insert are atomic.
    async fn insert_pending(&self, instance: &ApprovalInstance) -> Result<(), StoreError>;

    async fn find_instance(&self, id: &InstanceId) -> Result<Option<ApprovalInstance>, StoreError>;

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<ApprovalInstance>, StoreError>;

    /// Writes the new instance state and appends `record` in one unit.
    ///
    /// Succeeds only while the stored row is still pending at `expected_step`;
    /// otherwise nothing is written and [`StoreError::StaleInstance`] is returned.
    async fn commit_transition(
        &self,
        instance: &ApprovalInstance,
        expected_step: u32,
        record: &ApprovalRecord,
    ) -> Result<(), StoreError>;

    /// History of one instance in commit order.
    async fn list_records(&self, id: &InstanceId) -> Result<Vec<ApprovalRecord>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserContext>, StoreError>;
}
