use std::collections::HashMap;

use tokio::sync::RwLock;

use signoff_core::approvals::ports::{
    FlowDefinitionStore, FlowFilter, InstanceFilter, InstanceRepository, StoreError, UserDirectory,
};
use signoff_core::domain::approval::{ApprovalInstance, ApprovalRecord, InstanceId};
use signoff_core::domain::flow::{FlowCode, FlowDefinition};
use signoff_core::domain::user::{UserContext, UserId};

#[derive(Default)]
pub struct InMemoryFlowStore {
    flows: RwLock<HashMap<String, FlowDefinition>>,
}

#[async_trait::async_trait]
impl FlowDefinitionStore for InMemoryFlowStore {
    async fn find_flow(&self, code: &FlowCode) -> Result<Option<FlowDefinition>, StoreError> {
        let flows = self.flows.read().await;
        Ok(flows.get(code.as_str()).cloned())
    }

    async fn list_flows(&self, filter: &FlowFilter) -> Result<Vec<FlowDefinition>, StoreError> {
        let flows = self.flows.read().await;
        let mut matching: Vec<FlowDefinition> =
            flows.values().filter(|flow| filter.matches(flow)).cloned().collect();
        matching.sort_by(|a, b| (&a.biz_type, &a.code.0).cmp(&(&b.biz_type, &b.code.0)));
        Ok(matching)
    }

    async fn save_flow(&self, flow: FlowDefinition) -> Result<FlowDefinition, StoreError> {
        let mut flows = self.flows.write().await;
        let saved = match flows.get(flow.code.as_str()) {
            Some(existing) => FlowDefinition {
                version: existing.version + 1,
                created_at: existing.created_at,
                ..flow
            },
            None => FlowDefinition { version: 1, ..flow },
        };
        flows.insert(saved.code.0.clone(), saved.clone());
        Ok(saved)
    }
}

#[derive(Default)]
struct InstanceState {
    instances: HashMap<String, ApprovalInstance>,
    records: HashMap<String, Vec<ApprovalRecord>>,
}

/// Instances and their history behind one lock, so the pending check and the
/// insert (or the step check and the record append) cannot interleave.
#[derive(Default)]
pub struct InMemoryInstanceRepository {
    state: RwLock<InstanceState>,
}

#[async_trait::async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn insert_pending(&self, instance: &ApprovalInstance) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let already_pending = state
            .instances
            .values()
            .any(|existing| existing.is_pending() && existing.document == instance.document);
        if already_pending {
            return Err(StoreError::PendingExists(instance.document.clone()));
        }
        state.instances.insert(instance.id.0.clone(), instance.clone());
        Ok(())
    }

    async fn find_instance(&self, id: &InstanceId) -> Result<Option<ApprovalInstance>, StoreError> {
        let state = self.state.read().await;
        Ok(state.instances.get(&id.0).cloned())
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<ApprovalInstance>, StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<ApprovalInstance> =
            state.instances.values().filter(|instance| filter.matches(instance)).cloned().collect();
        matching.sort_by(|a, b| {
            b.submitted_at.cmp(&a.submitted_at).then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(matching)
    }

    async fn commit_transition(
        &self,
        instance: &ApprovalInstance,
        expected_step: u32,
        record: &ApprovalRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let current_matches = state
            .instances
            .get(&instance.id.0)
            .is_some_and(|stored| stored.is_pending() && stored.current_step == expected_step);
        if !current_matches {
            return Err(StoreError::StaleInstance(instance.id.clone()));
        }

        state.instances.insert(instance.id.0.clone(), instance.clone());
        state.records.entry(instance.id.0.clone()).or_default().push(record.clone());
        Ok(())
    }

    async fn list_records(&self, id: &InstanceId) -> Result<Vec<ApprovalRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.get(&id.0).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserContext>>,
}

impl InMemoryUserDirectory {
    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = UserContext>,
    {
        Self {
            users: RwLock::new(users.into_iter().map(|user| (user.id.0.clone(), user)).collect()),
        }
    }

    pub async fn put(&self, user: UserContext) {
        self.users.write().await.insert(user.id.0.clone(), user);
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserContext>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(id.as_str()).cloned())
    }
}
