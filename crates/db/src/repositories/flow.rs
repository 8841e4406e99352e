use async_trait::async_trait;
use sqlx::Row;

use signoff_core::approvals::ports::{FlowDefinitionStore, FlowFilter, StoreError};
use signoff_core::domain::document::BizType;
use signoff_core::domain::flow::{ApprovalNode, FlowCode, FlowDefinition};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

/// Flow definitions in `approval_flow`. Node lists are stored as JSON in their
/// canonical shape; legacy shapes are normalized before they get here.
pub struct SqlFlowStore {
    pool: DbPool,
}

impl SqlFlowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const FLOW_COLUMNS: &str =
    "code, name, biz_type, description, enabled, version, nodes_json, created_at, updated_at";

fn row_to_flow(row: &sqlx::sqlite::SqliteRow) -> Result<FlowDefinition, RepositoryError> {
    let code: String = row.try_get("code").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let biz_type: String =
        row.try_get("biz_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: Option<String> =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let enabled: bool =
        row.try_get("enabled").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let nodes_json: String =
        row.try_get("nodes_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let nodes: Vec<ApprovalNode> = serde_json::from_str(&nodes_json)
        .map_err(|e| RepositoryError::Decode(format!("nodes_json of flow `{code}`: {e}")))?;

    Ok(FlowDefinition {
        code: FlowCode(code),
        name,
        biz_type: BizType::new(biz_type),
        description,
        enabled,
        version: u32::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("flow version {version} out of range")))?,
        nodes,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl FlowDefinitionStore for SqlFlowStore {
    async fn find_flow(&self, code: &FlowCode) -> Result<Option<FlowDefinition>, StoreError> {
        let row = sqlx::query(&format!("SELECT {FLOW_COLUMNS} FROM approval_flow WHERE code = ?"))
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_flow(r)?)),
            None => Ok(None),
        }
    }

    async fn list_flows(&self, filter: &FlowFilter) -> Result<Vec<FlowDefinition>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flow
             WHERE (? IS NULL OR biz_type = ?)
               AND (? IS NULL OR enabled = ?)
             ORDER BY biz_type, code"
        ))
        .bind(filter.biz_type.as_ref().map(BizType::as_str))
        .bind(filter.biz_type.as_ref().map(BizType::as_str))
        .bind(filter.enabled)
        .bind(filter.enabled)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_flow).collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_flow(&self, flow: FlowDefinition) -> Result<FlowDefinition, StoreError> {
        let nodes_json = serde_json::to_string(&flow.nodes)
            .map_err(|e| StoreError::Decode(format!("encode nodes of `{}`: {e}", flow.code)))?;

        // One statement so the version bump cannot race another writer.
        let (version, created_at): (i64, String) = sqlx::query_as(
            "INSERT INTO approval_flow (code, name, biz_type, description, enabled, version,
                                        nodes_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
                 name = excluded.name,
                 biz_type = excluded.biz_type,
                 description = excluded.description,
                 enabled = excluded.enabled,
                 version = approval_flow.version + 1,
                 nodes_json = excluded.nodes_json,
                 updated_at = excluded.updated_at
             RETURNING version, created_at",
        )
        .bind(flow.code.as_str())
        .bind(&flow.name)
        .bind(flow.biz_type.as_str())
        .bind(&flow.description)
        .bind(flow.enabled)
        .bind(&nodes_json)
        .bind(flow.created_at.to_rfc3339())
        .bind(flow.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let version = u32::try_from(version)
            .map_err(|_| StoreError::Decode(format!("flow version {version} out of range")))?;
        let created_at = parse_timestamp("created_at", &created_at)?;

        Ok(FlowDefinition { version, created_at, ..flow })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use signoff_core::approvals::ports::{FlowDefinitionStore, FlowFilter};
    use signoff_core::domain::document::BizType;
    use signoff_core::domain::flow::{FlowCode, FlowDefinition};
    use signoff_core::flows::{FlowLoader, RawFlowDefinition};

    use super::SqlFlowStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlFlowStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlFlowStore::new(pool)
    }

    fn flow(code: &str, biz_type: &str, enabled: bool) -> FlowDefinition {
        let raw: RawFlowDefinition = serde_json::from_value(serde_json::json!({
            "code": code,
            "name": format!("{code} flow"),
            "bizType": biz_type,
            "enabled": enabled,
            "nodes": [
                {"step": 1, "approverType": "role", "targetId": "sales_manager"},
                {"step": 2, "approverType": "department_manager", "targetId": "D1"}
            ]
        }))
        .expect("raw flow");
        FlowLoader::default().load(raw, Utc::now()).expect("flow loads")
    }

    #[tokio::test]
    async fn save_and_find_round_trips_nodes() {
        let store = setup().await;
        let saved =
            store.save_flow(flow("QUOTATION_APPROVAL", "quotation", true)).await.expect("save");
        assert_eq!(saved.version, 1);

        let found = store
            .find_flow(&FlowCode("QUOTATION_APPROVAL".to_string()))
            .await
            .expect("find")
            .expect("flow exists");
        assert_eq!(found.nodes, saved.nodes);
        assert!(found.nodes[1].manager_role_codes.contains("dept_manager"));
    }

    #[tokio::test]
    async fn save_bumps_version_and_keeps_created_at() {
        let store = setup().await;
        let first = store.save_flow(flow("F", "quotation", true)).await.expect("first save");
        let second = store.save_flow(flow("F", "quotation", false)).await.expect("second save");

        assert_eq!(second.version, 2);
        assert_eq!(second.created_at.timestamp(), first.created_at.timestamp());
        assert!(!second.enabled);
    }

    #[tokio::test]
    async fn list_filters_by_biz_type_and_enabled() {
        let store = setup().await;
        store.save_flow(flow("Q", "quotation", true)).await.expect("save q");
        store.save_flow(flow("C", "contract", true)).await.expect("save c");
        store.save_flow(flow("C_OLD", "contract", false)).await.expect("save c old");

        let all = store.list_flows(&FlowFilter::default()).await.expect("list all");
        assert_eq!(all.len(), 3);

        let contracts = store
            .list_flows(&FlowFilter { biz_type: Some(BizType::contract()), enabled: Some(true) })
            .await
            .expect("list contracts");
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].code.as_str(), "C");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_each_get_a_distinct_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("flows.db").display());
        let pool = connect_with_settings(&url, 4, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = Arc::new(SqlFlowStore::new(pool));

        let saves: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.save_flow(flow("F", "quotation", true)).await })
            })
            .collect();

        let mut versions = Vec::new();
        for save in saves {
            versions.push(save.await.expect("task").expect("save").version);
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<u32>>());

        let stored = store.find_flow(&FlowCode("F".to_string())).await.expect("find");
        assert_eq!(stored.expect("flow exists").version, 8);
    }
}
