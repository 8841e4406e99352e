use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use signoff_core::approvals::FlowDefinitionStore;
use signoff_core::domain::flow::FlowDefinition;
use signoff_core::flows::{FlowLoader, RawFlowDefinition};
use signoff_db::{migrations, SqlFlowStore};

use crate::commands::{
    current_thread_runtime, load_config, open_pool, CommandResult, Failure, FailureClass,
};

pub fn run(path: &Path) -> CommandResult {
    match import(path) {
        Ok(saved) => CommandResult::success(
            "import-flows",
            format!("imported {} flow(s): {}", saved.len(), saved.join(", ")),
        ),
        Err(failure) => CommandResult::from_failure("import-flows", failure),
    }
}

fn import(path: &Path) -> Result<Vec<String>, Failure> {
    let config = load_config()?;
    let loader = FlowLoader::new(config.approvals.manager_role_codes.iter().cloned());
    let flows = read_flows(path, &loader)
        .map_err(|error| Failure::new(FailureClass::FlowValidation, format!("{error:#}")))?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let pool = open_pool(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new(FailureClass::Migration, error.to_string()))?;

        let store = SqlFlowStore::new(pool.clone());
        let mut saved = Vec::with_capacity(flows.len());
        for flow in flows {
            let flow = store
                .save_flow(flow)
                .await
                .map_err(|error| Failure::new(FailureClass::FlowStore, error.to_string()))?;
            saved.push(format!("{}@v{}", flow.code, flow.version));
        }
        pool.close().await;
        Ok(saved)
    })
}

/// Parses and normalizes every flow in the file. Nothing is stored unless all of
/// them load.
pub fn read_flows(path: &Path, loader: &FlowLoader) -> anyhow::Result<Vec<FlowDefinition>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read flow file `{}`", path.display()))?;
    let definitions: Vec<RawFlowDefinition> = serde_json::from_str(&raw)
        .with_context(|| format!("`{}` is not a JSON array of flows", path.display()))?;

    let now = Utc::now();
    definitions
        .into_iter()
        .enumerate()
        .map(|(index, definition)| {
            let code = definition.code.trim().to_string();
            loader
                .load(definition, now)
                .with_context(|| format!("flow #{} (`{code}`) is invalid", index + 1))
        })
        .collect()
}
