use signoff_db::migrations;

use crate::commands::{
    current_thread_runtime, load_config, open_pool, CommandResult, Failure, FailureClass,
};

pub fn run() -> CommandResult {
    match apply() {
        Ok(applied) if applied.is_empty() => {
            CommandResult::success("migrate", "schema already up to date")
        }
        Ok(applied) => {
            let versions: Vec<String> = applied.iter().map(ToString::to_string).collect();
            CommandResult::success(
                "migrate",
                format!("applied {} migration(s): {}", applied.len(), versions.join(", ")),
            )
        }
        Err(failure) => CommandResult::from_failure("migrate", failure),
    }
}

/// Returns the versions that were pending before this run.
fn apply() -> Result<Vec<i64>, Failure> {
    let config = load_config()?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let pending = migrations::pending_versions(&pool)
            .await
            .map_err(|error| Failure::new(FailureClass::Migration, error.to_string()))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new(FailureClass::Migration, error.to_string()))?;
        pool.close().await;
        Ok(pending)
    })
}
