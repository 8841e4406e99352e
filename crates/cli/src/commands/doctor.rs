use serde::Serialize;
use signoff_core::approvals::{FlowDefinitionStore, FlowFilter};
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_db::{migrations, ping, SqlFlowStore};

use crate::commands::{current_thread_runtime, open_pool};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "schema_migrations", "flow_catalog"];

/// Returns the exit code together with the rendered report.
pub fn run(json_output: bool) -> (u8, String) {
    let report = build_report(AppConfig::load(LoadOptions::default()));
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return (exit_code, output);
    }

    (exit_code, render_human(&report))
}

fn build_report(
    config: Result<AppConfig, signoff_core::config::ConfigError>,
) -> DoctorReport {
    let mut checks = Vec::new();

    match config {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_document_types(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("document_handlers", "configuration did not load"));
            for name in DATABASE_CHECKS {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_document_types(config: &AppConfig) -> DoctorCheck {
    DoctorCheck::pass(
        "document_handlers",
        format!("status handlers registered for: {}", config.approvals.document_types.join(", ")),
    )
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            let mut checks = vec![DoctorCheck::fail("database_connectivity", failure.message)];
            checks.push(DoctorCheck::skipped("schema_migrations", "no async runtime"));
            checks.push(DoctorCheck::skipped("flow_catalog", "no async runtime"));
            return checks;
        }
    };

    runtime.block_on(async {
        let pool = match open_pool(config).await {
            Ok(pool) => pool,
            Err(failure) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {}", failure.message),
                    ),
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                    DoctorCheck::skipped("flow_catalog", "the database is unreachable"),
                ];
            }
        };

        let mut checks = Vec::new();
        match ping(&pool).await {
            Ok(()) => checks.push(DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            )),
            Err(error) => {
                checks.push(DoctorCheck::fail("database_connectivity", error.to_string()))
            }
        }

        let schema_ready = match migrations::pending_versions(&pool).await {
            Ok(pending) if pending.is_empty() => {
                checks.push(DoctorCheck::pass("schema_migrations", "all migrations applied"));
                true
            }
            Ok(pending) => {
                checks.push(DoctorCheck::fail(
                    "schema_migrations",
                    format!("{} pending migration(s); run `signoff migrate`", pending.len()),
                ));
                false
            }
            Err(error) => {
                checks.push(DoctorCheck::fail("schema_migrations", error.to_string()));
                false
            }
        };

        if schema_ready {
            let store = SqlFlowStore::new(pool.clone());
            let filter = FlowFilter { enabled: Some(true), ..FlowFilter::default() };
            match store.list_flows(&filter).await {
                Ok(flows) => checks.push(DoctorCheck::pass(
                    "flow_catalog",
                    format!("{} enabled approval flow(s)", flows.len()),
                )),
                Err(error) => checks.push(DoctorCheck::fail("flow_catalog", error.to_string())),
            }
        } else {
            checks.push(DoctorCheck::skipped("flow_catalog", "the schema is not migrated"));
        }

        pool.close().await;
        checks
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use signoff_core::config::{AppConfig, ConfigError};

    use super::{build_report, render_human, CheckStatus};

    #[test]
    fn unmigrated_in_memory_database_fails_schema_check() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();

        let report = build_report(Ok(config));
        let statuses: Vec<(&str, CheckStatus)> =
            report.checks.iter().map(|check| (check.name, check.status)).collect();

        assert_eq!(
            statuses,
            vec![
                ("config_validation", CheckStatus::Pass),
                ("document_handlers", CheckStatus::Pass),
                ("database_connectivity", CheckStatus::Pass),
                ("schema_migrations", CheckStatus::Fail),
                ("flow_catalog", CheckStatus::Skipped),
            ]
        );
        assert_eq!(report.overall_status, CheckStatus::Fail);
    }

    #[test]
    fn config_failure_skips_every_dependent_check() {
        let report =
            build_report(Err(ConfigError::Validation("server.port must be non-zero".into())));
        let rendered = render_human(&report);

        assert!(rendered.starts_with("doctor: one or more readiness checks failed"));
        assert!(rendered.contains("- [fail] config_validation"));
        assert_eq!(
            report.checks.iter().filter(|check| check.status == CheckStatus::Skipped).count(),
            4
        );
    }
}
