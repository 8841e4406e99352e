pub mod config;
pub mod doctor;
pub mod import_flows;
pub mod migrate;

use serde::Serialize;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_db::{connect_with_settings, DbPool};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Failure classes shared by the operator commands. Each maps to a fixed exit
/// code so scripts can branch without parsing the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    ConfigValidation,
    RuntimeInit,
    DbConnectivity,
    Migration,
    FlowValidation,
    FlowStore,
}

impl FailureClass {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::ConfigValidation => 2,
            Self::RuntimeInit => 3,
            Self::DbConnectivity => 4,
            Self::Migration => 5,
            Self::FlowValidation => 6,
            Self::FlowStore => 7,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Failure {
    pub(crate) class: FailureClass,
    pub(crate) message: String,
}

impl Failure {
    pub(crate) fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self { class, message: message.into() }
    }
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<FailureClass>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload =
            CommandOutcome { command, status: "ok", error_class: None, message: message.into() };
        Self { exit_code: 0, output: serialize_payload(&payload) }
    }

    pub fn failure(command: &str, class: FailureClass, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command,
            status: "error",
            error_class: Some(class),
            message: message.into(),
        };
        Self { exit_code: class.exit_code(), output: serialize_payload(&payload) }
    }

    pub(crate) fn from_failure(command: &str, failure: Failure) -> Self {
        Self::failure(command, failure.class, failure.message)
    }
}

fn serialize_payload(payload: &CommandOutcome<'_>) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config() -> Result<AppConfig, Failure> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        Failure::new(FailureClass::ConfigValidation, format!("configuration issue: {error}"))
    })
}

/// Commands are synchronous entry points; each owns a short-lived runtime.
pub(crate) fn current_thread_runtime() -> Result<tokio::runtime::Runtime, Failure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        Failure::new(
            FailureClass::RuntimeInit,
            format!("failed to initialize async runtime: {error}"),
        )
    })
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, Failure> {
    connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| Failure::new(FailureClass::DbConnectivity, error.to_string()))
}
