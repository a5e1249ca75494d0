use serde::Serialize;
use tabula_agent::client_from_config;
use tabula_core::config::{AppConfig, LoadOptions};
use tabula_core::graph::NodeGraph;
use tabula_core::schema::SchemaRegistry;
use tabula_data::InMemoryDataSource;

use super::{escape_json, CommandResult};

pub const DOCTOR_FAILURE_EXIT_CODE: u8 = 5;

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
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { DOCTOR_FAILURE_EXIT_CODE };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = vec![check_schema_registry(), check_node_graph()];

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.insert(0, DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_data_source(&config));
            checks.push(check_llm_client(&config));
        }
        Err(error) => {
            checks.insert(0, DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["data_source", "llm_client"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
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

fn check_schema_registry() -> DoctorCheck {
    let schema = SchemaRegistry::standard();
    let keys = schema.sheet_keys();
    if keys.is_empty() {
        return DoctorCheck::fail("schema_registry", "no sheets registered");
    }
    let undated: Vec<&str> = keys.iter().copied().filter(|key| schema.date_column(key).is_none()).collect();
    let mut details = format!("{} sheets registered: {}", keys.len(), keys.join(", "));
    if !undated.is_empty() {
        details.push_str(&format!(" (no date column: {})", undated.join(", ")));
    }
    DoctorCheck::pass("schema_registry", details)
}

fn check_node_graph() -> DoctorCheck {
    let graph = NodeGraph::standard();
    if let Some(edge) = graph.broken_edges().first() {
        return DoctorCheck::fail("node_graph", format!("cycle through `{}` -> `{}`", edge.node, edge.dependency));
    }
    if graph.topological_order().len() != graph.len() {
        return DoctorCheck::fail("node_graph", "agent graph is not fully orderable");
    }
    DoctorCheck::pass("node_graph", format!("{} agents in {} waves", graph.len(), graph.waves().len()))
}

fn check_data_source(config: &AppConfig) -> DoctorCheck {
    match &config.data.fixture_path {
        None => DoctorCheck::pass("data_source", "using the built-in demo dataset"),
        Some(path) => match InMemoryDataSource::from_json_file(path) {
            Ok(_) => DoctorCheck::pass("data_source", format!("fixture `{}` loaded", path.display())),
            Err(error) => DoctorCheck::fail("data_source", error.to_string()),
        },
    }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match client_from_config(&config.llm) {
        Ok(_) => DoctorCheck::pass(
            "llm_client",
            format!("provider `{}` ready (model `{}`)", config.llm.provider.as_str(), config.llm.model),
        ),
        Err(error) => DoctorCheck::fail("llm_client", error.to_string()),
    }
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
