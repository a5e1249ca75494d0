use std::sync::Arc;

use anyhow::Context;
use tabula_agent::{AgentRuntime, AskRequest, AskResponse};
use tabula_core::clock::SystemClock;
use tabula_core::config::{AppConfig, ConfigOverrides, LoadOptions};

use super::CommandResult;
use crate::logging::init_logging;
use crate::AskArgs;

const COMMAND: &str = "ask";

/// Exit code when the question was understood but could not be answered.
pub const UNANSWERED_EXIT_CODE: u8 = 4;

pub fn run(args: &AskArgs) -> CommandResult {
    let options = LoadOptions {
        overrides: ConfigOverrides { fixture_path: args.data.clone(), ..ConfigOverrides::default() },
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2),
    };
    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(COMMAND, "runtime_init", format!("async runtime: {error}"), 3)
        }
    };

    match runtime.block_on(answer(&config, args)) {
        Ok(response) => render(&response),
        Err(error) => CommandResult::failure(COMMAND, "runtime_init", format!("{error:#}"), 3),
    }
}

async fn answer(config: &AppConfig, args: &AskArgs) -> anyhow::Result<AskResponse> {
    let agent = AgentRuntime::from_config(config, Arc::new(SystemClock)).context("could not start the agent runtime")?;
    let request = AskRequest {
        query: args.query.clone(),
        session_id: args.session.clone(),
        category_override: args.category,
        today: args.today,
        history: Vec::new(),
    };
    Ok(agent.ask(request).await)
}

fn render(response: &AskResponse) -> CommandResult {
    let exit_code = if response.error.is_some() { UNANSWERED_EXIT_CODE } else { 0 };
    match serde_json::to_string_pretty(response) {
        Ok(output) => CommandResult { exit_code, output },
        Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 1),
    }
}
