use std::process::ExitCode;

use clap::Parser;

use llm_gateway::Config;
use llm_gateway::llm::{GenerateParams, LlmClient, ProviderId};
use llm_gateway::telemetry::init_cli_logging;

const TEST_PROMPT: &str =
    "Please provide a brief ESG analysis for a solar energy company in Kenya.";

/// Send a test prompt to each configured provider on its own, without fallback.
#[derive(Debug, Parser)]
#[command(name = "check-providers", version)]
struct Args {
    /// Prompt sent to every provider.
    #[arg(long, default_value = TEST_PROMPT)]
    prompt: String,

    #[arg(long, default_value_t = 500)]
    max_tokens: u32,

    /// Limit the check to these providers (repeatable). Defaults to all of them.
    #[arg(long = "provider", value_name = "PROVIDER")]
    providers: Vec<ProviderId>,
}

enum Status {
    Passed,
    Failed,
    Skipped,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_cli_logging();
    let args = Args::parse();

    let config = Config::from_env()?;
    let client = LlmClient::from_config(&config);
    let configured = client.configured_providers();

    let targets = if args.providers.is_empty() {
        ProviderId::DEFAULT_ORDER.to_vec()
    } else {
        args.providers.clone()
    };

    let mut results = Vec::with_capacity(targets.len());
    for provider in targets {
        if !configured.contains(&provider) {
            tracing::warn!(%provider, "No API key configured, skipping");
            results.push((provider, Status::Skipped));
            continue;
        }

        tracing::info!(%provider, model = %client.default_model_for(provider), "Sending test request");
        let params = GenerateParams::new(args.prompt.clone(), provider)
            .with_fallbacks(Vec::new())
            .with_max_tokens(args.max_tokens);

        let status = match client.generate(params).await {
            Ok(result) if !result.content.trim().is_empty() => {
                let preview: String = result.content.chars().take(200).collect();
                tracing::info!(
                    %provider,
                    model = %result.model,
                    chars = result.content.chars().count(),
                    total_tokens = result.usage.total_tokens,
                    cost_usd = result.cost_usd,
                    "Received response"
                );
                println!("{provider} ({}): {preview}", result.model);
                Status::Passed
            }
            Ok(_) => {
                tracing::error!(%provider, "Received empty response");
                Status::Failed
            }
            Err(err) => {
                tracing::error!(%provider, error = %err, "Provider check failed");
                Status::Failed
            }
        };
        results.push((provider, status));
    }

    println!("\nProvider check summary:");
    println!("{}", "-".repeat(50));
    for (provider, status) in &results {
        let label = match status {
            Status::Passed => "PASSED",
            Status::Failed => "FAILED",
            Status::Skipped => "SKIPPED (no API key)",
        };
        println!("{provider}: {label}");
    }
    println!("{}", "-".repeat(50));

    if results.iter().any(|(_, s)| matches!(s, Status::Failed)) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
