//! Local-first example: a local Ollama daemon with OpenAI as the fallback,
//! wired from a JSON config.
//!
//! Run with:
//! ```sh
//! ollama pull llama3.2
//! export OPENAI_API_KEY=sk-...
//! cargo run --example local_daemon
//! ```

use xervo_gateway::api::InvokeRequest;
use xervo_gateway::runtime::ModelGateway;
use xervo_gateway::traits::GenerationOptions;

const CONFIG: &str = r#"{
    "adapters": [
        {
            "id": "local",
            "kind": "local/daemon",
            "capabilities": ["chat", "generate"],
            "max_concurrent": 2,
            "options": { "model": "llama3.2" }
        },
        {
            "id": "cloud",
            "kind": "remote/openai",
            "capabilities": ["chat", "generate"],
            "timeout_ms": 30000,
            "options": { "model": "gpt-4o-mini" }
        }
    ],
    "routes": [
        { "model_id": "chat/default", "adapters": ["local", "cloud"] }
    ],
    "budgets": [
        { "model_id": "chat/default", "token_budget": 4096 }
    ],
    "sessions": { "ttl_secs": 900, "sweep_interval_secs": 60 }
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let gateway = ModelGateway::builder()
        .config_from_str(CONFIG)?
        .build()
        .await?;

    let request = InvokeRequest::new("chat/default", "Explain circuit breakers in one sentence.")
        .with_session("example")
        .with_variable("system", serde_json::json!("You are concise."))
        .with_options(GenerationOptions {
            max_tokens: Some(64),
            temperature: Some(0.2),
            top_p: None,
        });

    match gateway.invoke(request).await {
        Ok(outcome) => {
            println!("{} answered: {}", outcome.adapter_id, outcome.result.output);
            if let Some(tokens) = outcome.result.tokens_used {
                println!("tokens used: {}", tokens);
            }
        }
        Err(e) => {
            eprintln!("{} stage failed: {}", e.stage(), e);
            for attempt in e.attempts() {
                eprintln!("  {}: {}", attempt.adapter_id, attempt.error);
            }
        }
    }

    Ok(())
}
