use std::path::PathBuf;

use common::{Config, Credentials};
use corpscope::llm::selector::candidate_order;
use corpscope::llm::{ModelBackend, GENERATE_CONTENT};
use corpscope::setup::build_model_client;

/// Lists the models each configured namespace advertises, in the order the
/// selector would try them.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let override_path = std::env::args().nth(1).map(PathBuf::from);
    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(
        Some(default_path.as_path()),
        override_path.as_deref(),
    )
    .await?;
    let credentials = Credentials::from_env(&config)?;
    let client = build_model_client(&config, &credentials);
    let preferred = config.model.preferred();

    println!("\n{}", "=".repeat(60));
    println!("Model API: {}", config.model.api_url());
    println!("Preferred: {}", preferred.join(", "));
    println!("{}", "=".repeat(60));

    for namespace in config.model.namespaces() {
        println!("\n[{}]", namespace);
        match client.list_models(&namespace).await {
            Ok(models) => {
                for (i, model) in candidate_order(&preferred, &models).iter().enumerate() {
                    let marker = if model.supports(GENERATE_CONTENT) { "✓" } else { "✗" };
                    println!(
                        "  {:>2}. {} {} [{}]",
                        i + 1,
                        marker,
                        model.name,
                        model.supported_operations.join(", ")
                    );
                }
            }
            Err(e) => eprintln!("  ✗ listing failed: {}", e),
        }
    }

    println!("\n{}", "=".repeat(60));
    Ok(())
}
