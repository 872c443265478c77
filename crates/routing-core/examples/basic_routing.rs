//! Seeds a small agent pool and walks one call through the full IVR
//! lifecycle: session creation, language selection, agent dispatch, dial,
//! completion with a feedback rating, and a final pool snapshot.
//!
//! Run with: cargo run --example basic_routing

use anyhow::Result;
use ivrflow_routing_core::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut server = RoutingServerBuilder::new()
        .with_config(RoutingConfig::default())
        .with_in_memory_database()
        .build()
        .await?;

    server
        .seed_agents(vec![
            ("agent-en-1", "15550000001", Language::English),
            ("agent-en-2", "15550000002", Language::English),
            ("agent-es-1", "15550000003", Language::Spanish),
        ])
        .await?;
    server.start();

    let engine = server.engine().clone();

    // One inbound call, as the telephony callbacks would drive it.
    let call = CallId::new();
    engine.begin_session(call.clone(), "15551234567")?;
    engine.select_language(&call, Language::English)?;

    match engine.connect_to_agent(&call).await? {
        Some(agent) => {
            println!("connecting caller to agent {} ({})", agent.id, agent.contact_number);
            engine.handle_dial_status(&call, DialStatus::Completed).await?;
        }
        None => println!("all agents are busy, please try again later"),
    }

    let outcome = engine.complete_call(&call, Some("4")).await?;
    println!(
        "call {} lasted {:.1}s, rating: {:?}",
        outcome.session.call_id, outcome.duration_seconds, outcome.rating
    );

    let snapshot = engine.snapshot().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    server.stop();
    Ok(())
}
