use std::time::Duration;

use replset_client::{protocol::Request, read_preference::ReadPreference, ReplicaSet};
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let seeds: String =
        std::env::var("REPLSET_SEEDS").unwrap_or_else(|_| "localhost:27017".to_string());
    let seeds = seeds.split(',').collect::<Vec<_>>();

    let mut builder = ReplicaSet::builder().set_seeds(&seeds).set_pool_size(2);
    if let Ok(name) = std::env::var("REPLSET_NAME") {
        builder = builder.set_replica_set_name(&name);
    }
    let mut replica_set = builder.build()?;

    // Wait for a member to answer its first heartbeat with a role
    let wait = async {
        loop {
            let topology = replica_set.changed().await?;
            if topology.is_reachable() {
                return Ok::<_, anyhow::Error>(topology);
            }
        }
    };
    let topology = match tokio::time::timeout(Duration::from_secs(30), wait).await {
        Ok(topology) => topology?,
        Err(_) => {
            tracing::error!("No member became reachable within 30 seconds");
            replica_set.shutdown().await?;
            return Ok(());
        }
    };
    println!("{:#?}", topology);

    let request = Request::Command {
        database: "admin".to_string(),
        document: serde_json::json!({ "ping": 1 }),
    };
    match replica_set
        .send(ReadPreference::primary_preferred(), request)
        .await?
    {
        Some(channel) => tracing::info!("Ping sent on {}", channel),
        None => tracing::warn!("No member could take the ping"),
    }

    replica_set.shutdown().await?;
    Ok(())
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    // Set up tracing
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting_layer = BunyanFormattingLayer::new("replset-client-demo".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("Failed to set subscriber");
}
