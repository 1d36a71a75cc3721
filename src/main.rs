//! Data-plane demo entry point.
//!
//! Runs a simulated weather node on an in-process bus and watches its
//! topic through the [`TelemetryService`], logging every decoded sample
//! and a final stats snapshot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, Value};
use prost_types::field_descriptor_proto::Type;
use tracing_subscriber::EnvFilter;

use bubbaloop_dataplane::bus::{MemoryBus, Session};
use bubbaloop_dataplane::config::DataplaneConfig;
use bubbaloop_dataplane::domain::topic::node_schema_key;
use bubbaloop_dataplane::domain::{DEFAULT_ENDPOINT, DataplaneEvent, EventBus};
use bubbaloop_dataplane::schema::SchemaRegistry;
use bubbaloop_dataplane::schema::descriptor::{encode_set, field, file, message};
use bubbaloop_dataplane::service::{DecodedSample, SampleCallback, TelemetryService};
use bubbaloop_dataplane::subscription::SubscriptionManager;

const NODE_PREFIX: &str = "bubbaloop/local/demo/weather";
const TOPIC: &str = "bubbaloop/local/demo/weather/current";
const SAMPLES: u32 = 5;

fn weather_descriptor_set() -> Vec<u8> {
    let current = message(
        "CurrentWeather",
        vec![
            field("temperature", 1, Type::Float),
            field("humidity", 2, Type::Float),
            field("wind_speed_10m", 3, Type::Double),
            field("machine_id", 4, Type::String),
        ],
    );
    encode_set(vec![file("weather/v1/weather.proto", "weather.v1", vec![current])])
}

/// Registers the node's schema queryable and starts publishing readings.
fn spawn_weather_node(bus: &MemoryBus, descriptor: &[u8]) -> anyhow::Result<()> {
    let pool = DescriptorPool::decode(descriptor).context("demo descriptor set")?;
    let desc = pool
        .get_message_by_name("weather.v1.CurrentWeather")
        .context("CurrentWeather missing from demo descriptor set")?;
    bus.serve_bytes_on_query_key(&node_schema_key(NODE_PREFIX), Bytes::from(descriptor.to_vec()));

    let bus = bus.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        for i in 0..SAMPLES {
            ticker.tick().await;
            let mut reading = DynamicMessage::new(desc.clone());
            #[allow(clippy::cast_precision_loss)]
            let step = i as f32;
            reading.set_field_by_name("temperature", Value::F32(21.0 + step * 0.5));
            reading.set_field_by_name("humidity", Value::F32(60.0 + step));
            reading.set_field_by_name("wind_speed_10m", Value::F64(3.5));
            reading.set_field_by_name("machine_id", Value::String("demo".to_string()));
            let delivered = bus.publish(TOPIC, reading.encode_to_vec());
            tracing::debug!(delivered, "weather reading published");
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = DataplaneConfig::from_env()?;
    tracing::info!(?config, "starting dataplane demo");

    // Build domain and service layers
    let event_bus = EventBus::new(config.event_bus_capacity);
    let registry = Arc::new(SchemaRegistry::new(config.clone(), event_bus.clone()));
    let manager = SubscriptionManager::new(config.clone(), event_bus.clone());
    let service = TelemetryService::new(registry, manager.clone(), config.clone());

    // Connect to the in-process bus
    let bus = MemoryBus::new();
    let session: Arc<dyn Session> = Arc::new(bus.clone());
    service.set_session(Some(session), DEFAULT_ENDPOINT).await;

    let callback: SampleCallback = Arc::new(|sample: DecodedSample| match &sample.decoded {
        Some(decoded) => tracing::info!(
            topic = %sample.topic,
            type_name = %decoded.type_name,
            data = %decoded.data,
            "decoded sample"
        ),
        None => tracing::info!(
            topic = %sample.topic,
            bytes = sample.payload.len(),
            "sample not decodable yet"
        ),
    });
    let listener = service.watch_topic(TOPIC, DEFAULT_ENDPOINT, callback).await;
    manager.start_monitoring(DEFAULT_ENDPOINT).await;

    let mut events = event_bus.subscribe();
    let ticker = manager.spawn_stats_ticker(config.stats_interval);
    spawn_weather_node(&bus, &weather_descriptor_set())?;

    // Report the first snapshot taken after the node finished publishing
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200 * u64::from(SAMPLES));
    loop {
        match events.recv().await {
            Ok(DataplaneEvent::StatsSnapshot { stats, .. })
                if tokio::time::Instant::now() >= deadline =>
            {
                let json = serde_json::to_string_pretty(&stats)?;
                tracing::info!(stats = %json, "stats snapshot");
                break;
            }
            Ok(event) => tracing::debug!(event_type = event.event_type_str(), "event"),
            Err(err) => {
                tracing::warn!(error = %err, "event stream interrupted");
                break;
            }
        }
    }

    for (key, stats) in manager.get_all_monitored_stats(DEFAULT_ENDPOINT) {
        tracing::info!(%key, messages = stats.message_count, listened = stats.listened, "monitored");
    }

    service.unwatch_topic(TOPIC, listener, DEFAULT_ENDPOINT).await;
    manager.destroy().await;
    ticker.abort();
    Ok(())
}
