//! Shared helpers for the integration scenarios.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bubbaloop_dataplane::bus::{MemoryBus, Sample, Session};
use bubbaloop_dataplane::config::DataplaneConfig;
use bubbaloop_dataplane::domain::EventBus;
use bubbaloop_dataplane::schema::SchemaRegistry;
use bubbaloop_dataplane::schema::descriptor::{encode_set, field, file, message};
use bubbaloop_dataplane::service::{DecodedSample, SampleCallback, TelemetryService};
use bubbaloop_dataplane::subscription::{Listener, SubscriptionManager};
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, Value};
use prost_types::field_descriptor_proto::Type;

pub const WEATHER_TOPIC: &str = "bubbaloop/local/m1/weather/current";
pub const WEATHER_PREFIX: &str = "bubbaloop/local/m1/weather";
pub const CAMERA_TOPIC: &str = "bubbaloop/local/m1/camera/entrance/compressed";

/// `weather.v1` with `CurrentWeather{temperature, humidity}`.
pub fn weather_descriptor() -> Vec<u8> {
    let current = message(
        "CurrentWeather",
        vec![
            field("temperature", 1, Type::Float),
            field("humidity", 2, Type::Float),
        ],
    );
    encode_set(vec![file("weather/v1/weather.proto", "weather.v1", vec![current])])
}

/// `lidar.v1` with `PointCloud{width, height, frame_id}`.
pub fn lidar_descriptor() -> Vec<u8> {
    let cloud = message(
        "PointCloud",
        vec![
            field("width", 1, Type::Uint32),
            field("height", 2, Type::Uint32),
            field("frame_id", 3, Type::String),
        ],
    );
    encode_set(vec![file("lidar/v1/lidar.proto", "lidar.v1", vec![cloud])])
}

/// Encoded `weather.v1.CurrentWeather`.
pub fn encode_weather(temperature: f32, humidity: f32) -> Vec<u8> {
    let Ok(pool) = DescriptorPool::decode(weather_descriptor().as_slice()) else {
        return Vec::new();
    };
    let Some(desc) = pool.get_message_by_name("weather.v1.CurrentWeather") else {
        return Vec::new();
    };
    let mut msg = DynamicMessage::new(desc);
    msg.set_field_by_name("temperature", Value::F32(temperature));
    msg.set_field_by_name("humidity", Value::F32(humidity));
    msg.encode_to_vec()
}

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::new(DataplaneConfig::default(), EventBus::new(64))
}

pub fn manager() -> SubscriptionManager {
    SubscriptionManager::new(DataplaneConfig::default(), EventBus::new(64))
}

pub fn service() -> TelemetryService {
    let config = DataplaneConfig::default();
    let event_bus = EventBus::new(64);
    TelemetryService::new(
        Arc::new(SchemaRegistry::new(config.clone(), event_bus.clone())),
        SubscriptionManager::new(config.clone(), event_bus),
        config,
    )
}

pub fn session(bus: &MemoryBus) -> Arc<dyn Session> {
    Arc::new(bus.clone())
}

pub fn noop() -> Listener {
    Arc::new(|_sample: &Sample| {})
}

pub fn counting(counter: &Arc<AtomicUsize>) -> Listener {
    let counter = Arc::clone(counter);
    Arc::new(move |_sample: &Sample| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

pub type Collected = Arc<Mutex<Vec<DecodedSample>>>;

pub fn collector() -> (SampleCallback, Collected) {
    let seen: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: SampleCallback = Arc::new(move |sample: DecodedSample| {
        sink.lock().unwrap_or_else(PoisonError::into_inner).push(sample);
    });
    (callback, seen)
}

pub fn drain(seen: &Collected) -> Vec<DecodedSample> {
    std::mem::take(&mut *seen.lock().unwrap_or_else(PoisonError::into_inner))
}
