//! Descriptor-set fixtures for unit tests.

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, Value};
use prost_types::field_descriptor_proto::Type;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FileDescriptorProto,
    OneofDescriptorProto,
};

use super::descriptor::{
    encode_set, field, file, in_oneof, map_entry, message, repeated, typed_field,
};

fn weather_file() -> FileDescriptorProto {
    file(
        "weather/v1/weather.proto",
        "weather.v1",
        vec![
            message(
                "CurrentWeather",
                vec![
                    field("temperature", 1, Type::Float),
                    field("humidity", 2, Type::Float),
                    field("wind_speed_10m", 3, Type::Double),
                    field("machine_id", 4, Type::String),
                ],
            ),
            message(
                "HourlyForecast",
                vec![repeated(field("temperatures", 1, Type::Float))],
            ),
        ],
    )
}

fn camera_file() -> FileDescriptorProto {
    file(
        "bubbaloop/camera/v1/camera.proto",
        "bubbaloop.camera.v1",
        vec![
            message(
                "Header",
                vec![
                    field("acq_time", 1, Type::Uint64),
                    field("pub_time", 2, Type::Uint64),
                    field("sequence", 3, Type::Uint32),
                    field("frame_id", 4, Type::String),
                    field("machine_id", 5, Type::String),
                ],
            ),
            message(
                "CompressedImage",
                vec![
                    typed_field("header", 1, Type::Message, ".bubbaloop.camera.v1.Header"),
                    field("format", 2, Type::String),
                    field("data", 3, Type::Bytes),
                ],
            ),
            message("Empty", Vec::new()),
        ],
    )
}

fn everything_file() -> FileDescriptorProto {
    let counters_entry = map_entry("CountersEntry", Type::String, Type::Int32);
    let inner = message(
        "Inner",
        vec![field("name", 1, Type::String), field("value", 2, Type::Double)],
    );

    let everything = DescriptorProto {
        nested_type: vec![counters_entry, inner],
        oneof_decl: vec![OneofDescriptorProto {
            name: Some("payload".to_string()),
            options: None,
        }],
        ..message(
            "Everything",
            vec![
                field("big_signed", 1, Type::Int64),
                field("big_unsigned", 2, Type::Uint64),
                field("small", 3, Type::Int32),
                field("flag", 4, Type::Bool),
                field("label", 5, Type::String),
                repeated(field("samples", 6, Type::Int32)),
                repeated(typed_field(
                    "counters",
                    7,
                    Type::Message,
                    ".test.v1.Everything.CountersEntry",
                )),
                typed_field("status", 8, Type::Enum, ".test.v1.Status"),
                in_oneof(field("text", 9, Type::String), 0),
                in_oneof(field("number", 10, Type::Int32), 0),
                typed_field("inner", 11, Type::Message, ".test.v1.Everything.Inner"),
                field("blob", 12, Type::Bytes),
            ],
        )
    };

    let status = EnumDescriptorProto {
        name: Some("Status".to_string()),
        value: ["STATUS_UNKNOWN", "STATUS_OK", "STATUS_ERROR"]
            .iter()
            .zip(0..)
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some((*name).to_string()),
                number: Some(number),
                options: None,
            })
            .collect(),
        ..Default::default()
    };

    FileDescriptorProto {
        enum_type: vec![status],
        ..file("test/v1/everything.proto", "test.v1", vec![everything])
    }
}

/// `test.v1.Guarded`: a field and a map whose names collide with
/// JavaScript object internals.
fn guarded_file() -> FileDescriptorProto {
    let guarded = DescriptorProto {
        nested_type: vec![map_entry("LabelsEntry", Type::String, Type::String)],
        ..message(
            "Guarded",
            vec![
                field("constructor", 1, Type::String),
                repeated(typed_field(
                    "labels",
                    2,
                    Type::Message,
                    ".test.v1.Guarded.LabelsEntry",
                )),
                field("name", 3, Type::String),
            ],
        )
    };
    file("test/v1/guarded.proto", "test.v1", vec![guarded])
}

/// Serialized descriptor set with `weather.v1` types.
pub fn weather_descriptor_bytes() -> Vec<u8> {
    encode_set(vec![weather_file()])
}

/// Serialized descriptor set with `bubbaloop.camera.v1` types.
pub fn camera_descriptor_bytes() -> Vec<u8> {
    encode_set(vec![camera_file()])
}

/// Serialized descriptor set with the `test.v1.Everything` kitchen sink.
pub fn everything_descriptor_bytes() -> Vec<u8> {
    encode_set(vec![everything_file()])
}

/// Serialized descriptor set with `test.v1.Guarded`.
pub fn guarded_descriptor_bytes() -> Vec<u8> {
    encode_set(vec![guarded_file()])
}

fn pool_from(bytes: &[u8]) -> DescriptorPool {
    DescriptorPool::decode(bytes).unwrap_or_default()
}

/// Pool holding the weather types.
pub fn weather_pool() -> DescriptorPool {
    pool_from(&weather_descriptor_bytes())
}

/// Pool holding the kitchen-sink type.
pub fn everything_pool() -> DescriptorPool {
    pool_from(&everything_descriptor_bytes())
}

/// Pool holding `test.v1.Guarded`.
pub fn guarded_pool() -> DescriptorPool {
    pool_from(&guarded_descriptor_bytes())
}

/// Encoded `weather.v1.CurrentWeather`.
pub fn encode_current_weather(temperature: f32, humidity: f32) -> Vec<u8> {
    let pool = weather_pool();
    let Some(desc) = pool.get_message_by_name("weather.v1.CurrentWeather") else {
        return Vec::new();
    };
    let mut msg = DynamicMessage::new(desc);
    msg.set_field_by_name("temperature", Value::F32(temperature));
    msg.set_field_by_name("humidity", Value::F32(humidity));
    msg.encode_to_vec()
}
