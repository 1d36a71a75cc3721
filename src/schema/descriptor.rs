//! Descriptor-set builders.
//!
//! Nodes that publish their schema without a `protoc` step (and the demo
//! node) assemble a [`FileDescriptorSet`] in code. These helpers keep
//! that terse: every field is proto3 `optional`-labelled unless wrapped
//! in [`repeated`].

use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet, MessageOptions,
};

/// Scalar field `name = number`.
#[must_use]
pub fn field(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        ..Default::default()
    }
}

/// Message or enum field referring to the fully-qualified `type_name`
/// (leading dot included).
#[must_use]
pub fn typed_field(name: &str, number: i32, kind: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, kind)
    }
}

/// Marks a field as repeated.
#[must_use]
pub fn repeated(mut proto: FieldDescriptorProto) -> FieldDescriptorProto {
    proto.label = Some(Label::Repeated as i32);
    proto
}

/// Places a field in the oneof declared at `index` of its message.
#[must_use]
pub fn in_oneof(mut proto: FieldDescriptorProto, index: i32) -> FieldDescriptorProto {
    proto.oneof_index = Some(index);
    proto
}

/// Message type with the given fields.
#[must_use]
pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

/// Synthetic `{Name}Entry` type backing a `map<K, V>` field. Nest it in
/// the owning message and point a [`repeated`] [`typed_field`] at it.
#[must_use]
pub fn map_entry(name: &str, key: Type, value: Type) -> DescriptorProto {
    DescriptorProto {
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..message(name, vec![field("key", 1, key), field("value", 2, value)])
    }
}

/// proto3 file `name` declaring `messages` in `package`.
#[must_use]
pub fn file(name: &str, package: &str, messages: Vec<DescriptorProto>) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: Some(package.to_string()),
        message_type: messages,
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// Serializes `files` as the descriptor-set blob served on a schema
/// queryable.
#[must_use]
pub fn encode_set(files: Vec<FileDescriptorProto>) -> Vec<u8> {
    FileDescriptorSet { file: files }.encode_to_vec()
}
