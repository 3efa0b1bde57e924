//! Shared fixtures: an in-code descriptor pool and message builders.
//!
//! The pool is assembled from a hand-built `FileDescriptorSet` so the test
//! suite needs no protoc invocation. It describes (proto2 syntax):
//!
//! ```proto
//! package orders;
//!
//! enum Status {
//!   STATUS_UNKNOWN = 0;
//!   STATUS_OPEN = 1;
//!   STATUS_SHIPPED = 2;
//! }
//!
//! message Item {
//!   optional string sku = 1;
//!   optional int64 quantity = 2;
//! }
//!
//! message Order {
//!   optional int64 total_cents = 1;
//!   optional string customer = 2;
//!   optional bool rush = 3;
//!   optional double weight = 4;
//!   optional uint64 sequence = 5;
//!   optional bytes payload = 6;
//!   optional Status status = 7;
//!   repeated Item items = 8;
//!   optional Item primary_item = 9;
//!   optional int32 priority = 10 [default = 7];
//! }
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use prost::Message as _;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, Value};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet,
};
use rusqlite::Connection;

use protoview::{register_functions, ColumnSpec, ColumnType, Registry, TableSpec};

fn field(name: &str, number: i32, label: Label, r#type: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(r#type as i32),
        ..Default::default()
    }
}

fn message_field(name: &str, number: i32, label: Label, type_name: &str) -> FieldDescriptorProto {
    let mut f = field(name, number, label, Type::Message);
    f.type_name = Some(type_name.to_string());
    f
}

pub fn test_file_descriptor_set() -> FileDescriptorSet {
    let status = EnumDescriptorProto {
        name: Some("Status".to_string()),
        value: vec![
            EnumValueDescriptorProto {
                name: Some("STATUS_UNKNOWN".to_string()),
                number: Some(0),
                ..Default::default()
            },
            EnumValueDescriptorProto {
                name: Some("STATUS_OPEN".to_string()),
                number: Some(1),
                ..Default::default()
            },
            EnumValueDescriptorProto {
                name: Some("STATUS_SHIPPED".to_string()),
                number: Some(2),
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    let item = DescriptorProto {
        name: Some("Item".to_string()),
        field: vec![
            field("sku", 1, Label::Optional, Type::String),
            field("quantity", 2, Label::Optional, Type::Int64),
        ],
        ..Default::default()
    };

    let mut status_field = field("status", 7, Label::Optional, Type::Enum);
    status_field.type_name = Some(".orders.Status".to_string());

    let mut priority = field("priority", 10, Label::Optional, Type::Int32);
    priority.default_value = Some("7".to_string());

    let order = DescriptorProto {
        name: Some("Order".to_string()),
        field: vec![
            field("total_cents", 1, Label::Optional, Type::Int64),
            field("customer", 2, Label::Optional, Type::String),
            field("rush", 3, Label::Optional, Type::Bool),
            field("weight", 4, Label::Optional, Type::Double),
            field("sequence", 5, Label::Optional, Type::Uint64),
            field("payload", 6, Label::Optional, Type::Bytes),
            status_field,
            message_field("items", 8, Label::Repeated, ".orders.Item"),
            message_field("primary_item", 9, Label::Optional, ".orders.Item"),
            priority,
        ],
        ..Default::default()
    };

    FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("orders.proto".to_string()),
            package: Some("orders".to_string()),
            message_type: vec![item, order],
            enum_type: vec![status],
            ..Default::default()
        }],
    }
}

pub fn test_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(test_file_descriptor_set())
        .expect("test descriptors are valid")
}

pub fn test_registry() -> Arc<Registry> {
    Registry::with_pool(test_pool())
}

/// An in-memory connection with every protoview function registered.
pub fn test_connection(registry: &Arc<Registry>) -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    register_functions(&conn, registry).expect("register scalar functions");
    conn
}

pub fn order_descriptor(pool: &DescriptorPool) -> MessageDescriptor {
    pool.get_message_by_name("orders.Order")
        .expect("orders.Order registered")
}

/// A fresh, empty `orders.Order` message.
pub fn new_order(pool: &DescriptorPool) -> DynamicMessage {
    DynamicMessage::new(order_descriptor(pool))
}

/// An `orders.Order` with just `total_cents` set, serialized.
pub fn order_with_total(pool: &DescriptorPool, total_cents: i64) -> Vec<u8> {
    let mut order = new_order(pool);
    order.set_field_by_name("total_cents", Value::I64(total_cents));
    order.encode_to_vec()
}

/// An `orders.Item` value for embedding in an order.
pub fn item(pool: &DescriptorPool, sku: &str, quantity: i64) -> Value {
    let descriptor = pool
        .get_message_by_name("orders.Item")
        .expect("orders.Item registered");
    let mut item = DynamicMessage::new(descriptor);
    item.set_field_by_name("sku", Value::String(sku.to_string()));
    item.set_field_by_name("quantity", Value::I64(quantity));
    Value::Message(item)
}

/// The table spec used across the integration tests.
pub fn order_table() -> TableSpec {
    TableSpec::new("orders", "orders.Order")
        .column(ColumnSpec::new("total_cents", ColumnType::Integer, "$.total_cents"))
        .column(ColumnSpec::new("customer", ColumnType::Text, "$.customer").weak())
}
