//! SQL scalar function registration.
//!
//! Installs the protobuf surface on a connection: `protobuf_extract` (used by
//! every generated view column), the JSON and text-format conversion pairs,
//! and `protobuf_load` for registering message descriptors at runtime.

use std::sync::{Arc, Mutex};

use prost::Message as _;
use prost_reflect::{DeserializeOptions, DynamicMessage, SerializeOptions};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::path;
use crate::registry::{PrototypeCache, Registry};
use crate::value::SqlValue;

/// Registers every protoview scalar function on `conn`.
///
/// The conversion and extraction functions are deterministic for a fixed
/// registry generation; each owns its own [`PrototypeCache`].
pub fn register_functions(conn: &Connection, registry: &Arc<Registry>) -> rusqlite::Result<()> {
    register_extract(conn, Arc::clone(registry))?;
    register_to_json(conn, Arc::clone(registry))?;
    register_of_json(conn, Arc::clone(registry))?;
    register_to_text(conn, Arc::clone(registry))?;
    register_of_text(conn, Arc::clone(registry))?;
    register_load(conn, Arc::clone(registry))
}

const PURE: FunctionFlags = FunctionFlags::SQLITE_UTF8.union(FunctionFlags::SQLITE_DETERMINISTIC);

fn blob_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Vec<u8>> {
    match ctx.get_raw(idx) {
        ValueRef::Null => Ok(Vec::new()),
        ValueRef::Blob(b) => Ok(b.to_vec()),
        ValueRef::Text(t) => Ok(t.to_vec()),
        _ => Err(rusqlite::Error::UserFunctionError(
            "expected a blob argument".into(),
        )),
    }
}

fn text_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<String> {
    let bytes = match ctx.get_raw(idx) {
        ValueRef::Text(t) | ValueRef::Blob(t) => t,
        _ => {
            return Err(rusqlite::Error::UserFunctionError(
                "expected a text argument".into(),
            ))
        }
    };
    String::from_utf8(bytes.to_vec())
        .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
}

fn register_extract(conn: &Connection, registry: Arc<Registry>) -> rusqlite::Result<()> {
    let cache = Mutex::new(PrototypeCache::new());
    conn.create_scalar_function("protobuf_extract", -1, PURE, move |ctx| {
        if !(3..=4).contains(&ctx.len()) {
            return Err(rusqlite::Error::UserFunctionError(
                "wrong number of arguments to protobuf_extract (expected 3 or 4)".into(),
            ));
        }

        let data = blob_arg(ctx, 0)?;
        let type_name = text_arg(ctx, 1)?;
        let path_expr = text_arg(ctx, 2)?;
        let default = (ctx.len() == 4).then(|| SqlValue::from(ctx.get_raw(3)));

        let mut cache = cache.lock().expect("prototype cache lock poisoned");
        path::extract(
            &mut cache,
            &registry,
            &data,
            &type_name,
            &path_expr,
            default.as_ref(),
        )
        .map_err(Error::into_sql_error)
    })
}

fn register_to_json(conn: &Connection, registry: Arc<Registry>) -> rusqlite::Result<()> {
    let cache = Mutex::new(PrototypeCache::new());
    conn.create_scalar_function("protobuf_to_json", 2, PURE, move |ctx| {
        let data = blob_arg(ctx, 0)?;
        let type_name = text_arg(ctx, 1)?;
        let mut cache = cache.lock().expect("prototype cache lock poisoned");
        message_to_json(&mut cache, &registry, &data, &type_name).map_err(Error::into_sql_error)
    })
}

fn register_of_json(conn: &Connection, registry: Arc<Registry>) -> rusqlite::Result<()> {
    let cache = Mutex::new(PrototypeCache::new());
    conn.create_scalar_function("protobuf_of_json", 2, PURE, move |ctx| {
        let json = text_arg(ctx, 0)?;
        let type_name = text_arg(ctx, 1)?;
        let mut cache = cache.lock().expect("prototype cache lock poisoned");
        message_of_json(&mut cache, &registry, &json, &type_name).map_err(Error::into_sql_error)
    })
}

fn register_to_text(conn: &Connection, registry: Arc<Registry>) -> rusqlite::Result<()> {
    let cache = Mutex::new(PrototypeCache::new());
    conn.create_scalar_function("protobuf_to_text", 2, PURE, move |ctx| {
        let data = blob_arg(ctx, 0)?;
        let type_name = text_arg(ctx, 1)?;
        let mut cache = cache.lock().expect("prototype cache lock poisoned");
        let message = cache
            .decode(&registry, &type_name, &data)
            .map_err(Error::into_sql_error)?;
        Ok(SqlValue::Text(message.to_text_format()))
    })
}

fn register_of_text(conn: &Connection, registry: Arc<Registry>) -> rusqlite::Result<()> {
    let cache = Mutex::new(PrototypeCache::new());
    conn.create_scalar_function("protobuf_of_text", 2, PURE, move |ctx| {
        let text = text_arg(ctx, 0)?;
        let type_name = text_arg(ctx, 1)?;
        let mut cache = cache.lock().expect("prototype cache lock poisoned");
        let descriptor = cache
            .descriptor(&registry, &type_name)
            .map_err(Error::into_sql_error)?;
        let message = DynamicMessage::parse_text_format(descriptor, &text)
            .map_err(|e| Error::from(e).into_sql_error())?;
        Ok(SqlValue::Blob(message.encode_to_vec()))
    })
}

/// `protobuf_load(path)` reads a serialized `FileDescriptorSet` and merges it
/// into the shared registry, bumping the cache generation. Not deterministic
/// and not callable from views or triggers.
fn register_load(conn: &Connection, registry: Arc<Registry>) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "protobuf_load",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DIRECTONLY,
        move |ctx| {
            let file = text_arg(ctx, 0)?;
            let bytes = std::fs::read(&file).map_err(|e| Error::from(e).into_sql_error())?;
            registry
                .decode_file_descriptor_set(&bytes)
                .map_err(Error::into_sql_error)?;
            Ok(SqlValue::Null)
        },
    )
}

fn message_to_json(
    cache: &mut PrototypeCache,
    registry: &Registry,
    data: &[u8],
    type_name: &str,
) -> Result<SqlValue> {
    let message = cache.decode(registry, type_name, data)?;

    // Populated primitive fields are always printed, even at their default
    // value, so downstream JSON consumers never need presence checks.
    let options = SerializeOptions::new().skip_default_fields(false);
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::new(&mut buf);
    message.serialize_with_options(&mut serializer, &options)?;

    Ok(SqlValue::Text(
        String::from_utf8(buf).expect("serde_json output is utf-8"),
    ))
}

fn message_of_json(
    cache: &mut PrototypeCache,
    registry: &Registry,
    json: &str,
    type_name: &str,
) -> Result<SqlValue> {
    let descriptor = cache.descriptor(registry, type_name)?;

    let options = DeserializeOptions::new().deny_unknown_fields(false);
    let mut deserializer = serde_json::Deserializer::from_str(json);
    let message =
        DynamicMessage::deserialize_with_options(descriptor, &mut deserializer, &options)?;
    deserializer.end()?;

    Ok(SqlValue::Blob(message.encode_to_vec()))
}
