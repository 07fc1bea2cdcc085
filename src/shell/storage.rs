//! Conversion between wire storage snapshots and the driver-native shape.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::connection::Connection;
use super::errors::ShellError;
use crate::driver::Calculator;
use crate::models::{NativeRecord, NativeStorage, Record, RecordData, StorageSnapshot};
use crate::protocol::Status;

/// Reasons a storage snapshot is rejected before reaching the driver.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Shape(#[source] serde_json::Error),

    #[error("record {index} has an empty name")]
    EmptyName { index: usize },

    #[error("record {index} ({name}) has an empty type")]
    EmptyType { index: usize, name: String },

    #[error("record {index} ({name}) has neither code nor data")]
    MissingPayload { index: usize, name: String },

    #[error("record {index} ({name}) has both code and data")]
    AmbiguousPayload { index: usize, name: String },
}

/// Reads an untyped snapshot argument.
///
/// # Errors
///
/// Returns `StorageError::Shape` unless the value is an object with a
/// `records` array of record objects.
pub fn parse_snapshot(value: &Value) -> Result<StorageSnapshot, StorageError> {
    StorageSnapshot::deserialize(value).map_err(StorageError::Shape)
}

/// Builds a fresh native storage object from a snapshot.
///
/// `code` becomes its UTF-8 bytes and `data` is copied as given.
///
/// # Errors
///
/// Returns the first record that fails validation.
pub fn build_native(snapshot: &StorageSnapshot) -> Result<NativeStorage, StorageError> {
    let mut storage = NativeStorage::new();
    for (index, record) in snapshot.records.iter().enumerate() {
        storage.push(native_record(index, record)?);
    }
    Ok(storage)
}

fn native_record(index: usize, record: &Record) -> Result<NativeRecord, StorageError> {
    if record.name.is_empty() {
        return Err(StorageError::EmptyName { index });
    }
    if record.kind.is_empty() {
        return Err(StorageError::EmptyType {
            index,
            name: record.name.clone(),
        });
    }

    let payload = match (&record.code, &record.data) {
        (Some(code), None) => code.as_bytes().to_vec(),
        (None, Some(data)) => data.to_bytes(),
        (None, None) => {
            return Err(StorageError::MissingPayload {
                index,
                name: record.name.clone(),
            })
        }
        (Some(_), Some(_)) => {
            return Err(StorageError::AmbiguousPayload {
                index,
                name: record.name.clone(),
            })
        }
    };

    Ok(NativeRecord {
        name: record.name.clone(),
        kind: record.kind.clone(),
        auto_import: record.auto_import,
        payload,
    })
}

/// Converts a backup into the wire snapshot.
///
/// Python scripts holding valid UTF-8 come back as `code`; everything else
/// as a `data` byte array.
pub fn snapshot_from_native(storage: &NativeStorage) -> StorageSnapshot {
    let records = storage
        .records
        .iter()
        .map(|native| {
            let text = (native.kind == "py")
                .then(|| std::str::from_utf8(&native.payload).ok())
                .flatten();
            let (code, data) = match text {
                Some(text) => (Some(text.to_string()), None),
                None => (None, Some(RecordData::Bytes(native.payload.clone()))),
            };
            Record {
                name: native.name.clone(),
                kind: native.kind.clone(),
                auto_import: native.auto_import,
                code,
                data,
            }
        })
        .collect();
    StorageSnapshot { records }
}

/// Validates `snapshot`, builds the native object and installs it.
///
/// The driver's install is called exactly once, and only after every
/// record converted.
pub async fn install<C: Calculator>(
    connection: &mut Connection<C>,
    snapshot: &Value,
) -> Result<Status, ShellError> {
    let snapshot = parse_snapshot(snapshot)?;
    let storage = build_native(&snapshot)?;
    debug!(
        records = storage.len(),
        bytes = storage.payload_bytes(),
        "installing storage"
    );

    connection.driver_mut().install_storage(storage).await?;

    info!(records = snapshot.records.len(), "storage installed");
    Ok(Status::Ok)
}
