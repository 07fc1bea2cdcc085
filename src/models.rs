//! Data models for the calculator shell.
//!
//! The snapshot types match the plain JSON the host wrapper sends and
//! receives. The native types are what a [`Calculator`](crate::driver::Calculator)
//! consumes: every payload is already converted to bytes.

use serde::{Deserialize, Serialize};

/// Full replace-on-install picture of the calculator's file table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub records: Vec<Record>,
}

/// One file of a storage snapshot as it travels over the wire.
///
/// Exactly one of `code` or `data` is expected; the storage installer
/// enforces that before anything reaches the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub auto_import: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RecordData>,
}

impl Record {
    /// Python script record with the given source.
    pub fn script(name: impl Into<String>, code: impl Into<String>, auto_import: bool) -> Self {
        Self {
            name: name.into(),
            kind: "py".to_string(),
            auto_import,
            code: Some(code.into()),
            data: None,
        }
    }
}

/// Raw record content: either an array of byte values or a text string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordData {
    Bytes(Vec<u8>),
    Text(String),
}

impl RecordData {
    /// Byte encoding of the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RecordData::Bytes(bytes) => bytes.clone(),
            RecordData::Text(text) => text.as_bytes().to_vec(),
        }
    }
}

/// Driver-native storage object, rebuilt from scratch for every install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeStorage {
    pub records: Vec<NativeRecord>,
}

impl NativeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: NativeRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total payload size in bytes.
    pub fn payload_bytes(&self) -> usize {
        self.records.iter().map(|r| r.payload.len()).sum()
    }
}

/// A record whose content has been converted to its binary payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeRecord {
    pub name: String,
    pub kind: String,
    pub auto_import: bool,
    pub payload: Vec<u8>,
}

/// USB identity of a bound calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub serial: Option<String>,
}

/// Firmware and storage layout reported by the calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub magik: bool,
    pub old_platform: bool,
    pub version: String,
    pub commit: String,
    pub storage: StorageRegion,
    pub omega: FirmwareExtension,
    pub upsilon: FirmwareExtension,
}

/// Location of the storage area in calculator RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRegion {
    pub address: u32,
    pub size: u32,
}

/// Install state of a third-party firmware layer (Omega, Upsilon).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareExtension {
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}
