//! Per-connector runtime state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::SourceTable;

/// Protocols whose queries run inside a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WqlProtocol {
    Wmi,
    Wbem,
}

impl WqlProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wmi => "wmi",
            Self::Wbem => "wbem",
        }
    }
}

impl std::fmt::Display for WqlProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position reached by an incremental source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Cursor {
    /// Events newer than this instant
    Timestamp(DateTime<Utc>),

    /// File tail position
    FileOffset {
        /// Inode, used to detect rotation
        inode: u64,
        /// Bytes already consumed
        offset: u64,
    },

    /// Protocol-specific position (e.g. event record number)
    Opaque(String),
}

impl Cursor {
    pub fn now() -> Self {
        Self::Timestamp(Utc::now())
    }

    pub fn file_offset(inode: u64, offset: u64) -> Self {
        Self::FileOffset { inode, offset }
    }

    /// Offset to resume from, given the file's current inode and size.
    /// Rotation or truncation restarts at 0.
    pub fn resume_offset(&self, inode: u64, size: u64) -> u64 {
        match self {
            Self::FileOffset {
                inode: last_inode,
                offset,
            } if *last_inode == inode && *offset <= size => *offset,
            _ => 0,
        }
    }
}

/// Scratch space of one connector on one host
#[derive(Debug, Clone, Default)]
pub struct ConnectorNamespace {
    source_tables: HashMap<String, SourceTable>,
    automatic_wmi_namespace: Option<String>,
    automatic_wbem_namespace: Option<String>,
    cursors: HashMap<String, Cursor>,
    is_status_ok: bool,
}

impl ConnectorNamespace {
    pub fn source_table(&self, key: &str) -> Option<&SourceTable> {
        self.source_tables.get(key)
    }

    /// Store a table, replacing the previous cycle's
    pub fn put_source_table(&mut self, key: impl Into<String>, table: SourceTable) {
        self.source_tables.insert(key.into(), table);
    }

    pub fn source_keys(&self) -> impl Iterator<Item = &str> {
        self.source_tables.keys().map(String::as_str)
    }

    /// Discovered namespace; sticky until the host state is reset
    pub fn automatic_namespace(&self, protocol: WqlProtocol) -> Option<&str> {
        match protocol {
            WqlProtocol::Wmi => self.automatic_wmi_namespace.as_deref(),
            WqlProtocol::Wbem => self.automatic_wbem_namespace.as_deref(),
        }
    }

    pub fn set_automatic_namespace(&mut self, protocol: WqlProtocol, namespace: impl Into<String>) {
        let slot = match protocol {
            WqlProtocol::Wmi => &mut self.automatic_wmi_namespace,
            WqlProtocol::Wbem => &mut self.automatic_wbem_namespace,
        };
        *slot = Some(namespace.into());
    }

    pub fn cursor(&self, source_key: &str) -> Option<&Cursor> {
        self.cursors.get(source_key)
    }

    pub fn set_cursor(&mut self, source_key: impl Into<String>, cursor: Cursor) {
        self.cursors.insert(source_key.into(), cursor);
    }

    /// Whether the last detection of this connector succeeded
    pub fn is_status_ok(&self) -> bool {
        self.is_status_ok
    }

    pub fn set_status_ok(&mut self, ok: bool) {
        self.is_status_ok = ok;
    }
}
