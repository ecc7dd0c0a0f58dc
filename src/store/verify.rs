//! Doctor-отчёт по индексу: статус каждого файла и итоговые счётчики.

use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Ok,
    Missing,
    ChecksumMismatch,
    Undecodable,
    OtherNetwork,
    Incompatible,
    MalformedLine,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryStatus::Ok => "ok",
            EntryStatus::Missing => "missing",
            EntryStatus::ChecksumMismatch => "checksum_mismatch",
            EntryStatus::Undecodable => "undecodable",
            EntryStatus::OtherNetwork => "other_network",
            EntryStatus::Incompatible => "incompatible",
            EntryStatus::MalformedLine => "malformed_line",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyEntry {
    pub filename: String,
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_index: Option<u64>,
    pub status: EntryStatus,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyReport {
    pub entries: Vec<VerifyEntry>,
    pub ok: u64,
    pub missing: u64,
    pub checksum_mismatch: u64,
    pub undecodable: u64,
    pub other_network: u64,
    pub incompatible: u64,
    pub malformed: u64,
}

impl VerifyReport {
    pub fn push(&mut self, e: VerifyEntry) {
        match e.status {
            EntryStatus::Ok => self.ok += 1,
            EntryStatus::Missing => self.missing += 1,
            EntryStatus::ChecksumMismatch => self.checksum_mismatch += 1,
            EntryStatus::Undecodable => self.undecodable += 1,
            EntryStatus::OtherNetwork => self.other_network += 1,
            EntryStatus::Incompatible => self.incompatible += 1,
            EntryStatus::MalformedLine => self.malformed += 1,
        }
        self.entries.push(e);
    }

    /// True when nothing is damaged (other networks and old versions are not damage).
    pub fn is_healthy(&self) -> bool {
        self.missing == 0 && self.checksum_mismatch == 0 && self.undecodable == 0 && self.malformed == 0
    }
}
