//! hg-audit
//!
//! Reconciliation audit entries and the append-only JSONL mirror.
//!
//! One entry is written per reconciliation batch: the full intended add and
//! remove sets, whether every call succeeded, and the first failure's text.
//! Entries are write-once. The JSONL mirror chains entries with SHA-256 so a
//! support engineer can prove the local trail was not edited.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hg_entitlements::{EntitlementSet, PrincipalId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One reconciliation attempt, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationAuditEntry {
    pub entry_id: Uuid,
    pub principal_id: PrincipalId,
    /// Intended adds (not only the ones that succeeded).
    pub added: EntitlementSet,
    /// Intended removes.
    pub removed: EntitlementSet,
    /// True only if every call in the batch succeeded.
    pub success: bool,
    /// Text of the first failure in batch order, if any.
    pub error: Option<String>,
    pub ts_utc: DateTime<Utc>,
}

impl ReconciliationAuditEntry {
    pub fn new(
        principal_id: PrincipalId,
        added: EntitlementSet,
        removed: EntitlementSet,
        first_error: Option<String>,
        ts_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            principal_id,
            added,
            removed,
            success: first_error.is_none(),
            error: first_error,
            ts_utc,
        }
    }
}

/// A mirrored entry with its position in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedAuditRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub entry: ReconciliationAuditEntry,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only audit writer. Writes JSON Lines (one record per line).
/// Optional hash chain: each record can include hash_prev + hash_self.
pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Number of records already in the file; the next record's `seq`.
    seq: u64,
}

impl AuditWriter {
    /// Creates the audit writer and ensures parent dirs exist.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Open an existing log (or start a new one) and continue its chain.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut w = Self::new(path, hash_chain)?;
        if w.path.exists() {
            let records = read_records(&w.path)?;
            if let Some(last) = records.last() {
                w.last_hash = last.hash_self.clone();
                w.seq = last.seq + 1;
            }
        }
        Ok(w)
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    pub fn append(&mut self, entry: &ReconciliationAuditEntry) -> Result<ChainedAuditRecord> {
        let mut rec = ChainedAuditRecord {
            seq: self.seq,
            entry: entry.clone(),
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            rec.hash_prev = self.last_hash.clone();
            rec.hash_self = Some(compute_record_hash(&rec)?);
        }

        let line = canonical_json_line(&rec)?;
        append_line(&self.path, &line)?;

        // Advance only once the line is on disk.
        self.seq += 1;
        if self.hash_chain {
            self.last_hash = rec.hash_self.clone();
        }
        Ok(rec)
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("AUDIT_OPEN_FAILED {}", path.display()))?;
    // One write per record so a crash never leaves half a line.
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    f.write_all(&buf)
        .with_context(|| format!("AUDIT_WRITE_FAILED {}", path.display()))
}

/// Compact JSON with keys in sorted order. serde_json's default `Map` is a
/// `BTreeMap`, so going through `Value` sorts every nested object.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let tree: Value = serde_json::to_value(v).context("serialize audit record failed")?;
    serde_json::to_string(&tree).context("audit record stringify failed")
}

/// SHA-256 over the canonical line of `rec` with `hash_self` cleared.
pub fn compute_record_hash(rec: &ChainedAuditRecord) -> Result<String> {
    let unsealed = ChainedAuditRecord {
        hash_self: None,
        ..rec.clone()
    };
    let line = canonical_json_line(&unsealed)?;
    Ok(hex::encode(Sha256::digest(line.as_bytes())))
}

fn parse_records(content: &str) -> Result<Vec<ChainedAuditRecord>> {
    numbered_lines(content)
        .map(|(line_no, raw)| {
            serde_json::from_str(raw).with_context(|| format!("parse audit record at line {line_no}"))
        })
        .collect()
}

/// Non-blank lines with their 1-based line numbers.
fn numbered_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
}

fn read_records(path: &Path) -> Result<Vec<ChainedAuditRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("AUDIT_READ_FAILED {}", path.display()))?;
    parse_records(&content)
}

/// Entries for one principal, in insertion order.
pub fn read_entries_for_principal(
    path: impl AsRef<Path>,
    principal: &PrincipalId,
) -> Result<Vec<ReconciliationAuditEntry>> {
    Ok(read_records(path.as_ref())?
        .into_iter()
        .map(|r| r.entry)
        .filter(|e| &e.principal_id == principal)
        .collect())
}

/// Outcome of walking a mirror file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    /// First bad record; `line` is 1-based within the file.
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("AUDIT_READ_FAILED {}", path.display()))?;
    verify_hash_chain_str(&content)
}

/// Checks, per record: `seq` is contiguous from 0, `hash_prev` names the
/// previous record's `hash_self`, and `hash_self` (when present) matches the
/// recomputed hash. A parse failure is an error, not a broken chain.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut expected_seq = 0u64;
    let mut prev: Option<String> = None;

    for (line, raw) in numbered_lines(content) {
        let rec: ChainedAuditRecord = serde_json::from_str(raw)
            .with_context(|| format!("parse audit record at line {line}"))?;

        let broken = if rec.seq != expected_seq {
            Some(format!("seq gap: expected {expected_seq}, got {}", rec.seq))
        } else if rec.hash_prev != prev {
            Some(format!(
                "hash_prev mismatch: expected {prev:?}, got {:?}",
                rec.hash_prev
            ))
        } else {
            match &rec.hash_self {
                Some(claimed) => {
                    let actual = compute_record_hash(&rec)?;
                    (claimed != &actual)
                        .then(|| format!("hash_self mismatch: claimed {claimed}, recomputed {actual}"))
                }
                None => None,
            }
        };
        if let Some(reason) = broken {
            return Ok(VerifyResult::Broken { line, reason });
        }

        expected_seq += 1;
        prev = rec.hash_self;
    }

    Ok(VerifyResult::Valid {
        lines: expected_seq as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_flag_follows_first_error() {
        let ok = ReconciliationAuditEntry::new(
            "p1".into(),
            ["a"].into_iter().collect(),
            EntitlementSet::new(),
            None,
            Utc::now(),
        );
        assert!(ok.success);

        let failed = ReconciliationAuditEntry::new(
            "p1".into(),
            ["a"].into_iter().collect(),
            EntitlementSet::new(),
            Some("grant a: timeout".to_string()),
            Utc::now(),
        );
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("grant a: timeout"));
    }

    #[test]
    fn record_line_flattens_entry_fields() {
        let entry = ReconciliationAuditEntry::new(
            "p1".into(),
            ["b", "a"].into_iter().collect(),
            EntitlementSet::new(),
            None,
            Utc::now(),
        );
        let rec = ChainedAuditRecord {
            seq: 0,
            entry,
            hash_prev: None,
            hash_self: None,
        };
        let line = canonical_json_line(&rec).unwrap();
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["principal_id"], "p1");
        assert_eq!(v["added"], serde_json::json!(["a", "b"]));
        assert_eq!(v["error"], Value::Null);
    }
}
