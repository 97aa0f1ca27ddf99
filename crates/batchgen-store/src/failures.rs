use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use batchgen_core::{BlockerMap, EntryId, FailureCategory, FailureRecord, FAILURE_RECORD_SCHEMA_VERSION};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::StoreError;

const LOG_EXTENSION: &str = "jsonl";

/// Append-only failure log, one JSON Lines file per ecosystem/environment
/// pair: `<dir>/<ecosystem>-<environment>.jsonl`.
#[derive(Clone, Debug)]
pub struct FailureLog {
    pub dir: PathBuf,
}

/// Records read back from the log, oldest first within each file.
#[derive(Clone, Debug, Default)]
pub struct FailureLogScan {
    pub records: Vec<FailureRecord>,
    /// Lines that could not be interpreted.
    pub skipped: usize,
}

impl FailureLogScan {
    /// Latest record per package. Later timestamps win; on a tie the record
    /// read last wins.
    pub fn latest(&self) -> BTreeMap<EntryId, &FailureRecord> {
        let mut latest: BTreeMap<EntryId, &FailureRecord> = BTreeMap::new();
        for r in &self.records {
            let newer = latest.get(&r.package_id).map_or(true, |prev| prev.timestamp_unix <= r.timestamp_unix);
            if newer {
                latest.insert(r.package_id.clone(), r);
            }
        }
        latest
    }

    /// Dependency -> blocked package map built from each package's latest
    /// record, when that record is a missing-dependency failure.
    pub fn blocker_map(&self) -> BlockerMap {
        let mut map = BlockerMap::default();
        for record in self.latest().into_values() {
            if record.category != FailureCategory::MissingDependency {
                continue;
            }
            for dep in &record.blocked_by {
                map.insert(dep.clone(), record.package_id.clone());
            }
        }
        map
    }
}

/// Any version of a failure log line. Version 1 predates the category field
/// and carries the executor's exit code instead.
#[derive(Deserialize)]
struct RawRecord {
    #[serde(default = "legacy_version")]
    schema_version: u32,
    package_id: EntryId,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    category: Option<FailureCategory>,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    blocked_by: Vec<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    exit_code: Option<i32>,
}

fn legacy_version() -> u32 {
    1
}

impl RawRecord {
    /// `partition` is the file stem, `{ecosystem}-{environment}`. Legacy
    /// records take their environment from it; the ecosystem may itself
    /// contain `-`, so the record's own ecosystem is stripped as a prefix.
    fn upgrade(self, partition: Option<&str>) -> Option<FailureRecord> {
        let category = match (self.schema_version, self.category) {
            (FAILURE_RECORD_SCHEMA_VERSION, Some(c)) => c,
            // exit-code inference only for records written before categories existed
            (1, None) => FailureCategory::from_legacy_exit_code(self.exit_code?),
            (1, Some(c)) => c,
            _ => return None,
        };
        let environment = self
            .environment
            .or_else(|| partition_environment(partition?, self.package_id.ecosystem()))
            .unwrap_or_default();
        Some(FailureRecord {
            schema_version: FAILURE_RECORD_SCHEMA_VERSION,
            package_id: self.package_id,
            environment,
            category,
            subcategory: self.subcategory,
            blocked_by: self.blocked_by,
            message: self.message,
            timestamp_unix: self.timestamp,
        })
    }
}

fn partition_environment(stem: &str, ecosystem: &str) -> Option<String> {
    stem.strip_prefix(ecosystem)?.strip_prefix('-').filter(|env| !env.is_empty()).map(str::to_string)
}

fn valid_partition_part(part: &str) -> bool {
    !part.is_empty() && !part.contains(['/', '\\']) && !part.contains("..")
}

impl FailureLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn partition_path(&self, ecosystem: &str, environment: &str) -> Result<PathBuf, StoreError> {
        for part in [ecosystem, environment] {
            if !valid_partition_part(part) {
                return Err(StoreError::InvalidPartition(part.to_string()));
            }
        }
        Ok(self.dir.join(format!("{ecosystem}-{environment}.{LOG_EXTENSION}")))
    }

    /// Appends each record to its partition file. Existing lines are never
    /// rewritten.
    pub fn append(&self, records: &[FailureRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let mut by_partition: BTreeMap<PathBuf, Vec<&FailureRecord>> = BTreeMap::new();
        for r in records {
            let path = self.partition_path(r.package_id.ecosystem(), &r.environment)?;
            by_partition.entry(path).or_default().push(r);
        }

        for (path, rs) in &by_partition {
            let mut buf = Vec::new();
            for r in rs {
                serde_json::to_writer(&mut buf, r).map_err(StoreError::Encode)?;
                buf.push(b'\n');
            }
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| StoreError::io(path, e))?;
            f.write_all(&buf).map_err(|e| StoreError::io(path, e))?;
            debug!(path = %path.display(), records = rs.len(), "appended failure records");
        }
        Ok(records.len())
    }

    /// Reads every partition file in the log directory. A missing directory
    /// is an empty log; unreadable lines are counted and skipped.
    pub fn scan(&self) -> Result<FailureLogScan, StoreError> {
        let mut scan = FailureLogScan::default();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(scan),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|x| x == LOG_EXTENSION))
            .collect();
        paths.sort();

        for path in paths {
            self.scan_file(&path, &mut scan)?;
        }
        if scan.skipped > 0 {
            warn!(dir = %self.dir.display(), skipped = scan.skipped, "skipped unreadable failure log lines");
        }
        Ok(scan)
    }

    fn scan_file(&self, path: &Path, scan: &mut FailureLogScan) -> Result<(), StoreError> {
        let partition = path.file_stem().and_then(|s| s.to_str());
        let f = std::fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
        for line in BufReader::new(f).lines() {
            let line = line.map_err(|e| StoreError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRecord>(&line).ok().and_then(|r| r.upgrade(partition)) {
                Some(record) => scan.records.push(record),
                None => scan.skipped += 1,
            }
        }
        Ok(())
    }
}
