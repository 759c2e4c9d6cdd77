//! Filesystem sink.
//!
//! Layout under the root directory, for a unit with key `AAA/income-statement_annual`:
//!
//! ```text
//! AAA/income-statement_annual.json   payload
//! AAA/income-statement_annual.done   completion record (JSON)
//! ```
//!
//! Both files are written to a uniquely named `.tmp-*` sibling, synced, and
//! renamed into place, so readers never see a partial file.

use async_trait::async_trait;
use harvest_core::{
    CompletionRecord, FetchError, Payload, PayloadFormat, Period, PersistenceSink, Result,
    WorkUnit,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::format;

/// Extension of completion markers.
const MARKER_EXT: &str = "done";

/// Infix identifying in-progress temp files.
const TMP_INFIX: &str = ".tmp-";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What [`FsSink::open`] found and cleaned up.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Valid completion records loaded into the index.
    pub completed: usize,
    /// Leftover temp files removed.
    pub removed_temp: usize,
    /// Payloads without a completion record removed.
    pub removed_orphans: usize,
    /// Completion records whose payload was missing or truncated, removed.
    pub removed_invalid_markers: usize,
    /// Entries not named like sink files, left untouched.
    pub ignored: usize,
}

/// Persistent filesystem sink with an in-memory completion index.
#[derive(Debug)]
pub struct FsSink {
    root: PathBuf,
    format: PayloadFormat,
    index: RwLock<HashSet<String>>,
    recovery: RecoveryReport,
}

impl FsSink {
    /// Open (creating if needed) a sink rooted at `root`.
    ///
    /// Scans existing output once: removes temp files and orphan payloads,
    /// drops invalid markers, and indexes every valid completion record so
    /// later [`exists`](PersistenceSink::exists) calls are set lookups.
    /// Entries not named like sink output are logged and left in place.
    ///
    /// # Errors
    /// Returns [`FetchError::Storage`] if the root cannot be created or read.
    pub async fn open(root: impl Into<PathBuf>, format: PayloadFormat) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| storage_err(&root, &e))?;

        let (index, recovery) = recover(&root).await?;
        info!(
            root = %root.display(),
            completed = recovery.completed,
            removed_temp = recovery.removed_temp,
            removed_orphans = recovery.removed_orphans,
            removed_invalid_markers = recovery.removed_invalid_markers,
            ignored = recovery.ignored,
            "Opened filesystem sink"
        );

        Ok(Self {
            root,
            format,
            index: RwLock::new(index),
            recovery,
        })
    }

    /// Root directory of this sink.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// What was cleaned up when the sink was opened.
    #[must_use]
    pub const fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Location of the payload for `unit`.
    #[must_use]
    pub fn payload_path(&self, unit: &WorkUnit) -> PathBuf {
        payload_path(&self.root, &unit.key(), self.format)
    }

    /// Location of the completion record for `unit`.
    #[must_use]
    pub fn marker_path(&self, unit: &WorkUnit) -> PathBuf {
        marker_path(&self.root, &unit.key())
    }

    /// Read back the stored payload of a completed unit.
    ///
    /// # Errors
    /// Returns [`FetchError::Storage`] if the payload cannot be read.
    pub async fn load(&self, unit: &WorkUnit) -> Result<Option<Vec<u8>>> {
        if !self.exists(unit).await? {
            return Ok(None);
        }
        let path = self.payload_path(unit);
        fs::read(&path)
            .await
            .map(Some)
            .map_err(|e| storage_err(&path, &e))
    }
}

#[async_trait]
impl PersistenceSink for FsSink {
    fn format(&self) -> PayloadFormat {
        self.format
    }

    async fn exists(&self, unit: &WorkUnit) -> Result<bool> {
        Ok(self.index.read().await.contains(&unit.key()))
    }

    #[instrument(skip(self, payload), fields(unit = %unit, records = payload.records()))]
    async fn write(&self, unit: &WorkUnit, payload: &Payload) -> Result<u64> {
        let bytes = format::encode(payload, self.format)?;
        let path = self.payload_path(unit);
        atomic_write(&path, &bytes).await?;
        debug!(bytes = bytes.len(), "Wrote payload");
        Ok(bytes.len() as u64)
    }

    #[instrument(skip(self, record), fields(unit = %unit))]
    async fn mark_complete(&self, unit: &WorkUnit, record: &CompletionRecord) -> Result<()> {
        let payload = payload_path(&self.root, &record.key, record.format);
        let stored = fs::metadata(&payload)
            .await
            .map_err(|e| storage_err(&payload, &e))?
            .len();
        if stored != record.bytes {
            return Err(FetchError::Storage(format!(
                "{}: expected {} bytes, found {stored}",
                payload.display(),
                record.bytes
            )));
        }

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| FetchError::Storage(format!("encode completion record: {e}")))?;
        atomic_write(&self.marker_path(unit), &json).await?;

        self.index.write().await.insert(record.key.clone());
        debug!("Marked complete");
        Ok(())
    }

    async fn completed_keys(&self) -> Result<HashSet<String>> {
        Ok(self.index.read().await.clone())
    }

    async fn completed_count(&self) -> Result<usize> {
        Ok(self.index.read().await.len())
    }
}

fn payload_path(root: &Path, key: &str, format: PayloadFormat) -> PathBuf {
    root.join(format!("{key}.{}", format.extension()))
}

fn marker_path(root: &Path, key: &str) -> PathBuf {
    root.join(format!("{key}.{MARKER_EXT}"))
}

pub(crate) fn storage_err(path: &Path, e: &std::io::Error) -> FetchError {
    FetchError::Storage(format!("{}: {e}", path.display()))
}

/// Write `bytes` to a temp sibling of `path`, sync it, and rename it over `path`.
pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_err(parent, &e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        "{file_name}{TMP_INFIX}{}-{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(storage_err(path, &e));
    }
    Ok(())
}

/// Scan `root` one directory level deep, cleaning up after interrupted runs.
async fn recover(root: &Path) -> Result<(HashSet<String>, RecoveryReport)> {
    let mut report = RecoveryReport::default();
    let mut index = HashSet::new();
    let mut payloads: Vec<(String, PathBuf)> = Vec::new();

    let mut dirs = fs::read_dir(root).await.map_err(|e| storage_err(root, &e))?;
    while let Some(dir) = dirs.next_entry().await.map_err(|e| storage_err(root, &e))? {
        let dir_path = dir.path();
        if !dir.file_type().await.is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let dir_name = dir.file_name().to_string_lossy().into_owned();

        let mut entries = fs::read_dir(&dir_path)
            .await
            .map_err(|e| storage_err(&dir_path, &e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err(&dir_path, &e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());

            let Some((stem, kind)) = is_file.then(|| sink_file(&name)).flatten() else {
                warn!(path = %path.display(), "Leaving unrecognized entry in sink root");
                report.ignored += 1;
                continue;
            };
            let key = format!("{dir_name}/{stem}");

            match kind {
                SinkFile::Temp => {
                    remove(&path).await?;
                    report.removed_temp += 1;
                }
                SinkFile::Marker => {
                    if validate_marker(root, &path, &key).await {
                        index.insert(key);
                    } else {
                        warn!(marker = %path.display(), "Removing invalid completion record");
                        remove(&path).await?;
                        report.removed_invalid_markers += 1;
                    }
                }
                SinkFile::Payload => payloads.push((key, path)),
            }
        }
    }

    for (key, path) in payloads {
        if !index.contains(&key) {
            debug!(payload = %path.display(), "Removing orphan payload");
            remove(&path).await?;
            report.removed_orphans += 1;
        }
    }

    report.completed = index.len();
    Ok((index, report))
}

/// Kinds of file the sink itself creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SinkFile {
    Payload,
    Marker,
    Temp,
}

/// Parses `{resource}_{period}.{ext}`, optionally followed by a temp suffix,
/// returning the unit stem and the file kind.
fn sink_file(name: &str) -> Option<(&str, SinkFile)> {
    if let Some((base, _)) = name.split_once(TMP_INFIX) {
        return sink_file(base).map(|(stem, _)| (stem, SinkFile::Temp));
    }
    let (stem, ext) = name.rsplit_once('.')?;
    let (resource, period) = stem.rsplit_once('_')?;
    if resource.is_empty() || !Period::ALL.iter().any(|p| p.as_str() == period) {
        return None;
    }
    if ext == MARKER_EXT {
        Some((stem, SinkFile::Marker))
    } else if [PayloadFormat::Json, PayloadFormat::Csv, PayloadFormat::Parquet]
        .iter()
        .any(|f| f.extension() == ext)
    {
        Some((stem, SinkFile::Payload))
    } else {
        None
    }
}

/// A marker is valid if it parses, names `key`, and its payload has the
/// recorded length.
async fn validate_marker(root: &Path, marker: &Path, key: &str) -> bool {
    let Ok(raw) = fs::read(marker).await else {
        return false;
    };
    let Ok(record) = serde_json::from_slice::<CompletionRecord>(&raw) else {
        return false;
    };
    if record.key != key {
        return false;
    }
    let payload = payload_path(root, &record.key, record.format);
    fs::metadata(&payload)
        .await
        .is_ok_and(|meta| meta.len() == record.bytes)
}

async fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage_err(path, &e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{Period, ResourceType};

    fn unit(symbol: &str) -> WorkUnit {
        WorkUnit::new(symbol, ResourceType::INCOME_STATEMENT, Period::Annual)
    }

    fn payload() -> Payload {
        Payload::new(br#"[{"date":"2024-12-31","revenue":10}]"#.to_vec(), 1)
    }

    async fn persist(sink: &FsSink, unit: &WorkUnit) {
        let bytes = sink.write(unit, &payload()).await.unwrap();
        let record = CompletionRecord::new(unit, 1, bytes, PayloadFormat::Json);
        sink.mark_complete(unit, &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_then_mark_complete() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
        let unit = unit("AAA");

        assert!(!sink.exists(&unit).await.unwrap());
        sink.write(&unit, &payload()).await.unwrap();
        assert!(!sink.exists(&unit).await.unwrap());
        assert!(sink.payload_path(&unit).exists());

        let record = CompletionRecord::new(&unit, 1, payload().len() as u64, PayloadFormat::Json);
        sink.mark_complete(&unit, &record).await.unwrap();
        assert!(sink.exists(&unit).await.unwrap());
        assert!(dir.path().join("AAA/income-statement_annual.json").exists());
        assert!(dir.path().join("AAA/income-statement_annual.done").exists());
        assert_eq!(sink.load(&unit).await.unwrap().unwrap(), payload().as_bytes());
    }

    #[tokio::test]
    async fn test_mark_complete_requires_payload() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
        let unit = unit("AAA");
        let record = CompletionRecord::new(&unit, 1, 10, PayloadFormat::Json);

        let err = sink.mark_complete(&unit, &record).await.unwrap_err();
        assert!(matches!(err, FetchError::Storage(_)));
        assert!(!sink.marker_path(&unit).exists());
        assert!(!sink.exists(&unit).await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_indexes_completed_units() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
            persist(&sink, &unit("AAA")).await;
            persist(&sink, &unit("BBB")).await;
        }

        let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
        assert_eq!(sink.recovery().completed, 2);
        assert!(sink.exists(&unit("AAA")).await.unwrap());
        let keys = sink.completed_keys().await.unwrap();
        assert!(keys.contains("BBB/income-statement_annual"));
        assert_eq!(sink.completed_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_open_removes_orphans_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
            persist(&sink, &unit("AAA")).await;
            // crash between write and mark_complete
            sink.write(&unit("BBB"), &payload()).await.unwrap();
        }
        std::fs::write(
            dir.path().join("AAA/balance-sheet-statement_annual.json.tmp-1-0"),
            b"[{\"da",
        )
        .unwrap();

        let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
        let report = sink.recovery();
        assert_eq!(report.completed, 1);
        assert_eq!(report.removed_orphans, 1);
        assert_eq!(report.removed_temp, 1);
        assert!(!sink.payload_path(&unit("BBB")).exists());
        assert!(!sink.exists(&unit("BBB")).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_drops_marker_with_truncated_payload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
            persist(&sink, &unit("AAA")).await;
        }
        std::fs::write(dir.path().join("AAA/income-statement_annual.json"), b"[").unwrap();

        let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
        assert_eq!(sink.recovery().removed_invalid_markers, 1);
        assert_eq!(sink.recovery().removed_orphans, 1);
        assert!(!sink.exists(&unit("AAA")).await.unwrap());
        assert!(!sink.marker_path(&unit("AAA")).exists());
    }

    #[test]
    fn test_sink_file_names() {
        assert_eq!(
            sink_file("income-statement_annual.json"),
            Some(("income-statement_annual", SinkFile::Payload))
        );
        assert_eq!(
            sink_file("ratios_ltm.done"),
            Some(("ratios_ltm", SinkFile::Marker))
        );
        assert_eq!(
            sink_file("cash-flow-statement_quarter.parquet.tmp-12-3"),
            Some(("cash-flow-statement_quarter", SinkFile::Temp))
        );
        assert_eq!(sink_file("main.rs"), None);
        assert_eq!(sink_file("notes_annual.txt"), None);
        assert_eq!(sink_file("report_final.json"), None);
        assert_eq!(sink_file("_annual.json"), None);
        assert_eq!(sink_file("draft.json.tmp-1"), None);
    }

    #[tokio::test]
    async fn test_open_leaves_unrelated_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), b"fn main() {}").unwrap();
        std::fs::write(dir.path().join("src/config.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("src/notes.json.tmp-old"), b"x").unwrap();
        std::fs::write(dir.path().join("README.md"), b"# data").unwrap();

        let sink = FsSink::open(dir.path(), PayloadFormat::Json).await.unwrap();
        let report = sink.recovery();

        assert_eq!(report.removed_orphans, 0);
        assert_eq!(report.removed_temp, 0);
        assert_eq!(report.ignored, 4);
        assert!(dir.path().join("src/main.rs").exists());
        assert!(dir.path().join("src/config.json").exists());
        assert!(dir.path().join("src/notes.json.tmp-old").exists());
        assert!(dir.path().join("src/nested").exists());
        assert!(dir.path().join("README.md").exists());
    }

    #[tokio::test]
    async fn test_dot_symbols_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let sink = FsSink::open(&root, PayloadFormat::Json).await.unwrap();

        for symbol in ["..", ".", ""] {
            persist(&sink, &unit(symbol)).await;
        }

        assert!(root.join("_../income-statement_annual.json").exists());
        assert!(root.join("_./income-statement_annual.json").exists());
        assert!(root.join("_/income-statement_annual.json").exists());
        assert!(!dir.path().join("income-statement_annual.json").exists());
        assert!(!root.join("income-statement_annual.json").exists());

        drop(sink);
        let reopened = FsSink::open(&root, PayloadFormat::Json).await.unwrap();
        assert_eq!(reopened.recovery().completed, 3);
        assert!(reopened.exists(&unit("..")).await.unwrap());
    }

    #[tokio::test]
    async fn test_csv_format_path() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsSink::open(dir.path(), PayloadFormat::Csv).await.unwrap();
        let unit = unit("AAA");
        let bytes = sink.write(&unit, &payload()).await.unwrap();
        let record = CompletionRecord::new(&unit, 1, bytes, PayloadFormat::Csv);
        sink.mark_complete(&unit, &record).await.unwrap();

        let csv = std::fs::read_to_string(dir.path().join("AAA/income-statement_annual.csv")).unwrap();
        assert!(csv.lines().next().unwrap().contains("revenue"));
        assert!(sink.exists(&unit).await.unwrap());
    }
}
