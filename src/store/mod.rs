// Store module - keeps everything the ingestion endpoints accept
//
// Records live in memory behind one mutex. When a data directory is configured,
// every accepted report is first appended to a JSON Lines journal and only then
// committed to memory, so a failed write leaves no trace. On startup the journal
// is replayed, which lets GetQueryData answer for reports from earlier runs.
//
// Example: jq 'select(.type == "SearchResults")' data/evaluation-journal.jsonl

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::protocol::{FeedbackRecord, MetricsRecord, QueryId, QueryRecord, SearchRecord};

/// File name of the journal inside the data directory
pub const JOURNAL_FILE: &str = "evaluation-journal.jsonl";

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalEntry {
    SearchResults(SearchRecord),
    Feedback(FeedbackRecord),
    Metrics(MetricsRecord),
}

#[derive(Debug, Default)]
struct Inner {
    queries: HashMap<QueryId, QueryRecord>,
    feedback: Vec<FeedbackRecord>,
    metrics: Vec<MetricsRecord>,
    journal: Option<File>,
}

/// Counts of what the store holds, for startup logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub queries: usize,
    pub search_reports: usize,
    pub feedback: usize,
    pub metrics: usize,
}

/// Accepted reports, indexed by query ID where one exists
#[derive(Debug, Default)]
pub struct Store {
    inner: Mutex<Inner>,
    journal_path: Option<PathBuf>,
}

impl Store {
    /// A store that keeps records in memory only
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A store journaled under `data_dir`, replaying any existing journal
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        let path = data_dir.join(JOURNAL_FILE);

        let mut inner = Inner::default();
        let mut torn_tail = false;
        if path.exists() {
            let file = File::open(&path).context("Failed to open journal for replay")?;
            let mut reader = BufReader::new(file);
            let mut line = Vec::new();
            let mut line_no = 0;
            loop {
                line.clear();
                let read = reader
                    .read_until(b'\n', &mut line)
                    .context("Failed to read journal")?;
                if read == 0 {
                    break;
                }
                line_no += 1;
                torn_tail = !line.ends_with(b"\n");
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<JournalEntry>(&line) {
                    Ok(entry) => inner.apply(entry),
                    // A torn final line from a crash is skipped, not fatal
                    Err(e) => tracing::warn!("Skipping journal line {}: {}", line_no, e),
                }
            }
        }

        let mut journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open journal for append")?;
        if torn_tail {
            // New entries must start on a line of their own
            journal
                .write_all(b"\n")
                .and_then(|_| journal.flush())
                .context("Failed to terminate torn journal line")?;
        }
        inner.journal = Some(journal);

        tracing::info!("Journal: {}", path.display());

        Ok(Self {
            inner: Mutex::new(inner),
            journal_path: Some(path),
        })
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, EvalError> {
        self.inner
            .lock()
            .map_err(|e| EvalError::Storage(format!("store lock poisoned: {}", e)))
    }

    /// Note that `query_id` was handed out by this process
    pub fn record_allocation(&self, query_id: QueryId) -> Result<(), EvalError> {
        let mut inner = self.lock()?;
        inner
            .queries
            .entry(query_id)
            .or_insert_with(|| QueryRecord::new(query_id))
            .allocated_at = Some(Utc::now());
        Ok(())
    }

    pub fn add_search_results(&self, record: SearchRecord) -> Result<(), EvalError> {
        self.commit(JournalEntry::SearchResults(record))
    }

    pub fn add_feedback(&self, record: FeedbackRecord) -> Result<(), EvalError> {
        self.commit(JournalEntry::Feedback(record))
    }

    /// An empty metrics list is accepted without recording anything
    pub fn add_metrics(&self, record: MetricsRecord) -> Result<(), EvalError> {
        if record.metrics.is_empty() {
            tracing::debug!("Empty metrics report from {}", record.component);
            return Ok(());
        }
        self.commit(JournalEntry::Metrics(record))
    }

    /// Everything recorded against `query_id`
    pub fn query(&self, query_id: QueryId) -> Result<QueryRecord, EvalError> {
        self.lock()?
            .queries
            .get(&query_id)
            .cloned()
            .ok_or_else(|| EvalError::NotFound(format!("query_ID {} is unknown", query_id)))
    }

    /// Raw queries seen in search reports with how often each occurred
    pub fn raw_query_counts(&self) -> Result<HashMap<String, usize>, EvalError> {
        let inner = self.lock()?;
        let mut counts = HashMap::new();
        for record in inner.queries.values() {
            for report in &record.search_results {
                if !report.raw_query.is_empty() {
                    *counts.entry(report.raw_query.clone()).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    pub fn feedback(&self) -> Result<Vec<FeedbackRecord>, EvalError> {
        Ok(self.lock()?.feedback.clone())
    }

    pub fn metrics(&self) -> Result<Vec<MetricsRecord>, EvalError> {
        Ok(self.lock()?.metrics.clone())
    }

    pub fn summary(&self) -> Result<StoreSummary, EvalError> {
        let inner = self.lock()?;
        Ok(StoreSummary {
            queries: inner.queries.len(),
            search_reports: inner.queries.values().map(|q| q.search_results.len()).sum(),
            feedback: inner.feedback.len(),
            metrics: inner.metrics.len(),
        })
    }

    /// Journal first, then apply; both under the same lock
    fn commit(&self, entry: JournalEntry) -> Result<(), EvalError> {
        let mut inner = self.lock()?;

        if let Some(journal) = inner.journal.as_mut() {
            write_entry(journal, &entry)?;
        }

        inner.apply(entry);
        Ok(())
    }
}

impl Inner {
    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::SearchResults(record) => {
                self.queries
                    .entry(record.query_id)
                    .or_insert_with(|| QueryRecord::new(record.query_id))
                    .search_results
                    .push(record);
            }
            JournalEntry::Feedback(record) => self.feedback.push(record),
            JournalEntry::Metrics(record) => self.metrics.push(record),
        }
    }
}

fn write_entry(journal: &mut File, entry: &JournalEntry) -> Result<(), EvalError> {
    let mut line = serde_json::to_vec(entry)
        .map_err(|e| EvalError::Storage(format!("failed to serialize entry: {}", e)))?;
    line.push(b'\n');

    let start = journal
        .metadata()
        .map_err(|e| EvalError::Storage(format!("failed to stat journal: {}", e)))?
        .len();

    // Whole line in a single write
    if let Err(e) = journal.write_all(&line).and_then(|_| journal.flush()) {
        // Drop any partial line so the next entry is not glued onto it
        if let Err(truncate) = journal.set_len(start) {
            tracing::error!("Failed to roll back partial journal write: {}", truncate);
            let _ = journal.write_all(b"\n");
        }
        return Err(EvalError::Storage(format!(
            "failed to append to journal: {}",
            e
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FeedbackReport, MetricsReport, SearchResultReport};
    use serde_json::json;

    fn search(query_id: QueryId, raw_query: &str) -> SearchRecord {
        SearchResultReport {
            query_id: Some(query_id),
            raw_query: raw_query.to_string(),
            results: vec!["Pizza Palace".into(), "Italian Bistro".into()],
            clicked: Some(1),
            query_timestamp: Some("2024-12-08T12:34:56Z".into()),
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_search_report_is_retrievable() {
        let store = Store::in_memory();
        store.add_search_results(search(12345, "best pizza places")).unwrap();

        let record = store.query(12345).unwrap();
        assert_eq!(record.query_id, 12345);
        assert_eq!(record.allocated_at, None);
        assert_eq!(record.search_results.len(), 1);
        assert_eq!(record.search_results[0].raw_query, "best pizza places");
    }

    #[test]
    fn test_unknown_query_is_not_found() {
        let store = Store::in_memory();
        assert!(matches!(store.query(999), Err(EvalError::NotFound(_))));
    }

    #[test]
    fn test_allocated_query_is_known() {
        let store = Store::in_memory();
        store.record_allocation(7).unwrap();
        let record = store.query(7).unwrap();
        assert!(record.allocated_at.is_some());
        assert!(record.search_results.is_empty());
    }

    #[test]
    fn test_resubmission_creates_new_record() {
        let store = Store::in_memory();
        store.add_search_results(search(1, "rust")).unwrap();
        store.add_search_results(search(1, "rust")).unwrap();
        assert_eq!(store.query(1).unwrap().search_results.len(), 2);
        assert_eq!(store.raw_query_counts().unwrap()["rust"], 2);
    }

    #[test]
    fn test_empty_metrics_is_noop() {
        let store = Store::in_memory();
        let record = MetricsReport::Bare(vec![]).validate("indexer").unwrap();
        store.add_metrics(record).unwrap();
        assert_eq!(store.summary().unwrap().metrics, 0);
    }

    #[test]
    fn test_journal_replays_after_restart() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = Store::open(dir.path()).unwrap();
            store.add_search_results(search(42, "journal me")).unwrap();
            store
                .add_feedback(
                    FeedbackReport {
                        label: "Bug Report".into(),
                        title: "Same results".into(),
                        text: "Always three".into(),
                    }
                    .validate()
                    .unwrap(),
                )
                .unwrap();
            let metrics: MetricsReport =
                serde_json::from_value(json!({"metrics": [{"label": "Bytes Used"}]})).unwrap();
            store
                .add_metrics(metrics.validate("Document-Data-Store").unwrap())
                .unwrap();
        }

        let reopened = Store::open(dir.path()).unwrap();
        assert_eq!(
            reopened.summary().unwrap(),
            StoreSummary {
                queries: 1,
                search_reports: 1,
                feedback: 1,
                metrics: 1,
            }
        );
        assert_eq!(
            reopened.query(42).unwrap().search_results[0].raw_query,
            "journal me"
        );
        assert_eq!(reopened.feedback().unwrap()[0].label, "Bug Report");
        assert_eq!(reopened.metrics().unwrap()[0].component, "Document-Data-Store");
    }

    #[test]
    fn test_torn_journal_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store.add_search_results(search(5, "kept")).unwrap();
        }
        let path = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"type\":\"SearchRes").unwrap();

        {
            let reopened = Store::open(dir.path()).unwrap();
            assert_eq!(reopened.summary().unwrap().search_reports, 1);
            reopened.add_search_results(search(6, "after crash")).unwrap();
        }

        // The report accepted after the torn line survives another restart
        let restarted = Store::open(dir.path()).unwrap();
        assert_eq!(restarted.summary().unwrap().search_reports, 2);
        assert_eq!(
            restarted.query(6).unwrap().search_results[0].raw_query,
            "after crash"
        );
        assert_eq!(restarted.query(5).unwrap().search_results.len(), 1);
    }

    #[test]
    fn test_torn_multibyte_tail_does_not_block_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        // "é" cut after its first byte
        fs::write(&path, b"{\"type\":\"Feedback\",\"label\":\"\xc3").unwrap();

        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.summary().unwrap(), StoreSummary::default());
    }
}
