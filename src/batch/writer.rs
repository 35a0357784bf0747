//! Newline-delimited JSON output, one file per batch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::batch::iterator::{Batch, BatchSink};
use crate::codec::export::tagged_to_json;
use crate::codec::attribute::Item;
use crate::constants::attributes::DECOMPRESSED_DATA;
use crate::error::{MigrationError, Result};

const BATCH_FILE_PATTERN: &str = r"^batch_(\d{5,})\.jsonl$";

/// Writes every batch as `batch_NNNNN.jsonl` under an output directory
///
/// Numbering continues after the highest batch file already present, and
/// files are opened with `create_new`, so output from an earlier run is never
/// truncated or overwritten.
#[derive(Debug)]
pub struct BatchFileWriter {
    dir: PathBuf,
    next_number: u64,
    files_written: Vec<PathBuf>,
}

impl BatchFileWriter {
    /// Prepare `dir` (creating it if needed) and find the next batch number
    pub async fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let io_err = |e: std::io::Error| MigrationError::io(dir.display().to_string(), e.to_string());

        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;

        let pattern = Regex::new(BATCH_FILE_PATTERN)
            .map_err(|e| MigrationError::configuration("batch_writer", e.to_string()))?;
        let mut highest = 0;
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(number) = pattern
                .captures(name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            {
                highest = highest.max(number);
            }
        }

        if highest > 0 {
            info!(
                dir = %dir.display(),
                resume_after = highest,
                "📁 BATCH_WRITER: Existing batch files found, numbering continues after them"
            );
        }

        Ok(Self {
            dir,
            next_number: highest + 1,
            files_written: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn next_file_name(&self) -> String {
        format!("batch_{:05}.jsonl", self.next_number)
    }

    pub fn files_written(&self) -> &[PathBuf] {
        &self.files_written
    }

    /// Write one batch: decoded items first, then undecodable ones as stored
    pub async fn write_batch(&mut self, batch: &Batch) -> Result<PathBuf> {
        let mut contents = String::new();
        for decoded in &batch.items {
            let line = export_line(&decoded.item, decoded.payload.as_ref())?;
            contents.push_str(&line);
            contents.push('\n');
        }
        for failure in &batch.failures {
            let line = export_line(&failure.item, None)?;
            contents.push_str(&line);
            contents.push('\n');
        }

        let path = self.dir.join(self.next_file_name());
        let io_err = |e: std::io::Error| MigrationError::io(path.display().to_string(), e.to_string());
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(contents.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        info!(
            file = %path.display(),
            batch_index = batch.index,
            items = batch.len(),
            "💾 BATCH_WRITER: Wrote batch file"
        );
        self.next_number += 1;
        self.files_written.push(path.clone());
        Ok(path)
    }
}

fn export_line(item: &Item, payload: Option<&Value>) -> Result<String> {
    let mut object: serde_json::Map<String, Value> = item
        .iter()
        .map(|(k, v)| (k.clone(), tagged_to_json(v)))
        .collect();
    if let Some(payload) = payload {
        object.insert(DECOMPRESSED_DATA.to_string(), payload.clone());
    }
    Ok(serde_json::to_string(&Value::Object(object))?)
}

#[async_trait]
impl BatchSink for BatchFileWriter {
    async fn on_batch(&mut self, batch: Batch) -> Result<()> {
        self.write_batch(&batch).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::iterator::DecodedItem;
    use crate::codec::attribute::TaggedValue;
    use serde_json::json;

    fn batch(index: usize) -> Batch {
        let item = Item::from([("PK0".to_string(), TaggedValue::S("Resource:1".into()))]);
        Batch {
            index,
            items: vec![DecodedItem {
                key: item.clone(),
                key_label: "PK0=Resource:1".to_string(),
                item,
                payload: Some(json!({"title": "X"})),
            }],
            failures: vec![],
            consumed_capacity: 0.5,
        }
    }

    #[tokio::test]
    async fn test_writes_numbered_jsonl_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BatchFileWriter::create(dir.path()).await.unwrap();
        assert_eq!(writer.next_file_name(), "batch_00001.jsonl");

        writer.on_batch(batch(0)).await.unwrap();
        writer.on_batch(batch(1)).await.unwrap();
        assert_eq!(writer.files_written().len(), 2);

        let contents = std::fs::read_to_string(dir.path().join("batch_00002.jsonl")).unwrap();
        let line: Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["PK0"], json!("Resource:1"));
        assert_eq!(line[DECOMPRESSED_DATA]["title"], json!("X"));
    }

    #[tokio::test]
    async fn test_numbering_resumes_after_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("batch_00007.jsonl"), "{}\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let mut writer = BatchFileWriter::create(dir.path()).await.unwrap();
        assert_eq!(writer.next_file_name(), "batch_00008.jsonl");
        writer.on_batch(batch(0)).await.unwrap();

        let preserved = std::fs::read_to_string(dir.path().join("batch_00007.jsonl")).unwrap();
        assert_eq!(preserved, "{}\n");
    }
}
