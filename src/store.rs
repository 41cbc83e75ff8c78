//! Subject/experiment sequence store.
//!
//! The core treats this purely as get/put by subject id; the JSON-file
//! implementation keeps one record per subject under a configured directory.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read record for subject `{subject}`: {source}")]
    Read {
        subject: String,
        source: std::io::Error,
    },

    #[error("failed to write record for subject `{subject}`: {source}")]
    Write {
        subject: String,
        source: std::io::Error,
    },

    #[error("record for subject `{subject}` is not valid JSON: {source}")]
    Parse {
        subject: String,
        source: serde_json::Error,
    },
}

/// One experiment session within a subject record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ExperimentRecord {
    pub timestamp: String,
    pub sequence: Vec<String>,
}

/// All experiments recorded for one subject.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SubjectRecord {
    pub subject: String,
    pub experiments: Vec<ExperimentRecord>,
}

/// Get/put-by-subject persistence for trial sequences.
pub trait SequenceStore {
    fn get(&self, subject: &str) -> Result<Option<SubjectRecord>, StoreError>;
    fn put(&mut self, record: &SubjectRecord) -> Result<(), StoreError>;

    /// Upsert the sequence for one experiment timestamp within a subject's
    /// record, creating the record if the subject is new.
    fn record_sequence(
        &mut self,
        subject: &str,
        timestamp: &str,
        sequence: &[String],
    ) -> Result<(), StoreError> {
        let mut record = self.get(subject)?.unwrap_or_else(|| SubjectRecord {
            subject: subject.to_owned(),
            experiments: Vec::new(),
        });

        match record
            .experiments
            .iter_mut()
            .find(|e| e.timestamp == timestamp)
        {
            Some(experiment) => experiment.sequence = sequence.to_vec(),
            None => record.experiments.push(ExperimentRecord {
                timestamp: timestamp.to_owned(),
                sequence: sequence.to_vec(),
            }),
        }

        self.put(&record)
    }
}

/// JSON-file store: `<dir>/<subject>.json`, one file per subject.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, subject: &str) -> PathBuf {
        self.dir.join(format!("{subject}.json"))
    }
}

impl SequenceStore for JsonFileStore {
    fn get(&self, subject: &str) -> Result<Option<SubjectRecord>, StoreError> {
        let path = self.path_for(subject);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|source| StoreError::Read {
            subject: subject.to_owned(),
            source,
        })?;
        let record = serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            subject: subject.to_owned(),
            source,
        })?;
        Ok(Some(record))
    }

    fn put(&mut self, record: &SubjectRecord) -> Result<(), StoreError> {
        let to_write_err = |source: std::io::Error| StoreError::Write {
            subject: record.subject.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(to_write_err)?;
        // SubjectRecord is plain strings and vecs; serialization cannot fail
        let text = serde_json::to_string_pretty(record).unwrap_or_default();
        fs::write(self.path_for(&record.subject), text).map_err(to_write_err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn temp_store(tag: &str) -> JsonFileStore {
        let dir = std::env::temp_dir().join(format!(
            "gazelab-store-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_dir_all(&dir);
        JsonFileStore::new(dir)
    }

    #[test]
    fn test_get_missing_subject_is_none() {
        let store = temp_store("missing");
        assert_eq!(store.get("S99").unwrap(), None);
    }

    #[test]
    fn test_put_get_roundtrip() {
        let mut store = temp_store("roundtrip");
        let record = SubjectRecord {
            subject: "S01".to_owned(),
            experiments: vec![ExperimentRecord {
                timestamp: "20260825T120000Z".to_owned(),
                sequence: vec!["VPB-hfixed".to_owned(), "VPB-hfree".to_owned()],
            }],
        };
        store.put(&record).unwrap();
        assert_eq!(store.get("S01").unwrap(), Some(record));
    }

    #[test]
    fn test_record_sequence_upserts() {
        let mut store = temp_store("upsert");
        let seq_a = vec!["VPC-L".to_owned()];
        let seq_b = vec!["VPC-R".to_owned()];

        store.record_sequence("S02", "t1", &seq_a).unwrap();
        store.record_sequence("S02", "t2", &seq_a).unwrap();
        // Same timestamp replaces, it does not append
        store.record_sequence("S02", "t1", &seq_b).unwrap();

        let record = store.get("S02").unwrap().unwrap();
        assert_eq!(record.experiments.len(), 2);
        assert_eq!(record.experiments[0].timestamp, "t1");
        assert_eq!(record.experiments[0].sequence, seq_b);
        assert_eq!(record.experiments[1].sequence, seq_a);
    }
}
