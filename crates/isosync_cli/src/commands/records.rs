//! Record commands: add, edit, delete, list.

use crate::files::ReplicaFile;
use isosync_engine::{Clock, LocalStore, MemoryStore, SystemClock};
use isosync_protocol::{Record, RecordId};
use serde::Serialize;
use std::path::Path;

type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Field changes requested by `edit`.
#[derive(Debug, Clone, Default)]
pub struct RecordEdit {
    /// New name.
    pub name: Option<String>,
    /// New body.
    pub body: Option<String>,
    /// New summary (empty string clears it).
    pub summary: Option<String>,
    /// Tags to add.
    pub add_tags: Vec<String>,
    /// Tags to remove.
    pub remove_tags: Vec<String>,
}

impl RecordEdit {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.body.is_none()
            && self.summary.is_none()
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
    }
}

/// One row of `list` output.
#[derive(Debug, Serialize)]
pub struct RecordRow {
    /// Record ID.
    pub id: String,
    /// Name.
    pub name: String,
    /// Tags.
    pub tags: Vec<String>,
    /// Local version counter.
    pub version: u64,
    /// Last remote-acknowledged version.
    pub sync_version: u64,
    /// True if the record has unsynced edits.
    pub pending: bool,
}

impl From<&Record> for RecordRow {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.to_string(),
            name: record.name.clone(),
            tags: record.tags.iter().cloned().collect(),
            version: record.version,
            sync_version: record.sync_version,
            pending: record.has_local_changes(),
        }
    }
}

/// Adds a record and prints its ID.
pub fn add(path: &Path, name: &str, body: &str, tags: &[String]) -> CommandResult<()> {
    let id = with_store(path, |replica, store| {
        let now = SystemClock.now_ms();
        let mut record = Record::new(replica.site_id(), name, body, now);
        for tag in tags {
            record.add_tag(tag.clone(), now);
        }
        Ok(store.create_node(record)?.id)
    })?;
    println!("{id}");
    Ok(())
}

/// Applies field edits to a record.
pub fn edit(path: &Path, id: &str, changes: RecordEdit) -> CommandResult<()> {
    if changes.is_empty() {
        return Err("nothing to edit".into());
    }
    let id: RecordId = id.parse()?;
    let record = with_store(path, |replica, store| {
        let mut record = live_record(store, id)?;
        let now = SystemClock.now_ms();
        record.crdt.site_id = replica.site_id();

        if let Some(name) = changes.name {
            record.set_name(name, now);
        }
        if let Some(body) = changes.body {
            record.set_body(body, now);
        }
        if let Some(summary) = changes.summary {
            let summary = (!summary.is_empty()).then_some(summary);
            record.set_summary(summary, now);
        }
        for tag in changes.add_tags {
            record.add_tag(tag, now);
        }
        for tag in &changes.remove_tags {
            record.remove_tag(tag, now);
        }
        Ok(store.update_node(record)?)
    })?;
    println!("Updated {} (version {})", record.id, record.version);
    Ok(())
}

/// Marks a record deleted. The deletion is pushed by the next sync.
pub fn delete(path: &Path, id: &str) -> CommandResult<()> {
    let id: RecordId = id.parse()?;
    with_store(path, |_, store| {
        let mut record = live_record(store, id)?;
        record.tombstone(SystemClock.now_ms());
        store.update_node(record)?;
        Ok(())
    })?;
    println!("Deleted {id}");
    Ok(())
}

/// Lists live records.
pub fn list(path: &Path, format: &str) -> CommandResult<()> {
    let rows = rows(&ReplicaFile::load(path)?);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            if rows.is_empty() {
                println!("No records");
            }
            for row in &rows {
                let marker = if row.pending { "*" } else { " " };
                println!(
                    "{marker} {}  v{}/s{}  {}  [{}]",
                    row.id,
                    row.version,
                    row.sync_version,
                    row.name,
                    row.tags.join(", ")
                );
            }
        }
    }
    Ok(())
}

/// Returns the live records of a replica, sorted by name.
pub fn rows(replica: &ReplicaFile) -> Vec<RecordRow> {
    let mut records = replica.open_store().live_records();
    records.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    records.iter().map(RecordRow::from).collect()
}

fn live_record(store: &MemoryStore, id: RecordId) -> CommandResult<Record> {
    match store.get_node(id)? {
        Some(record) if !record.is_tombstone() => Ok(record),
        _ => Err(format!("no record {id}").into()),
    }
}

/// Loads the replica, runs `f` against its store, and saves the result.
fn with_store<T>(
    path: &Path,
    f: impl FnOnce(&ReplicaFile, &MemoryStore) -> CommandResult<T>,
) -> CommandResult<T> {
    let mut replica = ReplicaFile::load(path)?;
    let store = replica.open_store();
    let value = f(&replica, &store)?;
    replica.store = store.snapshot();
    replica.save(path)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init::{self, Preset};

    #[test]
    fn add_edit_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.json");
        init::create(&path, "laptop", Preset::Default).unwrap();

        add(&path, "notes", "hello", &["work".to_string()]).unwrap();
        let replica = ReplicaFile::load(&path).unwrap();
        let listed = rows(&replica);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tags, vec!["work"]);
        assert!(listed[0].pending);

        let id = listed[0].id.clone();
        let changes = RecordEdit {
            body: Some("updated".to_string()),
            remove_tags: vec!["work".to_string()],
            ..RecordEdit::default()
        };
        edit(&path, &id, changes).unwrap();
        let store = ReplicaFile::load(&path).unwrap().open_store();
        let record = store.get_node(id.parse().unwrap()).unwrap().unwrap();
        assert_eq!(record.body, "updated");
        assert!(record.tags.is_empty());

        delete(&path, &id).unwrap();
        assert!(rows(&ReplicaFile::load(&path).unwrap()).is_empty());
        assert!(delete(&path, &id).is_err());
    }

    #[test]
    fn edit_requires_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.json");
        init::create(&path, "laptop", Preset::Default).unwrap();
        let id = RecordId::new().to_string();
        assert!(edit(&path, &id, RecordEdit::default()).is_err());
    }
}
