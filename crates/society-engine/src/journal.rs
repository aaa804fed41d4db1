//! Append-only JSON-lines journal.
//!
//! Dispatched events are appended to `events.jsonl` and checkpoints to
//! `checkpoints.jsonl`, one JSON document per line, under the configured
//! journal directory. Files are opened in append mode so restarts extend
//! the existing journal.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::Serialize;
use society_core::persistence::{Checkpoint, Persistence, PersistenceError};
use society_types::Event;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// File name for recorded events.
pub const EVENTS_FILE: &str = "events.jsonl";
/// File name for checkpoints.
pub const CHECKPOINTS_FILE: &str = "checkpoints.jsonl";

/// JSON-lines [`Persistence`] backend.
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    events: Mutex<File>,
    checkpoints: Mutex<File>,
}

impl Journal {
    /// Open (creating if needed) the journal under `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] if the directory or files cannot
    /// be created.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let events = append(&dir.join(EVENTS_FILE)).await?;
        let checkpoints = append(&dir.join(CHECKPOINTS_FILE)).await?;
        info!(dir = %dir.display(), "Journal opened");
        Ok(Self {
            dir,
            events: Mutex::new(events),
            checkpoints: Mutex::new(checkpoints),
        })
    }

    /// Directory the journal writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Persistence for Journal {
    fn record_events(&self, events: Vec<Event>) -> BoxFuture<'_, Result<(), PersistenceError>> {
        Box::pin(async move {
            let buffer = to_lines(&events)?;
            let mut file = self.events.lock().await;
            file.write_all(&buffer).await?;
            file.flush().await?;
            debug!(count = events.len(), "Events journaled");
            Ok(())
        })
    }

    fn save_checkpoint(
        &self,
        checkpoint: Checkpoint,
    ) -> BoxFuture<'_, Result<(), PersistenceError>> {
        Box::pin(async move {
            let buffer = to_lines(std::slice::from_ref(&checkpoint))?;
            let mut file = self.checkpoints.lock().await;
            file.write_all(&buffer).await?;
            file.flush().await?;
            debug!(tick = checkpoint.tick, "Checkpoint journaled");
            Ok(())
        })
    }
}

async fn append(path: &Path) -> Result<File, PersistenceError> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

fn to_lines<T: Serialize>(records: &[T]) -> Result<Vec<u8>, PersistenceError> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use society_types::{EventTopic, WorldState, event_types, sources};

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        std::env::temp_dir().join(format!(
            "society-journal-{name}-{}-{nanos}",
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn events_and_checkpoints_are_appended_as_lines() {
        let dir = scratch_dir("append");
        let journal = Journal::open(&dir).await.unwrap();

        let events = vec![
            Event::new(EventTopic::Global, event_types::DISCOVERY, sources::SYSTEM, 1, Utc::now()),
            Event::new(EventTopic::System, event_types::PAUSE, sources::API, 2, Utc::now()),
        ];
        journal.record_events(events.clone()).await.unwrap();
        journal
            .save_checkpoint(Checkpoint {
                tick: 2,
                taken_at: Utc::now(),
                world: WorldState::initial(true, 1.0, Utc::now()),
                agents: BTreeMap::new(),
            })
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(dir.join(EVENTS_FILE)).await.unwrap();
        let parsed: Vec<Event> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed, events);

        let checkpoints = tokio::fs::read_to_string(dir.join(CHECKPOINTS_FILE))
            .await
            .unwrap();
        let checkpoint: Checkpoint =
            serde_json::from_str(checkpoints.lines().next().unwrap()).unwrap();
        assert_eq!(checkpoint.tick, 2);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn reopening_extends_the_journal() {
        let dir = scratch_dir("reopen");
        let event = Event::new(EventTopic::Global, event_types::DISASTER, sources::SYSTEM, 1, Utc::now());

        Journal::open(&dir)
            .await
            .unwrap()
            .record_events(vec![event.clone()])
            .await
            .unwrap();
        Journal::open(&dir)
            .await
            .unwrap()
            .record_events(vec![event])
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(dir.join(EVENTS_FILE)).await.unwrap();
        assert_eq!(written.lines().count(), 2);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
