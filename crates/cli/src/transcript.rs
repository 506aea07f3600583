//! File-backed transcript sink.
//!
//! Archived conversations are appended as JSONL, one file per day. The
//! sink hands transcripts to a single writer task over a channel, so
//! `record` never blocks the engine and concurrent callers serialize
//! through the channel. Write failures are logged and swallowed.

use purrgate_core::transcript::{Transcript, TranscriptSink};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A transcript sink that appends JSONL files under a directory.
pub struct FileTranscriptSink {
    tx: mpsc::UnboundedSender<Transcript>,
}

impl FileTranscriptSink {
    /// Spawn the writer task and return the sink handle.
    pub fn spawn(dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Transcript>();

        tokio::spawn(async move {
            while let Some(transcript) = rx.recv().await {
                if let Err(e) = write_transcript(&dir, &transcript) {
                    warn!(error = %e, "Failed to write conversation transcript");
                }
            }
        });

        Self { tx }
    }
}

impl TranscriptSink for FileTranscriptSink {
    fn record(&self, transcript: Transcript) {
        // The writer task may be gone during shutdown; losing a
        // transcript then is acceptable.
        let _ = self.tx.send(transcript);
    }
}

fn write_transcript(dir: &PathBuf, transcript: &Transcript) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "conversations-{}.jsonl",
        transcript.saved_at.format("%Y%m%d")
    ));
    let line = serde_json::to_string(transcript)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{line}")?;
    debug!(path = %path.display(), turns = transcript.turns.len(), "Transcript archived");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use purrgate_core::PromptMessage;

    #[tokio::test]
    async fn transcripts_written_as_jsonl() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FileTranscriptSink::spawn(tmp.path().to_path_buf());

        let saved_at = Utc::now();
        sink.record(Transcript {
            reason: "inactivity".into(),
            saved_at,
            turns: vec![
                PromptMessage::system("persona"),
                PromptMessage::user("[Alice] hi"),
            ],
        });
        sink.record(Transcript {
            reason: "reset".into(),
            saved_at,
            turns: vec![PromptMessage::system("persona")],
        });

        // Give the writer task a moment to drain the channel.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let path = tmp
            .path()
            .join(format!("conversations-{}.jsonl", saved_at.format("%Y%m%d")));
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Transcript = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.reason, "inactivity");
        assert_eq!(first.turns.len(), 2);
    }

    #[tokio::test]
    async fn unwritable_directory_is_swallowed() {
        let sink = FileTranscriptSink::spawn(PathBuf::from("/proc/no-such-dir"));
        sink.record(Transcript {
            reason: "reset".into(),
            saved_at: Utc::now(),
            turns: vec![],
        });
        // Nothing to assert: the failure must not panic or propagate.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
