// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Part-file assembly.
//!
//! Two passes: first every part file is stat-checked against its chunk range
//! and the aggregate against the declared total, then the parts are
//! concatenated in index order into the staging file. Each consumed part is
//! deleted immediately so a crash mid-merge cannot double-append on rerun.

use tokio::fs::{File, OpenOptions};
use tokio::io::{self, AsyncWriteExt};
use tracing::{debug, info};

use crate::chunking::Chunk;
use crate::error::{AccelaraError, Result};
use crate::events::{Event, EventSink};
use crate::failure_tracker::FailureTracker;
use crate::utils::TempArea;

/// Concatenate part files into the staging file and return its path.
///
/// The caller has already run the completeness gate; this re-checks the
/// on-disk reality because part files, not in-memory counters, are the
/// source of truth for what got persisted.
pub async fn assemble(
    area: &TempArea,
    chunks: &[Chunk],
    total_size: u64,
    tracker: &FailureTracker,
    sink: &EventSink,
) -> Result<std::path::PathBuf> {
    tracker.check_paused()?;

    // Pass one: every part must exist with exactly its chunk's length.
    let mut on_disk = 0u64;
    for chunk in chunks {
        let part = area.part_path(chunk);
        let size = tokio::fs::metadata(&part).await.map(|m| m.len()).map_err(|_| {
            AccelaraError::IncompleteChunk {
                index: chunk.index,
                got: 0,
                want: chunk.len(),
            }
        })?;

        if size != chunk.len() {
            return Err(AccelaraError::IncompleteChunk {
                index: chunk.index,
                got: size,
                want: chunk.len(),
            });
        }
        on_disk += size;
    }

    if on_disk != total_size {
        return Err(AccelaraError::SizeMismatch {
            got: on_disk,
            want: total_size,
        });
    }

    // Pass two: concatenate in index order.
    let staging = area.staging_path();
    let mut output = File::create(&staging).await?;
    let mut merged = 0u64;

    for chunk in chunks {
        tracker.check_paused()?;

        let part = area.part_path(chunk);
        let mut input = OpenOptions::new().read(true).open(&part).await?;
        let copied = io::copy(&mut input, &mut output).await?;

        if copied != chunk.len() {
            return Err(AccelaraError::IncompleteChunk {
                index: chunk.index,
                got: copied,
                want: chunk.len(),
            });
        }

        drop(input);
        tokio::fs::remove_file(&part).await?;
        merged += copied;

        debug!("Merged chunk {} ({} bytes)", chunk.index, copied);
        sink.emit(
            Event::http("merging")
                .set("merge_chunk", chunk.index)
                .set("merge_total", chunks.len())
                .set("merged_bytes", merged)
                .set("total_bytes", total_size),
        )
        .await;
    }

    output.flush().await?;
    drop(output);

    let final_size = tokio::fs::metadata(&staging).await?.len();
    if final_size != total_size {
        return Err(AccelaraError::SizeMismatch {
            got: final_size,
            want: total_size,
        });
    }

    info!(
        "Assembled {} chunks into {} ({} bytes)",
        chunks.len(),
        staging.display(),
        final_size
    );
    Ok(staging)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::plan_chunks;
    use crate::reporter::NullReporter;
    use std::sync::Arc;

    async fn write_parts(area: &TempArea, chunks: &[Chunk], content: &[u8]) {
        area.ensure_exists().await.unwrap();
        for chunk in chunks {
            let slice = &content[chunk.start as usize..=chunk.end as usize];
            tokio::fs::write(area.part_path(chunk), slice).await.unwrap();
        }
    }

    fn harness() -> (FailureTracker, EventSink) {
        (
            FailureTracker::new(),
            EventSink::new(Arc::new(NullReporter)),
        )
    }

    #[tokio::test]
    async fn test_assembles_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data.bin");
        let area = TempArea::for_output(&out).unwrap();

        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let chunks = plan_chunks(1000, true, 4, 1);
        write_parts(&area, &chunks, &content).await;

        let (tracker, sink) = harness();
        let staging = assemble(&area, &chunks, 1000, &tracker, &sink)
            .await
            .unwrap();

        let merged = tokio::fs::read(&staging).await.unwrap();
        assert_eq!(merged, content);

        // Consumed parts are gone
        for chunk in &chunks {
            assert!(!area.part_path(chunk).exists());
        }
    }

    #[tokio::test]
    async fn test_rejects_short_part() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data.bin");
        let area = TempArea::for_output(&out).unwrap();

        let content = vec![7u8; 1000];
        let chunks = plan_chunks(1000, true, 2, 1);
        write_parts(&area, &chunks, &content).await;

        // Truncate the second part
        tokio::fs::write(area.part_path(&chunks[1]), b"short")
            .await
            .unwrap();

        let (tracker, sink) = harness();
        let err = assemble(&area, &chunks, 1000, &tracker, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AccelaraError::IncompleteChunk { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_rejects_missing_part() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data.bin");
        let area = TempArea::for_output(&out).unwrap();
        area.ensure_exists().await.unwrap();

        let chunks = plan_chunks(100, true, 2, 1);
        let (tracker, sink) = harness();
        let err = assemble(&area, &chunks, 100, &tracker, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AccelaraError::IncompleteChunk { got: 0, .. }));
    }

    #[tokio::test]
    async fn test_paused_engine_never_merges() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data.bin");
        let area = TempArea::for_output(&out).unwrap();

        let content = vec![1u8; 100];
        let chunks = plan_chunks(100, true, 2, 1);
        write_parts(&area, &chunks, &content).await;

        let (tracker, sink) = harness();
        let _ = tracker.pause_now("connection lost".into(), &sink).await;

        let err = assemble(&area, &chunks, 100, &tracker, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AccelaraError::Paused { .. }));

        // Parts survive a pause for the next run to resume from.
        for chunk in &chunks {
            assert!(area.part_path(chunk).exists());
        }
    }
}
