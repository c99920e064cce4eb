// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! # Path Management Module
//!
//! Destination and temp-area path plumbing for one download job: resolving
//! the final artifact path from a file-or-directory `--output`, deriving a
//! filename from the source URL, and naming the hidden per-job temp
//! directory and its part files.

use percent_encoding::percent_decode;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::chunking::Chunk;
use crate::constants::{FALLBACK_FILENAME, TEMP_DIR_PREFIX};
use crate::error::{AccelaraError, Result};

/// Resolve the final artifact path.
///
/// An `output` naming an existing directory gets a filename derived from the
/// URL (percent-decoded, sanitized, `download.tmp` as last resort); anything
/// else is used verbatim.
pub fn resolve_out_path(output: &Path, source_url: &str) -> PathBuf {
    if output.is_dir() {
        let name = filename_from_url(source_url);
        debug!("Output is a directory; derived filename {name:?}");
        output.join(name)
    } else {
        output.to_path_buf()
    }
}

/// Derive a filename from the last non-empty URL path segment
pub fn filename_from_url(url: &str) -> String {
    let segment = url::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(String::from))
    });

    let name = segment
        .map(|s| {
            percent_decode(s.as_bytes())
                .decode_utf8()
                .map(|d| d.into_owned())
                .unwrap_or(s)
        })
        .map(|s| sanitize_filename(&s))
        .unwrap_or_default();

    if name.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        name
    }
}

fn sanitize_filename(name: &str) -> String {
    name.replace(
        |c: char| c.is_control() || "<>:\"/\\|?*".contains(c),
        "_",
    )
}

/// The hidden per-job temp area next to the final artifact.
///
/// For destination `D/F` the layout is `D/.accelara-temp-F/` holding one
/// `F.part.<start>.<end>` per chunk plus the assembled `F` prior to the
/// atomic rename.
#[derive(Debug, Clone)]
pub struct TempArea {
    dir: PathBuf,
    file_name: String,
}

impl TempArea {
    /// Describe the temp area for a final artifact path
    pub fn for_output(out_path: &Path) -> Result<Self> {
        let file_name = out_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                AccelaraError::internal(format!(
                    "Output path has no usable filename: {}",
                    out_path.display()
                ))
            })?
            .to_string();

        let parent = out_path.parent().unwrap_or_else(|| Path::new("."));
        let dir = parent.join(format!("{TEMP_DIR_PREFIX}{file_name}"));

        Ok(Self { dir, file_name })
    }

    /// The temp directory itself
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the temp directory if absent
    pub async fn ensure_exists(&self) -> Result<()> {
        if !self.dir.exists() {
            debug!("Creating temp area {}", self.dir.display());
            tokio::fs::create_dir_all(&self.dir).await?;
        }
        Ok(())
    }

    /// Part file path for one chunk: `F.part.<start>.<end>`
    pub fn part_path(&self, chunk: &Chunk) -> PathBuf {
        self.dir
            .join(format!("{}.part.{}.{}", self.file_name, chunk.start, chunk.end))
    }

    /// Assembly / single-stream target inside the temp area
    pub fn staging_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Delete every part file, keeping the directory (adaptive fallback)
    pub async fn remove_parts(&self) -> Result<()> {
        let prefix = format!("{}.part.", self.file_name);
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(&prefix))
            {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Remove the whole temp area after a successful publish
    pub async fn cleanup(&self) -> Result<()> {
        if self.dir.exists() {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        Ok(())
    }
}
