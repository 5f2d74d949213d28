//! Field storage: memory first, a spool file once the field grows past the threshold.

use std::io;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::upload::UploadConfig;

const SPOOL_PREFIX: &str = "micro-file-";
const SPOOL_SUFFIX: &str = ".part";

/// The content of one decoded field.
///
/// Dropping a `FieldData` deletes its spool file, if any.
#[derive(Debug)]
pub struct FieldData {
    state: State,
    size: u64,
    spill_threshold: usize,
}

#[derive(Debug)]
enum State {
    Memory(BytesMut),
    Disk {
        // declared before `temp` so the handle closes before the file is unlinked
        file: File,
        temp: NamedTempFile,
    },
}

impl FieldData {
    pub fn new(config: &UploadConfig) -> Self {
        Self { state: State::Memory(BytesMut::new()), size: 0, spill_threshold: config.spill_threshold }
    }

    pub async fn write(&mut self, data: &[u8], config: &UploadConfig) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if let State::Memory(buf) = &mut self.state {
            if buf.len() + data.len() <= self.spill_threshold {
                buf.extend_from_slice(data);
                self.size += data.len() as u64;
                return Ok(());
            }

            let buffered = buf.split().freeze();
            self.state = spill(&config.spool_dir, &buffered).await?;
        }

        if let State::Disk { file, .. } = &mut self.state {
            file.write_all(data).await?;
        }
        self.size += data.len() as u64;
        Ok(())
    }

    /// Flushes pending writes of a spilled field.
    pub async fn complete(&mut self) -> io::Result<()> {
        match &mut self.state {
            State::Memory(_) => Ok(()),
            State::Disk { file, .. } => file.flush().await,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.state, State::Disk { .. })
    }
}

async fn spill(spool_dir: &Path, buffered: &Bytes) -> io::Result<State> {
    let spool_dir = spool_dir.to_path_buf();
    let temp = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new().prefix(SPOOL_PREFIX).suffix(SPOOL_SUFFIX).tempfile_in(spool_dir)
    })
    .await
    .map_err(io::Error::other)??;

    trace!(path = ?temp.path(), buffered = buffered.len(), "spill field to disk");
    let mut file = File::from_std(temp.as_file().try_clone()?);
    file.write_all(buffered).await?;
    Ok(State::Disk { file, temp })
}
