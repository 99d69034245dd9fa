//! File-based sources and sinks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use rill_core::error::ProcessorError;
use rill_core::payload::{BasePayload, Payload, PayloadRef};
use rill_core::processor::{Processor, ProcessorBase, WorkerContext};

use crate::{opt_bool, opt_int, required_bool, required_str, ProcessError};

/// Reads one file, emits its bytes as a single payload, and exits.
///
/// Properties: `path` (required), `remove_after` (default false). A clean
/// worker exit is success; the supervisor does not restart it.
pub struct ReadFile {
    base: ProcessorBase,
}

impl ReadFile {
    pub const KIND: &'static str = "read_file";

    pub fn new() -> Self {
        let mut base = ProcessorBase::new(Self::KIND);
        base.properties_mut()
            .add("path", "the file to read", true)
            .add("remove_after", "delete the file once it was read", false);
        Self { base }
    }

    pub fn boxed() -> Box<dyn Processor> {
        Box::new(Self::new())
    }
}

impl Default for ReadFile {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for ReadFile {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn subscriptionless(&self) -> bool {
        true
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError> {
        let props = self.base.properties();
        let path = required_str(props, "path")?;
        let remove_after = opt_bool(props, "remove_after", false)?;

        let ctx = self.base.begin_start(&cancel, false)?;
        let worker = tokio::spawn(async move {
            let read = tokio::select! {
                _ = ctx.cancel_token().cancelled() => return,
                read = tokio::fs::read(&path) => read,
            };
            match read {
                Ok(bytes) => {
                    let payload: PayloadRef = Arc::new(BasePayload::new(path.clone(), bytes));
                    if !ctx.emit(payload).await {
                        return;
                    }
                    if remove_after {
                        if let Err(err) = tokio::fs::remove_file(&path).await {
                            ctx.fail(ProcessError::Io(err), None);
                        }
                    }
                }
                Err(err) => ctx.fail(ProcessError::Io(err), None),
            }
        });
        self.base.finish_start(worker);
        Ok(())
    }
}

/// Polls a directory and emits one payload per previously unseen file.
///
/// Properties: `path` (required), `poll_interval` (milliseconds, default
/// 1000), `remove_after` (default false). Runs until cancelled.
pub struct MonitorDirectory {
    base: ProcessorBase,
}

impl MonitorDirectory {
    pub const KIND: &'static str = "monitor_directory";

    pub fn new() -> Self {
        let mut base = ProcessorBase::new(Self::KIND);
        base.properties_mut()
            .add("path", "the directory to watch", true)
            .add(
                "poll_interval",
                "how often to rescan the directory, in milliseconds",
                false,
            )
            .add("remove_after", "delete files once they were read", false);
        Self { base }
    }

    pub fn boxed() -> Box<dyn Processor> {
        Box::new(Self::new())
    }
}

impl Default for MonitorDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for MonitorDirectory {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn subscriptionless(&self) -> bool {
        true
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError> {
        let props = self.base.properties();
        let path = required_str(props, "path")?;
        let poll_interval = opt_int(props, "poll_interval", 1000)?.max(1) as u64;
        let remove_after = opt_bool(props, "remove_after", false)?;

        let ctx = self.base.begin_start(&cancel, false)?;
        let worker = tokio::spawn(async move {
            let mut seen: HashSet<PathBuf> = HashSet::new();
            let mut tick = tokio::time::interval(Duration::from_millis(poll_interval));
            loop {
                tokio::select! {
                    _ = ctx.cancel_token().cancelled() => return,
                    _ = tick.tick() => {
                        if !scan_directory(&ctx, &path, &mut seen, remove_after).await {
                            return;
                        }
                    }
                }
            }
        });
        self.base.finish_start(worker);
        Ok(())
    }
}

/// One polling pass. Returns false when the worker should end (egress gone
/// or cancellation observed mid-emit).
async fn scan_directory(
    ctx: &WorkerContext,
    path: &str,
    seen: &mut HashSet<PathBuf>,
    remove_after: bool,
) -> bool {
    let mut dir = match tokio::fs::read_dir(path).await {
        Ok(dir) => dir,
        Err(err) => {
            ctx.fail(ProcessError::Io(err), None);
            return true;
        }
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        let file_path = entry.path();
        if seen.contains(&file_path) {
            continue;
        }
        match entry.file_type().await {
            Ok(kind) if kind.is_file() => {}
            _ => continue,
        }
        seen.insert(file_path.clone());
        tracing::debug!(file = %file_path.display(), "Picked up new file");
        match tokio::fs::read(&file_path).await {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    let payload: PayloadRef =
                        Arc::new(BasePayload::new(file_path.to_string_lossy(), bytes));
                    if !ctx.emit(payload).await {
                        return false;
                    }
                }
                if remove_after {
                    let _ = tokio::fs::remove_file(&file_path).await;
                }
            }
            Err(err) => ctx.fail(ProcessError::Io(err), None),
        }
    }
    true
}

/// Writes incoming payloads to a file or into a directory.
///
/// Properties: `path` (required), `append` (required), `forward` (default
/// false). Existing files are refused unless `append` is set; a directory
/// target gets a fresh temp file per payload; with `forward` the input is
/// republished after a successful write.
pub struct WriteFile {
    base: ProcessorBase,
}

impl WriteFile {
    pub const KIND: &'static str = "write_file";

    pub fn new() -> Self {
        let mut base = ProcessorBase::new(Self::KIND);
        base.properties_mut()
            .add("path", "the file or directory to write to", true)
            .add("append", "append to existing files instead of refusing", true)
            .add(
                "forward",
                "republish the payload after writing it",
                false,
            );
        Self { base }
    }

    pub fn boxed() -> Box<dyn Processor> {
        Box::new(Self::new())
    }
}

impl Default for WriteFile {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for WriteFile {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError> {
        let props = self.base.properties();
        let path = required_str(props, "path")?;
        let append = required_bool(props, "append")?;
        let forward = opt_bool(props, "forward", false)?;

        let mut ctx = self.base.begin_start(&cancel, true)?;
        let worker = tokio::spawn(async move {
            while let Some(payload) = ctx.next().await {
                match write_payload(Path::new(&path), append, &payload.bytes()).await {
                    Ok(()) => {
                        ctx.metrics().add(
                            "writes",
                            "number of writes the processor has performed",
                            1,
                        );
                        if forward && !ctx.emit(payload).await {
                            return;
                        }
                    }
                    Err(err) => ctx.fail(err, Some(payload)),
                }
            }
        });
        self.base.finish_start(worker);
        Ok(())
    }
}

/// Write one payload according to the target's shape.
async fn write_payload(path: &Path, append: bool, bytes: &[u8]) -> Result<(), ProcessError> {
    if path.as_os_str().is_empty() {
        return Err(ProcessError::InvalidPath);
    }
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => Some(metadata),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(ProcessError::Io(err)),
    };
    match metadata {
        Some(metadata) if metadata.is_dir() => {
            let temp = tempfile::Builder::new()
                .prefix("write_file_")
                .tempfile_in(path)?;
            let (_, temp_path) = temp
                .keep()
                .map_err(|err| ProcessError::Io(err.error))?;
            write_bytes(&temp_path, bytes).await
        }
        Some(_) if !append => Err(ProcessError::FileExists),
        _ => write_bytes(path, bytes).await,
    }
}

/// Create-or-append and verify the written length.
async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), ProcessError> {
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    let written = file.write(bytes).await?;
    if written != bytes.len() {
        return Err(ProcessError::BadWriteData);
    }
    file.flush().await?;
    Ok(())
}
