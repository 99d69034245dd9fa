//! Standard-output sink.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use rill_core::error::ProcessorError;
use rill_core::payload::Payload;
use rill_core::processor::{Processor, ProcessorBase};

use crate::{opt_bool, ProcessError};

/// Writes payload bytes to standard output.
///
/// Properties: `forward` (default false) republishes the payload after
/// printing, so further sinks can chain behind it.
pub struct Stdout {
    base: ProcessorBase,
}

impl Stdout {
    pub const KIND: &'static str = "stdout";

    pub fn new() -> Self {
        let mut base = ProcessorBase::new(Self::KIND);
        base.properties_mut().add(
            "forward",
            "republish the payload after printing it",
            false,
        );
        Self { base }
    }

    pub fn boxed() -> Box<dyn Processor> {
        Box::new(Self::new())
    }
}

impl Default for Stdout {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for Stdout {
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
        let forward = opt_bool(self.base.properties(), "forward", false)?;

        let mut ctx = self.base.begin_start(&cancel, true)?;
        let worker = tokio::spawn(async move {
            let mut out = tokio::io::stdout();
            while let Some(payload) = ctx.next().await {
                let bytes = payload.bytes();
                let printed = async {
                    out.write_all(&bytes).await?;
                    out.write_all(b"\n").await?;
                    out.flush().await
                }
                .await;
                match printed {
                    Ok(()) => {
                        if forward && !ctx.emit(payload).await {
                            return;
                        }
                    }
                    Err(err) => ctx.fail(ProcessError::Io(err), Some(payload)),
                }
            }
        });
        self.base.finish_start(worker);
        Ok(())
    }
}
