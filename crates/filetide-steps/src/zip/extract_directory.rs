use async_trait::async_trait;

use filetide_core::{
    Metadata, PipelineData, PipelineStep, Result, StepArgs, StepContext, StepOutputs, resolve_input,
};

use super::archive::{ZipEntry, read_archive, stream_member};
use super::guess_media_type;

/// Fan-out extraction of every file under one archive directory.
///
/// Emits one queue carrier per matching member, in central-directory order;
/// an empty match set yields an empty output sequence.
pub struct ExtractDirectoryZip;

#[async_trait]
impl PipelineStep for ExtractDirectoryZip {
    fn name(&self) -> &'static str {
        "extract_directory_zip"
    }

    fn produces_multiple_outputs(&self) -> bool {
        true
    }

    async fn process(
        &self,
        inputs: Option<StepOutputs>,
        args: StepArgs,
        ctx: &StepContext,
    ) -> Result<StepOutputs> {
        let directory = args
            .require_str("directory_name")?
            .trim_end_matches('/')
            .to_string();
        let prefix = format!("{directory}/");

        let data = resolve_input(self.name(), inputs, &args, ctx).await?;
        let mut data = data.into_seekable(ctx.limits().max_buffer_bytes).await?;
        let archive = read_archive(&mut data).await?;

        let matches: Vec<ZipEntry> = archive
            .entries
            .iter()
            .filter(|entry| entry.name.starts_with(&prefix) && !entry.is_dir())
            .cloned()
            .collect();
        tracing::debug!(
            directory = directory.as_str(),
            members = matches.len(),
            "extracting archive directory"
        );

        let (outputs_tx, outputs) = StepOutputs::channel();
        let prefix_len = prefix.len();
        ctx.spawn(async move {
            // Members share the one seekable input, so they stream strictly
            // in order; the consumer still overlaps with each member's read.
            for entry in matches {
                let relative = entry.name[prefix_len..].to_string();
                let media_type = guess_media_type(&relative)
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let (tx, carrier) = PipelineData::queue(Metadata::for_file(relative, media_type));
                if outputs_tx.send(carrier).await.is_err() {
                    return;
                }
                match stream_member(&mut data, &entry, &tx).await {
                    Ok(()) => tx.finish().await,
                    Err(error) => {
                        tx.fail(error).await;
                        return;
                    },
                }
            }
        });

        Ok(outputs)
    }
}
