use async_trait::async_trait;

use filetide_core::{
    Error, Metadata, PipelineData, PipelineStep, Result, StepArgs, StepContext, StepOutputs,
    resolve_input,
};

use super::archive::{read_archive, stream_member};
use super::guess_media_type;

/// Streams one decompressed member out of a ZIP archive.
pub struct ExtractFileZip;

#[async_trait]
impl PipelineStep for ExtractFileZip {
    fn name(&self) -> &'static str {
        "extract_file_zip"
    }

    async fn process(
        &self,
        inputs: Option<StepOutputs>,
        args: StepArgs,
        ctx: &StepContext,
    ) -> Result<StepOutputs> {
        let file_name = args.require_str("file_name")?.to_string();
        let data = resolve_input(self.name(), inputs, &args, ctx).await?;
        let mut data = data.into_seekable(ctx.limits().max_buffer_bytes).await?;
        let archive = read_archive(&mut data).await?;

        let Some(entry) = archive.find(&file_name).cloned() else {
            return Err(Error::not_found("zip member", file_name));
        };

        let base_name = file_name
            .rsplit('/')
            .next()
            .unwrap_or(file_name.as_str())
            .to_string();
        let media_type = guess_media_type(&base_name)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let (tx, output) = PipelineData::queue(Metadata::for_file(base_name, media_type));

        ctx.spawn(async move {
            match stream_member(&mut data, &entry, &tx).await {
                Ok(()) => tx.finish().await,
                Err(error) => tx.fail(error).await,
            }
        });

        Ok(StepOutputs::single(output))
    }
}
