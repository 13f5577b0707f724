use async_trait::async_trait;
use serde_json::{Value, json};

use filetide_core::{
    Metadata, PipelineData, PipelineStep, Result, StepArgs, StepContext, StepOutputs, resolve_input,
};

use super::archive::read_archive;
use super::guess_media_type;

/// Lists the central directory of a ZIP archive as a JSON document.
pub struct PreviewZip;

#[async_trait]
impl PipelineStep for PreviewZip {
    fn name(&self) -> &'static str {
        "preview_zip"
    }

    async fn process(
        &self,
        inputs: Option<StepOutputs>,
        args: StepArgs,
        ctx: &StepContext,
    ) -> Result<StepOutputs> {
        let data = resolve_input(self.name(), inputs, &args, ctx).await?;
        let mut data = data.into_seekable(ctx.limits().max_buffer_bytes).await?;
        let archive = read_archive(&mut data).await?;

        let mut listing = serde_json::Map::new();
        for entry in &archive.entries {
            let media_type = if entry.is_dir() {
                String::new()
            } else {
                guess_media_type(&entry.name).unwrap_or_default()
            };
            listing.insert(
                entry.name.clone(),
                json!({
                    "is_dir": entry.is_dir(),
                    "file_size": entry.uncompressed_size,
                    "modified_time": entry.modified.format(),
                    "compressed_size": entry.compressed_size,
                    "compress_type": entry.method,
                    "media_type": media_type,
                }),
            );
        }

        let body = serde_json::to_vec(&Value::Object(listing))?;
        Ok(StepOutputs::single(PipelineData::from_bytes(
            Metadata::json(),
            body,
        )))
    }
}
