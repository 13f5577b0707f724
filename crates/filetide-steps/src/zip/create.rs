use std::collections::HashSet;

use async_trait::async_trait;

use filetide_core::{
    ChunkSender, Error, Metadata, PipelineData, PipelineStep, Result, StepArgs, StepContext,
    StepOutputs,
};

use super::archive::ZipDateTime;
use super::writer::ZipStreamWriter;

/// Packs every input carrier into one streamed ZIP archive, in input order.
pub struct CreateZip;

#[async_trait]
impl PipelineStep for CreateZip {
    fn name(&self) -> &'static str {
        "create_zip"
    }

    async fn process(
        &self,
        inputs: Option<StepOutputs>,
        _args: StepArgs,
        ctx: &StepContext,
    ) -> Result<StepOutputs> {
        let Some(mut inputs) = inputs else {
            return Err(Error::invalid_arguments(
                "create_zip needs piped inputs and cannot start a pipeline",
            ));
        };

        let metadata = Metadata::for_file("created.zip", "application/zip").with_header(
            "Content-Disposition",
            "attachment; filename=\"created.zip\"",
        );
        let (tx, output) = PipelineData::queue(metadata);

        ctx.spawn(async move {
            match write_archive(&mut inputs, &tx).await {
                Ok(()) => tx.finish().await,
                Err(error) => tx.fail(error).await,
            }
        });

        Ok(StepOutputs::single(output))
    }
}

async fn write_archive(inputs: &mut StepOutputs, tx: &ChunkSender) -> Result<()> {
    let mut writer = ZipStreamWriter::new(tx);
    let mut used_names: HashSet<String> = HashSet::new();
    let modified = ZipDateTime::now();
    let mut index = 0usize;

    while let Some(mut input) = inputs.next().await {
        let base = input
            .metadata()
            .file_name
            .clone()
            .unwrap_or_else(|| format!("file_{index}"));
        let name = deduplicate(&mut used_names, base);

        writer.begin_entry(name, modified).await?;
        while let Some(chunk) = input.next_chunk().await? {
            writer.write(chunk).await?;
        }
        writer.finish_entry().await?;
        index += 1;
    }

    writer.finish().await
}

/// Keep archive member names unique by suffixing `-1`, `-2`, ...
fn deduplicate(used: &mut HashSet<String>, base: String) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut attempt = 1usize;
    loop {
        let candidate = format!("{base}-{attempt}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::deduplicate;

    #[test]
    fn colliding_names_get_numeric_suffixes() {
        let mut used = HashSet::new();
        assert_eq!(deduplicate(&mut used, "x".to_string()), "x");
        assert_eq!(deduplicate(&mut used, "x".to_string()), "x-1");
        assert_eq!(deduplicate(&mut used, "x".to_string()), "x-2");
        assert_eq!(deduplicate(&mut used, "y".to_string()), "y");
    }
}
