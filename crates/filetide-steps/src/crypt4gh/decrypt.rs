use async_trait::async_trait;
use bytes::Bytes;

use filetide_core::{
    ChunkSender, Metadata, PipelineData, PipelineStep, Result, StepArgs, StepContext, StepOutputs,
    resolve_input,
};

use super::header::{CIPHER_SEGMENT_SIZE, decrypt_segment, find_data_key, read_header};
use super::keys::{SecretKey, parse_secret_key};

/// Streams the decrypted payload of a Crypt4GH file.
pub struct DecryptCrypt4gh;

#[async_trait]
impl PipelineStep for DecryptCrypt4gh {
    fn name(&self) -> &'static str {
        "decrypt_crypt4gh"
    }

    fn accepts_chained_source_url(&self) -> bool {
        true
    }

    async fn process(
        &self,
        inputs: Option<StepOutputs>,
        args: StepArgs,
        ctx: &StepContext,
    ) -> Result<StepOutputs> {
        let key = parse_secret_key(args.require_str("recipient_sec")?)?;
        let mut data = resolve_input(self.name(), inputs, &args, ctx).await?;

        let input_name = data
            .metadata()
            .file_name
            .clone()
            .unwrap_or_else(|| "output.c4gh".to_string());
        let output_name = output_file_name(&input_name);

        let (tx, output) = PipelineData::queue(Metadata::for_file(
            output_name,
            "application/octet-stream",
        ));
        ctx.spawn(async move {
            match decrypt_stream(&mut data, &key, Some(&tx)).await {
                Ok(()) => tx.finish().await,
                Err(error) => tx.fail(error).await,
            }
        });

        Ok(StepOutputs::single(output))
    }
}

/// Walk the whole container, decrypting every segment.
///
/// With `tx` absent the plaintext is discarded, which is exactly the
/// validation path.
pub(crate) async fn decrypt_stream(
    data: &mut PipelineData,
    key: &SecretKey,
    tx: Option<&ChunkSender>,
) -> Result<()> {
    let header = read_header(data).await?;
    let data_key = find_data_key(&header, key)?;

    loop {
        let segment = data.read_full(CIPHER_SEGMENT_SIZE).await?;
        if segment.is_empty() {
            break;
        }
        let plaintext = decrypt_segment(&data_key, &segment)?;
        if let Some(tx) = tx {
            tx.send(Bytes::from(plaintext)).await?;
        }
    }
    Ok(())
}

fn output_file_name(input_name: &str) -> String {
    match input_name.strip_suffix(".c4gh") {
        Some(stem) => stem.to_string(),
        None => format!("{input_name}.decrypted"),
    }
}
