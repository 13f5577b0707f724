use async_trait::async_trait;
use bytes::Bytes;

use filetide_core::{
    ChunkSender, Metadata, PipelineData, PipelineStep, Result, StepArgs, StepContext, StepOutputs,
    resolve_input,
};

use super::header::{find_data_key, read_header, seal_data_key_packet, serialize_header};
use super::keys::{PublicKey, SecretKey, parse_public_key, parse_secret_key};

/// Re-addresses a Crypt4GH file to an additional recipient.
///
/// Only the header is rewritten: one existing packet is opened to recover
/// the data key, a new packet sealed to the new recipient is appended, and
/// the payload is copied verbatim without decryption.
pub struct AddRecipientCrypt4gh;

#[async_trait]
impl PipelineStep for AddRecipientCrypt4gh {
    fn name(&self) -> &'static str {
        "add_recipient_crypt4gh"
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
        let recipient = parse_public_key(args.require_str("recipient_pub")?)?;
        let reader_key = parse_secret_key(args.require_str("recipient_sec")?)?;
        let mut data = resolve_input(self.name(), inputs, &args, ctx).await?;

        let file_name = data
            .metadata()
            .file_name
            .clone()
            .unwrap_or_else(|| "output.c4gh".to_string());
        let (tx, output) = PipelineData::queue(Metadata::for_file(
            file_name,
            "application/octet-stream",
        ));

        ctx.spawn(async move {
            match readdress_stream(&mut data, &reader_key, &recipient, &tx).await {
                Ok(()) => tx.finish().await,
                Err(error) => tx.fail(error).await,
            }
        });

        Ok(StepOutputs::single(output))
    }
}

async fn readdress_stream(
    data: &mut PipelineData,
    reader_key: &SecretKey,
    recipient: &PublicKey,
    tx: &ChunkSender,
) -> Result<()> {
    let header = read_header(data).await?;
    let data_key = find_data_key(&header, reader_key)?;

    let new_packet = seal_data_key_packet(&data_key, recipient)?;
    let mut packets = header.packets;
    packets.push(new_packet);
    tx.send(Bytes::from(serialize_header(&packets))).await?;

    while let Some(chunk) = data.next_chunk().await? {
        tx.send(chunk).await?;
    }
    Ok(())
}
