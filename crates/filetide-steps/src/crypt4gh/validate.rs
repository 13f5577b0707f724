use async_trait::async_trait;
use serde_json::json;

use filetide_core::{
    Metadata, PipelineData, PipelineStep, Result, StepArgs, StepContext, StepOutputs, resolve_input,
};

use super::decrypt::decrypt_stream;
use super::keys::parse_secret_key;

/// Reports whether a Crypt4GH file decrypts end to end.
///
/// The whole stream runs through the decryption machinery with the plaintext
/// discarded. Format, authentication and network failures become a
/// `{"valid": false}` verdict rather than a pipeline failure; only argument
/// errors still propagate.
pub struct ValidateCrypt4gh;

#[async_trait]
impl PipelineStep for ValidateCrypt4gh {
    fn name(&self) -> &'static str {
        "validate_crypt4gh"
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

        let verdict = match decrypt_stream(&mut data, &key, None).await {
            Ok(()) => json!({ "valid": true, "error": null }),
            Err(error) if error.is_validation_recoverable() => {
                tracing::debug!(error = %error, "crypt4gh validation failed");
                json!({ "valid": false, "error": error.to_string() })
            },
            Err(error) => return Err(error),
        };

        let body = serde_json::to_vec(&verdict)?;
        let metadata = Metadata::json().with_file_name("validation_result.json");
        Ok(StepOutputs::single(PipelineData::from_bytes(metadata, body)))
    }
}
