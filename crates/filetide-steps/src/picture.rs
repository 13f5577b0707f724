use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use image::ColorType;
use image::imageops::FilterType;

use filetide_core::{
    Error, Metadata, PipelineData, PipelineStep, Result, StepArgs, StepContext, StepOutputs,
    resolve_input,
};

/// Bounds an image to a client-supplied box.
///
/// Images within the bounds pass through byte-identical; larger ones are
/// resized preserving aspect ratio and re-encoded in their original format.
pub struct PreviewPicture;

#[async_trait]
impl PipelineStep for PreviewPicture {
    fn name(&self) -> &'static str {
        "preview_picture"
    }

    async fn process(
        &self,
        inputs: Option<StepOutputs>,
        args: StepArgs,
        ctx: &StepContext,
    ) -> Result<StepOutputs> {
        let max_width = args.require_positive_u32("max_width")?;
        let max_height = args.require_positive_u32("max_height")?;

        let mut data = resolve_input(self.name(), inputs, &args, ctx).await?;
        let file_name = match args.get_str("file_name")? {
            Some(name) => Some(name.to_string()),
            None => data.metadata().file_name.clone(),
        };

        let body = read_bounded(&mut data, ctx.limits().max_buffer_bytes).await?;

        // Decode and resample off the async core.
        let rendered = tokio::task::spawn_blocking(move || {
            render_preview(body, max_width, max_height)
        })
        .await
        .map_err(|error| {
            if error.is_cancelled() {
                Error::Cancelled
            } else {
                Error::format("image", format!("preview task failed: {error}"))
            }
        })??;

        let mut metadata = Metadata {
            file_name,
            media_type: Some(rendered.media_type),
            mode: Some(rendered.mode),
            width: Some(rendered.width),
            height: Some(rendered.height),
            ..Metadata::default()
        };
        if metadata.file_name.is_none() {
            metadata.file_name = Some("preview".to_string());
        }

        Ok(StepOutputs::single(PipelineData::from_bytes(
            metadata,
            rendered.body,
        )))
    }
}

struct RenderedPreview {
    body: Bytes,
    media_type: String,
    mode: String,
    width: u32,
    height: u32,
}

fn render_preview(body: Bytes, max_width: u32, max_height: u32) -> Result<RenderedPreview> {
    let format = image::guess_format(&body)
        .map_err(|error| Error::format("image", error.to_string()))?;
    let decoded = image::load_from_memory_with_format(&body, format)
        .map_err(|error| Error::format("image", error.to_string()))?;

    let mode = color_mode(decoded.color()).to_string();
    let media_type = format.to_mime_type().to_string();

    if decoded.width() <= max_width && decoded.height() <= max_height {
        // Within bounds: the original bytes pass through untouched.
        return Ok(RenderedPreview {
            width: decoded.width(),
            height: decoded.height(),
            body,
            media_type,
            mode,
        });
    }

    let resized = decoded.resize(max_width, max_height, FilterType::Lanczos3);
    let mut encoded = std::io::Cursor::new(Vec::new());
    resized
        .write_to(&mut encoded, format)
        .map_err(|error| Error::format("image", error.to_string()))?;

    Ok(RenderedPreview {
        width: resized.width(),
        height: resized.height(),
        body: Bytes::from(encoded.into_inner()),
        media_type,
        mode,
    })
}

/// PIL-style color mode name reported in metadata.
fn color_mode(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 | ColorType::L16 => "L",
        ColorType::La8 | ColorType::La16 => "LA",
        ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => "RGB",
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => "RGBA",
        _ => "RGB",
    }
}

async fn read_bounded(data: &mut PipelineData, max_bytes: u64) -> Result<Bytes> {
    let mut out = BytesMut::new();
    while let Some(chunk) = data.next_chunk().await? {
        if (out.len() + chunk.len()) as u64 > max_bytes {
            return Err(Error::resource_limit(format!(
                "image input exceeds the {max_bytes} byte cap"
            )));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out.freeze())
}
