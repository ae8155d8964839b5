//! Decode-and-validate step shared by the network path and the disk tier.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::ImageError;

/// A successfully decoded bitmap.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
    pub width: u32,
    pub height: u32,
}

/// Decode `data`, guessing the format from its content.
pub fn decode_image(data: &[u8]) -> Result<DecodedImage, ImageError> {
    if data.is_empty() {
        return Err(ImageError::Decode("empty image data".to_string()));
    }

    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode(e.to_string()))?;
    let format = reader.format();
    if format.is_none() {
        return Err(ImageError::Decode("unrecognized image format".to_string()));
    }

    let image = reader.decode()?;
    Ok(DecodedImage {
        width: image.width(),
        height: image.height(),
        format,
        image,
    })
}

/// Decode on the blocking pool so large images never stall the runtime.
pub async fn decode_image_async(data: Bytes) -> Result<DecodedImage, ImageError> {
    tokio::task::spawn_blocking(move || decode_image(&data))
        .await
        .map_err(|e| ImageError::Decode(format!("decode task failed: {e}")))?
}
