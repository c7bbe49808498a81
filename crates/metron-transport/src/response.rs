use crate::compress::{decompress, is_gzip_encoding};
use crate::error::{Result, TransportError};
use reqwest::header::CONTENT_ENCODING;

/// Reads the full response body, undoing gzip when the response says so.
pub async fn read_body(response: reqwest::Response) -> Result<Vec<u8>> {
    let gzip = response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_gzip_encoding);

    let raw = response.bytes().await?;
    if gzip {
        return decompress(&raw).map_err(TransportError::Compress);
    }
    Ok(raw.to_vec())
}
