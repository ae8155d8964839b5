use std::path::Path;

use pixcache_engine::DecodedImage;

use crate::error::AppError;

/// Creates all directories in the given path, including parent directories if they don't exist.
#[inline]
pub async fn create_dirs(path: &Path) -> Result<(), AppError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(AppError::Io)?;
    Ok(())
}

/// Extracts a filename from a URL, removing the file extension and truncating if too long.
fn extract_filename_from_url(url_str: &str) -> Result<String, AppError> {
    let url = url_str
        .parse::<reqwest::Url>()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let file_name = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");

    let url_name = match file_name.rfind('.') {
        Some(pos) if pos > 0 => &file_name[..pos],
        _ => file_name,
    };

    // we dont want large filenames
    let filename: String = url_name.chars().take(30).collect();
    Ok(filename)
}

/// Name for a downloaded image: the URL's file stem plus the extension of
/// the decoded format, falling back to the cache key when the URL has no
/// usable name.
pub fn output_file_name(url_str: &str, key: &str, image: &DecodedImage) -> String {
    let stem = extract_filename_from_url(url_str).unwrap_or_else(|_| key.to_string());
    let extension = image
        .format
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("img");
    format!("{stem}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_filename_from_url() {
        assert_eq!(
            extract_filename_from_url("https://example.com/a/cat.photo.png?x=1").unwrap(),
            "cat.photo"
        );
        assert_eq!(
            extract_filename_from_url("https://example.com/").unwrap(),
            "image"
        );
        assert_eq!(
            extract_filename_from_url(&format!("https://example.com/{}.jpg", "a".repeat(50)))
                .unwrap()
                .len(),
            30
        );
        assert!(extract_filename_from_url("not a url").is_err());
    }
}
