//! Uploads a finished run to S3.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::{debug, info};

/// Object key for `file`, relative to `dir`, under `prefix`. Gzipped uploads
/// get a `.gz` suffix.
pub fn object_key(prefix: &str, dir: &Path, file: &Path, gzip: bool) -> Result<String> {
    let relative = file
        .strip_prefix(dir)
        .with_context(|| format!("{} is not under {}", file.display(), dir.display()))?;
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let prefix = prefix.trim_end_matches('/');
    let mut key = if prefix.is_empty() {
        relative
    } else {
        format!("{prefix}/{relative}")
    };
    if gzip {
        key.push_str(".gz");
    }
    Ok(key)
}

/// Gzip-compresses `contents` with the default level.
pub fn gzip_bytes(contents: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(contents)?;
    Ok(encoder.finish()?)
}

/// Regular files under `dir`, recursively, in a stable order.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)
            .with_context(|| format!("Failed to list {}", current.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Uploads every file of `dir` to `bucket` under `prefix`, optionally
/// gzip-compressing each one. Returns the number of objects written.
#[tracing::instrument(skip(client, dir), fields(dir = %dir.display()))]
pub async fn upload_dir(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    prefix: &str,
    dir: &Path,
    gzip: bool,
) -> Result<usize> {
    let mut upload_count = 0;

    for path in list_files(dir)? {
        let file_contents = std::fs::read(&path)?;
        let body = if gzip {
            gzip_bytes(&file_contents)?
        } else {
            file_contents
        };
        let key = object_key(prefix, dir, &path, gzip)?;

        client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{bucket}/{key}"))?;

        debug!(key = %key, "Object uploaded");
        upload_count += 1;
    }

    info!(upload_count, "S3 upload complete");
    Ok(upload_count)
}

/// Serializes a value to JSON and uploads it to an S3 bucket with `application/json` content type.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json")
        .send()
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_object_key_layout() {
        let dir = Path::new("/out/ethiopia2023_x");
        let file = dir.join("locations.csv");

        assert_eq!(
            object_key("input/ethiopia2023_x", dir, &file, false).unwrap(),
            "input/ethiopia2023_x/locations.csv"
        );
        assert_eq!(object_key("", dir, &file, true).unwrap(), "locations.csv.gz");
        assert!(object_key("p", Path::new("/elsewhere"), &file, false).is_err());
    }

    #[test]
    fn test_gzip_roundtrip() {
        let compressed = gzip_bytes(b"day,A\n0,1\n").unwrap();
        let mut out = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut out).unwrap();
        assert_eq!(out, "day,A\n0,1\n");
    }

    #[test]
    fn test_list_files_recursive_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.csv"), "").unwrap();
        std::fs::write(dir.path().join("a.csv"), "").unwrap();
        std::fs::write(dir.path().join("sub/c.csv"), "").unwrap();

        let files = list_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "sub/c.csv"]);
    }
}
