//! First-run download of the facial landmark model.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// What [`ensure_model`] found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    /// The model file was already on disk.
    Present(PathBuf),
    /// The model was fetched.
    Downloaded {
        /// Where it was written.
        path: PathBuf,
        /// Size in bytes.
        bytes: u64,
    },
}

fn download_error(url: &str, message: impl Into<String>) -> Error {
    Error::ModelDownload {
        url: url.to_string(),
        message: message.into(),
    }
}

/// The temporary path a download is written to before being moved into place.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Make sure the landmark model exists, downloading it if allowed.
///
/// # Errors
///
/// Returns an error if the model is missing and downloading is disabled or
/// fails.
pub async fn ensure_model(config: &ModelConfig) -> Result<ModelStatus> {
    if config.path.exists() {
        return Ok(ModelStatus::Present(config.path.clone()));
    }
    if !config.auto_download {
        return Err(download_error(
            &config.url,
            format!(
                "{} is missing and model.auto_download is off",
                config.path.display()
            ),
        ));
    }

    info!(url = %config.url, path = %config.path.display(), "Downloading landmark model");
    let bytes = download(&config.url, &config.path).await?;
    info!(path = %config.path.display(), bytes, "Landmark model downloaded");

    Ok(ModelStatus::Downloaded {
        path: config.path.clone(),
        bytes,
    })
}

/// Download `url` to `dest`, replacing any existing file.
///
/// The body is streamed to a `.part` file next to `dest` and renamed once
/// complete, so an interrupted download never leaves a truncated model.
///
/// # Errors
///
/// Returns an error on a non-success status or any I/O failure.
pub async fn download(url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| Error::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let partial = partial_path(dest);
    let result = fetch_to(url, &partial).await;
    match result {
        Ok(bytes) => {
            tokio::fs::rename(&partial, dest).await?;
            Ok(bytes)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), error = %cleanup, "Could not remove partial download");
                }
            }
            Err(e)
        }
    }
}

async fn fetch_to(url: &str, path: &Path) -> Result<u64> {
    let mut response = reqwest::get(url)
        .await
        .map_err(|e| download_error(url, e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(download_error(url, format!("server returned {status}")));
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| download_error(url, e.to_string()))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if written == 0 {
        return Err(download_error(url, "empty response body"));
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(path: PathBuf, url: String) -> ModelConfig {
        ModelConfig {
            path,
            url,
            auto_download: true,
        }
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/models/lbfmodel.yaml")),
            PathBuf::from("/models/lbfmodel.yaml.part")
        );
    }

    #[tokio::test]
    async fn test_existing_model_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbfmodel.yaml");
        std::fs::write(&path, "model").unwrap();

        let status = ensure_model(&config(path.clone(), "http://127.0.0.1:9/x".into()))
            .await
            .unwrap();
        assert_eq!(status, ModelStatus::Present(path));
    }

    #[tokio::test]
    async fn test_missing_model_without_auto_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().join("m.yaml"), "http://127.0.0.1:9/x".into());
        cfg.auto_download = false;

        let err = ensure_model(&cfg).await.unwrap_err();
        assert!(err.to_string().contains("auto_download"));
    }

    #[tokio::test]
    async fn test_downloads_missing_model() {
        let base = serve(Router::new().route("/model.yaml", get(|| async { "%YAML:1.0\nlbf: 1\n" }))).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lbfmodel.yaml");

        let status = ensure_model(&config(path.clone(), format!("{base}/model.yaml")))
            .await
            .unwrap();

        assert_eq!(
            status,
            ModelStatus::Downloaded {
                path: path.clone(),
                bytes: 17
            }
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "%YAML:1.0\nlbf: 1\n");
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn test_http_error_leaves_nothing_behind() {
        let base = serve(Router::new().route(
            "/model.yaml",
            get(|| async { (StatusCode::NOT_FOUND, "gone") }),
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbfmodel.yaml");

        let err = ensure_model(&config(path.clone(), format!("{base}/model.yaml")))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("404"));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }
}
