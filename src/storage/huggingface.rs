//! HuggingFace checkpoint resolution
//!
//! Turns a `--repo-id-or-model-path` value into a local GGUF file: existing
//! paths are used as-is, anything else is treated as a HuggingFace repo id
//! (or URL) whose 4-bit GGUF artifact gets downloaded into the cache.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::storage::models_dir;

/// Large checkpoints over slow links; an hour is generous but finite.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

/// 4-bit quantization labels in order of preference. K-quants first, they
/// degrade less at the same size.
const Q4_PREFERENCE: [&str; 5] = ["q4_k_m", "q4_k_s", "q4_0", "q4_1", "iq4"];

/// A parsed checkpoint location on the Hub
#[derive(Debug, Clone)]
pub struct HuggingFaceUrl {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

impl HuggingFaceUrl {
    /// Parse the accepted checkpoint spellings:
    /// full `huggingface.co` URLs (`blob` or `resolve` links), the short
    /// `user/repo/file.gguf` form, and a bare `user/repo` id.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();
        let spec = spec.split(['?', '#']).next().unwrap_or(spec);

        if let Some(path) = spec
            .strip_prefix("https://huggingface.co/")
            .or_else(|| spec.strip_prefix("http://huggingface.co/"))
        {
            let parts: Vec<&str> = path.split('/').collect();
            if parts.len() < 2 {
                return Err(format!("Invalid HuggingFace URL: {}", spec));
            }
            let repo_id = format!("{}/{}", parts[0], parts[1]);

            // blob/resolve links carry a revision and a file path
            if let Some(pos) = parts.iter().position(|&p| p == "blob" || p == "resolve") {
                if parts.len() > pos + 2 {
                    return Ok(Self {
                        repo_id,
                        revision: parts[pos + 1].to_string(),
                        filename: parts[pos + 2..].join("/"),
                    });
                }
            }
            return Ok(Self {
                repo_id,
                filename: String::new(),
                revision: "main".to_string(),
            });
        }

        let parts: Vec<&str> = spec.split('/').collect();
        if parts.len() >= 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            return Ok(Self {
                repo_id: format!("{}/{}", parts[0], parts[1]),
                filename: parts.get(2..).map(|p| p.join("/")).unwrap_or_default(),
                revision: "main".to_string(),
            });
        }

        Err(format!("Could not parse checkpoint location: {}", spec))
    }

    /// Direct download URL for the file.
    pub fn download_url(&self) -> String {
        format!(
            "https://huggingface.co/{}/resolve/{}/{}",
            self.repo_id, self.revision, self.filename
        )
    }
}

/// Resolve a repo id, URL, or local path into a local GGUF file.
///
/// Local paths short-circuit; repo ids without an explicit filename get a
/// 4-bit artifact selected from the repo tree.
pub async fn resolve_model(spec: &str) -> Result<PathBuf, String> {
    let as_path = PathBuf::from(spec);
    if as_path.is_file() {
        return Ok(as_path);
    }

    let mut hf = HuggingFaceUrl::parse(spec)?;
    if hf.filename.is_empty() {
        let files = list_gguf_files(&hf.repo_id).await?;
        hf.filename = select_quantized_file(&files).ok_or_else(|| {
            format!(
                "No GGUF file found in {} (files: {})",
                hf.repo_id,
                if files.is_empty() {
                    "none".to_string()
                } else {
                    files.join(", ")
                }
            )
        })?;
        tracing::info!("Selected {} from {}", hf.filename, hf.repo_id);
    }

    download(&hf).await
}

/// Pick a GGUF artifact, preferring 4-bit quantizations.
fn select_quantized_file(files: &[String]) -> Option<String> {
    for label in Q4_PREFERENCE {
        if let Some(file) = files.iter().find(|f| f.to_lowercase().contains(label)) {
            return Some(file.clone());
        }
    }
    // no 4-bit variant published; fall back to whatever GGUF exists
    files.first().cloned()
}

/// List GGUF files in a repo via the Hub tree API.
async fn list_gguf_files(repo_id: &str) -> Result<Vec<String>, String> {
    let api_url = format!("https://huggingface.co/api/models/{}/tree/main", repo_id);

    let response = reqwest::Client::new()
        .get(&api_url)
        .header("User-Agent", concat!("glmgen/", env!("CARGO_PKG_VERSION")))
        .send()
        .await
        .map_err(|e| format!("Failed to fetch repo listing: {}", e))?;

    if !response.status().is_success() {
        return Err(format!(
            "Repo listing for {} failed: {}",
            repo_id,
            response.status()
        ));
    }

    let body = response
        .text()
        .await
        .map_err(|e| format!("Failed to read repo listing: {}", e))?;
    parse_tree_listing(&body)
}

/// Extract GGUF paths from a Hub tree API response body.
fn parse_tree_listing(body: &str) -> Result<Vec<String>, String> {
    let entries: Vec<TreeEntry> =
        serde_json::from_str(body).map_err(|e| format!("Failed to parse repo listing: {}", e))?;
    Ok(entries
        .into_iter()
        .map(|e| e.path)
        .filter(|p| p.ends_with(".gguf"))
        .collect())
}

#[derive(Debug, serde::Deserialize)]
struct TreeEntry {
    path: String,
}

/// Download into the cache, or reuse the cached copy.
async fn download(hf: &HuggingFaceUrl) -> Result<PathBuf, String> {
    let safe_name = sanitize_local_filename(&hf.filename)?;
    let models = models_dir()?;
    fs::create_dir_all(&models).map_err(|e| format!("Failed to create models dir: {}", e))?;

    let output_path = models.join(&safe_name);
    if let Ok(meta) = fs::metadata(&output_path) {
        if meta.len() > 0 {
            tracing::info!("Using cached model {}", output_path.display());
            return Ok(output_path);
        }
    }

    let url = hf.download_url();
    tracing::info!("Downloading {}", url);

    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let mut response = client
        .get(&url)
        .header("User-Agent", concat!("glmgen/", env!("CARGO_PKG_VERSION")))
        .send()
        .await
        .map_err(|e| format!("Download failed: {}", e))?;

    if !response.status().is_success() {
        return Err(format!("Download of {} failed: {}", url, response.status()));
    }

    let total = response
        .content_length()
        .ok_or("Server did not report a file size")?;
    tracing::info!("Model size: {}", format_size(total));

    // temp file plus rename so an interrupted download never looks cached
    let temp_path = models.join(format!("{}.tmp", safe_name));
    let mut temp_file = File::create(&temp_path)
        .await
        .map_err(|e| format!("Failed to create temp file: {}", e))?;

    let mut downloaded: u64 = 0;
    let report_step = (total / 10).max(1);
    let mut next_report = report_step;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| format!("Download error: {}", e))?
    {
        temp_file
            .write_all(&chunk)
            .await
            .map_err(|e| format!("Write error: {}", e))?;
        downloaded += chunk.len() as u64;
        if downloaded >= next_report {
            tracing::info!(
                "Downloaded {} / {}",
                format_size(downloaded),
                format_size(total)
            );
            next_report = downloaded + report_step;
        }
    }
    temp_file
        .flush()
        .await
        .map_err(|e| format!("Write error: {}", e))?;

    if downloaded != total {
        let _ = fs::remove_file(&temp_path);
        return Err(format!(
            "Download incomplete: got {} bytes, expected {}",
            downloaded, total
        ));
    }

    fs::rename(&temp_path, &output_path)
        .map_err(|e| format!("Failed to move downloaded file: {}", e))?;
    tracing::info!("Download complete: {}", output_path.display());

    Ok(output_path)
}

/// Flatten a repo-relative file path into a single cache filename.
fn sanitize_local_filename(filename: &str) -> Result<String, String> {
    let trimmed = filename.trim().trim_start_matches('/');
    let flattened = trimmed.replace('\\', "/").replace('/', "__");

    let mut sanitized: String = flattened
        .chars()
        .map(|ch| {
            if ch.is_control() || matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*') {
                '_'
            } else {
                ch
            }
        })
        .collect();

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err("Invalid model filename".to_string());
    }
    Ok(sanitized)
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes < KB {
        format!("{} B", bytes as u64)
    } else if bytes < KB * KB {
        format!("{:.2} KB", bytes / KB)
    } else if bytes < KB * KB * KB {
        format!("{:.2} MB", bytes / (KB * KB))
    } else {
        format!("{:.2} GB", bytes / (KB * KB * KB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let parsed = HuggingFaceUrl::parse(
            "https://huggingface.co/THUDM/glm-4-9b-chat-GGUF/blob/main/glm-4-9b-chat.Q4_K_M.gguf",
        )
        .unwrap();
        assert_eq!(parsed.repo_id, "THUDM/glm-4-9b-chat-GGUF");
        assert_eq!(parsed.filename, "glm-4-9b-chat.Q4_K_M.gguf");
        assert_eq!(parsed.revision, "main");
    }

    #[test]
    fn test_parse_resolve_url_with_query() {
        let parsed = HuggingFaceUrl::parse(
            "https://huggingface.co/THUDM/glm-4-9b-chat-GGUF/resolve/main/glm-4-9b-chat.Q4_0.gguf?download=true",
        )
        .unwrap();
        assert_eq!(parsed.filename, "glm-4-9b-chat.Q4_0.gguf");
    }

    #[test]
    fn test_parse_short_form() {
        let parsed =
            HuggingFaceUrl::parse("THUDM/glm-4-9b-chat-GGUF/glm-4-9b-chat.Q4_K_M.gguf").unwrap();
        assert_eq!(parsed.repo_id, "THUDM/glm-4-9b-chat-GGUF");
        assert_eq!(parsed.filename, "glm-4-9b-chat.Q4_K_M.gguf");
        assert_eq!(parsed.revision, "main");
    }

    #[test]
    fn test_parse_repo_only() {
        let parsed = HuggingFaceUrl::parse("THUDM/glm-4-9b-chat").unwrap();
        assert_eq!(parsed.repo_id, "THUDM/glm-4-9b-chat");
        assert!(parsed.filename.is_empty());
    }

    #[test]
    fn test_parse_rejects_bare_name() {
        assert!(HuggingFaceUrl::parse("not-a-repo").is_err());
    }

    #[test]
    fn test_download_url() {
        let hf = HuggingFaceUrl {
            repo_id: "THUDM/glm-4-9b-chat-GGUF".to_string(),
            filename: "glm-4-9b-chat.Q4_K_M.gguf".to_string(),
            revision: "main".to_string(),
        };
        assert_eq!(
            hf.download_url(),
            "https://huggingface.co/THUDM/glm-4-9b-chat-GGUF/resolve/main/glm-4-9b-chat.Q4_K_M.gguf"
        );
    }

    #[test]
    fn test_parse_tree_listing_keeps_gguf_only() {
        let body = r#"[
            {"type":"file","path":"config.json","size":1024},
            {"type":"file","path":"glm-4-9b-chat.Q4_K_M.gguf","size":5},
            {"type":"file","path":"README.md"}
        ]"#;
        assert_eq!(
            parse_tree_listing(body).unwrap(),
            vec!["glm-4-9b-chat.Q4_K_M.gguf".to_string()]
        );
    }

    #[test]
    fn test_parse_tree_listing_rejects_bad_json() {
        assert!(parse_tree_listing("<html>rate limited</html>").is_err());
    }

    #[test]
    fn test_select_prefers_q4_k_m() {
        let files = vec![
            "model.Q8_0.gguf".to_string(),
            "model.Q4_0.gguf".to_string(),
            "model.Q4_K_M.gguf".to_string(),
        ];
        assert_eq!(
            select_quantized_file(&files),
            Some("model.Q4_K_M.gguf".to_string())
        );
    }

    #[test]
    fn test_select_falls_back_to_any_gguf() {
        let files = vec!["model.Q8_0.gguf".to_string()];
        assert_eq!(
            select_quantized_file(&files),
            Some("model.Q8_0.gguf".to_string())
        );
    }

    #[test]
    fn test_select_empty() {
        assert_eq!(select_quantized_file(&[]), None);
    }

    #[test]
    fn test_sanitize_flattens_directories() {
        assert_eq!(
            sanitize_local_filename("subdir/model.Q4_K_M.gguf").unwrap(),
            "subdir__model.Q4_K_M.gguf"
        );
    }

    #[test]
    fn test_sanitize_strips_invalid_chars() {
        assert_eq!(
            sanitize_local_filename("we\"ird:name.gguf").unwrap(),
            "we_ird_name.gguf"
        );
    }

    #[test]
    fn test_sanitize_rejects_empty() {
        assert!(sanitize_local_filename("  ").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
