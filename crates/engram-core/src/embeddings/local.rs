//! Local embeddings via fastembed
//!
//! Uses nomic-embed-text-v1.5 (768d, 8192 token context, Matryoshka
//! support) and truncates to the configured dimension. The model is a
//! process-wide singleton; first use downloads it into the platform cache
//! directory.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, OnceLock};

use super::{truncate_normalize, EmbeddingError, EmbeddingProvider, Result};

/// Model identifier reported in stats
pub const LOCAL_MODEL_NAME: &str = "nomic-ai/nomic-embed-text-v1.5";

/// Maximum text length fed to the model (characters; longer input is cut)
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for batch embedding
const BATCH_SIZE: usize = 32;

static MODEL: OnceLock<std::result::Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "engram", "engram") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>> {
    let result = MODEL.get_or_init(|| {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!("failed to create embedding cache dir {:?}: {}", cache, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(true)
            .with_cache_dir(cache);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "failed to initialize {}: {}. Ensure the ONNX runtime is available \
                 and the model files can be downloaded.",
                LOCAL_MODEL_NAME, e
            )
        })
    });

    match result {
        Ok(m) => m
            .lock()
            .map_err(|e| EmbeddingError::Unavailable(format!("model lock poisoned: {}", e))),
        Err(e) => Err(EmbeddingError::Unavailable(e.clone())),
    }
}

/// Local embedding provider
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Force model initialization (downloads on first run). Call at server
    /// startup so the first ingest does not pay the download.
    pub fn warm_up(&self) -> Result<()> {
        model().map(|_| ())
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".to_string()));
        }

        let mut model = model()?;
        let text = clip(text);

        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;

        match embeddings.pop() {
            Some(vector) => Ok(truncate_normalize(vector, self.dimensions)),
            None => Err(EmbeddingError::Failed("no embedding generated".to_string())),
        }
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = model()?;
        let mut all = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let clipped: Vec<&str> = chunk.iter().map(|t| clip(t)).collect();
            let embeddings = model
                .embed(clipped, None)
                .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
            for vector in embeddings {
                all.push(truncate_normalize(vector, self.dimensions));
            }
        }

        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        LOCAL_MODEL_NAME
    }
}

fn clip(text: &str) -> &str {
    if text.len() > MAX_TEXT_LENGTH {
        // Cut on a char boundary at or below the cap
        let mut end = MAX_TEXT_LENGTH;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_respects_char_boundaries() {
        let ascii = "a".repeat(MAX_TEXT_LENGTH + 100);
        assert_eq!(clip(&ascii).len(), MAX_TEXT_LENGTH);

        let multibyte = "é".repeat(MAX_TEXT_LENGTH);
        let clipped = clip(&multibyte);
        assert!(clipped.len() <= MAX_TEXT_LENGTH);
        assert!(std::str::from_utf8(clipped.as_bytes()).is_ok());
    }

    #[test]
    fn empty_input_rejected() {
        let embedder = LocalEmbedder::new(256);
        assert!(matches!(
            embedder.embed("   "),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
