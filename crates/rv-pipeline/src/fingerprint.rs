use sha2::{Digest, Sha256};

/// Deterministic identity for a chunk analysis request: a given chunk text
/// under a given model always produces the same fingerprint, which is what
/// lets Detect skip already-answered chunks on resume.
pub fn prompt_fingerprint(stage: &str, chunk_text: &str, model_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stage.as_bytes());
    hasher.update(chunk_text.as_bytes());
    hasher.update(model_key.as_bytes());
    format!("{:x}", hasher.finalize())
}
