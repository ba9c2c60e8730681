use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("file exceeds max_file_size_bytes ({size} > {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("malformed input: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AIClientError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("render failed: {0}")]
    Render(String),
}

/// Outcome of running the full pipeline for one task.
///
/// Only `Transient` failures are eligible for the Queue's retry/backoff
/// schedule; `Fatal` failures terminate the task immediately.
#[derive(Debug)]
pub enum PipelineOutcome {
    Success,
    Transient(String),
    Fatal(String),
}

impl From<ParseError> for PipelineOutcome {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::TooLarge { .. } | ParseError::UnsupportedFormat(_) => PipelineOutcome::Fatal(e.to_string()),
            ParseError::Malformed(_) => PipelineOutcome::Fatal(e.to_string()),
        }
    }
}

impl From<AIClientError> for PipelineOutcome {
    fn from(e: AIClientError) -> Self {
        match e {
            AIClientError::Transient(msg) => PipelineOutcome::Transient(msg),
            AIClientError::Fatal(msg) => PipelineOutcome::Fatal(msg),
        }
    }
}
