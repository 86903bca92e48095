pub type DvsResult<T> = Result<T, DvsError>;

#[derive(thiserror::Error, Debug)]
pub enum DvsError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DvsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// True for errors raised because another stage already failed.
    pub(crate) fn is_hangup(&self) -> bool {
        matches!(self, Self::Pipeline(msg) if msg.starts_with(HANGUP_PREFIX))
    }

    pub(crate) fn hangup(stage: &str) -> Self {
        Self::Pipeline(format!("{HANGUP_PREFIX} ({stage})"))
    }
}

const HANGUP_PREFIX: &str = "downstream stage hung up";
