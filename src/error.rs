use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(std::io::Error),

    #[error("end of stream")]
    EndOfStream,

    #[error("framing error: {0}")]
    Framing(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("process error: {0}")]
    Process(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => IngestError::EndOfStream,
            _ => IngestError::Io(err),
        }
    }
}

impl IngestError {
    /// True for the "need more input" signal used by incremental parsers.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, IngestError::EndOfStream)
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
