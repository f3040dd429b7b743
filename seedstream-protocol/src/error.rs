#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid frame signature: {0:?}")]
    InvalidSignature([u8; 2]),

    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid info level: {0}")]
    InvalidInfoLevel(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
