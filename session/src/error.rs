use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("invalid channel name: {0}")]
    InvalidChannel(String),

    #[error("client is not in replay mode")]
    NotInReplay,

    #[error("invalid replay speed: {0}")]
    InvalidSpeed(f64),

    #[error("client connection is closed")]
    Closed,

    #[error("client outbound queue is full")]
    SlowConsumer,
}
