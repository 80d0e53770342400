use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid value for {key}: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
