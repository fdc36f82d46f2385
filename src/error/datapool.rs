use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatapoolError {
    #[error("Failed to open datapool file {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read datapool file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
