use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Value must be >= 1.")]
    NotPositive,
    #[error("Value must be a positive, finite number.")]
    NotPositiveFinite,
    #[error("Invalid bootstrap address {value:?} (expected tcp://host:port or host:port).")]
    InvalidBootstrapAddr { value: String },
    #[error("Invalid scenario spec {value:?} (expected module:attr).")]
    InvalidScenarioSpec { value: String },
    #[error("Invalid bind mode {value:?} (expected \"local\", \"public\" or an IP address).")]
    InvalidBindMode { value: String },
}
