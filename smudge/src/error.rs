use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The device lacks a capability generated programs need.
    #[error("Unsupported device: {0:#}")]
    UnsupportedDevice(anyhow::Error),

    /// An argument did not satisfy the contract of the call.
    #[error("Contract violation in `{call}`: {reason}")]
    ContractViolation { call: &'static str, reason: String },

    /// Rasterization, packing or compilation failed.
    #[error("Build failed: {0:#}")]
    Build(anyhow::Error),

    #[error("Reading back the rendered frame failed: {0:#}")]
    Render(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn contract_violation(call: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::ContractViolation {
            call,
            reason: reason.to_string(),
        }
    }
}
