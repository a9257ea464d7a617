use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("No active model")]
    NoActiveModel,
    #[error("Model {0} is not loaded")]
    ModelNotLoaded(String),
    #[error("Failed to load model {0}")]
    StartupFailure(String),
    #[error("Failed to stop model {0}")]
    ShutdownFailure(String),
    #[error("Failed to synthesize text")]
    SynthesisFailure,
    #[error("Catalog error: {0}")]
    Catalog(String),
}

impl SupervisorError {
    /// Bad identifiers and a missing active model are reported as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SupervisorError::UnknownModel(_)
                | SupervisorError::NoActiveModel
                | SupervisorError::ModelNotLoaded(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
