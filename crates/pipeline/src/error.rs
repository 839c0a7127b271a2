use artisan_core::artifact::ArtifactError;
use artisan_core::error::{CoreError, ErrorKind};
use artisan_db::StoreError;

/// Errors surfaced by [`crate::GenerationService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        Self::Store(StoreError::Core(err))
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Artifact(ArtifactError::NotFound(_) | ArtifactError::InvalidRef(_)) => {
                ErrorKind::NotFound
            }
            Self::Artifact(ArtifactError::EmptyArtifact(_)) => ErrorKind::EmptyArtifact,
            Self::Artifact(ArtifactError::Io(_)) => ErrorKind::Internal,
        }
    }
}
