use crate::models::PostId;
use crate::remote::RemoteError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A multi-write operation committed some of its writes before one failed.
    #[error("Partial write on post {post_id}: {committed} of {attempted} writes committed: {source}")]
    PartialWrite {
        post_id: PostId,
        committed: usize,
        attempted: usize,
        #[source]
        source: RemoteError,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short message suitable for a transient toast.
    pub fn user_message(&self) -> String {
        match self {
            AppError::AuthRequired => "You need to be signed in to do that".to_string(),
            AppError::NotFound(what) => format!("Could not find {}", what),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Remote(e) => {
                tracing::error!("Remote error: {}", e);
                "Something went wrong, please try again".to_string()
            }
            AppError::PartialWrite { post_id, .. } => {
                tracing::error!("Partial write on post {}: {}", post_id, self);
                "Your reaction was only partly saved, please refresh".to_string()
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                "Something went wrong, please try again".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Something went wrong, please try again".to_string()
            }
        }
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, AppError::AuthRequired)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;
