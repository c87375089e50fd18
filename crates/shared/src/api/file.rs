use crate::ids::{FileId, UserId};
use serde::{Deserialize, Serialize};

/// Response returned after a successful file upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct FileResponse {
    pub id: FileId,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Response for file metadata queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct FileMetaResponse {
    pub id: FileId,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub uploader_id: UserId,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
