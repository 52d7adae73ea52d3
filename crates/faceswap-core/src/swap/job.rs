use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

/// One generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLink {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResult {
    pub links: Vec<SwapLink>,
}

/// Body of `GET /jobs/{id}`.
///
/// `result` is only meaningful once the job is done; for failed jobs it
/// may carry the upstream error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<Value>,
}

impl JobStatusResponse {
    /// Parse the swap result of a finished job.
    pub fn swap_result(&self) -> Result<SwapResult, ApiError> {
        let result = self.result.clone().ok_or_else(|| {
            ApiError::InvalidResponse(format!("Job {} is done but has no result", self.job_id))
        })?;
        serde_json::from_value(result).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub face_name: String,
    pub target_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobCreated {
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadFaceResponse {
    pub face_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadTargetResponse {
    pub target_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        let pending: JobStatusResponse =
            serde_json::from_str(r#"{"job_id":"j","status":"in_progress","result":null}"#).unwrap();
        assert_eq!(pending.status, JobStatus::InProgress);
        assert!(!pending.status.is_terminal());
        assert!(pending.result.is_none());

        assert!(serde_json::from_str::<JobStatusResponse>(r#"{"job_id":"j","status":"queued"}"#).is_err());
    }

    #[test]
    fn test_done_result_links() {
        let done: JobStatusResponse = serde_json::from_str(
            r#"{"job_id":"j","status":"done","result":{"links":[{"url":"https://x/y.png","name":"y.png","type":"image"}]}}"#,
        )
        .unwrap();
        assert!(done.status.is_terminal());
        let result = done.swap_result().unwrap();
        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].url, "https://x/y.png");
        assert_eq!(result.links[0].kind, "image");
    }

    #[test]
    fn test_done_without_result_is_invalid() {
        let done: JobStatusResponse = serde_json::from_str(r#"{"job_id":"j","status":"done"}"#).unwrap();
        assert!(matches!(done.swap_result(), Err(ApiError::InvalidResponse(_))));
    }

    #[test]
    fn test_generate_request_omits_missing_seed() {
        let body = serde_json::to_value(GenerateRequest {
            face_name: "f".to_string(),
            target_name: "t".to_string(),
            seed: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"face_name": "f", "target_name": "t"}));
    }
}
