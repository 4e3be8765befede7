//! The remote Read API: its wire types, and the transport seam the OCR
//! pipeline talks through.
//!
//! The service works in two steps. We upload an image and get back an
//! `operation-location` URL, then we `GET` that URL until the analysis
//! finishes. [`ReadTransport`] exposes exactly those two calls, so the
//! pipeline can be driven by [`azure::AzureReadClient`] in production and by
//! a scripted fake in tests.

use std::fmt;

use crate::{error::OcrError, prelude::*};

pub mod azure;
#[cfg(test)]
pub mod scripted;

/// Opaque handle for a submitted analysis: the `operation-location` URL the
/// service gave us. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    /// Wrap an `operation-location` value. Returns `None` for blank values.
    pub fn new(location: impl AsRef<str>) -> Option<Self> {
        let location = location.as_ref().trim();
        if location.is_empty() {
            None
        } else {
            Some(Self(location.to_owned()))
        }
    }

    /// The URL to poll.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteStatus {
    /// Queued, but not picked up yet.
    NotStarted,
    /// Being analyzed.
    Running,
    /// Done. The response carries an `analyzeResult`.
    Succeeded,
    /// The service gave up on this image.
    Failed,
}

/// The body of a status response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOperation {
    /// Where the job stands.
    pub status: RemoteStatus,

    /// Present once `status` is `succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyze_result: Option<RecognitionResult>,
}

#[cfg(test)]
impl ReadOperation {
    /// A report with no result attached.
    pub fn with_status(status: RemoteStatus) -> Self {
        Self {
            status,
            analyze_result: None,
        }
    }

    /// A successful report carrying `result`.
    pub fn succeeded(result: RecognitionResult) -> Self {
        Self {
            status: RemoteStatus::Succeeded,
            analyze_result: Some(result),
        }
    }
}

/// Recognized text, as pages of lines, in reading order.
///
/// The service sends much more than this (bounding boxes, words, confidence
/// scores, API version). We only keep the text and ignore the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecognitionResult {
    /// Pages, in document order.
    #[serde(rename = "readResults", default)]
    pub pages: Vec<Page>,
}

/// One page of recognized text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Page {
    /// Lines, top to bottom.
    #[serde(default)]
    pub lines: Vec<Line>,
}

/// One line of recognized text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Line {
    /// The text of the line.
    pub text: String,
}

#[cfg(test)]
impl RecognitionResult {
    /// Build a result from plain strings, one slice per page.
    pub fn from_pages<P, L>(pages: P) -> Self
    where
        P: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        Self {
            pages: pages
                .into_iter()
                .map(|lines| Page {
                    lines: lines
                        .into_iter()
                        .map(|text| Line { text: text.into() })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// The two calls the OCR pipeline needs from the remote service.
///
/// Implementations own the credential and endpoint. They must not retry on
/// their own: the pipeline decides what happens after a failure.
#[async_trait]
pub trait ReadTransport: fmt::Debug + Send + Sync + 'static {
    /// Upload `image` and start an analysis. Failures are
    /// [`OcrError::Submission`].
    async fn submit(&self, image: Bytes) -> Result<JobHandle, OcrError>;

    /// Fetch the current status of `handle`. Failures are
    /// [`OcrError::Transport`].
    async fn query(&self, handle: &JobHandle) -> Result<ReadOperation, OcrError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn job_handle_rejects_blank_locations() {
        assert!(JobHandle::new("").is_none());
        assert!(JobHandle::new("   ").is_none());
        let handle = JobHandle::new(" https://example.com/operations/1 ").unwrap();
        assert_eq!(handle.as_str(), "https://example.com/operations/1");
    }

    #[test]
    fn parses_a_real_status_response() {
        let body = json!({
            "status": "succeeded",
            "createdDateTime": "2024-05-01T10:00:00Z",
            "lastUpdatedDateTime": "2024-05-01T10:00:02Z",
            "analyzeResult": {
                "version": "3.2.0",
                "modelVersion": "2022-04-30",
                "readResults": [
                    {
                        "page": 1,
                        "angle": 0,
                        "width": 600,
                        "height": 400,
                        "unit": "pixel",
                        "lines": [
                            {
                                "boundingBox": [1, 2, 3, 4, 5, 6, 7, 8],
                                "text": "Hello",
                                "appearance": { "style": { "name": "other", "confidence": 0.9 } },
                                "words": [{ "text": "Hello", "confidence": 0.99 }]
                            },
                            { "text": "world" }
                        ]
                    }
                ]
            }
        });
        let operation: ReadOperation = serde_json::from_value(body).unwrap();
        assert_eq!(operation.status, RemoteStatus::Succeeded);
        assert_eq!(
            operation.analyze_result,
            Some(RecognitionResult::from_pages([["Hello", "world"]]))
        );
    }

    #[test]
    fn parses_running_and_not_started_without_results() {
        let operation: ReadOperation =
            serde_json::from_value(json!({ "status": "notStarted" })).unwrap();
        assert_eq!(operation.status, RemoteStatus::NotStarted);
        assert!(operation.analyze_result.is_none());

        let operation: ReadOperation =
            serde_json::from_value(json!({ "status": "running" })).unwrap();
        assert_eq!(operation.status, RemoteStatus::Running);
    }

    #[test]
    fn unknown_status_is_an_error() {
        let parsed = serde_json::from_value::<ReadOperation>(json!({ "status": "paused" }));
        assert!(parsed.is_err());
    }
}
