//! Image and clip job producers backed by the prediction API.

use async_trait::async_trait;
use reel_ml_client::{ClientError, Prediction, PredictionClient, PredictionStatus};
use reel_models::{AssetRef, RemoteJobId, Segment};
use serde_json::json;
use tracing::debug;

use crate::collaborators::{ClipJobProducer, ImageJobProducer, RemoteStatus};
use crate::error::RemoteFailure;

/// Image model settings.
#[derive(Debug, Clone)]
pub struct ImageModelConfig {
    /// `owner/name` of the text-to-image model
    pub model: String,
    pub aspect_ratio: String,
}

impl Default for ImageModelConfig {
    fn default() -> Self {
        Self {
            model: "bytedance/seedream-4.5".to_string(),
            aspect_ratio: "9:16".to_string(),
        }
    }
}

/// Clip model settings.
#[derive(Debug, Clone)]
pub struct ClipModelConfig {
    /// `owner/name` of the image-to-video model
    pub model: String,
    /// Clip length requested from the model; equals the scene length
    pub duration_secs: u32,
    pub mode: String,
    pub negative_prompt: String,
}

impl Default for ClipModelConfig {
    fn default() -> Self {
        Self {
            model: "kwaivgi/kling-v2.1".to_string(),
            duration_secs: 5,
            mode: "standard".to_string(),
            negative_prompt: "blurry, distorted, unnatural motion, glitch, artifacts".to_string(),
        }
    }
}

/// Text-to-image jobs, one prediction per segment.
#[derive(Debug, Clone)]
pub struct PredictionImageProducer {
    client: PredictionClient,
    config: ImageModelConfig,
}

impl PredictionImageProducer {
    pub fn new(client: PredictionClient, config: ImageModelConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ImageJobProducer for PredictionImageProducer {
    async fn submit_image_job(&self, segment: &Segment) -> Result<RemoteJobId, RemoteFailure> {
        let input = json!({
            "prompt": segment.visual_prompt,
            "aspect_ratio": self.config.aspect_ratio,
            "max_images": 1,
        });
        let prediction = self
            .client
            .create_prediction(&self.config.model, &input)
            .await
            .map_err(remote_failure)?;
        debug!(segment = segment.index, prediction_id = %prediction.id, "Image prediction created");
        Ok(RemoteJobId::new(prediction.id))
    }

    async fn poll_image_job(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure> {
        let prediction = self
            .client
            .get_prediction(job.as_str())
            .await
            .map_err(remote_failure)?;
        Ok(remote_status(prediction, None))
    }
}

/// Image-to-video jobs, one prediction per segment.
#[derive(Debug, Clone)]
pub struct PredictionClipProducer {
    client: PredictionClient,
    config: ClipModelConfig,
}

impl PredictionClipProducer {
    pub fn new(client: PredictionClient, config: ClipModelConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ClipJobProducer for PredictionClipProducer {
    async fn submit_clip_job(
        &self,
        segment: &Segment,
        source_image: &AssetRef,
    ) -> Result<RemoteJobId, RemoteFailure> {
        let input = json!({
            "mode": self.config.mode,
            "prompt": segment.visual_prompt,
            "duration": self.config.duration_secs,
            "start_image": source_image.uri,
            "negative_prompt": self.config.negative_prompt,
        });
        let prediction = self
            .client
            .create_prediction(&self.config.model, &input)
            .await
            .map_err(remote_failure)?;
        debug!(segment = segment.index, prediction_id = %prediction.id, "Clip prediction created");
        Ok(RemoteJobId::new(prediction.id))
    }

    async fn poll_clip_job(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure> {
        let prediction = self
            .client
            .get_prediction(job.as_str())
            .await
            .map_err(remote_failure)?;
        Ok(remote_status(prediction, Some(f64::from(self.config.duration_secs))))
    }
}

fn remote_failure(err: ClientError) -> RemoteFailure {
    if err.is_transient() {
        RemoteFailure::transient(err.to_string())
    } else {
        RemoteFailure::permanent(err.to_string())
    }
}

/// Map a prediction onto the executor's status model. A failed prediction
/// is worth another attempt; a canceled one is not.
fn remote_status(prediction: Prediction, duration_secs: Option<f64>) -> RemoteStatus {
    match prediction.status {
        PredictionStatus::Starting => RemoteStatus::Pending,
        PredictionStatus::Processing => RemoteStatus::Running,
        PredictionStatus::Succeeded => match prediction.output_url() {
            Some(url) => {
                let mut asset = AssetRef::new(url);
                asset.duration_secs = duration_secs;
                RemoteStatus::Succeeded(asset)
            }
            None => RemoteStatus::Failed(RemoteFailure::permanent(format!(
                "prediction {} succeeded without output",
                prediction.id
            ))),
        },
        PredictionStatus::Failed => RemoteStatus::Failed(RemoteFailure::transient(
            prediction
                .error_message()
                .unwrap_or_else(|| format!("prediction {} failed", prediction.id)),
        )),
        PredictionStatus::Canceled => RemoteStatus::Failed(RemoteFailure::permanent(format!(
            "prediction {} was canceled",
            prediction.id
        ))),
    }
}
