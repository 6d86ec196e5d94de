// fal.ai API Client
// Supports: Text-to-Image, Image-to-Video (synchronous endpoints)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    AdapterError, AdapterResult, GeneratedImage, GeneratedVideo, ImageGenerator, ImageRequest,
    VideoGenerator, VideoRequest,
};

#[derive(Clone)]
pub struct FalClient {
    api_key: String,
    client: Client,
    base_url: String,
}

// ============================================================================
// API REQUEST/RESPONSE STRUCTURES
// ============================================================================

#[derive(Serialize, Debug)]
struct ImageGenerationRequest {
    prompt: String,
    image_size: ImageSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<String>,
}

#[derive(Serialize, Debug)]
struct ImageSize {
    width: u32,
    height: u32,
}

#[derive(Deserialize, Debug)]
struct ImageGenerationResponse {
    images: Vec<ImageFile>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct ImageFile {
    url: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Serialize, Debug)]
struct VideoGenerationRequest {
    prompt: String,
    image_url: String,
    duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
}

#[derive(Deserialize, Debug)]
struct VideoGenerationResponse {
    video: VideoFile,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct VideoFile {
    url: String,
    #[serde(default)]
    duration: Option<f64>,
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

impl FalClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: "https://fal.run".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Map a catalog model id to its fal route. Unknown ids are rejected
    /// here so a typo never reaches the provider.
    fn image_route(model: &str) -> AdapterResult<&'static str> {
        match model {
            "flux-schnell" => Ok("fal-ai/flux/schnell"),
            "flux-dev" => Ok("fal-ai/flux/dev"),
            "flux-pro" => Ok("fal-ai/flux-pro"),
            "sdxl-lightning" => Ok("fal-ai/fast-lightning-sdxl"),
            other => Err(AdapterError::UnsupportedModel(other.to_string())),
        }
    }

    fn video_route(model: &str) -> AdapterResult<&'static str> {
        match model {
            "kling-v1" => Ok("fal-ai/kling-video/v1/standard/image-to-video"),
            "kling-v1-pro" => Ok("fal-ai/kling-video/v1/pro/image-to-video"),
            "runway-gen3" => Ok("fal-ai/runway-gen3/turbo/image-to-video"),
            "ltx-video" => Ok("fal-ai/ltx-video/image-to-video"),
            other => Err(AdapterError::UnsupportedModel(other.to_string())),
        }
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        route: &str,
        body: &B,
    ) -> AdapterResult<R> {
        let url = format!("{}/{}", self.base_url, route);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", self.api_key))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AdapterError::Api { status, message });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ImageGenerator for FalClient {
    fn name(&self) -> &str {
        "fal"
    }

    async fn generate_image(&self, request: &ImageRequest) -> AdapterResult<GeneratedImage> {
        let route = Self::image_route(&request.model)?;
        let body = ImageGenerationRequest {
            prompt: request.prompt.clone(),
            image_size: ImageSize {
                width: request.width,
                height: request.height,
            },
            style: request.style.clone(),
        };

        let data: ImageGenerationResponse = self.post_json(route, &body).await?;
        let image = data
            .images
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::BadResponse("empty images array".to_string()))?;

        Ok(GeneratedImage {
            width: image.width.unwrap_or(request.width),
            height: image.height.unwrap_or(request.height),
            url: image.url,
            meta: json!({ "provider": "fal", "model": request.model, "seed": data.seed }),
        })
    }
}

#[async_trait]
impl VideoGenerator for FalClient {
    fn name(&self) -> &str {
        "fal"
    }

    async fn generate_video(&self, request: &VideoRequest) -> AdapterResult<GeneratedVideo> {
        let route = Self::video_route(&request.model)?;
        let body = VideoGenerationRequest {
            prompt: request.prompt.clone(),
            image_url: request.image_url.clone(),
            duration: request.duration_seconds,
            aspect_ratio: Some(aspect_ratio_label(request.width, request.height)),
        };

        let data: VideoGenerationResponse = self.post_json(route, &body).await?;

        Ok(GeneratedVideo {
            url: data.video.url,
            duration_seconds: data.video.duration.unwrap_or(request.duration_seconds),
            width: request.width,
            height: request.height,
            meta: json!({ "provider": "fal", "model": request.model, "seed": data.seed }),
        })
    }
}

fn aspect_ratio_label(width: u32, height: u32) -> String {
    if width * 9 == height * 16 {
        "16:9".to_string()
    } else if width * 16 == height * 9 {
        "9:16".to_string()
    } else if width == height {
        "1:1".to_string()
    } else {
        format!("{}:{}", width, height)
    }
}
