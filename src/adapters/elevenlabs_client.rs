// Eleven Labs API Client
// Text-to-Speech for voiceover generation. The synthesized take is kept in
// the provider's history so the returned URL stays fetchable by the render
// service.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    AdapterError, AdapterResult, GeneratedAudio, VoiceoverGenerator, VoiceoverRequest,
};

#[derive(Clone)]
pub struct ElevenLabsClient {
    api_key: String,
    client: Client,
    base_url: String,
}

// ============================================================================
// API REQUEST/RESPONSE STRUCTURES
// ============================================================================

#[derive(Serialize, Debug)]
struct TextToSpeechRequest {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<VoiceSettings>,
}

#[derive(Serialize, Debug)]
pub struct VoiceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f64>,
}

#[derive(Deserialize, Debug)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Deserialize, Debug)]
struct VoicesResponse {
    voices: Vec<Voice>,
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

impl ElevenLabsClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Catalog model id -> Eleven Labs model id.
    fn model_id(model: &str) -> AdapterResult<&'static str> {
        match model {
            "eleven-multilingual-v2" => Ok("eleven_multilingual_v2"),
            "eleven-turbo-v2" => Ok("eleven_turbo_v2_5"),
            other => Err(AdapterError::UnsupportedModel(other.to_string())),
        }
    }

    /// List all available voices
    pub async fn list_voices(&self) -> AdapterResult<Vec<Voice>> {
        let url = format!("{}/voices", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("xi-api-key", &self.api_key)
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

        let data: VoicesResponse = response.json().await?;
        Ok(data.voices)
    }
}

#[async_trait]
impl VoiceoverGenerator for ElevenLabsClient {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn generate_voiceover(
        &self,
        request: &VoiceoverRequest,
    ) -> AdapterResult<GeneratedAudio> {
        let model_id = Self::model_id(&request.model)?;
        let url = format!("{}/text-to-speech/{}", self.base_url, request.voice_id);

        let request_body = TextToSpeechRequest {
            text: request.text.clone(),
            model_id: Some(model_id.to_string()),
            language_code: request.language.clone(),
            voice_settings: None,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .query(&[("output_format", "mp3_44100_128")])
            .json(&request_body)
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

        // The take is stored in the account history; its audio endpoint is
        // the durable URL downstream stages consume.
        let history_item_id = response
            .headers()
            .get("history-item-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AdapterError::BadResponse("missing history-item-id header".to_string())
            })?;

        let audio_url = format!("{}/history/{}/audio", self.base_url, history_item_id);

        Ok(GeneratedAudio {
            url: audio_url,
            duration_seconds: None,
            meta: json!({
                "provider": "elevenlabs",
                "model": model_id,
                "voice_id": request.voice_id,
                "history_item_id": history_item_id,
                "characters": request.text.chars().count(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_mapping() {
        assert_eq!(
            ElevenLabsClient::model_id("eleven-turbo-v2").unwrap(),
            "eleven_turbo_v2_5"
        );
        assert!(matches!(
            ElevenLabsClient::model_id("polly-neural"),
            Err(AdapterError::UnsupportedModel(_))
        ));
    }
}
