//! Azure Cognitive Services REST clients.
//!
//! * Computer Vision v3.2 `analyze`: raw image bytes in, captions + tags out.
//! * Translator v3 `translate`: JSON array of texts in, translations out.
//!
//! Both authenticate with the `Ocp-Apim-Subscription-Key` header; the
//! translator also needs the resource region.

use super::{Caption, ImageAnalysis, Tag, TranslationBackend, VisionBackend, VisualFeature};
use crate::config::{AzureTranslatorConfig, AzureVisionConfig};
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const REGION_HEADER: &str = "Ocp-Apim-Subscription-Region";

fn client(timeout_secs: u64) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BackendError::Transport(format!("HTTP client: {e}")))
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Http {
        status: status.as_u16(),
        body,
    })
}

// ── Computer Vision ──────────────────────────────────────────────────────

/// Azure Computer Vision client.
#[derive(Clone)]
pub struct AzureVision {
    endpoint: String,
    key: String,
    client: reqwest::Client,
}

impl AzureVision {
    pub fn new(config: &AzureVisionConfig, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            client: client(timeout_secs)?,
        })
    }

    fn analyze_url(&self) -> String {
        format!("{}/vision/v3.2/analyze", self.endpoint)
    }
}

impl std::fmt::Debug for AzureVision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureVision")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// `visualFeatures` query value, e.g. `Description,Tags,Objects`.
fn features_param(features: &[VisualFeature]) -> String {
    features
        .iter()
        .map(|f| match f {
            VisualFeature::Caption => "Description",
            VisualFeature::Tags => "Tags",
            VisualFeature::Objects => "Objects",
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    description: Option<DescriptionPart>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct DescriptionPart {
    #[serde(default)]
    captions: Vec<Caption>,
}

impl From<AnalyzeResponse> for ImageAnalysis {
    fn from(r: AnalyzeResponse) -> Self {
        ImageAnalysis {
            captions: r.description.map(|d| d.captions).unwrap_or_default(),
            tags: r.tags,
        }
    }
}

#[async_trait]
impl VisionBackend for AzureVision {
    fn name(&self) -> &str {
        "azure-vision"
    }

    async fn analyze(
        &self,
        image: &[u8],
        features: &[VisualFeature],
        language: &str,
    ) -> Result<ImageAnalysis, BackendError> {
        let features = features_param(features);
        debug!("Azure Vision analyze: {} bytes, features={}", image.len(), features);

        let resp = self
            .client
            .post(self.analyze_url())
            .query(&[("visualFeatures", features.as_str()), ("language", language)])
            .header(KEY_HEADER, &self.key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await?;
        let parsed: AnalyzeResponse = error_for_status(resp).await?.json().await?;
        Ok(parsed.into())
    }
}

// ── Translator ───────────────────────────────────────────────────────────

/// Azure Translator client.
#[derive(Clone)]
pub struct AzureTranslator {
    endpoint: String,
    key: String,
    region: String,
    client: reqwest::Client,
}

impl AzureTranslator {
    pub fn new(config: &AzureTranslatorConfig, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            region: config.region.clone(),
            client: client(timeout_secs)?,
        })
    }
}

impl std::fmt::Debug for AzureTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureTranslator")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TranslateItem {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    text: String,
}

/// First translation of the first input text.
fn first_translation(items: Vec<TranslateItem>) -> Result<String, BackendError> {
    items
        .into_iter()
        .next()
        .and_then(|item| item.translations.into_iter().next())
        .map(|t| t.text)
        .ok_or_else(|| BackendError::MalformedResponse("no translation in response".into()))
}

#[async_trait]
impl TranslationBackend for AzureTranslator {
    fn name(&self) -> &str {
        "azure-translator"
    }

    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, BackendError> {
        let resp = self
            .client
            .post(format!("{}/translate", self.endpoint))
            .query(&[("api-version", "3.0"), ("from", from), ("to", to)])
            .header(KEY_HEADER, &self.key)
            .header(REGION_HEADER, &self.region)
            .json(&[serde_json::json!({ "text": text })])
            .send()
            .await?;
        let items: Vec<TranslateItem> = error_for_status(resp).await?.json().await?;
        first_translation(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_query_value() {
        assert_eq!(features_param(super::super::DEFAULT_FEATURES), "Description,Tags,Objects");
        assert_eq!(features_param(&[VisualFeature::Tags]), "Tags");
    }

    #[test]
    fn analyze_response_maps_captions_and_tags() {
        let json = r#"{
            "description": {
                "tags": ["text", "screenshot"],
                "captions": [{"text": "a screenshot of a computer", "confidence": 0.91}]
            },
            "tags": [
                {"name": "text", "confidence": 0.99},
                {"name": "screenshot", "confidence": 0.95},
                {"name": "font", "confidence": 0.42}
            ],
            "objects": [],
            "requestId": "abc",
            "metadata": {"width": 10, "height": 10, "format": "Png"}
        }"#;
        let parsed: AnalyzeResponse = serde_json::from_str(json).unwrap();
        let analysis = ImageAnalysis::from(parsed);
        assert_eq!(analysis.captions[0].text, "a screenshot of a computer");
        assert_eq!(analysis.tags.len(), 3);
        assert_eq!(analysis.tags[2].name, "font");
    }

    #[test]
    fn analyze_response_without_description() {
        let parsed: AnalyzeResponse = serde_json::from_str(r#"{"tags": []}"#).unwrap();
        let analysis = ImageAnalysis::from(parsed);
        assert!(analysis.captions.is_empty());
    }

    #[test]
    fn translate_response_first_text() {
        let json = r#"[{"detectedLanguage": null, "translations": [{"text": "une capture d'écran", "to": "fr"}]}]"#;
        let items: Vec<TranslateItem> = serde_json::from_str(json).unwrap();
        assert_eq!(first_translation(items).unwrap(), "une capture d'écran");
    }

    #[test]
    fn translate_response_empty_is_malformed() {
        let items: Vec<TranslateItem> = serde_json::from_str("[]").unwrap();
        assert!(matches!(
            first_translation(items),
            Err(BackendError::MalformedResponse(_))
        ));
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let v = AzureVision::new(&AzureVisionConfig::new("https://x.cognitiveservices.azure.com/", "k"), 5).unwrap();
        assert_eq!(
            v.analyze_url(),
            "https://x.cognitiveservices.azure.com/vision/v3.2/analyze"
        );
    }
}
