use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use crate::{DateNormalization, DateQuery, EnrichmentService, RegionGuess, RegionQuery};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Model used for the Maps-grounded lookup; grounding needs a 2.5 model.
    pub grounded_model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            grounded_model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            grounded_model: std::env::var("GEMINI_GROUNDED_MODEL").unwrap_or(defaults.grounded_model),
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
            timeout: std::env::var("GEMINI_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("request to gemini failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gemini returned http {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("gemini response had no text candidate")]
    EmptyResponse,
    #[error("gemini response was not the expected json: {0}")]
    Decode(#[from] serde_json::Error),
}

/// `generateContent` client for the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiService {
    client: reqwest::Client,
    api_key: String,
    model: String,
    grounded_model: String,
    base_url: String,
}

impl GeminiService {
    pub fn new(config: GeminiConfig) -> Result<Self, GeminiError> {
        let api_key = config.api_key.ok_or(GeminiError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .user_agent(concat!("concursos/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model,
            grounded_model: config.grounded_model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Result<Self, GeminiError> {
        Self::new(GeminiConfig::from_env())
    }

    async fn generate(&self, model: &str, body: JsonValue) -> Result<String, GeminiError> {
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        debug!(%url, "calling gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let payload = response.json::<GenerateContentResponse>().await?;
        payload.text().ok_or(GeminiError::EmptyResponse)
    }

    async fn generate_json<T: DeserializeOwned>(
        &self,
        prompt: String,
        schema: JsonValue,
    ) -> Result<T, GeminiError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
        });
        let text = self.generate(&self.model, body).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl EnrichmentService for GeminiService {
    async fn classify_regions(&self, queries: &[RegionQuery]) -> anyhow::Result<Vec<RegionGuess>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let guesses = self
            .generate_json(region_prompt(queries), pair_schema("uf"))
            .await?;
        Ok(guesses)
    }

    async fn grounded_region(&self, institution: &str) -> anyhow::Result<Option<String>> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": grounded_prompt(institution) }] }],
            "tools": [{ "googleMaps": {} }],
        });
        let text = self.generate(&self.grounded_model, body).await?;
        Ok(crate::normalize_region_code(&text))
    }

    async fn normalize_dates(&self, queries: &[DateQuery]) -> anyhow::Result<Vec<DateNormalization>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = date_prompt(queries, Local::now().year());
        let cleaned = self.generate_json(prompt, pair_schema("cleanDate")).await?;
        Ok(cleaned)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<String>();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Array of `{id, <value_key>}` objects, both strings.
fn pair_schema(value_key: &str) -> JsonValue {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": { "type": "STRING" },
                value_key: { "type": "STRING" },
            },
            "required": ["id", value_key],
        },
    })
}

fn region_prompt(queries: &[RegionQuery]) -> String {
    let list = queries
        .iter()
        .map(|q| format!("- ID: {}, Nome: {}", q.id, q.institution))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Para cada órgão abaixo, informe a sigla da Unidade Federativa brasileira onde ele atua.\n\
         Use a sigla de 2 letras (SP, RJ, MG...), \"BR\" para órgãos federais ou nacionais \
         e \"N/A\" quando não for possível identificar.\n\
         Responda com um array JSON de objetos com os campos 'id' e 'uf'.\n\n\
         Órgãos:\n{list}"
    )
}

fn grounded_prompt(institution: &str) -> String {
    format!(
        "Consulte o Google Maps e diga em qual Unidade Federativa do Brasil fica o órgão \
         \"{institution}\". Responda somente com a sigla de 2 letras, \"BR\" se for um órgão \
         federal ou nacional, ou \"N/A\" se não encontrar."
    )
}

fn date_prompt(queries: &[DateQuery], year: i32) -> String {
    let list = queries
        .iter()
        .map(|q| format!("- ID: {}, Data: {}", q.id, q.raw))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Converta as datas de concursos abaixo para o formato DD/MM/AAAA.\n\
         Datas sem ano (como 10/04) são de {year}.\n\
         Para intervalos ou várias datas, use a data final ou a principal.\n\
         Quando o texto indicar suspensão, cancelamento, data a definir ou indisponível, \
         responda \"Suspenso\", \"Cancelado\", \"A Definir\" ou \"N/A\".\n\
         Responda com um array JSON de objetos com os campos 'id' e 'cleanDate'.\n\n\
         Datas:\n{list}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_reported() {
        let err = GeminiService::new(GeminiConfig::default()).expect_err("no key");
        assert!(matches!(err, GeminiError::MissingApiKey));
    }

    #[test]
    fn first_candidate_text_is_joined() {
        let payload: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "[{\"id\":\"a\"," }, { "text": "\"uf\":\"SP\"}]" }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .expect("decode");
        let text = payload.text().expect("text");
        let guesses: Vec<RegionGuess> = serde_json::from_str(&text).expect("guesses");
        assert_eq!(
            guesses,
            [RegionGuess {
                id: "a".into(),
                uf: "SP".into()
            }]
        );
    }

    #[test]
    fn empty_candidates_have_no_text() {
        let payload: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [] })).expect("decode");
        assert_eq!(payload.text(), None);

        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [{ "finishReason": "SAFETY" }] }))
                .expect("decode");
        assert_eq!(blocked.text(), None);
    }

    #[test]
    fn date_answers_use_clean_date_key() {
        let parsed: Vec<DateNormalization> =
            serde_json::from_str(r#"[{"id":"a|exam_date","cleanDate":"10/04/2026"}]"#).expect("decode");
        assert_eq!(parsed[0].clean, "10/04/2026");
        assert_eq!(pair_schema("cleanDate")["items"]["required"][1], "cleanDate");
    }

    #[test]
    fn prompts_list_every_item() {
        let prompt = date_prompt(
            &[
                DateQuery {
                    id: "a|exam_date".into(),
                    raw: "10/04".into(),
                },
                DateQuery {
                    id: "b|registration_end".into(),
                    raw: "até maio".into(),
                },
            ],
            2026,
        );
        assert!(prompt.contains("- ID: a|exam_date, Data: 10/04"));
        assert!(prompt.contains("- ID: b|registration_end, Data: até maio"));
        assert!(prompt.contains("2026"));
    }
}
