//! Gemini REST client implementing [`ChatBackend`].

use crate::config::Settings;
use crate::llm::http_utils::send_json_request;
use crate::llm::{
    parse_response_part, request_part_to_value, ChatBackend, ChatSession, LlmError, RequestPart,
    ResponsePart,
};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Client for the Gemini `generateContent` REST endpoint.
///
/// Conversations are replayed from the [`ChatSession`] history on every
/// call; the API itself is stateless.
pub struct GeminiClient {
    http_client: HttpClient,
    api_key: String,
    model_name: String,
    default_temperature: f32,
}

impl GeminiClient {
    /// Create a new Gemini client from application settings
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            http_client: crate::llm::http_utils::create_http_client(),
            api_key: settings.gemini_api_key.clone(),
            model_name: settings.model_name.clone(),
            default_temperature: settings.default_temperature,
        }
    }

    fn endpoint_url(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model_name, self.api_key
        )
    }
}

#[async_trait::async_trait]
impl ChatBackend for GeminiClient {
    async fn start_chat(&self, system_prompt: &str) -> Result<ChatSession, LlmError> {
        let mut chat = ChatSession::default();
        // The priming turn is part of conversation history; its reply is
        // discarded and never shown to the user.
        self.send_message(
            &mut chat,
            vec![RequestPart::Text(system_prompt.to_string())],
            self.default_temperature,
        )
        .await?;
        info!("New Gemini chat created and system prefix message sent");
        Ok(chat)
    }

    async fn send_message(
        &self,
        chat: &mut ChatSession,
        parts: Vec<RequestPart>,
        temperature: f32,
    ) -> Result<Vec<ResponsePart>, LlmError> {
        let user_turn = json!({
            "role": "user",
            "parts": parts.iter().map(request_part_to_value).collect::<Vec<_>>(),
        });

        // Build the request without mutating the session: a failed call
        // must leave the conversation history exactly as it was.
        let mut contents = chat.contents().to_vec();
        contents.push(user_turn.clone());

        let body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": temperature,
                "responseModalities": ["TEXT", "IMAGE"],
            },
        });

        debug!(
            turns = contents.len(),
            temperature, "Sending message to Gemini"
        );

        let res_json = send_json_request(&self.http_client, &self.endpoint_url(), &body).await?;

        let content = res_json
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .ok_or_else(|| LlmError::ApiError("response contains no candidates".to_string()))?;

        let reply_parts = content
            .get("parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        chat.push_turn(user_turn);
        chat.push_turn(json!({ "role": "model", "parts": reply_parts }));

        Ok(reply_parts.iter().map(parse_response_part).collect())
    }
}
