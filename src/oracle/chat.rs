/// Oracle backed by an OpenAI-compatible `/chat/completions` endpoint
/// (LM Studio, llama.cpp server, vLLM, ...).
use super::{parse, prompt, AnswerAttempt, EvaluationContext, Oracle, OracleError, Verdict};
use crate::config::OracleConfig;
use crate::event::truncate_chars;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChatOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(OracleError::Client)?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one system+user exchange and return the assistant's text.
    /// Missing content is returned as an empty string.
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "sending oracle request");
        let resp = request.send().await.map_err(transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(OracleError::Status {
                code: status.as_u16(),
                body: truncate_chars(text.trim(), 200),
            });
        }

        let envelope: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| OracleError::Protocol(format!("invalid envelope: {e}")))?;
        let choice = envelope
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OracleError::Protocol("response has no choices".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

fn transport_error(e: reqwest::Error) -> OracleError {
    if e.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Transport(e)
    }
}

impl Oracle for ChatOracle {
    fn evaluate(
        &self,
        ctx: &EvaluationContext,
    ) -> impl Future<Output = Result<Verdict, OracleError>> + Send {
        let user = prompt::evaluation_prompt(ctx);
        async move {
            let content = self
                .complete(prompt::EVALUATION_SYSTEM_PROMPT, &user)
                .await?;
            Ok(parse::parse_verdict(&content))
        }
    }

    fn answer(
        &self,
        question: &str,
        ctx: &EvaluationContext,
    ) -> impl Future<Output = Result<AnswerAttempt, OracleError>> + Send {
        let user = prompt::answer_prompt(question, ctx);
        async move {
            let content = self.complete(prompt::ANSWER_SYSTEM_PROMPT, &user).await?;
            Ok(parse::parse_answer(&content))
        }
    }
}
