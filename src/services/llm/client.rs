use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::kernel::error::ProducerError;
use crate::kernel::gate::{CandidateMetadata, SpeechCandidate};
use crate::kernel::producer::{ActiveGoal, CandidateProducer, ProducerContext};

const TIMEOUT_MS: u64 = 2_000;

#[derive(Serialize)]
struct CompletionRequest {
    prompt: String,
    stream: bool,
    n_predict: usize,
    temperature: f32,
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
}

/// Candidate producer backed by a llama-server `/completion` endpoint.
#[derive(Clone)]
pub struct LlmProducer {
    client: Client,
    base_url: String,
}

impl LlmProducer {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_millis(TIMEOUT_MS)) // HARD Timeout Enforcement (Network Level)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn complete(&self, user_prompt: &str, temperature: f32) -> Result<String> {
        let system_prompt = "You are a quiet, thinking companion. You speak briefly and only when it adds something.";
        let full_prompt = format!("System: {}\nUser: {}\nAssistant:", system_prompt, user_prompt);

        let request_body = CompletionRequest {
            prompt: full_prompt,
            stream: false,
            n_predict: 64,
            temperature,
            stop: vec!["User:".to_string(), "System:".to_string()],
        };

        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("LLM Server Error: {}", response.status()));
        }

        let resp_json: CompletionResponse = response.json().await?;
        Ok(resp_json.content.trim().to_string())
    }

    async fn ask(&self, prompt: &str, temperature: f32) -> Result<String, ProducerError> {
        match tokio::time::timeout(Duration::from_millis(TIMEOUT_MS), self.complete(prompt, temperature)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(ProducerError::Backend(e.to_string())),
            Err(_) => Err(ProducerError::Timeout(TIMEOUT_MS)),
        }
    }
}

fn source(tag: &str) -> Option<CandidateMetadata> {
    Some(CandidateMetadata {
        source: Some(tag.to_string()),
        ..CandidateMetadata::default()
    })
}

impl CandidateProducer for LlmProducer {
    async fn reactive(&mut self, ctx: &ProducerContext, input: &str) -> Result<Vec<SpeechCandidate>, ProducerError> {
        let text = self.ask(&format!("Reply briefly to: {}", input), 0.4).await?;
        Ok(vec![ctx.gate.reactive_candidate(&text, input, ctx.now, source("llm"))])
    }

    async fn goal_driven(
        &mut self,
        ctx: &ProducerContext,
        goal: &ActiveGoal,
    ) -> Result<Option<SpeechCandidate>, ProducerError> {
        let text = self
            .ask(&format!("State one short next step toward: {}", goal.description), 0.4)
            .await?;
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(ctx.gate.goal_candidate(&text, &goal.description, ctx.now, &goal.id, source("llm"))))
    }

    async fn autonomous(&mut self, ctx: &ProducerContext) -> Result<Option<SpeechCandidate>, ProducerError> {
        let text = self
            .ask("Share one brief, unprompted observation, or reply with nothing.", 0.8)
            .await?;
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(ctx.gate.autonomous_candidate(&text, &text, ctx.now, source("llm"))))
    }
}
