// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Claude-backed implementation of the analysis capability.
//!
//! Prompts ask for raw JSON matching the typed contracts in
//! [`crate::analysis`]; anything else the model replies with is treated as an
//! external-capability error and callers fall back to defaults.

use super::{AnalysisProvider, AnomalyReport, DelayForecast, TimingAdvice};
use crate::config::AnalysisConfig;
use crate::error::{WatchError, WatchResult};
use crate::types::BridgeEvent;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ClaudeAnalysis {
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl ClaudeAnalysis {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        if config.api_key.is_none() {
            info!("[Analysis] API key not configured, returning default responses");
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap();
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        }
    }

    async fn complete(&self, prompt: String) -> WatchResult<String> {
        let Some(api_key) = &self.api_key else {
            return Err(WatchError::Configuration(
                "analysis API key not configured".to_string(),
            ));
        };
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| WatchError::ExternalCapability(format!("analysis request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(WatchError::ExternalCapability(format!(
                "analysis request returned {}",
                response.status()
            )));
        }
        let message: MessagesResponse = response.json().await.map_err(|e| {
            WatchError::ExternalCapability(format!("malformed analysis response: {}", e))
        })?;
        message
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text)
            .ok_or_else(|| {
                WatchError::ExternalCapability("analysis response had no text content".to_string())
            })
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TxSummary<'a> {
    tx_hash: &'a str,
    amount: String,
    direction: &'static str,
    status: &'static str,
    timestamp: i64,
}

fn summarize(events: &[BridgeEvent], limit: usize) -> String {
    let summaries: Vec<TxSummary<'_>> = events
        .iter()
        .take(limit)
        .map(|event| TxSummary {
            tx_hash: &event.tx_hash,
            amount: event.amount.to_string(),
            direction: event.direction.as_str(),
            status: event.status.as_str(),
            timestamp: event.observed_at,
        })
        .collect();
    serde_json::to_string_pretty(&summaries).unwrap_or_else(|_| "[]".to_string())
}

fn parse_reply<T: DeserializeOwned>(reply: &str) -> WatchResult<T> {
    serde_json::from_str(reply.trim()).map_err(|e| {
        WatchError::ExternalCapability(format!("capability returned malformed payload: {}", e))
    })
}

#[async_trait]
impl AnalysisProvider for ClaudeAnalysis {
    async fn detect_anomalies(&self, events: &[BridgeEvent]) -> WatchResult<AnomalyReport> {
        if events.is_empty() {
            return Ok(AnomalyReport::empty_input());
        }
        let prompt = format!(
            "You are a blockchain bridge monitoring AI. Analyze these recent opBNB bridge \
             transactions and detect any anomalies.\n\nTransactions:\n{}\n\nLook for:\n\
             - Unusual delays (gaps between timestamps)\n- High failure rates\n\
             - Suspiciously large amounts\n- Unusual patterns in bridge direction\n\n\
             Respond ONLY with valid JSON (no markdown, no code fences):\n\
             {{\n  \"anomalyDetected\": boolean,\n  \"severity\": \"low\" | \"medium\" | \"high\",\n  \
             \"description\": \"string describing what was found\",\n  \
             \"recommendation\": \"string with actionable advice\"\n}}",
            summarize(events, events.len())
        );
        let reply = self.complete(prompt).await?;
        parse_reply(&reply)
    }

    async fn predict_delay(&self, events: &[BridgeEvent]) -> WatchResult<DelayForecast> {
        if events.len() < 2 {
            return Ok(DelayForecast::insufficient_data());
        }
        let prompt = format!(
            "You are a blockchain bridge monitoring AI. Based on these recent bridge \
             transactions, predict the expected delay for a new bridge transaction.\n\n\
             Recent transactions:\n{}\n\n\
             Respond ONLY with valid JSON (no markdown, no code fences):\n\
             {{\n  \"estimatedMinutes\": number,\n  \"confidence\": \"low\" | \"medium\" | \"high\",\n  \
             \"reasoning\": \"string explaining the prediction\"\n}}",
            summarize(events, 10)
        );
        let reply = self.complete(prompt).await?;
        parse_reply(&reply)
    }

    async fn suggest_optimal_time(&self, events: &[BridgeEvent]) -> WatchResult<TimingAdvice> {
        if events.len() < 5 {
            return Ok(TimingAdvice::insufficient_data());
        }
        let prompt = format!(
            "You are a blockchain bridge monitoring AI. Based on these historical bridge \
             transactions, suggest the optimal time to bridge assets.\n\n\
             Historical transactions:\n{}\n\n\
             Respond ONLY with valid JSON (no markdown, no code fences):\n\
             {{\n  \"suggestion\": \"string with the recommendation\",\n  \
             \"bestTimeWindow\": \"string like 'UTC 02:00-06:00'\",\n  \
             \"reasoning\": \"string explaining why\"\n}}",
            summarize(events, 30)
        );
        let reply = self.complete(prompt).await?;
        parse_reply(&reply)
    }
}
