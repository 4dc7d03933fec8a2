//! Chatlens NLP Client
//!
//! HTTP client for the keyword-extraction microservice

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A text message handed to the NLP service for keyword extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextEntry {
    pub message_id: i64,
    pub epoch_seconds: i64,
    pub text: String,
}

/// A run of related messages and the keywords extracted from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordCluster {
    pub start_epoch_seconds: i64,
    /// 0 when the cluster has no addressable first message.
    pub first_message_id: i64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCount {
    pub word: String,
    pub count: i64,
}

#[async_trait::async_trait]
pub trait NlpService: Send + Sync {
    /// Merges related messages and computes keywords per run. The global
    /// word counts are used by the service for scoring.
    async fn compute_keywords(
        &self,
        texts: &[TextEntry],
        global_word_counts: &HashMap<String, i64>,
    ) -> Result<Vec<KeywordCluster>>;

    /// Counts word occurrences over the given texts, most frequent first.
    async fn count_words(&self, texts: &[String], limit: usize) -> Result<Vec<WordCount>>;
}

pub struct HttpNlpClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct KeywordsRequest<'a> {
    texts: &'a [TextEntry],
    global_word_counts: &'a HashMap<String, i64>,
}

#[derive(Deserialize)]
struct KeywordsResponse {
    clusters: Vec<KeywordCluster>,
}

#[derive(Serialize)]
struct CountWordsRequest<'a> {
    texts: &'a [String],
    limit: usize,
}

#[derive(Deserialize)]
struct CountWordsResponse {
    words: Vec<WordCount>,
}

impl HttpNlpClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl NlpService for HttpNlpClient {
    async fn compute_keywords(
        &self,
        texts: &[TextEntry],
        global_word_counts: &HashMap<String, i64>,
    ) -> Result<Vec<KeywordCluster>> {
        let url = format!("{}/keywords", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&KeywordsRequest {
                texts,
                global_word_counts,
            })
            .send()
            .await
            .map_err(|e| anyhow!("nlp keywords request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("nlp keywords HTTP error: {}", e))?;

        let parsed: KeywordsResponse = resp
            .json()
            .await
            .map_err(|e| anyhow!("nlp keywords decode failed: {}", e))?;
        Ok(parsed.clusters)
    }

    async fn count_words(&self, texts: &[String], limit: usize) -> Result<Vec<WordCount>> {
        let url = format!("{}/count_words", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&CountWordsRequest { texts, limit })
            .send()
            .await
            .map_err(|e| anyhow!("nlp count_words request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("nlp count_words HTTP error: {}", e))?;

        let parsed: CountWordsResponse = resp
            .json()
            .await
            .map_err(|e| anyhow!("nlp count_words decode failed: {}", e))?;
        Ok(parsed.words)
    }
}
