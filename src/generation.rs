//! Text generation collaborator surface.
//!
//! Answer generation is delegated to an external model behind
//! [`TextGenerator`]. Both single-shot and incrementally streamed responses
//! are supported; streamed generation is cancelled cooperatively by the
//! caller, which polls its [`crate::util::CancelToken`] per token.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;

use crate::error::{CartographError, Result};

/// Options forwarded to the generation model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// An incrementally produced token stream.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Trait for delegating prompt completion to an external model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a complete response for `prompt`.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Generate a token stream for `prompt`.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TokenStream>;
}

/// Generator that replays scripted responses. Test support and offline use.
///
/// Responses are consumed in order; the last one repeats once the script
/// runs out. The most recent prompt is retained for inspection.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    last_response: Mutex<String>,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedGenerator {
    /// Create a generator that always answers with `response`.
    pub fn fixed<S: Into<String>>(response: S) -> Self {
        let response = response.into();
        Self {
            responses: Mutex::new(VecDeque::new()),
            last_response: Mutex::new(response),
            last_prompt: Mutex::new(None),
        }
    }

    /// Create a generator replaying `responses` in order.
    pub fn new(responses: Vec<String>) -> Result<Self> {
        if responses.is_empty() {
            return Err(CartographError::input_validation(
                "scripted generator needs at least one response",
            ));
        }
        let last = responses.last().cloned().unwrap_or_default();
        Ok(Self {
            responses: Mutex::new(responses.into()),
            last_response: Mutex::new(last),
            last_prompt: Mutex::new(None),
        })
    }

    /// The prompt most recently passed to this generator.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().clone()
    }

    fn next_response(&self, prompt: &str) -> String {
        *self.last_prompt.lock() = Some(prompt.to_string());
        match self.responses.lock().pop_front() {
            Some(response) => {
                *self.last_response.lock() = response.clone();
                response
            }
            None => self.last_response.lock().clone(),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        Ok(self.next_response(prompt))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<TokenStream> {
        let response = self.next_response(prompt);
        let tokens: Vec<Result<String>> = response
            .split_inclusive(' ')
            .map(|token| Ok(token.to_string()))
            .collect();
        Ok(futures::stream::iter(tokens).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let generator =
            ScriptedGenerator::new(vec!["first".to_string(), "second".to_string()]).unwrap();
        let options = GenerationOptions::default();

        assert_eq!(generator.generate("q1", &options).await.unwrap(), "first");
        assert_eq!(generator.generate("q2", &options).await.unwrap(), "second");
        // Script exhausted: the last response repeats.
        assert_eq!(generator.generate("q3", &options).await.unwrap(), "second");
        assert_eq!(generator.last_prompt().as_deref(), Some("q3"));
    }

    #[test]
    fn test_stream_reassembles_to_response() {
        tokio_test::block_on(async {
            let generator = ScriptedGenerator::fixed("alpha beta gamma");
            let mut stream = generator
                .generate_stream("q", &GenerationOptions::default())
                .await
                .unwrap();

            let mut collected = String::new();
            while let Some(token) = stream.next().await {
                collected.push_str(&token.unwrap());
            }
            assert_eq!(collected, "alpha beta gamma");
        });
    }

    #[test]
    fn test_empty_script_rejected() {
        assert!(ScriptedGenerator::new(Vec::new()).is_err());
    }
}
