//! Claude-backed narrative engine.
//!
//! Drives one generation turn: build the system prompt from the state
//! projection, run the tool loop (each tool call commits to the store through
//! the executor before the next API round), then parse the trailing turn
//! report block into a [`TurnDelta`].

use async_trait::async_trait;
use claude::{Claude, ContentBlock, Message, Request, Role, StopReason};

use super::prompts::narrator_system_prompt;
use super::tools::{StoryTools, ToolExecutor};
use super::{EngineError, EngineTurn, NarrativeEngine, StateProjection, TurnDelta};

/// Hard cap on generate/execute rounds within one turn.
const MAX_TOOL_ITERATIONS: usize = 8;

/// Configuration for the narrator.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// Model override; the client default applies when `None`.
    pub model: Option<String>,

    /// Maximum tokens per response.
    pub max_tokens: usize,

    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: Some(0.8),
        }
    }
}

/// The AI narrator.
pub struct Narrator {
    client: Claude,
    config: NarratorConfig,
}

impl Narrator {
    /// Create a narrator with an existing client.
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            config: NarratorConfig::default(),
        }
    }

    /// Create a narrator from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, EngineError> {
        Ok(Self::new(Claude::from_env()?))
    }

    /// Configure the narrator.
    pub fn with_config(mut self, config: NarratorConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl NarrativeEngine for Narrator {
    async fn run_turn(
        &self,
        projection: &StateProjection,
        action: &str,
        tools: &ToolExecutor,
    ) -> Result<EngineTurn, EngineError> {
        let system_prompt = narrator_system_prompt(projection);
        let mut messages = vec![Message::user(action)];
        let mut collected_text = String::new();

        for _ in 0..MAX_TOOL_ITERATIONS {
            let mut request = Request::new(messages.clone())
                .with_system(&system_prompt)
                .with_max_tokens(self.config.max_tokens)
                .with_tools(StoryTools::all());

            if let Some(ref model) = self.config.model {
                request = request.with_model(model);
            }
            if let Some(temperature) = self.config.temperature {
                request = request.with_temperature(temperature);
            }

            let response = self.client.complete(request).await?;

            for block in &response.content {
                if let ContentBlock::Text { text } = block {
                    if !collected_text.is_empty() {
                        collected_text.push('\n');
                    }
                    collected_text.push_str(text);
                }
            }

            let tool_uses: Vec<(String, String, serde_json::Value)> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if response.stop_reason != StopReason::ToolUse || tool_uses.is_empty() {
                let delta = parse_turn_delta(&collected_text)?;
                return Ok(EngineTurn {
                    delta,
                    tool_log: tools.take_log(),
                });
            }

            messages.push(Message {
                role: Role::Assistant,
                content: response.content.clone(),
            });

            let mut tool_results = Vec::new();
            for (id, name, input) in tool_uses {
                let result = tools.execute(&name, &input).await;
                tool_results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: result.content,
                    is_error: result.is_error,
                });
            }

            messages.push(Message {
                role: Role::User,
                content: tool_results,
            });
        }

        Err(EngineError::ToolLoopOverflow(MAX_TOOL_ITERATIONS))
    }
}

/// Parse the trailing fenced turn report block out of the narrator's text.
///
/// The last ```json fence wins. A report with an empty narrative falls back
/// to the prose preceding the block.
pub fn parse_turn_delta(text: &str) -> Result<TurnDelta, EngineError> {
    let fence_start = text
        .rfind("```json")
        .ok_or_else(|| EngineError::MalformedDelta("no turn report block".to_string()))?;

    let body = &text[fence_start + "```json".len()..];
    let fence_end = body
        .find("```")
        .ok_or_else(|| EngineError::MalformedDelta("unterminated turn report block".to_string()))?;

    let mut delta: TurnDelta = serde_json::from_str(body[..fence_end].trim())
        .map_err(|e| EngineError::MalformedDelta(e.to_string()))?;

    if delta.narrative.trim().is_empty() {
        let prose = text[..fence_start].trim();
        if prose.is_empty() {
            return Err(EngineError::MalformedDelta(
                "turn report has no narrative".to_string(),
            ));
        }
        delta.narrative = prose.to_string();
    }

    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_report() {
        let text = r#"Some prose the model wrote first.

```json
{
  "narrative": "The gate groans open.",
  "choices": ["Slip through", "Wait"],
  "is_game_over": false,
  "last_outcome": "Gate opened",
  "should_set_checkpoint": true,
  "checkpoint_reason": "Past the outer wall"
}
```"#;

        let delta = parse_turn_delta(text).expect("delta");
        assert_eq!(delta.narrative, "The gate groans open.");
        assert_eq!(delta.choices.len(), 2);
        assert!(delta.should_set_checkpoint);
        assert_eq!(delta.checkpoint_reason.as_deref(), Some("Past the outer wall"));
        assert!(!delta.should_trigger_rewind);
    }

    #[test]
    fn test_parse_uses_last_block() {
        let text = r#"```json
{"narrative": "first"}
```
later correction:
```json
{"narrative": "second", "choices": ["Go"]}
```"#;

        let delta = parse_turn_delta(text).expect("delta");
        assert_eq!(delta.narrative, "second");
    }

    #[test]
    fn test_parse_missing_block_is_malformed() {
        match parse_turn_delta("Just prose, no report.") {
            Err(EngineError::MalformedDelta(reason)) => {
                assert!(reason.contains("no turn report"))
            }
            other => panic!("expected malformed delta, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unterminated_block_is_malformed() {
        let text = "```json\n{\"narrative\": \"never closed\"";
        assert!(matches!(
            parse_turn_delta(text),
            Err(EngineError::MalformedDelta(_))
        ));
    }

    #[test]
    fn test_parse_invalid_json_is_malformed() {
        let text = "```json\nnot json at all\n```";
        assert!(matches!(
            parse_turn_delta(text),
            Err(EngineError::MalformedDelta(_))
        ));
    }

    #[test]
    fn test_empty_narrative_falls_back_to_prose() {
        let text = "The corridor narrows ahead.\n```json\n{\"choices\": [\"Press on\"]}\n```";
        let delta = parse_turn_delta(text).expect("delta");
        assert_eq!(delta.narrative, "The corridor narrows ahead.");
    }

    #[test]
    fn test_empty_narrative_and_no_prose_is_malformed() {
        let text = "```json\n{\"choices\": [\"Press on\"]}\n```";
        assert!(matches!(
            parse_turn_delta(text),
            Err(EngineError::MalformedDelta(_))
        ));
    }

    #[test]
    fn test_narrator_config_defaults() {
        let config = NarratorConfig::default();
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.temperature, Some(0.8));
        assert!(config.model.is_none());
    }
}
