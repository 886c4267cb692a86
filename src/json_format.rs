//! Request fields that switch a model into JSON output mode.
//!
//! Callers should still describe the expected schema in the prompt; these fields only
//! ask the provider to enforce syntactically valid JSON.

use serde_json::{Map, Value, json};

/// Provider family guessed from a model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    OpenAi,
    Azure,
    Mistral,
    Groq,
    Ollama,
    Llama,
    Claude,
    Cohere,
    Gemini,
    Unknown,
}

impl ModelFamily {
    /// Identifies the family from substrings of the lower-cased model name.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_gate::json_format::ModelFamily;
    ///
    /// assert_eq!(ModelFamily::from_model("gpt-4o-mini"), ModelFamily::OpenAi);
    /// assert_eq!(ModelFamily::from_model("ollama/llama3"), ModelFamily::Ollama);
    /// assert_eq!(ModelFamily::from_model("llama3-70b"), ModelFamily::Llama);
    /// ```
    pub fn from_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        let has = |needle: &str| model.contains(needle);
        if has("gpt-") || has("text-") || has("openai") {
            Self::OpenAi
        } else if has("azure") {
            Self::Azure
        } else if has("mistral") || has("mixtral") {
            Self::Mistral
        } else if has("groq") {
            Self::Groq
        } else if has("ollama") {
            Self::Ollama
        } else if has("llama") {
            Self::Llama
        } else if has("claude") {
            Self::Claude
        } else if has("cohere") {
            Self::Cohere
        } else if has("gemini") || has("vertex") {
            Self::Gemini
        } else {
            Self::Unknown
        }
    }
}

/// Body fields requesting JSON output from `model`. Empty when the family has none.
pub fn json_response_params(model: &str) -> Map<String, Value> {
    let mut params = Map::new();
    match ModelFamily::from_model(model) {
        ModelFamily::OpenAi | ModelFamily::Azure | ModelFamily::Mistral | ModelFamily::Groq => {
            params.insert("response_format".to_string(), json!({ "type": "json_object" }));
        }
        ModelFamily::Ollama => {
            params.insert("format".to_string(), json!("json"));
        }
        ModelFamily::Llama
        | ModelFamily::Claude
        | ModelFamily::Cohere
        | ModelFamily::Gemini
        | ModelFamily::Unknown => {}
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_compatible_families_use_response_format() {
        for model in ["gpt-4.1-mini", "azure-deployment", "mixtral-8x7b", "groq/llama"] {
            let params = json_response_params(model);
            assert_eq!(
                params.get("response_format"),
                Some(&json!({"type": "json_object"})),
                "model {model}"
            );
        }
    }

    #[test]
    fn ollama_uses_format_flag() {
        let params = json_response_params("Ollama-Qwen2");
        assert_eq!(params.get("format"), Some(&json!("json")));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn other_families_get_nothing() {
        for model in ["claude-3-5-sonnet", "gemini-2.0-flash", "llama3-70b", "command-r"] {
            assert!(json_response_params(model).is_empty(), "model {model}");
        }
    }
}
