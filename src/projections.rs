use crate::constants::{
    GENERATION_MAX_OUTPUT_TOKENS, GENERATION_TEMPERATURE, GENERATION_TOP_K, GENERATION_TOP_P,
    SAFETY_CATEGORIES, SAFETY_THRESHOLD,
};
use crate::specs::gemini::{
    GeminiContent, GeminiRequest, GeminiRole, GenerationConfig, SafetySetting,
};
use crate::types::{ConversationTurn, Role};

/// Maps the relay's conversation model onto Gemini's request body.
pub struct GeminiProjection;

impl GeminiProjection {
    /// Gemini has no system role here: the instruction becomes a leading
    /// `model` turn, which biases generation rather than constraining it.
    pub fn project(turns: &[ConversationTurn], system_prompt: Option<&str>) -> GeminiRequest {
        let mut contents = Vec::with_capacity(turns.len() + 1);

        if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
            contents.push(GeminiContent::text(GeminiRole::Model, prompt));
        }

        contents.extend(
            turns
                .iter()
                .map(|turn| GeminiContent::text(Self::map_role(turn.role), turn.content.clone())),
        );

        GeminiRequest {
            contents,
            generation_config: Self::generation_config(),
            safety_settings: Self::safety_settings(),
        }
    }

    pub fn map_role(role: Role) -> GeminiRole {
        match role {
            Role::User => GeminiRole::User,
            Role::Assistant | Role::System => GeminiRole::Model,
        }
    }

    pub fn generation_config() -> GenerationConfig {
        GenerationConfig {
            temperature: GENERATION_TEMPERATURE,
            top_k: GENERATION_TOP_K,
            top_p: GENERATION_TOP_P,
            max_output_tokens: GENERATION_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn safety_settings() -> Vec<SafetySetting> {
        SAFETY_CATEGORIES
            .iter()
            .map(|category| SafetySetting {
                category: category.to_string(),
                threshold: SAFETY_THRESHOLD.to_string(),
            })
            .collect()
    }
}
