pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("system_prompt.md");

const OUTPUT_FORMAT: &str = "## OUTPUT FORMAT";
const EXTENDED_CODE_BLOCKS: &str = "## EXTENDED CODE BLOCKS";
const CHAIN_OF_THOUGHT: &str = "## CHAIN OF THOUGHT (CoT)";
const MULTILINGUAL: &str = "## MULTILINGUAL SUPPORT";
const EVALUATION: &str = "## EVALUATION GUIDELINES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPromptConfig {
    pub model: String,
    pub enable_mdx: bool,
    pub enable_cot: bool,
    pub enable_multilingual: bool,
    pub custom_instructions: Option<String>,
}

impl SystemPromptConfig {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            enable_mdx: true,
            enable_cot: true,
            enable_multilingual: true,
            custom_instructions: None,
        }
    }
}

pub fn generate_system_prompt(config: &SystemPromptConfig) -> String {
    let mut prompt = DEFAULT_SYSTEM_PROMPT.to_string();

    if !config.enable_mdx {
        prompt = remove_section(&prompt, OUTPUT_FORMAT, EXTENDED_CODE_BLOCKS);
    }
    if !config.enable_cot {
        prompt = remove_section(&prompt, CHAIN_OF_THOUGHT, MULTILINGUAL);
    }
    if !config.enable_multilingual {
        prompt = remove_section(&prompt, MULTILINGUAL, EVALUATION);
    }
    if let Some(instructions) = config
        .custom_instructions
        .as_deref()
        .filter(|text| !text.is_empty())
    {
        prompt.push_str("\n\n## CUSTOM INSTRUCTIONS\n\n");
        prompt.push_str(instructions);
    }

    prompt
}

/// Drops the text from `heading` up to, but not including, `next_heading`.
fn remove_section(prompt: &str, heading: &str, next_heading: &str) -> String {
    let Some(start) = prompt.find(heading) else {
        return prompt.to_string();
    };
    let Some(offset) = prompt[start..].find(next_heading) else {
        return prompt.to_string();
    };
    let mut result = String::with_capacity(prompt.len());
    result.push_str(&prompt[..start]);
    result.push_str(&prompt[start + offset..]);
    result
}
