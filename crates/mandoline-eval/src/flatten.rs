use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::PayloadError;
use crate::payload::{Asset, Prompt, Response, ToolInvocation};

/// Markdown fence used around large blobs.
pub const FENCE: &str = "```";

/// Evaluator-ready text for one prompt/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedPair {
    pub prompt: String,
    pub response: String,
}

impl FlattenedPair {
    pub fn content_hash(&self) -> String {
        content_hash(&self.prompt, &self.response)
    }
}

impl Prompt {
    pub fn flatten(&self) -> String {
        let mut parts = Vec::with_capacity(3);

        let transcript = self
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("# Conversation\n\n{transcript}"));

        if !self.context_assets.is_empty() {
            parts.push(format!("# Context\n\n{}", asset_blocks(&self.context_assets)));
        }
        if !self.invocations.is_empty() {
            parts.push(format!(
                "# Tool Invocations\n\n{}",
                invocation_blocks(&self.invocations)
            ));
        }

        parts.join("\n\n")
    }
}

impl Response {
    pub fn flatten(&self) -> String {
        let mut parts = vec![self.message.content.clone()];

        if !self.invocations.is_empty() {
            parts.push(format!(
                "# Tool Invocations\n\n{}",
                invocation_blocks(&self.invocations)
            ));
        }
        if !self.output_assets.is_empty() {
            parts.push(format!(
                "# Generated Content\n\n{}",
                asset_blocks(&self.output_assets)
            ));
        }

        parts.join("\n\n")
    }
}

fn asset_blocks(assets: &[Asset]) -> String {
    assets
        .iter()
        .map(|asset| {
            let mut header = format!("{} ({}", asset.name, asset.kind.as_str());
            if let Some(language) = asset.language() {
                header.push_str(", ");
                header.push_str(&language);
            }
            header.push(')');
            if let Some(description) = asset.description.as_deref().filter(|d| !d.is_empty()) {
                header.push_str(" – ");
                header.push_str(description);
            }
            format!("{header}\n{FENCE}\n{}\n{FENCE}", asset.content.trim_end())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn invocation_blocks(invocations: &[ToolInvocation]) -> String {
    invocations
        .iter()
        .enumerate()
        .map(|(i, inv)| {
            let mut block = format!(
                "Tool Call {}: {}\n{FENCE}json\n{}\n{FENCE}",
                i + 1,
                inv.name,
                inv.arguments
            );
            if let Some(result) = inv.result.as_deref().filter(|r| !r.is_empty()) {
                block.push_str(&format!("\n\nResult:\n{FENCE}\n{result}\n{FENCE}"));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First 8 hex chars of sha256(prompt ++ response).
pub fn content_hash(prompt: &str, response: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(response.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(8);
    digest
}

/// Decodes, validates and flattens a raw prompt/response pair.
pub fn build_prompt_response_pair(
    prompt: Value,
    response: Value,
) -> Result<FlattenedPair, PayloadError> {
    let prompt = Prompt::from_value(prompt)?;
    let response = Response::from_value(response)?;
    prompt.validate()?;
    response.validate()?;
    Ok(FlattenedPair {
        prompt: prompt.flatten(),
        response: response.flatten(),
    })
}
