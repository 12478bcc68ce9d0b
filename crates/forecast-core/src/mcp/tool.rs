use crate::providers::provider::ToolDef;

use super::types::ToolDescriptor;

/// Translate a provider tool into the function spec handed to the oracle.
/// The input schema is passed through verbatim.
pub fn tool_def(descriptor: &ToolDescriptor) -> ToolDef {
    let description = descriptor
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Tool: {}", descriptor.name));
    ToolDef {
        name: descriptor.name.clone(),
        description,
        parameters: descriptor.input_schema.clone(),
    }
}

pub fn tool_defs(descriptors: &[ToolDescriptor]) -> Vec<ToolDef> {
    descriptors.iter().map(tool_def).collect()
}
