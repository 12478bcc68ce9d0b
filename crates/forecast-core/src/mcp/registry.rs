use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::types::{CallToolResult, ResourceContents, ResourceDescriptor, ToolDescriptor};

/// A tool a provider publishes. `call` returning `Err` is reported to the
/// client as an error result, not as a protocol failure.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> Option<&str> {
        None
    }
    fn input_schema(&self) -> Value;
    async fn call(&self, args: Value) -> Result<CallToolResult>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().map(str::to_string),
            input_schema: self.input_schema(),
        }
    }
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn descriptor(&self) -> ResourceDescriptor;
    async fn read(&self) -> Result<Vec<ResourceContents>>;
}

/// A resource whose text never changes.
pub struct StaticResource {
    descriptor: ResourceDescriptor,
    text: String,
}

impl StaticResource {
    pub fn new(descriptor: ResourceDescriptor, text: impl Into<String>) -> Self {
        Self {
            descriptor,
            text: text.into(),
        }
    }
}

#[async_trait]
impl ResourceHandler for StaticResource {
    fn descriptor(&self) -> ResourceDescriptor {
        self.descriptor.clone()
    }

    async fn read(&self) -> Result<Vec<ResourceContents>> {
        Ok(vec![ResourceContents {
            uri: self.descriptor.uri.clone(),
            mime_type: self.descriptor.mime_type.clone(),
            text: Some(self.text.clone()),
            blob: None,
        }])
    }
}

/// Tools and resources a provider exposes, in registration order.
///
/// Registering a name (or uri) that already exists replaces the earlier entry
/// in place, so names stay unique and listing order stays stable.
#[derive(Default)]
pub struct CapabilityRegistry {
    tools: Vec<Arc<dyn ToolHandler>>,
    resources: Vec<(ResourceDescriptor, Arc<dyn ResourceHandler>)>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(&mut self, tool: Arc<dyn ToolHandler>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => self.tools[i] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn register_resource(&mut self, resource: Arc<dyn ResourceHandler>) {
        let descriptor = resource.descriptor();
        match self.resources.iter().position(|(d, _)| d.uri == descriptor.uri) {
            Some(i) => self.resources[i] = (descriptor, resource),
            None => self.resources.push((descriptor, resource)),
        }
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn resource(&self, uri: &str) -> Option<Arc<dyn ResourceHandler>> {
        self.resources
            .iter()
            .find(|(d, _)| d.uri == uri)
            .map(|(_, r)| Arc::clone(r))
    }

    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn resource_descriptors(&self) -> Vec<ResourceDescriptor> {
        self.resources.iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }
}
