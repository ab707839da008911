//! Prompt definition and builder API
//!
//! Prompts are name-addressed message templates with named arguments.
//! Handlers receive the per-request [`Exchange`] and the argument map, and
//! return anything convertible into a [`PromptResponse`]: a full response,
//! a single message, a message list, or bare content (which becomes a
//! message without a role).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::exchange::Exchange;
use crate::protocol::{
    Content, GetPromptResult, PromptArgument, PromptDefinition, PromptMessage,
};

/// A boxed future for prompt handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Normalized prompt output
#[derive(Debug, Clone, Default)]
pub struct PromptResponse {
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

impl PromptResponse {
    pub fn new(messages: Vec<PromptMessage>) -> Self {
        Self {
            description: None,
            messages,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// A single user message
    pub fn user_message(text: impl Into<String>) -> Self {
        Self::new(vec![PromptMessage::user(text)])
    }

    pub(crate) fn into_result(self) -> GetPromptResult {
        GetPromptResult {
            description: self.description,
            messages: self.messages,
        }
    }
}

impl From<PromptMessage> for PromptResponse {
    fn from(message: PromptMessage) -> Self {
        PromptResponse::new(vec![message])
    }
}

impl From<Vec<PromptMessage>> for PromptResponse {
    fn from(messages: Vec<PromptMessage>) -> Self {
        PromptResponse::new(messages)
    }
}

impl From<Content> for PromptResponse {
    fn from(content: Content) -> Self {
        // Bare content becomes a message without a role
        PromptResponse::new(vec![PromptMessage {
            role: None,
            content,
        }])
    }
}

/// Prompt handler trait
pub trait PromptHandler: Send + Sync {
    fn get(
        &self,
        exchange: Exchange,
        arguments: HashMap<String, String>,
    ) -> BoxFuture<'static, Result<PromptResponse>>;
}

/// A complete prompt definition with handler
#[derive(Clone)]
pub struct Prompt {
    pub name: String,
    pub description: Option<String>,
    /// Required arguments, in insertion order: (name, description)
    pub required_args: Vec<(String, String)>,
    /// Optional arguments, in insertion order: (name, description)
    pub optional_args: Vec<(String, String)>,
    handler: Arc<dyn PromptHandler>,
}

impl Prompt {
    /// Create a new prompt builder
    pub fn builder(name: impl Into<String>) -> PromptBuilder {
        PromptBuilder::new(name)
    }

    /// Public form for prompts/list: required arguments first, then
    /// optional, each in insertion order.
    pub fn definition(&self) -> PromptDefinition {
        let mut arguments = Vec::with_capacity(self.required_args.len() + self.optional_args.len());
        for (name, description) in &self.required_args {
            arguments.push(PromptArgument {
                name: name.clone(),
                description: Some(description.clone()),
                required: true,
            });
        }
        for (name, description) in &self.optional_args {
            arguments.push(PromptArgument {
                name: name.clone(),
                description: Some(description.clone()),
                required: false,
            });
        }
        PromptDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments,
        }
    }

    /// Invoke the prompt handler
    pub fn get(
        &self,
        exchange: Exchange,
        arguments: HashMap<String, String>,
    ) -> BoxFuture<'static, Result<PromptResponse>> {
        self.handler.get(exchange, arguments)
    }
}

impl std::fmt::Debug for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("name", &self.name)
            .field("required_args", &self.required_args.len())
            .field("optional_args", &self.optional_args.len())
            .finish()
    }
}

// =============================================================================
// Builder API
// =============================================================================

/// Builder for creating prompts with a fluent API
///
/// # Example
///
/// ```rust
/// use conduit_mcp::{PromptBuilder, PromptResponse};
///
/// let prompt = PromptBuilder::new("greet")
///     .description("Greet someone")
///     .required_arg("name", "Name to greet")
///     .handler(|_exchange, args| async move {
///         let name = args.get("name").map(|s| s.as_str()).unwrap_or("World");
///         Ok(PromptResponse::user_message(format!("Greet {} warmly.", name)))
///     });
///
/// assert_eq!(prompt.name, "greet");
/// ```
pub struct PromptBuilder {
    name: String,
    description: Option<String>,
    required_args: Vec<(String, String)>,
    optional_args: Vec<(String, String)>,
}

impl PromptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required_args: Vec::new(),
            optional_args: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare a required argument
    pub fn required_arg(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.required_args.push((name.into(), description.into()));
        self
    }

    /// Declare an optional argument
    pub fn optional_arg(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.optional_args.push((name.into(), description.into()));
        self
    }

    /// Finish the prompt with a handler
    pub fn handler<R, F, Fut>(self, handler: F) -> Prompt
    where
        R: Into<PromptResponse>,
        F: Fn(Exchange, HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Prompt {
            name: self.name,
            description: self.description,
            required_args: self.required_args,
            optional_args: self.optional_args,
            handler: Arc::new(FnPromptHandler { handler }),
        }
    }

    /// Finish the prompt with a static user message (no handler logic)
    pub fn user_message(self, text: impl Into<String>) -> Prompt {
        let text = text.into();
        self.handler(move |_exchange, _args| {
            let text = text.clone();
            async move { Ok(PromptResponse::user_message(text)) }
        })
    }
}

struct FnPromptHandler<F> {
    handler: Arc<F>,
}

impl<R, F, Fut> PromptHandler for FnPromptHandler<F>
where
    R: Into<PromptResponse>,
    F: Fn(Exchange, HashMap<String, String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn get(
        &self,
        exchange: Exchange,
        arguments: HashMap<String, String>,
    ) -> BoxFuture<'static, Result<PromptResponse>> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let output = handler(exchange, arguments).await?;
            Ok(output.into())
        })
    }
}
