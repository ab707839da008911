//! Tool definition and builder API
//!
//! Provides ergonomic ways to define MCP tools:
//!
//! 1. **Builder pattern** - Fluent API with typed input deserialization
//! 2. **Raw handlers** - Work directly with `serde_json::Value` arguments
//!
//! Tool handlers receive the per-request [`Exchange`] and return anything
//! convertible into a [`ToolResponse`]; strings become text content, byte
//! vectors become embedded `application/octet-stream` resources, and
//! content values pass through unchanged. Domain-level failures are
//! expressed with [`ToolResponse::error`], which maps to a successful
//! `tools/call` response with `isError: true`. Returning a JSON-RPC error
//! from the handler bypasses normalization entirely.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, JsonRpcError, Result};
use crate::exchange::Exchange;
use crate::protocol::{
    CallToolResult, Content, ResourceContent, ToolAnnotations, ToolDefinition,
};

/// A boxed future for tool handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Normalized tool output: a content list plus the domain error flag.
#[derive(Debug, Clone, Default)]
pub struct ToolResponse {
    pub content: Vec<Content>,
    pub is_error: bool,
}

impl ToolResponse {
    /// A single text content item
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// A domain-level failure: reported as content with `isError: true`,
    /// not as a JSON-RPC error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }

    pub fn content(content: Vec<Content>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Embed raw bytes as an `application/octet-stream` resource
    pub fn bytes(data: &[u8]) -> Self {
        Self {
            content: vec![Content::Resource {
                resource: ResourceContent {
                    uri: None,
                    mime_type: Some("application/octet-stream".to_string()),
                    text: None,
                    blob: Some(BASE64.encode(data)),
                },
                annotations: None,
            }],
            is_error: false,
        }
    }

    /// Pretty-print a JSON value as text content
    pub fn json(value: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_default())
    }

    pub(crate) fn into_result(self) -> CallToolResult {
        CallToolResult {
            content: self.content,
            is_error: self.is_error,
        }
    }

    /// Text of the first content item, if it is text. Handy in tests.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            Content::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

impl From<String> for ToolResponse {
    fn from(text: String) -> Self {
        ToolResponse::text(text)
    }
}

impl From<&str> for ToolResponse {
    fn from(text: &str) -> Self {
        ToolResponse::text(text)
    }
}

impl From<Vec<u8>> for ToolResponse {
    fn from(data: Vec<u8>) -> Self {
        ToolResponse::bytes(&data)
    }
}

impl From<Content> for ToolResponse {
    fn from(content: Content) -> Self {
        ToolResponse::content(vec![content])
    }
}

impl From<Vec<Content>> for ToolResponse {
    fn from(content: Vec<Content>) -> Self {
        ToolResponse::content(content)
    }
}

/// Tool handler trait - the core abstraction for tool execution
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the given arguments
    fn call(&self, exchange: Exchange, args: Value) -> BoxFuture<'static, Result<ToolResponse>>;
}

/// A complete tool definition with handler
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: Option<String>,
    pub annotations: Option<ToolAnnotations>,
    pub input_schema: Value,
    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Create a new tool builder
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    /// Get the tool definition for tools/list (public fields only)
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Call the tool
    pub fn call(&self, exchange: Exchange, args: Value) -> BoxFuture<'static, Result<ToolResponse>> {
        self.handler.call(exchange, args)
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

// =============================================================================
// Builder API
// =============================================================================

/// Builder for creating tools with a fluent API
///
/// # Example
///
/// ```rust
/// use conduit_mcp::{ToolBuilder, ToolResponse};
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, JsonSchema)]
/// struct SumInput {
///     a: i64,
///     b: i64,
/// }
///
/// let tool = ToolBuilder::new("sum")
///     .description("Add two numbers")
///     .read_only()
///     .handler(|_exchange, input: SumInput| async move {
///         Ok(ToolResponse::text(format!("{}", input.a + input.b)))
///     });
///
/// assert_eq!(tool.name, "sum");
/// ```
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    annotations: Option<ToolAnnotations>,
    input_schema: Option<Value>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            annotations: None,
            input_schema: None,
        }
    }

    /// Set a human-readable title for the tool (stored in annotations)
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(ToolAnnotations::default)
            .title = Some(title.into());
        self
    }

    /// Set the tool description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the tool as read-only (does not modify state)
    pub fn read_only(mut self) -> Self {
        self.annotations
            .get_or_insert_with(ToolAnnotations::default)
            .read_only_hint = true;
        self
    }

    /// Mark the tool as non-destructive
    pub fn non_destructive(mut self) -> Self {
        self.annotations
            .get_or_insert_with(ToolAnnotations::default)
            .destructive_hint = false;
        self
    }

    /// Mark the tool as idempotent (same args = same effect)
    pub fn idempotent(mut self) -> Self {
        self.annotations
            .get_or_insert_with(ToolAnnotations::default)
            .idempotent_hint = true;
        self
    }

    /// Set tool annotations directly
    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Override the advertised input schema. Schemas are advertised
    /// verbatim; arguments are not validated against them.
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Finish the tool with a typed handler.
    ///
    /// The input type must implement `JsonSchema` and `DeserializeOwned`;
    /// its derived schema is advertised unless one was set explicitly. The
    /// handler may return anything convertible into a [`ToolResponse`].
    pub fn handler<I, R, F, Fut>(self, handler: F) -> Tool
    where
        I: JsonSchema + DeserializeOwned + Send + 'static,
        R: Into<ToolResponse> + 'static,
        F: Fn(Exchange, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let schema = self.input_schema.unwrap_or_else(|| {
            serde_json::to_value(schemars::schema_for!(I))
                .unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
        });
        let handler = Arc::new(handler);
        Tool {
            name: self.name,
            description: self.description,
            annotations: self.annotations,
            input_schema: schema,
            handler: Arc::new(TypedHandler::<I, R, F> {
                handler,
                _phantom: std::marker::PhantomData,
            }),
        }
    }

    /// Finish the tool with a raw JSON handler (no deserialization).
    pub fn raw_handler<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Exchange, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResponse>> + Send + 'static,
    {
        let schema = self
            .input_schema
            .unwrap_or_else(|| serde_json::json!({ "type": "object", "additionalProperties": true }));
        Tool {
            name: self.name,
            description: self.description,
            annotations: self.annotations,
            input_schema: schema,
            handler: Arc::new(RawHandler { handler }),
        }
    }
}

/// Handler that deserializes input to a specific type
struct TypedHandler<I, R, F> {
    handler: Arc<F>,
    _phantom: std::marker::PhantomData<fn(I) -> R>,
}

impl<I, R, F, Fut> ToolHandler for TypedHandler<I, R, F>
where
    I: JsonSchema + DeserializeOwned + Send + 'static,
    R: Into<ToolResponse>,
    F: Fn(Exchange, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn call(&self, exchange: Exchange, args: Value) -> BoxFuture<'static, Result<ToolResponse>> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let input: I = serde_json::from_value(args).map_err(|e| {
                Error::JsonRpc(JsonRpcError::invalid_params(format!("Invalid input: {}", e)))
            })?;
            let output = handler(exchange, input).await?;
            Ok(output.into())
        })
    }
}

/// Handler that works with raw JSON
struct RawHandler<F> {
    handler: F,
}

impl<F, Fut> ToolHandler for RawHandler<F>
where
    F: Fn(Exchange, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResponse>> + Send + 'static,
{
    fn call(&self, exchange: Exchange, args: Value) -> BoxFuture<'static, Result<ToolResponse>> {
        Box::pin((self.handler)(exchange, args))
    }
}
