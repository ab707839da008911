//! Resources: provider interface, in-memory lookup provider, templates
//!
//! The session core treats resources as a pluggable capability. A
//! [`ResourceProvider`] answers listing and URI lookups; the bundled
//! [`InMemoryResources`] provider is a plain lookup map with subscription
//! support. Resource templates expose parameterized URIs using
//! [RFC 6570](https://datatracker.ietf.org/doc/html/rfc6570) Level 1
//! expansion (`{var}` stops at `/`, `{+var}` spans it) and are consulted
//! when the provider misses.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::error::Result;
use crate::exchange::Exchange;
use crate::protocol::{
    ContentAnnotations, ListResourcesResult, ReadResourceResult, ResourceContent,
    ResourceDefinition, ResourceTemplateDefinition,
};

/// A boxed future for resource handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The body a resource read produces, before wire normalization
#[derive(Debug, Clone)]
pub enum ResourceBody {
    /// Served as `{uri, mimeType, text}`
    Text(String),
    /// Served as `{uri, mimeType, blob: base64}`
    Blob(Vec<u8>),
    /// Pre-normalized contents, passed through verbatim
    Contents(Vec<ResourceContent>),
}

impl ResourceBody {
    fn into_contents(self, uri: &str, mime_type: Option<&str>) -> Vec<ResourceContent> {
        match self {
            ResourceBody::Text(text) => vec![ResourceContent {
                uri: Some(uri.to_string()),
                mime_type: Some(mime_type.unwrap_or("text/plain").to_string()),
                text: Some(text),
                blob: None,
            }],
            ResourceBody::Blob(data) => vec![ResourceContent {
                uri: Some(uri.to_string()),
                mime_type: Some(mime_type.unwrap_or("application/octet-stream").to_string()),
                text: None,
                blob: Some(BASE64.encode(data)),
            }],
            ResourceBody::Contents(contents) => contents,
        }
    }
}

impl From<String> for ResourceBody {
    fn from(text: String) -> Self {
        ResourceBody::Text(text)
    }
}

impl From<&str> for ResourceBody {
    fn from(text: &str) -> Self {
        ResourceBody::Text(text.to_string())
    }
}

impl From<Vec<u8>> for ResourceBody {
    fn from(data: Vec<u8>) -> Self {
        ResourceBody::Blob(data)
    }
}

/// Read handler for a single resource
pub trait ResourceReader: Send + Sync {
    fn read(&self, exchange: Exchange, uri: String) -> BoxFuture<'static, Result<ResourceBody>>;
}

struct FnResourceReader<F> {
    handler: Arc<F>,
}

impl<F, Fut, B> ResourceReader for FnResourceReader<F>
where
    B: Into<ResourceBody>,
    F: Fn(Exchange, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<B>> + Send + 'static,
{
    fn read(&self, exchange: Exchange, uri: String) -> BoxFuture<'static, Result<ResourceBody>> {
        let handler = self.handler.clone();
        Box::pin(async move { Ok(handler(exchange, uri).await?.into()) })
    }
}

/// A resource descriptor with its read handler
#[derive(Clone)]
pub struct ResourceEntry {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub annotations: Option<ContentAnnotations>,
    reader: Arc<dyn ResourceReader>,
}

impl ResourceEntry {
    pub fn builder(uri: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder::new(uri)
    }

    /// Public descriptor for resources/list
    pub fn definition(&self) -> ResourceDefinition {
        ResourceDefinition {
            uri: self.uri.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Read the resource and normalize the body to the wire shape
    pub async fn read(&self, exchange: Exchange) -> Result<ReadResourceResult> {
        let body = self.reader.read(exchange, self.uri.clone()).await?;
        Ok(ReadResourceResult {
            contents: body.into_contents(&self.uri, self.mime_type.as_deref()),
        })
    }
}

impl std::fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .finish()
    }
}

/// Builder for resource entries
pub struct ResourceBuilder {
    uri: String,
    name: Option<String>,
    description: Option<String>,
    mime_type: Option<String>,
    annotations: Option<ContentAnnotations>,
}

impl ResourceBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
            description: None,
            mime_type: None,
            annotations: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn annotations(mut self, annotations: ContentAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Finish with a read handler
    pub fn handler<B, F, Fut>(self, handler: F) -> ResourceEntry
    where
        B: Into<ResourceBody>,
        F: Fn(Exchange, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B>> + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| self.uri.clone());
        ResourceEntry {
            uri: self.uri,
            name,
            description: self.description,
            mime_type: self.mime_type,
            annotations: self.annotations,
            reader: Arc::new(FnResourceReader {
                handler: Arc::new(handler),
            }),
        }
    }

    /// Finish with static text content
    pub fn text(self, text: impl Into<String>) -> ResourceEntry {
        let text = text.into();
        self.handler(move |_exchange, _uri| {
            let text = text.clone();
            async move { Ok(ResourceBody::Text(text)) }
        })
    }

    /// Finish with static binary content
    pub fn blob(self, data: Vec<u8>) -> ResourceEntry {
        self.handler(move |_exchange, _uri| {
            let data = data.clone();
            async move { Ok(ResourceBody::Blob(data)) }
        })
    }
}

// =============================================================================
// Provider interface
// =============================================================================

/// The pluggable resources capability.
///
/// When no provider is configured on the server, every `resources/*`
/// method answers Invalid Params. Subscription state itself lives on the
/// session; the provider hooks below let an implementation veto or track
/// subscriptions.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Whether `resources/list_changed` notifications are meaningful for
    /// this provider. Advertised at initialize time.
    fn supports_list_changed(&self) -> bool {
        false
    }

    /// Whether `resources/subscribe` is supported. Advertised at
    /// initialize time and consulted before emitting `resources/updated`.
    fn supports_subscriptions(&self) -> bool {
        false
    }

    /// List resource descriptors. The cursor is accepted and echoed
    /// through but not enforced.
    async fn list(&self, exchange: &Exchange, cursor: Option<&str>) -> Result<ListResourcesResult>;

    /// Resolve a URI to its entry; `None` means not found.
    async fn get(&self, exchange: &Exchange, uri: &str) -> Result<Option<ResourceEntry>>;

    /// Called when a client subscribes to a URI, before the session
    /// records the subscription.
    async fn subscribe(&self, _exchange: &Exchange, _uri: &str) -> Result<()> {
        Ok(())
    }

    /// Called when a client unsubscribes from a URI.
    async fn unsubscribe(&self, _exchange: &Exchange, _uri: &str) -> Result<()> {
        Ok(())
    }
}

/// Default in-memory provider: a lookup map of URI to entry.
pub struct InMemoryResources {
    entries: RwLock<HashMap<String, Arc<ResourceEntry>>>,
    subscriptions_supported: bool,
}

impl InMemoryResources {
    /// An empty provider with subscription support enabled.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscriptions_supported: true,
        }
    }

    /// Disable the subscribe capability advertisement.
    pub fn without_subscriptions(mut self) -> Self {
        self.subscriptions_supported = false;
        self
    }

    /// Add an entry, replacing any previous entry for the same URI.
    pub fn insert(&self, entry: ResourceEntry) {
        self.entries
            .write()
            .expect("resource map poisoned")
            .insert(entry.uri.clone(), Arc::new(entry));
    }

    /// Remove an entry by URI.
    pub fn remove(&self, uri: &str) -> bool {
        self.entries
            .write()
            .expect("resource map poisoned")
            .remove(uri)
            .is_some()
    }

    /// Builder-style insert for configuration time.
    pub fn with(self, entry: ResourceEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("resource map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResourceProvider for InMemoryResources {
    fn supports_list_changed(&self) -> bool {
        true
    }

    fn supports_subscriptions(&self) -> bool {
        self.subscriptions_supported
    }

    async fn list(
        &self,
        _exchange: &Exchange,
        cursor: Option<&str>,
    ) -> Result<ListResourcesResult> {
        let mut resources: Vec<ResourceDefinition> = {
            let entries = self.entries.read().expect("resource map poisoned");
            entries.values().map(|e| e.definition()).collect()
        };
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        // Cursor accepted, not enforced
        let _ = cursor;
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn get(&self, _exchange: &Exchange, uri: &str) -> Result<Option<ResourceEntry>> {
        let entries = self.entries.read().expect("resource map poisoned");
        Ok(entries.get(uri).map(|e| e.as_ref().clone()))
    }
}

// =============================================================================
// Resource templates
// =============================================================================

/// Read handler for a template match: receives the concrete URI and the
/// extracted template variables.
pub trait TemplateReader: Send + Sync {
    fn read(
        &self,
        exchange: Exchange,
        uri: String,
        variables: HashMap<String, String>,
    ) -> BoxFuture<'static, Result<ResourceBody>>;
}

struct FnTemplateReader<F> {
    handler: Arc<F>,
}

impl<F, Fut, B> TemplateReader for FnTemplateReader<F>
where
    B: Into<ResourceBody>,
    F: Fn(Exchange, String, HashMap<String, String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<B>> + Send + 'static,
{
    fn read(
        &self,
        exchange: Exchange,
        uri: String,
        variables: HashMap<String, String>,
    ) -> BoxFuture<'static, Result<ResourceBody>> {
        let handler = self.handler.clone();
        Box::pin(async move { Ok(handler(exchange, uri, variables).await?.into()) })
    }
}

/// Compile a URI template into a regex pattern and extract variable names
///
/// Supports RFC 6570 Level 1 (simple expansion):
/// - `{var}` matches any characters except `/`
/// - `{+var}` matches any characters including `/` (reserved expansion)
///
/// Returns the compiled regex and a list of variable names in order.
fn compile_uri_template(template: &str) -> (regex::Regex, Vec<String>) {
    let mut pattern = String::from("^");
    let mut variables = Vec::new();

    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            // Check for + prefix (reserved expansion)
            let is_reserved = chars.peek() == Some(&'+');
            if is_reserved {
                chars.next();
            }

            // Collect variable name
            let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            variables.push(var_name);

            if is_reserved {
                // Reserved expansion - match anything
                pattern.push_str("(.+)");
            } else {
                // Simple expansion - match non-slash characters
                pattern.push_str("([^/]+)");
            }
        } else {
            // Escape regex special characters
            match c {
                '.' | '+' | '*' | '?' | '^' | '$' | '(' | ')' | '[' | ']' | '{' | '}' | '|'
                | '\\' => {
                    pattern.push('\\');
                    pattern.push(c);
                }
                _ => pattern.push(c),
            }
        }
    }

    pattern.push('$');

    // Compile the regex - panic if template is malformed
    let regex = regex::Regex::new(&pattern)
        .unwrap_or_else(|e| panic!("Invalid URI template '{}': {}", template, e));

    (regex, variables)
}

/// A parameterized resource using `{var}` / `{+var}` URI placeholders
#[derive(Clone)]
pub struct ResourceTemplate {
    pub uri_template: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub annotations: Option<ContentAnnotations>,
    /// Compiled regex for matching URIs
    pattern: regex::Regex,
    /// Variable names in order of appearance
    variables: Vec<String>,
    reader: Arc<dyn TemplateReader>,
}

impl ResourceTemplate {
    pub fn builder(uri_template: impl Into<String>) -> ResourceTemplateBuilder {
        ResourceTemplateBuilder::new(uri_template)
    }

    /// Public descriptor for resources/templates/list
    pub fn definition(&self) -> ResourceTemplateDefinition {
        ResourceTemplateDefinition {
            uri_template: self.uri_template.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Match a concrete URI against the template, extracting variables.
    ///
    /// Returns `Some(HashMap)` with extracted variables if the URI
    /// matches, `None` if it doesn't. A `{var}` capture never spans `/`;
    /// use `{+var}` for path-like values.
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        self.pattern.captures(uri).map(|caps| {
            self.variables
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    caps.get(i + 1)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect()
        })
    }

    /// Read via the template handler, normalizing the body
    pub async fn read(
        &self,
        exchange: Exchange,
        uri: &str,
        variables: HashMap<String, String>,
    ) -> Result<ReadResourceResult> {
        let body = self
            .reader
            .read(exchange, uri.to_string(), variables)
            .await?;
        Ok(ReadResourceResult {
            contents: body.into_contents(uri, self.mime_type.as_deref()),
        })
    }
}

impl std::fmt::Debug for ResourceTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTemplate")
            .field("uri_template", &self.uri_template)
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

/// Builder for resource templates
pub struct ResourceTemplateBuilder {
    uri_template: String,
    name: Option<String>,
    description: Option<String>,
    mime_type: Option<String>,
    annotations: Option<ContentAnnotations>,
}

impl ResourceTemplateBuilder {
    pub fn new(uri_template: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: None,
            description: None,
            mime_type: None,
            annotations: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn handler<B, F, Fut>(self, handler: F) -> ResourceTemplate
    where
        B: Into<ResourceBody>,
        F: Fn(Exchange, String, HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B>> + Send + 'static,
    {
        let (pattern, variables) = compile_uri_template(&self.uri_template);
        let name = self.name.unwrap_or_else(|| self.uri_template.clone());
        ResourceTemplate {
            uri_template: self.uri_template,
            name,
            description: self.description,
            mime_type: self.mime_type,
            annotations: self.annotations,
            pattern,
            variables,
            reader: Arc::new(FnTemplateReader {
                handler: Arc::new(handler),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::McpServer;

    fn test_exchange() -> Exchange {
        McpServer::new().session().exchange_for_tests()
    }

    #[tokio::test]
    async fn test_text_resource_normalization() {
        let entry = ResourceBuilder::new("file:///readme.md")
            .name("README")
            .mime_type("text/markdown")
            .text("# Hello");

        let result = entry.read(test_exchange()).await.unwrap();
        assert_eq!(result.contents.len(), 1);
        let content = &result.contents[0];
        assert_eq!(content.uri.as_deref(), Some("file:///readme.md"));
        assert_eq!(content.mime_type.as_deref(), Some("text/markdown"));
        assert_eq!(content.text.as_deref(), Some("# Hello"));
        assert!(content.blob.is_none());
    }

    #[tokio::test]
    async fn test_blob_resource_base64() {
        let entry = ResourceBuilder::new("file:///logo.bin").blob(vec![0xde, 0xad]);
        let result = entry.read(test_exchange()).await.unwrap();
        let content = &result.contents[0];
        assert_eq!(
            content.mime_type.as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(content.blob.as_deref(), Some("3q0="));
    }

    #[tokio::test]
    async fn test_in_memory_provider_lookup() {
        let provider = InMemoryResources::new()
            .with(ResourceBuilder::new("mem://a").name("A").text("a"))
            .with(ResourceBuilder::new("mem://b").name("B").text("b"));

        let ex = test_exchange();
        let listing = provider.list(&ex, None).await.unwrap();
        assert_eq!(listing.resources.len(), 2);
        assert_eq!(listing.resources[0].uri, "mem://a");

        assert!(provider.get(&ex, "mem://a").await.unwrap().is_some());
        assert!(provider.get(&ex, "mem://missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_provider_mutation() {
        let provider = InMemoryResources::new();
        provider.insert(ResourceBuilder::new("mem://x").text("x"));
        assert_eq!(provider.len(), 1);
        assert!(provider.remove("mem://x"));
        assert!(provider.is_empty());
    }

    #[test]
    fn test_compile_uri_template_simple() {
        let (regex, vars) = compile_uri_template("file:///{path}");
        assert_eq!(vars, vec!["path"]);
        assert!(regex.is_match("file:///README.md"));
        assert!(!regex.is_match("file:///foo/bar")); // no slashes in simple expansion
    }

    #[test]
    fn test_compile_uri_template_reserved_expansion() {
        let (regex, vars) = compile_uri_template("file:///{+path}");
        assert_eq!(vars, vec!["path"]);
        assert!(regex.is_match("file:///README.md"));
        assert!(regex.is_match("file:///foo/bar/baz.txt")); // slashes allowed
    }

    #[test]
    fn test_compile_uri_template_special_chars() {
        let (regex, vars) = compile_uri_template("http://example.com/api?query={q}");
        assert_eq!(vars, vec!["q"]);
        assert!(regex.is_match("http://example.com/api?query=hello"));
    }

    #[test]
    fn test_template_match_single_variable() {
        let template = ResourceTemplateBuilder::new("file:///{path}")
            .name("Files")
            .handler(|_ex, _uri, _vars| async move { Ok("x") });

        let vars = template.match_uri("file:///main.rs").unwrap();
        assert_eq!(vars.get("path").map(String::as_str), Some("main.rs"));
        // Simple expansion never spans a slash
        assert!(template.match_uri("file:///src/main.rs").is_none());
        assert!(template.match_uri("http:///x").is_none());
    }

    #[test]
    fn test_template_reserved_expansion_spans_slashes() {
        let template = ResourceTemplateBuilder::new("file:///{+path}")
            .name("Tree")
            .handler(|_ex, _uri, _vars| async move { Ok("x") });

        let vars = template.match_uri("file:///src/main.rs").unwrap();
        assert_eq!(vars.get("path").map(String::as_str), Some("src/main.rs"));
    }

    #[test]
    fn test_template_match_multiple_variables() {
        let template = ResourceTemplateBuilder::new("db://{table}/{id}")
            .handler(|_ex, _uri, _vars| async move { Ok("x") });

        let vars = template.match_uri("db://users/42").unwrap();
        assert_eq!(vars.get("table").map(String::as_str), Some("users"));
        assert_eq!(vars.get("id").map(String::as_str), Some("42"));
        assert!(template.match_uri("db://users").is_none()); // missing id
    }

    #[test]
    fn test_template_rejects_empty_variable() {
        let template = ResourceTemplateBuilder::new("file:///{path}")
            .handler(|_ex, _uri, _vars| async move { Ok("x") });
        assert!(template.match_uri("file:///").is_none());
    }

    #[tokio::test]
    async fn test_template_read_uses_variables() {
        let template = ResourceTemplateBuilder::new("greet://{name}")
            .mime_type("text/plain")
            .handler(|_ex, _uri, vars: HashMap<String, String>| async move {
                Ok(format!("hi {}", vars.get("name").cloned().unwrap_or_default()))
            });

        let vars = template.match_uri("greet://sam").unwrap();
        let result = template
            .read(test_exchange(), "greet://sam", vars)
            .await
            .unwrap();
        assert_eq!(result.contents[0].text.as_deref(), Some("hi sam"));
    }
}
