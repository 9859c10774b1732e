//! Tool, prompt, resource and resource-template registries.
//!
//! Every registry is an insertion-ordered map from a unique key to an
//! immutable record. Re-registering a key swaps the whole record in place, so
//! list order is the order of first registration. Records are handed out as
//! `Arc`s and the lock is released before any handler runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{BoxError, McpError};
use crate::mcp::context::RequestContext;
use crate::mcp::schema::Schema;
use crate::mcp::types::{
    CallToolResult, Completion, GetPromptResult, Icon, ReadResourceResult, ResourceInfo,
    ToolAnnotations,
};
use crate::mcp::uri_template::{Params, UriTemplate, UriTemplateMatcher};

/// Future returned by every user callback.
pub type HandlerFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// Executes a tool with its validated input (`None` when the tool has no schema).
pub type ToolHandler =
    Arc<dyn Fn(Option<Value>, RequestContext) -> HandlerFuture<CallToolResult> + Send + Sync>;

/// Renders a prompt from its validated arguments.
pub type PromptHandler =
    Arc<dyn Fn(Option<Value>, RequestContext) -> HandlerFuture<GetPromptResult> + Send + Sync>;

/// Reads a static resource.
pub type ResourceHandler =
    Arc<dyn Fn(String, RequestContext) -> HandlerFuture<ReadResourceResult> + Send + Sync>;

/// Reads a resource matched by a template, with the extracted variables.
pub type TemplateHandler =
    Arc<dyn Fn(String, Params, RequestContext) -> HandlerFuture<ReadResourceResult> + Send + Sync>;

/// Enumerates the concrete resources behind a template.
pub type ListHandler = Arc<dyn Fn(RequestContext) -> HandlerFuture<Vec<ResourceInfo>> + Send + Sync>;

/// Decides whether an entry is currently visible. Errors count as disabled.
pub type EnabledFn = Arc<dyn Fn() -> Result<bool, BoxError> + Send + Sync>;

/// Suggests values for one prompt argument or template variable.
///
/// Receives the partial value typed so far and any arguments the client has
/// already filled in.
pub type CompleteFn =
    Arc<dyn Fn(String, HashMap<String, String>) -> HandlerFuture<Completion> + Send + Sync>;

fn complete_fn<F, Fut>(complete: F) -> CompleteFn
where
    F: Fn(String, HashMap<String, String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<String>, BoxError>> + Send + 'static,
{
    Arc::new(move |value: String, arguments: HashMap<String, String>| {
        complete(value, arguments)
            .map(|values| values.map(Completion::from_values))
            .boxed()
    })
}

fn enabled_fn<F>(enabled: F) -> EnabledFn
where
    F: Fn() -> Result<bool, BoxError> + Send + Sync + 'static,
{
    Arc::new(enabled)
}

/// Evaluates an optional enable predicate.
pub(crate) fn is_enabled(predicate: Option<&EnabledFn>, key: &str) -> bool {
    let Some(predicate) = predicate else {
        return true;
    };
    match predicate() {
        Ok(enabled) => enabled,
        Err(e) => {
            tracing::debug!(key, error = %e, "Enable predicate failed, treating entry as disabled");
            false
        }
    }
}

/// A tool definition.
#[derive(Clone)]
pub struct Tool {
    /// Unique name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Display title.
    pub title: Option<String>,
    /// Input schema; when absent the handler receives `None`.
    pub schema: Option<Arc<dyn Schema>>,
    /// Schema for `structuredContent` in results.
    pub output_schema: Option<Arc<dyn Schema>>,
    /// Behavioural hints.
    pub annotations: Option<ToolAnnotations>,
    /// Icons for client display.
    pub icons: Vec<Icon>,
    /// Visibility predicate, evaluated on every list and call.
    pub enabled: Option<EnabledFn>,
}

impl Tool {
    /// Creates a tool with a name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            title: None,
            schema: None,
            output_schema: None,
            annotations: None,
            icons: Vec::new(),
            enabled: None,
        }
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Schema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Sets the output schema.
    #[must_use]
    pub fn with_output_schema(mut self, schema: impl Schema) -> Self {
        self.output_schema = Some(Arc::new(schema));
        self
    }

    /// Sets the annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Adds an icon.
    #[must_use]
    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icons.push(icon);
        self
    }

    /// Sets the visibility predicate.
    #[must_use]
    pub fn with_enabled<F>(mut self, enabled: F) -> Self
    where
        F: Fn() -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.enabled = Some(enabled_fn(enabled));
        self
    }
}

/// A prompt definition.
#[derive(Clone)]
pub struct Prompt {
    /// Unique name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Display title.
    pub title: Option<String>,
    /// Argument schema; its `properties` and `required` become the listed arguments.
    pub schema: Option<Arc<dyn Schema>>,
    /// Completion callbacks by argument name.
    pub complete: IndexMap<String, CompleteFn>,
    /// Visibility predicate.
    pub enabled: Option<EnabledFn>,
}

impl Prompt {
    /// Creates a prompt with a name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            title: None,
            schema: None,
            complete: IndexMap::new(),
            enabled: None,
        }
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the argument schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Schema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Registers a completion callback for one argument.
    #[must_use]
    pub fn with_completion<F, Fut>(mut self, argument: impl Into<String>, complete: F) -> Self
    where
        F: Fn(String, HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>, BoxError>> + Send + 'static,
    {
        self.complete.insert(argument.into(), complete_fn(complete));
        self
    }

    /// Sets the visibility predicate.
    #[must_use]
    pub fn with_enabled<F>(mut self, enabled: F) -> Self
    where
        F: Fn() -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.enabled = Some(enabled_fn(enabled));
        self
    }
}

/// A resource reachable at one exact URI.
#[derive(Clone)]
pub struct Resource {
    /// Unique URI.
    pub uri: String,
    /// Short name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Display title.
    pub title: Option<String>,
    /// MIME type of the contents.
    pub mime_type: Option<String>,
    /// Visibility predicate.
    pub enabled: Option<EnabledFn>,
}

impl Resource {
    /// Creates a resource.
    pub fn new(uri: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: description.into(),
            title: None,
            mime_type: None,
            enabled: None,
        }
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Sets the visibility predicate.
    #[must_use]
    pub fn with_enabled<F>(mut self, enabled: F) -> Self
    where
        F: Fn() -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.enabled = Some(enabled_fn(enabled));
        self
    }

    /// The listing entry for this resource.
    #[must_use]
    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            uri: self.uri.clone(),
            name: self.name.clone(),
            title: self.title.clone(),
            description: Some(self.description.clone()),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// A family of resources addressed by an RFC 6570 URI template.
#[derive(Clone)]
pub struct ResourceTemplate {
    /// Parsed template; its source text is the registry key.
    pub template: UriTemplate,
    /// Short name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Display title.
    pub title: Option<String>,
    /// MIME type of the contents.
    pub mime_type: Option<String>,
    /// Completion callbacks by variable name.
    pub complete: IndexMap<String, CompleteFn>,
    /// Enumerates concrete resources for `resources/list`.
    pub list: Option<ListHandler>,
}

impl ResourceTemplate {
    /// Creates a template.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidTemplate`] if `template` is not a valid URI template.
    pub fn new(
        template: &str,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, McpError> {
        Ok(Self {
            template: UriTemplate::parse(template)?,
            name: name.into(),
            description: description.into(),
            title: None,
            mime_type: None,
            complete: IndexMap::new(),
            list: None,
        })
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Registers a completion callback for one template variable.
    #[must_use]
    pub fn with_completion<F, Fut>(mut self, variable: impl Into<String>, complete: F) -> Self
    where
        F: Fn(String, HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>, BoxError>> + Send + 'static,
    {
        self.complete.insert(variable.into(), complete_fn(complete));
        self
    }

    /// Sets the callback enumerating concrete resources.
    #[must_use]
    pub fn with_list<F, Fut>(mut self, list: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResourceInfo>, BoxError>> + Send + 'static,
    {
        self.list = Some(Arc::new(move |ctx: RequestContext| list(ctx).boxed()));
        self
    }

    /// The template source text.
    #[must_use]
    pub fn uri_template(&self) -> &str {
        self.template.as_str()
    }
}

/// A registered definition together with its handler.
pub(crate) struct Entry<D, H> {
    pub def: D,
    pub execute: H,
}

pub(crate) type ToolEntry = Entry<Tool, ToolHandler>;
pub(crate) type PromptEntry = Entry<Prompt, PromptHandler>;
pub(crate) type ResourceEntry = Entry<Resource, ResourceHandler>;
pub(crate) type TemplateEntry = Entry<ResourceTemplate, TemplateHandler>;

/// Insertion-ordered map of entries keyed by name or URI.
pub(crate) struct Registry<D, H> {
    entries: RwLock<IndexMap<String, Arc<Entry<D, H>>>>,
}

impl<D, H> Default for Registry<D, H> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }
}

impl<D, H> Registry<D, H> {
    /// Inserts or replaces an entry. Returns `true` if a previous entry was replaced.
    pub fn insert(&self, key: String, entry: Entry<D, H>) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(entry))
            .is_some()
    }

    /// Looks up an entry by exact key.
    pub fn get(&self, key: &str) -> Option<Arc<Entry<D, H>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Every entry, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Entry<D, H>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct TemplateTable {
    entries: IndexMap<String, Arc<TemplateEntry>>,
    matcher: UriTemplateMatcher,
}

/// Resource templates, matched against URIs in registration order.
#[derive(Default)]
pub(crate) struct TemplateRegistry {
    table: RwLock<TemplateTable>,
}

impl TemplateRegistry {
    /// Inserts or replaces a template. Returns `true` if one was replaced.
    pub fn insert(&self, entry: TemplateEntry) -> bool {
        let key = entry.def.uri_template().to_string();
        let template = entry.def.template.clone();
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.matcher.add(template);
        table.entries.insert(key, Arc::new(entry)).is_some()
    }

    /// Looks up a template by its source text.
    pub fn get(&self, uri_template: &str) -> Option<Arc<TemplateEntry>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(uri_template)
            .cloned()
    }

    /// Finds the first registered template matching `uri`.
    pub fn resolve(&self, uri: &str) -> Option<(Arc<TemplateEntry>, Params)> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let found = table.matcher.match_uri(uri)?;
        let entry = table.entries.get(found.template.as_str())?;
        Some((Arc::clone(entry), found.params))
    }

    /// Every template, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<TemplateEntry>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::uri_template::ParamValue;

    fn noop_template(template: &str) -> TemplateEntry {
        let handler: TemplateHandler =
            Arc::new(|uri: String, _: Params, _: RequestContext| {
                async move { Ok(ReadResourceResult::text(uri, "")) }.boxed()
            });
        Entry {
            def: ResourceTemplate::new(template, template, "test").unwrap(),
            execute: handler,
        }
    }

    #[test]
    fn replacing_keeps_first_position() {
        let registry: Registry<&str, ()> = Registry::default();
        assert!(!registry.insert("a".into(), Entry { def: "first", execute: () }));
        assert!(!registry.insert("b".into(), Entry { def: "b", execute: () }));
        assert!(registry.insert("a".into(), Entry { def: "second", execute: () }));

        let defs: Vec<_> = registry.snapshot().iter().map(|e| e.def).collect();
        assert_eq!(defs, vec!["second", "b"]);
        assert_eq!(registry.get("a").unwrap().def, "second");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn first_registered_template_wins() {
        let registry = TemplateRegistry::default();
        registry.insert(noop_template("files://{id}"));
        registry.insert(noop_template("files://{name}"));

        let (entry, params) = registry.resolve("files://42").unwrap();
        assert_eq!(entry.def.uri_template(), "files://{id}");
        assert_eq!(params.get("id"), Some(&ParamValue::Single("42".into())));
        assert!(registry.resolve("other://42").is_none());
    }

    #[test]
    fn enable_predicate_errors_mean_disabled() {
        let ok = enabled_fn(|| Ok(true));
        let off = enabled_fn(|| Ok(false));
        let broken = enabled_fn(|| Err("backend down".into()));

        assert!(is_enabled(None, "x"));
        assert!(is_enabled(Some(&ok), "x"));
        assert!(!is_enabled(Some(&off), "x"));
        assert!(!is_enabled(Some(&broken), "x"));
    }

    #[test]
    fn invalid_template_is_rejected() {
        assert!(matches!(
            ResourceTemplate::new("files://{id", "bad", "bad"),
            Err(McpError::InvalidTemplate(_))
        ));
    }

    #[tokio::test]
    async fn completion_callbacks_wrap_plain_lists() {
        let prompt = Prompt::new("greet", "Greets").with_completion("name", |value, _| async move {
            Ok(vec![format!("{value}lice"), format!("{value}nne")])
        });
        let complete = prompt.complete.get("name").unwrap();
        let completion = complete("A".into(), HashMap::new()).await.unwrap();
        assert_eq!(completion.values, vec!["Alice", "Anne"]);
    }
}
