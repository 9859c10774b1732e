//! `completion/complete` parameter handling.
//!
//! Completion callbacks live on the prompt or template they belong to; this
//! module parses the request, finds the callback and trims the answer.

use std::collections::HashMap;

use serde::Deserialize;

use crate::mcp::types::Completion;

/// Most values a single completion response may carry.
pub const MAX_COMPLETION_VALUES: usize = 100;

/// What is being completed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum CompletionRef {
    /// An argument of a prompt.
    #[serde(rename = "ref/prompt")]
    Prompt {
        /// Prompt name.
        name: String,
    },
    /// A variable of a resource template.
    #[serde(rename = "ref/resource")]
    Resource {
        /// Template source text.
        uri: String,
    },
}

/// The argument being completed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompletionArgument {
    /// Argument or variable name.
    pub name: String,
    /// Partial value typed so far.
    #[serde(default)]
    pub value: String,
}

/// Values already resolved for other arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CompletionContext {
    /// Argument name to value.
    #[serde(default)]
    pub arguments: HashMap<String, String>,
}

/// Parameters of `completion/complete`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompleteParams {
    /// Prompt or template reference.
    #[serde(rename = "ref")]
    pub reference: CompletionRef,
    /// Argument being completed.
    pub argument: CompletionArgument,
    /// Context from earlier arguments.
    #[serde(default)]
    pub context: CompletionContext,
}

/// Caps a callback's answer to [`MAX_COMPLETION_VALUES`], keeping `total`
/// and `hasMore` truthful.
#[must_use]
pub fn finish(mut completion: Completion) -> Completion {
    let count = completion.values.len();
    if count > MAX_COMPLETION_VALUES {
        completion.values.truncate(MAX_COMPLETION_VALUES);
        completion.has_more = true;
        completion.total = Some(completion.total.unwrap_or(count).max(count));
    }
    completion
}
