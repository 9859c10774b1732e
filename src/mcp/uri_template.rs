//! RFC 6570 URI templates for resource templates.
//!
//! A template such as `files://{id}` or `repo://{owner}/{name}{?ref}` is
//! compiled once into an anchored regular expression with one capture group per
//! expression. Matching a URI is then a single regex match followed by a split
//! of each captured expression into its variables, so matching time is linear
//! in the URI length regardless of the template.
//!
//! Supported operators: simple (`{x}`), reserved (`{+x}`), fragment (`{#x}`),
//! label (`{.x}`), path segment (`{/x}`), path parameter (`{;x}`), query
//! (`{?x}`) and query continuation (`{&x}`), with several variables per
//! expression, the explode modifier (`{x*}`) and the prefix modifier (`{x:3}`).
//! Exploded variables extract as [`ParamValue::List`], everything else as
//! [`ParamValue::Single`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while parsing a URI template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriTemplateError {
    /// An opening brace has no matching closing brace.
    #[error("unclosed expression in URI template '{0}'")]
    Unclosed(String),

    /// An expression contains no variable.
    #[error("empty expression in URI template '{0}'")]
    EmptyExpression(String),

    /// A variable name contains characters RFC 6570 does not allow.
    #[error("invalid variable name '{name}' in URI template '{template}'")]
    InvalidVariable {
        /// The template being parsed.
        template: String,
        /// The rejected variable specification.
        name: String,
    },
}

/// A value extracted from a URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A single value.
    Single(String),
    /// Values of an exploded (`*`) variable.
    List(Vec<String>),
}

impl ParamValue {
    /// Returns the value if it is a single string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            Self::List(_) => None,
        }
    }

    /// Returns the values as a slice-like vector of string slices.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(value) => vec![value.as_str()],
            Self::List(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Variables extracted by a successful match.
pub type Params = HashMap<String, ParamValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Simple,
    Reserved,
    Fragment,
    Label,
    Path,
    PathParam,
    Query,
    QueryContinuation,
}

impl Operator {
    const fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Reserved),
            '#' => Some(Self::Fragment),
            '.' => Some(Self::Label),
            '/' => Some(Self::Path),
            ';' => Some(Self::PathParam),
            '?' => Some(Self::Query),
            '&' => Some(Self::QueryContinuation),
            _ => None,
        }
    }

    const fn first(self) -> &'static str {
        match self {
            Self::Simple | Self::Reserved => "",
            Self::Fragment => "#",
            Self::Label => ".",
            Self::Path => "/",
            Self::PathParam => ";",
            Self::Query => "?",
            Self::QueryContinuation => "&",
        }
    }

    const fn separator(self) -> char {
        match self {
            Self::Simple | Self::Reserved | Self::Fragment => ',',
            Self::Label => '.',
            Self::Path => '/',
            Self::PathParam => ';',
            Self::Query | Self::QueryContinuation => '&',
        }
    }

    const fn named(self) -> bool {
        matches!(self, Self::PathParam | Self::Query | Self::QueryContinuation)
    }

    const fn allows_reserved(self) -> bool {
        matches!(self, Self::Reserved | Self::Fragment)
    }
}

#[derive(Debug, Clone)]
struct VarSpec {
    name: String,
    explode: bool,
    prefix: Option<usize>,
}

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Expression {
        operator: Operator,
        vars: Vec<VarSpec>,
    },
}

/// A parsed, compiled URI template.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    source: String,
    parts: Vec<Part>,
    regex: Regex,
}

impl UriTemplate {
    /// Parses and compiles a template.
    ///
    /// # Errors
    ///
    /// Returns an error for unbalanced braces, empty expressions or invalid
    /// variable names.
    pub fn parse(template: &str) -> Result<Self, UriTemplateError> {
        let parts = parse_parts(template)?;
        let mut pattern = String::from("^");
        let mut group = 0usize;

        for part in &parts {
            match part {
                Part::Literal(text) => pattern.push_str(&regex::escape(text)),
                Part::Expression { operator, vars } => {
                    let body = expression_class(*operator, vars);
                    let _ = write!(
                        pattern,
                        "(?:{}(?P<g{group}>{body}))?",
                        regex::escape(operator.first())
                    );
                    group += 1;
                }
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|_| UriTemplateError::InvalidVariable {
            template: template.to_string(),
            name: pattern.clone(),
        })?;

        Ok(Self {
            source: template.to_string(),
            parts,
            regex,
        })
    }

    /// The template text as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of every variable, in template order.
    #[must_use]
    pub fn variable_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Expression { vars, .. } => Some(vars.iter().map(|v| v.name.as_str())),
                Part::Literal(_) => None,
            })
            .flatten()
            .collect()
    }

    /// Matches a concrete URI, returning the extracted variables.
    #[must_use]
    pub fn matches(&self, uri: &str) -> Option<Params> {
        let captures = self.regex.captures(uri)?;
        let mut params = Params::new();
        let mut group = 0usize;

        for part in &self.parts {
            let Part::Expression { operator, vars } = part else {
                continue;
            };
            if let Some(raw) = captures.name(&format!("g{group}")) {
                if operator.named() {
                    extract_named(*operator, vars, raw.as_str(), &mut params)?;
                } else {
                    extract_positional(*operator, vars, raw.as_str(), &mut params)?;
                }
            }
            group += 1;
        }

        Some(params)
    }

    /// Expands the template with the given variables.
    ///
    /// Missing variables are omitted, as RFC 6570 prescribes for undefined values.
    #[must_use]
    pub fn expand(&self, params: &Params) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expression { operator, vars } => {
                    expand_expression(*operator, vars, params, &mut out);
                }
            }
        }
        out
    }
}

impl std::fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// A successful match against a registered template.
#[derive(Debug)]
pub struct UriMatch<'a> {
    /// The template that matched.
    pub template: &'a UriTemplate,
    /// Variables extracted from the URI.
    pub params: Params,
}

/// An ordered set of templates; the first registered match wins.
#[derive(Debug, Default)]
pub struct UriTemplateMatcher {
    templates: IndexMap<String, UriTemplate>,
}

impl UriTemplateMatcher {
    /// Creates an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template. Re-adding the same template text keeps its position.
    pub fn add(&mut self, template: UriTemplate) {
        self.templates.insert(template.as_str().to_string(), template);
    }

    /// Number of registered templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Returns the first template, in registration order, that matches `uri`.
    #[must_use]
    pub fn match_uri(&self, uri: &str) -> Option<UriMatch<'_>> {
        self.templates.values().find_map(|template| {
            template
                .matches(uri)
                .map(|params| UriMatch { template, params })
        })
    }
}

fn parse_parts(template: &str) -> Result<Vec<Part>, UriTemplateError> {
    let mut parts = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(Part::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| UriTemplateError::Unclosed(template.to_string()))?;
        let expression = &after[..close];
        parts.push(parse_expression(template, expression)?);
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(UriTemplateError::Unclosed(template.to_string()));
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }

    Ok(parts)
}

fn parse_expression(template: &str, expression: &str) -> Result<Part, UriTemplateError> {
    let mut chars = expression.chars();
    let (operator, list) = match chars.next().and_then(Operator::from_char) {
        Some(operator) => (operator, chars.as_str()),
        None => (Operator::Simple, expression),
    };

    if list.is_empty() {
        return Err(UriTemplateError::EmptyExpression(template.to_string()));
    }

    let vars = list
        .split(',')
        .map(|varspec| parse_varspec(template, varspec))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Part::Expression { operator, vars })
}

fn parse_varspec(template: &str, varspec: &str) -> Result<VarSpec, UriTemplateError> {
    let invalid = || UriTemplateError::InvalidVariable {
        template: template.to_string(),
        name: varspec.to_string(),
    };

    let (name, explode, prefix) = if let Some(name) = varspec.strip_suffix('*') {
        (name, true, None)
    } else if let Some((name, length)) = varspec.split_once(':') {
        let length: usize = length.parse().map_err(|_| invalid())?;
        if length == 0 || length > 9999 {
            return Err(invalid());
        }
        (name, false, Some(length))
    } else {
        (varspec, false, None)
    };

    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '%');
    if !valid {
        return Err(invalid());
    }

    Ok(VarSpec {
        name: name.to_string(),
        explode,
        prefix,
    })
}

fn expression_class(operator: Operator, vars: &[VarSpec]) -> String {
    if operator.named() {
        return "[^#]*?".to_string();
    }
    if operator.allows_reserved() {
        return if operator == Operator::Fragment {
            ".*".to_string()
        } else {
            "[^?#]*".to_string()
        };
    }

    let multi = vars.len() > 1 || vars.iter().any(|v| v.explode);
    let mut excluded = String::from("?#&");
    if !(multi && operator == Operator::Path) {
        excluded.push('/');
    }
    if !multi && operator.separator() != '/' {
        excluded.push(operator.separator());
    }
    let class = format!("[^{}]", regex::escape(&excluded));

    match vars {
        [VarSpec {
            prefix: Some(length),
            ..
        }] => format!("{class}{{0,{length}}}"),
        _ => format!("{class}*"),
    }
}

fn extract_positional(operator: Operator, vars: &[VarSpec], raw: &str, params: &mut Params) -> Option<()> {
    if let [var] = vars {
        let value = if var.explode {
            ParamValue::List(
                raw.split(operator.separator())
                    .filter(|item| !item.is_empty())
                    .map(percent_decode)
                    .collect::<Option<_>>()?,
            )
        } else {
            ParamValue::Single(percent_decode(raw)?)
        };
        params.insert(var.name.clone(), value);
        return Some(());
    }

    let items: Vec<&str> = raw.split(operator.separator()).collect();
    for (index, var) in vars.iter().enumerate() {
        if var.explode && index == vars.len() - 1 {
            let rest = items.get(index..).unwrap_or_default();
            let list = rest.iter().map(|item| percent_decode(item)).collect::<Option<_>>()?;
            params.insert(var.name.clone(), ParamValue::List(list));
        } else if let Some(item) = items.get(index) {
            params.insert(var.name.clone(), ParamValue::Single(percent_decode(item)?));
        }
    }
    Some(())
}

fn extract_named(operator: Operator, vars: &[VarSpec], raw: &str, params: &mut Params) -> Option<()> {
    let pairs: Vec<(&str, &str)> = raw
        .split(operator.separator())
        .filter(|item| !item.is_empty())
        .map(|item| item.split_once('=').unwrap_or((item, "")))
        .collect();

    for var in vars {
        let mut values = pairs
            .iter()
            .filter(|(name, _)| *name == var.name)
            .map(|(_, value)| percent_decode(value))
            .collect::<Option<Vec<String>>>()?;

        if var.explode {
            if !values.is_empty() {
                params.insert(var.name.clone(), ParamValue::List(values));
            }
        } else if !values.is_empty() {
            params.insert(var.name.clone(), ParamValue::Single(values.swap_remove(0)));
        }
    }
    Some(())
}

fn expand_expression(operator: Operator, vars: &[VarSpec], params: &Params, out: &mut String) {
    let separator = operator.separator().to_string();
    let mut rendered = Vec::new();

    for var in vars {
        let Some(value) = params.get(&var.name) else {
            continue;
        };
        let encode = |s: &str| percent_encode(s, operator.allows_reserved());
        let named = |value: String| {
            if operator.named() {
                if value.is_empty() && operator == Operator::PathParam {
                    var.name.clone()
                } else {
                    format!("{}={value}", var.name)
                }
            } else {
                value
            }
        };

        match value {
            ParamValue::Single(value) => {
                let value: String = match var.prefix {
                    Some(length) => value.chars().take(length).collect(),
                    None => value.clone(),
                };
                rendered.push(named(encode(&value)));
            }
            ParamValue::List(values) if var.explode => {
                rendered.extend(values.iter().map(|v| named(encode(v))));
            }
            ParamValue::List(values) => {
                let joined = values.iter().map(|v| encode(v)).collect::<Vec<_>>().join(",");
                rendered.push(named(joined));
            }
        }
    }

    if !rendered.is_empty() {
        out.push_str(operator.first());
        out.push_str(&rendered.join(&separator));
    }
}

const RESERVED: &str = ":/?#[]@!$&'()*+,;=";

fn percent_encode(value: &str, allow_reserved: bool) -> String {
    if !allow_reserved {
        return urlencoding::encode(value).into_owned();
    }

    let mut out = String::with_capacity(value.len());
    let mut buf = [0u8; 4];
    for c in value.chars() {
        if RESERVED.contains(c) {
            out.push(c);
        } else {
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}

/// Decodes `%XX` escapes; `None` when the decoded bytes are not UTF-8.
fn percent_decode(value: &str) -> Option<String> {
    urlencoding::decode(value).ok().map(Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(value: &str) -> ParamValue {
        ParamValue::Single(value.to_string())
    }

    fn list(values: &[&str]) -> ParamValue {
        ParamValue::List(values.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn simple_variable() {
        let template = UriTemplate::parse("files://{id}").unwrap();
        let params = template.matches("files://42").unwrap();
        assert_eq!(params["id"], single("42"));
        assert!(template.matches("files://42/extra").is_none());
        assert!(template.matches("other://42").is_none());
    }

    #[test]
    fn several_segments_and_suffix() {
        let template = UriTemplate::parse("repo://{owner}/{name}.json").unwrap();
        let params = template.matches("repo://acme/widgets.json").unwrap();
        assert_eq!(params["owner"], single("acme"));
        assert_eq!(params["name"], single("widgets"));
    }

    #[test]
    fn reserved_expansion_spans_slashes() {
        let template = UriTemplate::parse("file:///{+path}").unwrap();
        let params = template.matches("file:///usr/local/bin").unwrap();
        assert_eq!(params["path"], single("usr/local/bin"));
    }

    #[test]
    fn exploded_path_yields_list() {
        let template = UriTemplate::parse("tree://root{/segments*}").unwrap();
        let params = template.matches("tree://root/a/b/c").unwrap();
        assert_eq!(params["segments"], list(&["a", "b", "c"]));
    }

    #[test]
    fn exploded_simple_yields_list() {
        let template = UriTemplate::parse("tags://{tags*}").unwrap();
        let params = template.matches("tags://red,green").unwrap();
        assert_eq!(params["tags"], list(&["red", "green"]));
    }

    #[test]
    fn query_parameters() {
        let template = UriTemplate::parse("search://items{?q,limit}").unwrap();
        let params = template.matches("search://items?q=lamp&limit=10").unwrap();
        assert_eq!(params["q"], single("lamp"));
        assert_eq!(params["limit"], single("10"));

        let params = template.matches("search://items").unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn query_continuation_and_exploded_query() {
        let template = UriTemplate::parse("search://x{?q}{&tag*}").unwrap();
        let params = template.matches("search://x?q=a&tag=1&tag=2").unwrap();
        assert_eq!(params["q"], single("a"));
        assert_eq!(params["tag"], list(&["1", "2"]));
    }

    #[test]
    fn label_and_path_param() {
        let template = UriTemplate::parse("host://www{.domain}/map{;x,y}").unwrap();
        let params = template.matches("host://www.example/map;x=1;y=2").unwrap();
        assert_eq!(params["domain"], single("example"));
        assert_eq!(params["x"], single("1"));
        assert_eq!(params["y"], single("2"));
    }

    #[test]
    fn prefix_modifier_bounds_length() {
        let template = UriTemplate::parse("code://{lang:2}").unwrap();
        assert_eq!(template.matches("code://en").unwrap()["lang"], single("en"));
        assert!(template.matches("code://eng").is_none());
    }

    #[test]
    fn values_are_percent_decoded() {
        let template = UriTemplate::parse("notes://{title}").unwrap();
        let params = template.matches("notes://hello%20world").unwrap();
        assert_eq!(params["title"], single("hello world"));

        let params = template.matches("notes://caf%C3%A9").unwrap();
        assert_eq!(params["title"], single("café"));
    }

    #[test]
    fn invalid_utf8_escapes_do_not_match() {
        let template = UriTemplate::parse("notes://{title}").unwrap();
        assert!(template.matches("notes://%FF").is_none());
        assert!(template.matches("notes://%FE").is_none());

        let query = UriTemplate::parse("search://items{?q}").unwrap();
        assert!(query.matches("search://items?q=%C3").is_none());
    }

    #[test]
    fn reserved_expansion_keeps_reserved_characters() {
        let template = UriTemplate::parse("file://{+path}").unwrap();
        let mut params = Params::new();
        params.insert("path".to_string(), single("docs/read me.md"));
        assert_eq!(template.expand(&params), "file://docs/read%20me.md");
    }

    #[test]
    fn expand_round_trips_simple_templates() {
        let template = UriTemplate::parse("repo://{owner}/{name}{?ref}").unwrap();
        let mut params = Params::new();
        params.insert("owner".to_string(), single("acme"));
        params.insert("name".to_string(), single("my widget"));
        params.insert("ref".to_string(), single("main"));
        let uri = template.expand(&params);
        assert_eq!(uri, "repo://acme/my%20widget?ref=main");
        assert_eq!(template.matches(&uri).unwrap(), params);
    }

    #[test]
    fn rejects_malformed_templates() {
        assert!(matches!(
            UriTemplate::parse("files://{id"),
            Err(UriTemplateError::Unclosed(_))
        ));
        assert!(matches!(
            UriTemplate::parse("files://{}"),
            Err(UriTemplateError::EmptyExpression(_))
        ));
        assert!(matches!(
            UriTemplate::parse("files://{a b}"),
            Err(UriTemplateError::InvalidVariable { .. })
        ));
    }

    #[test]
    fn variable_names_in_order() {
        let template = UriTemplate::parse("x://{a}/{+b}{?c,d*}").unwrap();
        assert_eq!(template.variable_names(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn first_registered_template_wins() {
        let mut matcher = UriTemplateMatcher::new();
        matcher.add(UriTemplate::parse("items://{id}").unwrap());
        matcher.add(UriTemplate::parse("items://{name}").unwrap());

        let found = matcher.match_uri("items://7").unwrap();
        assert_eq!(found.template.as_str(), "items://{id}");
        assert_eq!(found.params["id"], single("7"));
        assert!(matcher.match_uri("nothing://7").is_none());
    }

    #[test]
    fn long_adversarial_uri_matches_quickly() {
        let template = UriTemplate::parse("a://{x}{/y*}{?z}").unwrap();
        let uri = format!("a://{}", "/".repeat(10_000));
        assert!(template.matches(&uri).is_some());
        let uri = format!("a://{}!", "a".repeat(10_000));
        assert!(template.matches(&uri).is_some());
    }
}
