//! Route descriptors and call parameters.
//!
//! A [`RouteDescriptor`] is the static description of one endpoint on an
//! external service: its method, a path template such as
//! `/v1/orders/{orderId}`, and the set of parameter names a call must supply.
//! [`RouteParams`] carries the values for a single call.

use crate::{Error, Result};
use http::Method;
use std::collections::{BTreeMap, BTreeSet};

/// Immutable description of a callable endpoint.
///
/// Placeholders in the path template (`{name}`) are required automatically.
/// Additional required names can be declared with [`RouteDescriptor::require`];
/// those, like any other supplied param that does not appear in the template,
/// are sent as query parameters.
///
/// # Examples
///
/// ```
/// use service_client::{RouteDescriptor, RouteParams};
///
/// let route = RouteDescriptor::get("/v1/orders/{orderId}").require("expand");
/// assert!(route.required_params().contains("orderId"));
/// assert!(route.required_params().contains("expand"));
///
/// let params = RouteParams::new().with("orderId", "42");
/// assert!(route.validate(&params).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    method: Method,
    path_template: String,
    required_params: BTreeSet<String>,
}

impl RouteDescriptor {
    /// Creates a descriptor, deriving the required set from the template placeholders.
    pub fn new(method: Method, path_template: impl Into<String>) -> Self {
        let path_template = path_template.into();
        let required_params = placeholders(&path_template)
            .into_iter()
            .map(str::to_string)
            .collect();

        Self {
            method,
            path_template,
            required_params,
        }
    }

    /// Shorthand for a `GET` route.
    pub fn get(path_template: impl Into<String>) -> Self {
        Self::new(Method::GET, path_template)
    }

    /// Shorthand for a `POST` route.
    pub fn post(path_template: impl Into<String>) -> Self {
        Self::new(Method::POST, path_template)
    }

    /// Marks an additional parameter as required.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required_params.insert(name.into());
        self
    }

    /// The HTTP method of this route.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The raw path template.
    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    /// The names every call must supply.
    pub fn required_params(&self) -> &BTreeSet<String> {
        &self.required_params
    }

    /// Checks that `params` supplies every required name with a non-empty value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] listing the missing names.
    pub fn validate(&self, params: &RouteParams) -> Result<()> {
        let missing: Vec<String> = self
            .required_params
            .iter()
            .filter(|name| params.get(name).map_or(true, str::is_empty))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation {
                route: self.path_template.clone(),
                missing,
            })
        }
    }

    /// Validates `params` and binds them into path segments and query pairs.
    ///
    /// Segment values are left unescaped; escaping happens when the segments
    /// are appended to a URL.
    pub(crate) fn bind(&self, params: &RouteParams) -> Result<BoundRoute> {
        self.validate(params)?;

        let in_path: BTreeSet<&str> = placeholders(&self.path_template).into_iter().collect();

        let segments = self
            .path_template
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| substitute(segment, params))
            .collect();

        let query = params
            .iter()
            .filter(|(name, _)| !in_path.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(BoundRoute { segments, query })
    }
}

/// A route with its params applied, ready to be joined onto a base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundRoute {
    pub(crate) segments: Vec<String>,
    pub(crate) query: Vec<(String, String)>,
}

/// Named values for a single call.
///
/// Ordered by name so that bound query strings are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(BTreeMap<String, String>);

impl RouteParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, replacing any previous value.
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts a parameter, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.0.insert(name.into(), value.to_string());
    }

    /// Returns the value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Iterates over the params in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Returns `true` if no params are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RouteParams
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = RouteParams::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Extracts `{name}` placeholders in order of appearance.
///
/// An unterminated or empty brace pair is treated as literal text.
fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if close > 0 => {
                names.push(&after[..close]);
                rest = &after[close + 1..];
            }
            _ => break,
        }
    }

    names
}

fn substitute(segment: &str, params: &RouteParams) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if close > 0 => {
                out.push_str(&rest[..open]);
                out.push_str(params.get(&after[..close]).unwrap_or_default());
                rest = &after[close + 1..];
            }
            _ => break,
        }
    }

    out.push_str(rest);
    out
}
