// Identifier validation and namespace qualification for broker-facing ids.
use crate::core::error::{Error, ErrorKind};
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+$").expect("identifier pattern"));
static PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w*$").expect("prefix pattern"));

/// Checks that `raw` is a bare identifier made of word characters only.
pub fn validate_identifier(raw: &str) -> Result<&str, Error> {
    if IDENTIFIER.is_match(raw) {
        Ok(raw)
    } else {
        Err(Error::new(ErrorKind::InvalidIdentifier)
            .with_message(format!("identifier must be alphanumeric, \"{raw}\" given")))
    }
}

/// Like [`validate_identifier`] but also accepts the empty prefix.
pub fn validate_prefix(raw: &str) -> Result<&str, Error> {
    if PREFIX.is_match(raw) {
        Ok(raw)
    } else {
        Err(Error::new(ErrorKind::InvalidIdentifier)
            .with_message(format!("id prefix must be alphanumeric, \"{raw}\" given")))
    }
}

/// String prefix isolating one application's identifiers on a shared broker.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Result<Self, Error> {
        let prefix = prefix.into();
        if !PREFIX.is_match(&prefix) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("namespace must be alphanumeric, \"{prefix}\" given")));
        }
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn qualify(&self, id: &str) -> String {
        format!("{}{id}", self.0)
    }

    /// Strips the namespace from an id received from the broker.
    /// Ids outside the namespace pass through unchanged.
    pub fn unqualify<'a>(&self, wire_id: &'a str) -> &'a str {
        if self.0.is_empty() {
            return wire_id;
        }
        wire_id.strip_prefix(self.0.as_str()).unwrap_or(wire_id)
    }

    /// Builds the space-separated prefix argument of `online`/`watch`.
    ///
    /// With a namespace and no prefixes the namespace itself becomes the
    /// filter, so a client only ever sees its own ids.
    pub fn prefix_arg(&self, prefixes: &[&str]) -> Result<String, Error> {
        let mut filters = Vec::with_capacity(prefixes.len().max(1));
        for prefix in prefixes {
            filters.push(validate_prefix(prefix)?);
        }
        if filters.is_empty() && !self.is_empty() {
            filters.push("");
        }
        let mut arg = String::new();
        for prefix in filters {
            arg.push(' ');
            arg.push_str(&self.0);
            arg.push_str(prefix);
        }
        Ok(arg)
    }
}
