// Outbound request building: target sets, command bodies, and the pseudo-HTTP envelope.
use crate::core::charset::Charset;
use crate::core::error::{Error, ErrorKind};
use crate::core::namespace::{Namespace, validate_identifier};
use regex::Regex;
use serde::Serialize;
use std::fmt::{self, Display};
use std::sync::LazyLock;

pub const IDENTIFIER_HEADER: &str = "X-Realplexor";
pub const VISIBILITY_MARK: char = '*';
pub const DEFAULT_POSITION: &str = "0";

static CURSOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?$").expect("cursor pattern"));
static POSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]*)?$").expect("position pattern"));

pub fn validate_cursor(raw: &str) -> Result<&str, Error> {
    if CURSOR.is_match(raw) {
        Ok(raw)
    } else {
        Err(Error::new(ErrorKind::InvalidCursor)
            .with_message(format!("cursor must be numeric, \"{raw}\" given")))
    }
}

/// Checks a watch start position; the fractional part may be empty (`"12."`).
pub fn validate_position(raw: &str) -> Result<&str, Error> {
    if is_position(raw) {
        Ok(raw)
    } else {
        Err(Error::new(ErrorKind::InvalidCursor)
            .with_message(format!("position value must be numeric, \"{raw}\" given")))
    }
}

pub fn is_position(raw: &str) -> bool {
    POSITION.is_match(raw)
}

/// One publish destination, optionally carrying a replay cursor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    pub id: String,
    pub cursor: Option<String>,
}

/// Ordered publish destinations. Duplicates are kept as given.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Targets(Vec<Target>);

impl Targets {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut targets = Self::new();
        for id in ids {
            targets.push(id);
        }
        targets
    }

    pub fn with_cursors<I, S, C>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, C)>,
        S: Into<String>,
        C: Display,
    {
        let mut targets = Self::new();
        for (id, cursor) in pairs {
            targets.push_with_cursor(id, cursor);
        }
        targets
    }

    pub fn push(&mut self, id: impl Into<String>) -> &mut Self {
        self.0.push(Target {
            id: id.into(),
            cursor: None,
        });
        self
    }

    pub fn push_with_cursor(&mut self, id: impl Into<String>, cursor: impl Display) -> &mut Self {
        self.0.push(Target {
            id: id.into(),
            cursor: Some(cursor.to_string()),
        });
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Targets {
    fn from(id: &str) -> Self {
        Self::ids([id])
    }
}

impl From<String> for Targets {
    fn from(id: String) -> Self {
        Self::ids([id])
    }
}

impl<'a> IntoIterator for &'a Targets {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Publish,
    Online,
    Watch,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Publish => "publish",
            RequestKind::Online => "online",
            RequestKind::Watch => "watch",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection-level values every envelope carries.
#[derive(Clone, Copy, Debug)]
pub struct Envelope<'a> {
    pub host: &'a str,
    pub login: &'a str,
    pub password: &'a str,
    pub charset: Charset,
}

impl Envelope<'_> {
    fn auth(&self) -> String {
        if self.login.is_empty() || self.password.is_empty() {
            String::new()
        } else {
            format!("{}:{}@", self.login, self.password)
        }
    }
}

/// A built call: the identifier header value plus the body text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    kind: RequestKind,
    identifier: String,
    body: String,
}

impl Request {
    /// Builds a publish call. Fails before any I/O on a bad id or cursor.
    pub fn publish<P>(
        namespace: &Namespace,
        targets: &Targets,
        payload: &P,
        visible_to: &[&str],
    ) -> Result<Self, Error>
    where
        P: Serialize + ?Sized,
    {
        let mut pairs = Vec::with_capacity(targets.len() + visible_to.len());
        for target in targets {
            let id = namespace.qualify(validate_identifier(&target.id)?);
            match &target.cursor {
                Some(cursor) => pairs.push(format!("{}:{id}", validate_cursor(cursor)?)),
                None => pairs.push(id),
            }
        }
        for id in visible_to {
            let id = validate_identifier(id)?;
            pairs.push(format!("{VISIBILITY_MARK}{}", namespace.qualify(id)));
        }

        let body = serde_json::to_string(payload).map_err(|err| {
            Error::new(ErrorKind::Encoding)
                .with_message("failed to encode payload json")
                .with_source(err)
        })?;

        Ok(Self {
            kind: RequestKind::Publish,
            identifier: pairs.join(","),
            body,
        })
    }

    pub fn online(namespace: &Namespace, prefixes: &[&str]) -> Result<Self, Error> {
        let command = format!("online{}", namespace.prefix_arg(prefixes)?);
        Ok(Self::command(RequestKind::Online, command))
    }

    /// Builds a watch call; an absent or empty `from` starts at position `0`.
    pub fn watch(
        namespace: &Namespace,
        from: Option<&str>,
        prefixes: &[&str],
    ) -> Result<Self, Error> {
        let from = match from {
            Some(pos) if !pos.is_empty() => validate_position(pos)?,
            _ => DEFAULT_POSITION,
        };
        let command = format!("watch {from}{}", namespace.prefix_arg(prefixes)?);
        Ok(Self::command(RequestKind::Watch, command))
    }

    fn command(kind: RequestKind, command: String) -> Self {
        Self {
            kind,
            identifier: String::new(),
            body: format!("{command}\n"),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serializes the request into the bytes sent to the broker.
    /// `Content-Length` counts the body's encoded bytes.
    pub fn encode(&self, envelope: &Envelope<'_>) -> Result<Vec<u8>, Error> {
        let body = envelope.charset.encode(&self.body)?;
        let head = format!(
            "POST / HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\n{IDENTIFIER_HEADER}: identifier={}{}\r\n\r\n",
            envelope.host,
            body.len(),
            envelope.auth(),
            self.identifier,
        );
        let mut out = envelope.charset.encode(&head)?;
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// Decodes an identifier header value back into targets and visibility ids,
/// stripping the namespace. Inverse of the publish encoding.
pub fn parse_identifier_value(value: &str, namespace: &Namespace) -> (Targets, Vec<String>) {
    let mut targets = Targets::new();
    let mut visible_to = Vec::new();
    for item in value.split(',').filter(|item| !item.is_empty()) {
        if let Some(id) = item.strip_prefix(VISIBILITY_MARK) {
            visible_to.push(namespace.unqualify(id).to_string());
            continue;
        }
        match item.split_once(':') {
            Some((cursor, id)) => {
                targets.push_with_cursor(namespace.unqualify(id), cursor);
            }
            None => {
                targets.push(namespace.unqualify(item));
            }
        }
    }
    (targets, visible_to)
}
