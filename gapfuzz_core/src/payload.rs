use crate::regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Default generated length for regex payloads that do not set one.
pub const DEFAULT_REGEX_DEPTH: usize = 8;
/// Default number of strings materialised from a regex payload.
pub const DEFAULT_REGEX_LIMIT: usize = 1000;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadKind {
    #[default]
    Literal,
    Regex,
    File,
    Script,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::Literal => "literal",
            PayloadKind::Regex => "regex",
            PayloadKind::File => "file",
            PayloadKind::Script => "script",
        };
        f.write_str(name)
    }
}

/// A payload specification attached to a gap before resolution.
///
/// `value` is the literal text, the regex pattern, or whatever a file or
/// script source needs to locate its data (usually a path).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Payload {
    #[serde(default)]
    pub kind: PayloadKind,
    pub value: String,
    /// Literal: truncate or pad to this many characters.
    /// Regex: maximum length of generated strings.
    #[serde(default)]
    pub length: Option<usize>,
    /// Maximum number of strings taken from a regex, file or script source.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Whether a file-backed source descends into subdirectories.
    #[serde(default)]
    pub recursive: bool,
}

impl Payload {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Literal,
            value: value.into(),
            length: None,
            limit: None,
            recursive: false,
        }
    }

    pub fn regex(pattern: impl Into<String>, length: usize, limit: usize) -> Self {
        Self {
            kind: PayloadKind::Regex,
            value: pattern.into(),
            length: Some(length),
            limit: Some(limit),
            recursive: false,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("No payload source registered for {0} payloads")]
    NoSource(PayloadKind),
    #[error("Payload source for {kind} payload {value:?} failed: {source}")]
    Source {
        kind: PayloadKind,
        value: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Loads literals for payload kinds that live outside the process, such as
/// wordlist files or generator scripts.
pub trait PayloadSource: Send + Sync {
    fn load(&self, payload: &Payload) -> Result<Vec<String>, anyhow::Error>;
}

impl<F> PayloadSource for F
where
    F: Fn(&Payload) -> Result<Vec<String>, anyhow::Error> + Send + Sync,
{
    fn load(&self, payload: &Payload) -> Result<Vec<String>, anyhow::Error> {
        self(payload)
    }
}

/// Turns payload specifications into the literal strings a gap carries.
pub struct PayloadResolver {
    regex_depth: usize,
    regex_limit: usize,
    sources: HashMap<PayloadKind, Box<dyn PayloadSource>>,
}

impl Default for PayloadResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadResolver {
    pub fn new() -> Self {
        Self {
            regex_depth: DEFAULT_REGEX_DEPTH,
            regex_limit: DEFAULT_REGEX_LIMIT,
            sources: HashMap::new(),
        }
    }

    /// Sets the depth and limit used for regex payloads that leave
    /// `length` or `limit` unset.
    pub fn with_regex_defaults(mut self, depth: usize, limit: usize) -> Self {
        self.regex_depth = depth;
        self.regex_limit = limit;
        self
    }

    /// Registers the source used for `kind`, replacing any earlier one.
    pub fn register(&mut self, kind: PayloadKind, source: Box<dyn PayloadSource>) {
        self.sources.insert(kind, source);
    }

    pub fn resolve(&self, payload: &Payload) -> Result<Vec<String>, PayloadError> {
        match payload.kind {
            PayloadKind::Literal => {
                let value = match payload.length {
                    Some(length) => fit_to_length(&payload.value, length),
                    None => payload.value.clone(),
                };
                Ok(vec![value])
            }
            PayloadKind::Regex => {
                let depth = payload.length.unwrap_or(self.regex_depth);
                let limit = payload.limit.unwrap_or(self.regex_limit);
                let expanded = regex::expand(&payload.value, depth, limit);
                if expanded.is_empty() {
                    log::warn!(
                        "Regex payload {:?} produced no values (depth {}, limit {})",
                        payload.value,
                        depth,
                        limit
                    );
                }
                Ok(expanded)
            }
            kind @ (PayloadKind::File | PayloadKind::Script) => {
                let source = self
                    .sources
                    .get(&kind)
                    .ok_or(PayloadError::NoSource(kind))?;
                let mut values = source.load(payload).map_err(|source| PayloadError::Source {
                    kind,
                    value: payload.value.clone(),
                    source,
                })?;
                if let Some(limit) = payload.limit {
                    values.truncate(limit);
                }
                Ok(values)
            }
        }
    }

    /// Resolves every payload in order and concatenates the literals.
    pub fn resolve_all(&self, payloads: &[Payload]) -> Result<Vec<String>, PayloadError> {
        let mut literals = Vec::new();
        for payload in payloads {
            literals.extend(self.resolve(payload)?);
        }
        Ok(literals)
    }
}

/// Truncates `value` to `length` characters, or pads it by repeating its own
/// characters until it is that long. An empty value stays empty.
pub fn fit_to_length(value: &str, length: usize) -> String {
    if value.is_empty() {
        return String::new();
    }
    value.chars().cycle().take(length).collect()
}
