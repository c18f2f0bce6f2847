//! Module identity: names, versions, and textual round-tripping.

use std::fmt;

/// `(name, version)` identity of a module, independent of any particular
/// compiled revision.
///
/// Textual form is `name` when `version` is empty, else `name.version`.
/// Parsing splits on the **last** `.`, so `version` itself may not contain a
/// `.` once formatted back — callers that mint names must reject embedded
/// dots up front (see [`ModuleId::parse`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId {
    name: String,
    version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidName {
    Empty,
    IllegalCharacters(String),
}

impl fmt::Display for InvalidName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidName::Empty => f.write_str("module name must not be empty"),
            InvalidName::IllegalCharacters(name) => {
                write!(f, "module name contains illegal characters: '{name}'")
            }
        }
    }
}

impl std::error::Error for InvalidName {}

impl ModuleId {
    /// Construct directly from an already-validated `(name, version)` pair.
    ///
    /// `name` must not contain `.`; use [`ModuleId::parse`] for untrusted
    /// textual input that may embed a version suffix.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self, InvalidName> {
        let name = name.into();
        validate_name(&name)?;
        if name.contains('.') {
            return Err(InvalidName::IllegalCharacters(name));
        }
        Ok(Self {
            name,
            version: version.into(),
        })
    }

    /// Parse the textual form `name` or `name.version`, splitting on the
    /// last `.`.
    pub fn parse(text: &str) -> Result<Self, InvalidName> {
        match text.rfind('.') {
            Some(idx) => {
                let (name, rest) = text.split_at(idx);
                let version = &rest[1..];
                validate_name(name)?;
                Ok(Self {
                    name: name.to_string(),
                    version: version.to_string(),
                })
            }
            None => {
                validate_name(text)?;
                Ok(Self {
                    name: text.to_string(),
                    version: String::new(),
                })
            }
        }
    }

    pub fn format(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.version)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

fn validate_name(name: &str) -> Result<(), InvalidName> {
    if name.is_empty() {
        return Err(InvalidName::Empty);
    }

    let mut chars = name.chars();
    let first = chars.next().expect("checked non-empty above");
    if !is_name_start(first) {
        return Err(InvalidName::IllegalCharacters(name.to_string()));
    }
    if !chars.all(is_name_continue) {
        return Err(InvalidName::IllegalCharacters(name.to_string()));
    }

    Ok(())
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '/'
}

fn is_name_continue(c: char) -> bool {
    is_name_start(c)
        || matches!(
            c,
            '-' | '{' | '}' | '\\' | '@' | '$' | ':' | '<' | '>'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_name_only() {
        let id = ModuleId::parse("com/acme/widgets").unwrap();
        assert_eq!(id.name(), "com/acme/widgets");
        assert_eq!(id.version(), "");
        assert_eq!(ModuleId::parse(&id.format()).unwrap(), id);
    }

    #[test]
    fn parse_splits_on_last_dot() {
        let id = ModuleId::parse("com/acme/widgets.1.2.3").unwrap();
        assert_eq!(id.name(), "com/acme/widgets.1.2");
        assert_eq!(id.version(), "3");
    }

    #[test]
    fn new_rejects_embedded_dots_in_name() {
        assert!(ModuleId::new("com.acme", "1").is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert_eq!(ModuleId::parse(""), Err(InvalidName::Empty));
    }

    #[test]
    fn rejects_illegal_leading_character() {
        assert!(ModuleId::parse(".leadingdot").is_err());
    }
}
