// Definition parse errors
// Carries line/column, a source excerpt and an optional hint

use std::fmt;

/// Parse error with location and an excerpt of the offending source
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
    /// Excerpt of the lines around the error
    pub context: String,
    pub suggestion: Option<String>,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Not valid YAML
    YamlSyntax,
    /// Valid YAML that does not fit the definition schema
    InvalidSchema,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            context: String::new(),
            suggestion: None,
            kind: ParseErrorKind::InvalidSchema,
        }
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach the lines around `self.line`, marking the error column
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let marker = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", marker, line_num, line));

            if line_num == self.line && self.column > 0 {
                context.push_str(&format!("       | {}^\n", " ".repeat(self.column - 1)));
            }
        }

        self.context = context;
        self
    }

    /// Schema error raised while converting an already parsed tree; has no location
    pub fn from_value_error(err: &serde_yaml::Error) -> Self {
        let raw = err.to_string();
        let mut error = ParseError::new(clean_message(&raw), 0, 0);
        error.suggestion = suggest_fix(&raw);
        error
    }

    /// Build from a serde_yaml error, which covers both syntax and schema failures
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((1, 1));

        let raw = err.to_string();
        let kind = if is_schema_message(&raw) {
            ParseErrorKind::InvalidSchema
        } else {
            ParseErrorKind::YamlSyntax
        };

        let mut error = ParseError::new(clean_message(&raw), line, column)
            .with_kind(kind)
            .with_source_context(source, 2);
        error.suggestion = suggest_fix(&raw);
        error
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}", self.message)?;
        if self.line > 0 {
            write!(f, "\n  --> line {}:{}", self.line, self.column)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f)?;
            write!(f, "{}", self.context.trim_end())?;
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            write!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

fn is_schema_message(msg: &str) -> bool {
    ["missing field", "unknown field", "invalid type", "unknown variant", "did not match any variant"]
        .iter()
        .any(|pattern| msg.contains(pattern))
        || msg.starts_with("invalid ")
        || msg.contains(": invalid ")
}

/// Strip serde_yaml's trailing location, which is reported separately,
/// and reword the common schema messages. A leading `stages[0].jobs[1]:`
/// path is kept.
fn clean_message(msg: &str) -> String {
    let msg = match msg.rfind(" at line ") {
        Some(idx) => &msg[..idx],
        None => msg,
    };

    let (path, body) = match msg.split_once(": ") {
        Some((path, body)) if !path.is_empty() && !path.contains(' ') => {
            (format!("{}: ", path), body)
        }
        _ => (String::new(), msg),
    };

    let reworded = if let Some(field) = between(body, "missing field `", "`") {
        format!("missing required field '{}'", field)
    } else if let Some(field) = between(body, "unknown field `", "`") {
        format!("unknown field '{}'", field)
    } else if body.contains("did not match any variant of untagged enum StepAction") {
        "step must define one of 'script', 'publish' or 'download'".to_string()
    } else {
        body.to_string()
    };

    format!("{}{}", path, reworded)
}

fn between<'a>(msg: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let start = msg.find(prefix)? + prefix.len();
    let end = msg[start..].find(suffix)? + start;
    Some(&msg[start..end])
}

fn suggest_fix(msg: &str) -> Option<String> {
    if msg.contains("missing field `stage`") {
        return Some("each entry under 'stages' needs a 'stage:' name".to_string());
    }
    if msg.contains("missing field `job`") {
        return Some("each entry under 'jobs' needs a 'job:' name".to_string());
    }
    if msg.contains("untagged enum StepAction") {
        return Some("check the indentation of the step's keys".to_string());
    }
    if msg.contains("untagged enum DependsOn") {
        return Some("dependsOn takes a name or a list of names".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_location_and_help() {
        let err = ParseError::new("missing required field 'job'", 4, 7)
            .with_suggestion("each entry under 'jobs' needs a 'job:' name");
        let output = err.to_string();
        assert!(output.contains("line 4:7"));
        assert!(output.contains("help:"));
    }

    #[test]
    fn test_source_context_marks_line() {
        let source = "stages:\n  - stage: Build\n    jobs:\n      - steps: []\n";
        let err = ParseError::new("missing required field 'job'", 4, 9).with_source_context(source, 1);
        assert!(err.context.contains(">    4 |       - steps: []"));
        assert!(err.context.contains("^"));
    }

    #[test]
    fn test_from_yaml_syntax_error() {
        let source = "stages:\n  - stage: [unterminated\n";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(source).unwrap_err();
        let err = ParseError::from_yaml_error(&yaml_err, source);
        assert_eq!(err.kind, ParseErrorKind::YamlSyntax);
        assert!(err.line >= 2);
    }

    #[test]
    fn test_clean_message_missing_field() {
        assert_eq!(
            clean_message("stages[0]: missing field `stage` at line 2 column 5"),
            "stages[0]: missing required field 'stage'"
        );
        assert_eq!(clean_message("missing field `job`"), "missing required field 'job'");
    }
}
