use once_cell::sync::Lazy;
use regex::Regex;

static COMMAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^/([A-Za-z][A-Za-z0-9_-]*)(?:\s+(.*))?$").expect("valid command pattern")
});

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]{0,31}$").expect("valid command name pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lower-cased, without the leading slash
    pub name: String,
    /// Trimmed remainder; empty when absent
    pub args: String,
}

/// Split `/name rest` into its parts. Anything else is not a command.
pub fn parse(input: &str) -> Option<ParsedCommand> {
    let caps = COMMAND_RE.captures(input.trim())?;
    let name = caps.get(1)?.as_str().to_lowercase();
    let args = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
    Some(ParsedCommand { name, args })
}

pub fn is_command(input: &str) -> bool {
    parse(input).is_some()
}

/// Whether `name` can be registered as a custom command.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_name_and_args() {
        assert_eq!(
            parse("/learn The sky is blue"),
            Some(ParsedCommand {
                name: "learn".to_string(),
                args: "The sky is blue".to_string()
            })
        );
        assert_eq!(parse("  /HELP  ").map(|c| c.name), Some("help".to_string()));
        assert_eq!(parse("/forget").map(|c| c.args), Some(String::new()));
    }

    #[test]
    fn test_multiline_args_are_kept() {
        let parsed = parse("/learn line one\nline two").unwrap();
        assert_eq!(parsed.args, "line one\nline two");
    }

    #[test]
    fn test_non_commands() {
        for input in ["", "hello", "/", "/ learn", "//x", "/9lives", "path/to/file", "a /help"] {
            assert!(!is_command(input), "{input:?} parsed as a command");
        }
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("faq"));
        assert!(is_valid_name("opening-hours_2"));
        assert!(!is_valid_name("Faq"));
        assert!(!is_valid_name("2fa"));
        assert!(!is_valid_name(""));
    }
}
