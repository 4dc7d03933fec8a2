//! Tokenizer for non-clickable command text.

/// A command name plus its raw argument tokens. Flag parsing belongs to the
/// individual handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedCommand {
    pub name: String,
    pub arguments: Vec<String>,
}

/// Splits on runs of whitespace. The first token with its one-character
/// prefix stripped is the command name; the rest pass through unmodified.
pub fn tokenize(non_clickable_text: &str) -> TokenizedCommand {
    let mut tokens = non_clickable_text.split_whitespace();
    let name = tokens
        .next()
        .map(|first| first.chars().skip(1).collect())
        .unwrap_or_default();
    let arguments = tokens.map(|t| t.to_string()).collect();
    TokenizedCommand { name, arguments }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_name_and_arguments() {
        let cmd = tokenize(">goto -m 123456");
        assert_eq!(cmd.name, "goto");
        assert_eq!(cmd.arguments, vec!["-m", "123456"]);
    }

    #[test]
    fn collapses_whitespace_runs() {
        let cmd = tokenize(">rank   -a \t -t  sticker");
        assert_eq!(cmd.name, "rank");
        assert_eq!(cmd.arguments, vec!["-a", "-t", "sticker"]);
    }

    #[test]
    fn bare_command_has_no_arguments() {
        let cmd = tokenize(">help");
        assert_eq!(cmd.name, "help");
        assert!(cmd.arguments.is_empty());
    }
}
