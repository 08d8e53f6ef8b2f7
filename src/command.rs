//! Building the shell command line for a step.

use std::io::Read;

use anyhow::{Context, Result};

/// Where the step's command text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    /// Trailing command-line arguments, joined into one command line.
    Args(Vec<String>),
    /// A script read in full from a reader (stdin in the binary).
    Stdin,
}

impl CommandSource {
    /// An empty argument list means the script comes from stdin.
    pub fn from_args(args: Vec<String>) -> Self {
        if args.is_empty() {
            CommandSource::Stdin
        } else {
            CommandSource::Args(args)
        }
    }

    pub fn resolve(self, stdin: impl Read) -> Result<String> {
        match self {
            CommandSource::Args(args) => Ok(join_args(&args)),
            CommandSource::Stdin => read_script(stdin),
        }
    }
}

/// Join arguments into a single shell command line.
///
/// Plain words pass through untouched so operators given as separate
/// arguments (`&&`, `|`, `>`) still act as operators. A word that is empty or
/// contains whitespace is double-quoted so it stays one word; the shell still
/// expands `$VAR` inside it. Double quotes are backslash-escaped, and
/// backslashes are doubled only where they precede a quote or close the word.
pub fn join_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote_word(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_word(arg: &str) -> String {
    let needs_quotes = arg.is_empty() || arg.chars().any(char::is_whitespace);

    let mut quoted = String::with_capacity(arg.len() + 2);
    if needs_quotes {
        quoted.push('"');
    }
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.push_str(&"\\".repeat(backslashes * 2));
                quoted.push_str("\\\"");
                backslashes = 0;
            }
            _ => {
                quoted.push_str(&"\\".repeat(backslashes));
                backslashes = 0;
                quoted.push(c);
            }
        }
    }
    if needs_quotes {
        quoted.push_str(&"\\".repeat(backslashes * 2));
        quoted.push('"');
    } else {
        quoted.push_str(&"\\".repeat(backslashes));
    }
    quoted
}

/// Read an entire script as the literal command text.
pub fn read_script(mut reader: impl Read) -> Result<String> {
    let mut script = String::new();
    reader
        .read_to_string(&mut script)
        .context("failed to read command script from stdin")?;
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn plain_words_join_with_spaces() {
        assert_eq!(join_args(&strings(&["make", "-j4", "test"])), "make -j4 test");
    }

    #[test]
    fn operators_stay_unquoted() {
        assert_eq!(
            join_args(&strings(&["make", "&&", "echo", "done"])),
            "make && echo done"
        );
    }

    #[test]
    fn words_with_spaces_are_quoted() {
        assert_eq!(
            join_args(&strings(&["echo", "hello world"])),
            "echo \"hello world\""
        );
    }

    #[test]
    fn quoted_words_escape_only_quotes() {
        assert_eq!(
            join_args(&strings(&["echo", "say \"$HOME\" `x`"])),
            r#"echo "say \"$HOME\" `x`""#
        );
    }

    #[test]
    fn backslashes_doubled_before_quotes_and_at_end() {
        assert_eq!(join_args(&strings(&[r#"a\"b c"#])), r#""a\\\"b c""#);
        assert_eq!(join_args(&strings(&[r"dir\ x\"])), r#""dir\ x\\""#);
        assert_eq!(join_args(&strings(&[r"C:\path"])), r"C:\path");
    }

    #[test]
    fn bare_word_with_quote_is_escaped_not_wrapped() {
        assert_eq!(join_args(&strings(&[r#"a"b"#])), r#"a\"b"#);
    }

    #[test]
    fn variables_expand_whether_or_not_quoted() {
        let line = join_args(&strings(&["printf", "%s,", "$JOIN_ARGS_VAR", "$JOIN_ARGS_VAR x"]));
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&line)
            .env("JOIN_ARGS_VAR", "expanded")
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "expanded,expanded x,");
    }

    #[test]
    fn empty_word_is_kept() {
        assert_eq!(join_args(&strings(&["printf", ""])), "printf \"\"");
    }

    #[test]
    fn no_args_means_stdin() {
        assert_eq!(CommandSource::from_args(vec![]), CommandSource::Stdin);
        assert_eq!(
            CommandSource::from_args(strings(&["true"])),
            CommandSource::Args(strings(&["true"]))
        );
    }

    #[test]
    fn stdin_script_is_read_verbatim() {
        let script = "set -e\necho \"hi\"\necho \"bye\"\nfalse\necho \"ho\"\n";
        let resolved = CommandSource::Stdin.resolve(script.as_bytes()).unwrap();
        assert_eq!(resolved, script);
    }

    #[test]
    fn args_source_ignores_stdin() {
        let resolved = CommandSource::Args(strings(&["false"]))
            .resolve("echo unused".as_bytes())
            .unwrap();
        assert_eq!(resolved, "false");
    }

    #[test]
    fn invalid_utf8_script_is_an_error() {
        let err = read_script(&[0xff, 0xfe][..]).unwrap_err();
        assert!(err.to_string().contains("failed to read command script"));
    }
}
