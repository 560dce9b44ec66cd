//! Shell quoting and command template helpers.

/// Quote a string for safe use as a single POSIX shell word.
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '.' | '+' | ':' | '=' | '@')
        })
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// Substitute every `%s` in a command template with the quoted argument.
///
/// Templates without a placeholder get the argument appended.
pub fn fill_template(template: &str, arg: &str) -> String {
    let quoted = quote(arg);
    if template.contains("%s") {
        template.replace("%s", &quoted)
    } else {
        format!("{template} {quoted}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("/etc/hosts"), "/etc/hosts");
        assert_eq!(quote("openssh-server=1:9.6"), "openssh-server=1:9.6");
    }

    #[test]
    fn test_quote_special() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_fill_template() {
        assert_eq!(fill_template("sshd -t -f %s", "/tmp/x y"), "sshd -t -f '/tmp/x y'");
        assert_eq!(fill_template("visudo -cf", "/tmp/s"), "visudo -cf /tmp/s");
    }
}
