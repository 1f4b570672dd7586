use anyhow::{Context, Result};
use camino::Utf8Path;
use regex::Regex;

/// Exclusion patterns for the archive, in GNU tar `--exclude-from` style.
///
/// Patterns are unanchored: they may match starting at any path component
/// of a member name such as `./var/log/syslog`, and a pattern matching a
/// directory also matches everything below it. `*` and `?` match `/`.
#[derive(Debug, Default)]
pub struct ExcludeSet {
    patterns: Vec<(String, Regex)>,
}

/// Translate one glob into a regex body.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match bracket_end(&chars, i) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if matches!(chars[j], '!' | '^') {
                        out.push('^');
                        j += 1;
                    }
                    for &c in &chars[j..end] {
                        if matches!(c, '\\' | '[' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                    i = end;
                }
                None => out.push_str(r"\["),
            },
            '\\' if i + 1 < chars.len() => {
                i += 1;
                out.push_str(&regex::escape(&chars[i].to_string()));
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out
}

/// Index of the `]` closing the bracket expression opened at `start`. A `]`
/// directly after `[` or `[!` is a literal member.
fn bracket_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j).is_some_and(|c| matches!(c, '!' | '^')) {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    (j..chars.len()).find(|&k| chars[k] == ']')
}

impl ExcludeSet {
    pub fn parse(contents: &str) -> Result<Self> {
        let mut patterns = Vec::new();
        for line in contents.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let re = format!("(?s)(?:^|/){}(?:/.*)?$", glob_to_regex(line));
            let re = Regex::new(&re).with_context(|| format!("parsing exclude pattern {line}"))?;
            patterns.push((line.to_string(), re));
        }
        Ok(Self { patterns })
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        Self::parse(&contents).with_context(|| format!("parsing {path}"))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// The first pattern excluding `member`, if any. `member` is a path
    /// relative to the tree root, with or without a leading `./`.
    pub fn matching(&self, member: &str) -> Option<&str> {
        let stripped = member.strip_prefix("./").unwrap_or(member);
        let dotted = format!("./{stripped}");
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(&dotted))
            .map(|(pat, _)| pat.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ExcludeSet {
        fn is_excluded(&self, member: &str) -> bool {
            self.matching(member).is_some()
        }
    }

    #[test]
    fn test_dot_slash_patterns() {
        let set = ExcludeSet::parse("./proc/*\n./dev/*\n").unwrap();
        assert!(set.is_excluded("./proc/1/status"));
        assert!(set.is_excluded("proc/self"));
        assert!(set.is_excluded("./dev/null"));
        assert!(!set.is_excluded("./proc"));
        assert!(!set.is_excluded("./dev"));
        assert!(!set.is_excluded("./usr/share/proc/x"));
    }

    #[test]
    fn test_unanchored_patterns() {
        let set = ExcludeSet::parse("tmp\n*.pyc\n").unwrap();
        assert!(set.is_excluded("./tmp"));
        assert!(set.is_excluded("./tmp/a/b"));
        assert!(set.is_excluded("./var/tmp"));
        assert!(!set.is_excluded("./tmpfiles.d"));
        assert!(set.is_excluded("./usr/lib/python2.7/os.pyc"));
        assert!(!set.is_excluded("./usr/lib/python2.7/os.py"));
    }

    #[test]
    fn test_wildcards() {
        let set = ExcludeSet::parse("./var/log/*.[0-9]\n./etc/ssh/ssh_host_?sa_key\n").unwrap();
        assert!(set.is_excluded("./var/log/syslog.1"));
        assert!(!set.is_excluded("./var/log/syslog"));
        assert!(set.is_excluded("./etc/ssh/ssh_host_rsa_key"));
        assert!(set.is_excluded("./etc/ssh/ssh_host_dsa_key"));
        assert!(!set.is_excluded("./etc/ssh/ssh_host_ed25519_key"));
    }

    #[test]
    fn test_negated_class_and_literals() {
        let set = ExcludeSet::parse("./a[!b]c\n./x+y\n./un[closed\n").unwrap();
        assert!(set.is_excluded("./axc"));
        assert!(!set.is_excluded("./abc"));
        assert!(set.is_excluded("./x+y"));
        assert!(!set.is_excluded("./xxy"));
        assert!(set.is_excluded("./un[closed"));
    }

    #[test]
    fn test_blank_lines_ignored() {
        let set = ExcludeSet::parse("\n   \n./run/*\r\n").unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.matching("./run/lock"), Some("./run/*"));
        assert_eq!(set.matching("./etc/passwd"), None);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(ExcludeSet::load(Utf8Path::new("/nonexistent/exclude.txt")).is_err());
    }
}
