//! Domain suffix sets loaded from plain text lists.

use std::fs;
use std::io;
use std::path::Path;

use rustc_hash::FxHashSet;

/// A set of domains matched by exact name or parent domain.
#[derive(Debug, Default, Clone)]
pub struct DomainSet {
    domains: FxHashSet<String>,
}

impl DomainSet {
    /// Parse a list with one domain per line. Blank lines and `#` comments
    /// are ignored.
    pub fn parse(list: &str) -> Self {
        let domains = list
            .lines()
            .filter_map(|line| {
                let line = line.trim().trim_end_matches('.');
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                Some(line.to_lowercase())
            })
            .collect();

        Self { domains }
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Check if a domain or one of its parents is in the set.
    ///
    /// "ads.example.com" matches an entry for "example.com".
    pub fn matches(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.').to_lowercase();
        let mut current = domain.as_str();

        loop {
            if self.domains.contains(current) {
                return true;
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => return false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LIST: &str = "\
# streaming
netflix.com
youtube.com.

  google.com
";

    #[test]
    fn parse_skips_comments_and_blanks() {
        let set = DomainSet::parse(LIST);

        assert_eq!(set.len(), 3);
    }

    #[test]
    fn matches_exact_domain() {
        let set = DomainSet::parse(LIST);

        assert!(set.matches("netflix.com"));
        assert!(set.matches("youtube.com"));
    }

    #[test]
    fn matches_subdomains() {
        let set = DomainSet::parse(LIST);

        assert!(set.matches("www.google.com"));
        assert!(set.matches("r1.cdn.youtube.com."));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let set = DomainSet::parse(LIST);

        assert!(set.matches("NETFLIX.COM"));
        assert!(set.matches("Api.Netflix.com"));
    }

    #[test]
    fn does_not_match_unrelated_domains() {
        let set = DomainSet::parse(LIST);

        assert!(!set.matches("github.com"));
        assert!(!set.matches("notnetflix.com"));
        assert!(!set.matches(""));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "example.org\n# comment\nexample.net").unwrap();

        let set = DomainSet::load(file.path()).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.matches("www.example.net"));
    }
}
