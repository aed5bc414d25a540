use std::net::SocketAddr;

/// A network-visible endpoint offering _video_, _audio_ and _metadata_ streams.
///
/// Sources are immutable once discovered, a re-announcement supersedes the previous value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Source {
    /// The human-readable name of the source, as `HOSTNAME (name)`.
    pub name: String,

    /// The addresses the source is reachable at.
    pub addresses: Vec<SocketAddr>,

    /// Optional metadata attached to the source.
    pub metadata: Option<String>,
}

impl Source {
    pub fn new(name: impl Into<String>, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            name: name.into(),
            addresses: addresses.into_iter().collect(),
            metadata: None,
        }
    }

    /// The host part of the name, before the parenthesized source name.
    pub fn host(&self) -> &str {
        self.name
            .split_once(" (")
            .map_or(self.name.as_str(), |(host, _)| host)
    }

    /// The source name, inside the parentheses, if the name is well-formed.
    pub fn subname(&self) -> Option<&str> {
        self.name
            .split_once(" (")
            .and_then(|(_, rest)| rest.strip_suffix(')'))
    }

    /// Whether this source is announced from the local machine.
    pub fn is_local(&self) -> bool {
        self.host().eq_ignore_ascii_case(&crate::hostname())
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_split_in_host_and_subname() {
        let source = Source::new("STUDIO-A (Camera 1)", []);

        assert_eq!(source.host(), "STUDIO-A");
        assert_eq!(source.subname(), Some("Camera 1"));
        assert_eq!(source.to_string(), "STUDIO-A (Camera 1)");
    }

    #[test]
    fn malformed_names_have_no_subname() {
        let source = Source::new("10.0.0.4:5961", []);

        assert_eq!(source.host(), "10.0.0.4:5961");
        assert_eq!(source.subname(), None);
    }

    #[test]
    fn local_sources_are_detected() {
        assert!(Source::new(crate::name("local"), []).is_local());
        assert!(!Source::new("SURELY-NOT-THIS-HOST (remote)", []).is_local());
    }
}
