//! Announcement and resolution of [`Source`]s on the network.

use std::net::SocketAddr;

use crate::{Result, Source};

mod mdns;
pub use mdns::Mdns;

mod loopback;
pub use loopback::Loopback;

/// The groups a source belongs to when none are specified.
pub const DEFAULT_GROUPS: &[&str] = &["public"];

/// A change in the set of sources visible to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A source was announced, or re-announced with new details.
    Added(Source),

    /// The source with this name was withdrawn.
    Removed(String),
}

/// A transport able to announce local sources and resolve remote ones.
pub trait Discovery: std::marker::Send + Sync + std::fmt::Debug {
    /// Announce a source called `name` in `groups`, reachable on `port`,
    /// and return the full name it is visible as.
    fn announce(&self, name: &str, groups: &[&str], port: u16) -> Result<String>;

    /// Withdraw the announcement of the source visible as `name`.
    fn withdraw(&self, name: &str) -> Result;

    /// Watch the sources in any of `groups`, in addition to the senders
    /// expected at the `hints` addresses.
    fn subscribe(&self, groups: &[&str], hints: &[SocketAddr]) -> Result<flume::Receiver<Event>>;
}

/// Whether a comma-separated `announced` group list intersects `wanted`.
fn in_groups(announced: &str, wanted: &[&str]) -> bool {
    announced
        .split(',')
        .map(str::trim)
        .any(|group| wanted.iter().any(|want| want.eq_ignore_ascii_case(group)))
}

/// The sources for unicast address hints, named after their address.
fn hinted(hints: &[SocketAddr]) -> impl Iterator<Item = Event> + '_ {
    hints
        .iter()
        .map(|addr| Event::Added(Source::new(addr.to_string(), [*addr])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_matching_is_case_insensitive() {
        assert!(in_groups("public", DEFAULT_GROUPS));
        assert!(in_groups("studio, PUBLIC", DEFAULT_GROUPS));
        assert!(!in_groups("studio,backstage", DEFAULT_GROUPS));
        assert!(!in_groups("public", &[]));
    }

    #[test]
    fn hints_are_reported_as_sources() {
        let addr: SocketAddr = "10.0.0.4:5961".parse().expect("valid address");

        assert_eq!(
            hinted(&[addr]).collect::<Vec<_>>(),
            vec![Event::Added(Source::new("10.0.0.4:5961", [addr]))]
        );
    }
}
