use std::{
    collections::BTreeMap,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
};

use super::{Discovery, Event};
use crate::{Result, Source};

/// [`Discovery`] within the current process, announcing sources on the loopback interface.
///
/// Clones share the same set of announcements.
#[derive(Debug, Default, Clone)]
pub struct Loopback {
    bus: Arc<Mutex<Bus>>,
}

#[derive(Debug, Default)]
struct Bus {
    sources: BTreeMap<String, (Source, String)>,
    subscribers: Vec<(Vec<String>, flume::Sender<Event>)>,
}

impl Bus {
    fn publish(&mut self, groups: &str, event: Event) {
        self.subscribers.retain(|(wanted, tx)| {
            let wanted = wanted.iter().map(String::as_str).collect::<Vec<_>>();

            !super::in_groups(groups, &wanted) || tx.send(event.clone()).is_ok()
        });
    }
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Discovery for Loopback {
    fn announce(&self, name: &str, groups: &[&str], port: u16) -> Result<String> {
        let name = crate::name(name);
        let source = Source::new(&name, [SocketAddr::from((Ipv4Addr::LOCALHOST, port))]);
        let groups = groups.join(",");

        let mut bus = crate::lock(&self.bus);
        bus.publish(&groups, Event::Added(source.clone()));
        bus.sources.insert(name.clone(), (source, groups));

        tracing::debug!("Announced loopback source `{name}`");

        Ok(name)
    }

    fn withdraw(&self, name: &str) -> Result {
        let mut bus = crate::lock(&self.bus);

        if let Some((_, groups)) = bus.sources.remove(name) {
            bus.publish(&groups, Event::Removed(name.into()));

            tracing::debug!("Withdrew loopback source `{name}`");
        }

        Ok(())
    }

    fn subscribe(&self, groups: &[&str], hints: &[SocketAddr]) -> Result<flume::Receiver<Event>> {
        let (tx, rx) = flume::unbounded();

        for event in super::hinted(hints) {
            let _ = tx.send(event);
        }

        let mut bus = crate::lock(&self.bus);
        for (source, announced) in bus.sources.values() {
            if super::in_groups(announced, groups) {
                let _ = tx.send(Event::Added(source.clone()));
            }
        }

        bus.subscribers
            .push((groups.iter().map(ToString::to_string).collect(), tx));

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_past_and_future_announcements() {
        let loopback = Loopback::new();
        let first = loopback
            .announce("first", &["public"], 5961)
            .expect("announced");

        let events = loopback
            .subscribe(&["public"], &[])
            .expect("subscribed");
        let second = loopback
            .announce("second", &["public"], 5962)
            .expect("announced");
        loopback.withdraw(&first).expect("withdrawn");

        let events = events.try_iter().collect::<Vec<_>>();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Event::Added(source) if source.name == first));
        assert!(matches!(&events[1], Event::Added(source) if source.name == second));
        assert_eq!(events[2], Event::Removed(first));
    }

    #[test]
    fn groups_filter_announcements() {
        let loopback = Loopback::new();
        let events = loopback
            .subscribe(&["studio"], &[])
            .expect("subscribed");

        loopback
            .announce("hidden", &["public"], 5961)
            .expect("announced");
        loopback
            .announce("visible", &["Studio", "public"], 5962)
            .expect("announced");

        let events = events.try_iter().collect::<Vec<_>>();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Added(source) if source.subname() == Some("visible")));
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let loopback = Loopback::new();
        drop(loopback.subscribe(&["public"], &[]).expect("subscribed"));

        loopback
            .announce("camera", &["public"], 5961)
            .expect("announced");

        assert!(crate::lock(&loopback.bus).subscribers.is_empty());
    }
}
