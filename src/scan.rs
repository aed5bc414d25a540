//! The registry of [`Source`]s currently announced on the network.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};

use crate::{
    discovery::{self, Discovery, Event},
    Result, Source,
};

/// Configuration for the [`Scan`] structure.
#[derive(Debug, Clone)]
pub struct Config<'s> {
    /// Whether sources announced from this machine are listed, defaults to `true`.
    pub include_local_sources: bool,

    /// Groups to look for sources into, defaults to `public`.
    pub groups: Option<&'s [&'s str]>,

    /// Addresses of senders to list even if they are not announced locally.
    pub extra_ips: &'s [SocketAddr],
}

impl Default for Config<'_> {
    fn default() -> Self {
        Self {
            include_local_sources: true,
            groups: None,
            extra_ips: &[],
        }
    }
}

/// A registry of the sources visible on the network.
///
/// The slice returned by [`Scan::current_sources`] borrows the registry,
/// and is invalidated by the next call on the same instance.
#[derive(Debug)]
pub struct Scan {
    events: flume::Receiver<Event>,
    sources: BTreeMap<String, Source>,
    snapshot: Vec<Source>,
    include_local_sources: bool,
    changed: bool,

    // Kept alive for as long as we are listening to it.
    _discovery: Arc<dyn Discovery>,
}

impl Scan {
    /// Look for sources with multicast DNS.
    pub fn new(config: Config<'_>) -> Result<Self> {
        Self::with_discovery(config, Arc::new(discovery::Mdns::new()?))
    }

    /// Look for sources with the provided [`Discovery`] transport.
    pub fn with_discovery(config: Config<'_>, discovery: Arc<dyn Discovery>) -> Result<Self> {
        let groups = config.groups.unwrap_or(discovery::DEFAULT_GROUPS);
        let events = discovery.subscribe(groups, config.extra_ips)?;

        Ok(Self {
            events,
            sources: Default::default(),
            snapshot: Default::default(),
            include_local_sources: config.include_local_sources,
            changed: false,
            _discovery: discovery,
        })
    }

    fn apply(&mut self, event: Event) -> bool {
        match event {
            Event::Added(source) if !self.include_local_sources && source.is_local() => false,
            Event::Added(source) => {
                let previous = self.sources.insert(source.name.clone(), source.clone());

                previous.as_ref() != Some(&source)
            }
            Event::Removed(name) => self.sources.remove(&name).is_some(),
        }
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.changed |= self.apply(event);
        }
    }

    /// The sources currently known, without waiting.
    pub fn current_sources(&mut self) -> &[Source] {
        self.drain();
        self.changed = false;

        self.snapshot = self.sources.values().cloned().collect();

        &self.snapshot
    }

    /// Wait for up to `timeout` until the set of sources changes,
    /// since the last call to [`Scan::current_sources`] or this method.
    pub async fn wait_for_change(&mut self, timeout: Duration) -> bool {
        self.drain();
        if std::mem::take(&mut self.changed) {
            return true;
        }

        crate::timeout(timeout, async {
            loop {
                let Ok(event) = self.events.recv_async().await else {
                    tracing::warn!("The discovery transport stopped reporting changes");

                    break false;
                };

                if self.apply(event) {
                    break true;
                }
            }
        })
        .await
        .unwrap_or(false)
    }
}
