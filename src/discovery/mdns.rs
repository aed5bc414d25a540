use std::{net::SocketAddr, thread};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo, UnregisterStatus};

use super::{Discovery, Event};
use crate::{Result, Source};

/// [`Discovery`] over multicast DNS, on the local subnet.
pub struct Mdns {
    daemon: ServiceDaemon,
}

impl Mdns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
        })
    }

    fn fullname(name: &str) -> String {
        format!("{name}.{}", crate::SERVICE_TYPE)
    }

    fn name(fullname: &str) -> &str {
        fullname
            .strip_suffix(crate::SERVICE_TYPE)
            .and_then(|name| name.strip_suffix('.'))
            .unwrap_or(fullname)
    }

    fn source(info: &ServiceInfo) -> Source {
        let port = info.get_port();

        Source::new(
            Self::name(info.get_fullname()),
            info.get_addresses()
                .iter()
                .map(|addr| SocketAddr::new(*addr, port)),
        )
    }
}

impl Discovery for Mdns {
    fn announce(&self, name: &str, groups: &[&str], port: u16) -> Result<String> {
        let groups = groups.join(",");
        let service = ServiceInfo::new(
            crate::SERVICE_TYPE,
            &crate::name(name),
            &format!("{}.local.", crate::hostname()),
            (),
            port,
            [("groups", groups.as_str())].as_slice(),
        )?
        .enable_addr_auto();

        let name = Self::name(service.get_fullname()).to_string();
        self.daemon.register(service)?;

        tracing::debug!("Registered mDNS service `{name}`");

        Ok(name)
    }

    fn withdraw(&self, name: &str) -> Result {
        match self.daemon.unregister(&Self::fullname(name))?.recv()? {
            UnregisterStatus::NotFound => {
                tracing::warn!("The mDNS service `{name}` was not registered")
            }
            _ => tracing::debug!("Unregistered mDNS service `{name}`"),
        }

        Ok(())
    }

    fn subscribe(&self, groups: &[&str], hints: &[SocketAddr]) -> Result<flume::Receiver<Event>> {
        let events = self.daemon.browse(crate::SERVICE_TYPE)?;
        let groups = groups.iter().map(ToString::to_string).collect::<Vec<_>>();
        let (tx, rx) = flume::unbounded();

        for event in super::hinted(hints) {
            let _ = tx.send(event);
        }

        let task = move || {
            let groups = groups.iter().map(String::as_str).collect::<Vec<_>>();

            for event in events.iter() {
                let event = match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let announced = info.get_property_val_str("groups").unwrap_or("public");
                        if !super::in_groups(announced, &groups) {
                            continue;
                        }

                        Event::Added(Self::source(&info))
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        Event::Removed(Self::name(&fullname).to_string())
                    }
                    _ => continue,
                };

                if tx.send(event).is_err() {
                    tracing::trace!("All subscribers dropped, stopping the mDNS forwarding");

                    break;
                }
            }
        };

        thread::spawn(task);

        Ok(rx)
    }
}

impl std::fmt::Debug for Mdns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mdns").finish_non_exhaustive()
    }
}

impl Drop for Mdns {
    fn drop(&mut self) {
        if let Err(err) = self.daemon.shutdown() {
            tracing::error!("Error while shutting down the mDNS daemon: {err}");
        }
    }
}
