//! Host-name resolution cache.
//!
//! Fixed-capacity LRU keyed by host name with a TTL: entries past the
//! expiry are zeroed before lookup. Failed resolutions are cached too, so a
//! world with a dead host name costs one DNS round per TTL instead of one
//! per query.

use crate::core::Clock;
use std::net::{IpAddr, ToSocketAddrs};

#[derive(Debug, Clone, Default)]
struct HostCacheEntry {
    host_name: String,
    resolved: bool,
    ip_address: u32,
    resolve_time: i64,
}

pub struct HostCache {
    entries: Vec<HostCacheEntry>,
    expire_time: i64,
    clock: Clock,
}

/// Synchronous IPv4 lookup, first matching address wins. Returns the
/// address in host byte order.
fn lookup_host(host_name: &str) -> Option<u32> {
    // Port 0 keeps ToSocketAddrs happy; only the address matters.
    match (host_name, 0u16).to_socket_addrs() {
        Ok(addrs) => {
            for addr in addrs {
                if let IpAddr::V4(v4) = addr.ip() {
                    return Some(u32::from(v4));
                }
            }
            tracing::error!("no IPv4 address for host name \"{}\"", host_name);
            None
        }
        Err(err) => {
            tracing::error!("failed to resolve host name \"{}\": {}", host_name, err);
            None
        }
    }
}

impl HostCache {
    pub fn new(capacity: usize, expire_time: i64, clock: Clock) -> Self {
        tracing::info!("Max cached host names: {}", capacity);
        tracing::info!("Host name expire time: {}ms", expire_time);
        Self {
            entries: vec![HostCacheEntry::default(); capacity],
            expire_time,
            clock,
        }
    }

    /// Resolves `host_name` to an IPv4 address in host byte order, serving
    /// from the cache when possible.
    pub fn resolve(&mut self, host_name: &str) -> Option<u32> {
        self.resolve_with(host_name, lookup_host)
    }

    fn resolve_with(
        &mut self,
        host_name: &str,
        mut lookup: impl FnMut(&str) -> Option<u32>,
    ) -> Option<u32> {
        let now = self.clock.monotonic_ms();

        let mut hit: Option<usize> = None;
        let mut lru_index = 0;
        let mut lru_time = self.entries[0].resolve_time;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if (now - entry.resolve_time) >= self.expire_time {
                *entry = HostCacheEntry::default();
            }

            if entry.resolve_time < lru_time {
                lru_index = i;
                lru_time = entry.resolve_time;
            }

            if entry.host_name == host_name {
                hit = Some(i);
                break;
            }
        }

        let entry = match hit {
            Some(i) => &self.entries[i],
            None => {
                // Failures are cached as well.
                let entry = &mut self.entries[lru_index];
                entry.host_name = host_name.to_string();
                match lookup(host_name) {
                    Some(addr) => {
                        entry.resolved = true;
                        entry.ip_address = addr;
                    }
                    None => {
                        entry.resolved = false;
                        entry.ip_address = 0;
                    }
                }
                entry.resolve_time = now;
                entry
            }
        };

        entry.resolved.then_some(entry.ip_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, expire: i64) -> HostCache {
        HostCache::new(capacity, expire, Clock::new())
    }

    #[test]
    fn test_resolves_localhost() {
        let mut cache = cache(4, 60_000);
        assert_eq!(cache.resolve("localhost"), Some(0x7F000001));
    }

    #[test]
    fn test_hit_avoids_second_lookup() {
        let mut cache = cache(4, 60_000);
        let mut lookups = 0;
        let lookup = |_: &str| {
            lookups += 1;
            Some(0x0A000001)
        };
        assert_eq!(cache.resolve_with("alpha.example", lookup), Some(0x0A000001));

        let lookup = |_: &str| -> Option<u32> { panic!("cache miss on cached host") };
        assert_eq!(cache.resolve_with("alpha.example", lookup), Some(0x0A000001));
        assert_eq!(lookups, 1);
    }

    #[test]
    fn test_failures_are_cached() {
        let mut cache = cache(4, 60_000);
        assert_eq!(cache.resolve_with("gone.example", |_| None), None);

        let lookup = |_: &str| -> Option<u32> { panic!("negative entry was not cached") };
        assert_eq!(cache.resolve_with("gone.example", lookup), None);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let mut cache = cache(2, 60_000);
        cache.resolve_with("a.example", |_| Some(1));
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.resolve_with("b.example", |_| Some(2));
        std::thread::sleep(std::time::Duration::from_millis(2));
        // "a" is the least recently resolved entry and must be the victim.
        cache.resolve_with("c.example", |_| Some(3));

        let mut relookups = 0;
        cache.resolve_with("a.example", |_| {
            relookups += 1;
            Some(1)
        });
        assert_eq!(relookups, 1);
    }

    #[test]
    fn test_ttl_expiry_forces_relookup() {
        let mut cache = cache(2, 10);
        cache.resolve_with("a.example", |_| Some(1));
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut relookups = 0;
        cache.resolve_with("a.example", |_| {
            relookups += 1;
            Some(1)
        });
        assert_eq!(relookups, 1);
    }
}
