//! Interface registry. Built once at startup from a sequence of
//! [`InterfaceEntry`](crate::config::InterfaceEntry) values and handed to
//! workers by shared reference afterwards — one `Registry` value, owning
//! its `SlotMap`s directly, never a process-wide mutable global.

mod ports;
mod round_robin;
mod spec;

pub use ports::{get_consecutive_ports, get_consecutive_ports_on_lif};
pub use spec::{InterfaceSpec, PortPool};

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::SlotMap;

use round_robin::RrGroup;

slotmap::new_key_type! {
    pub struct LogicalInterfaceId;
    pub struct LocalInterfaceId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    /// Deterministic family probe order used when neither `name` nor
    /// `family` is given to `get_logical_interface`.
    const PROBE_ORDER: [Family; 2] = [Family::V4, Family::V6];
}

pub struct LogicalInterface {
    pub name: String,
    pub name_base: String,
    pub family: Family,
    pub local_interfaces: Vec<LocalInterfaceId>,
}

pub struct LocalInterface {
    pub lif: LogicalInterfaceId,
    pub spec: Arc<InterfaceSpec>,
    pub advertised_address: IpAddr,
    pub ice_foundation: String,
}

const LEGACY_GROUP_NAME: &str = "round-robin-calls";

pub struct Registry {
    lifs: SlotMap<LogicalInterfaceId, LogicalInterface>,
    local_interfaces: SlotMap<LocalInterfaceId, LocalInterface>,

    /// Interface specs are shared by every LI bound to the same address.
    specs: Mutex<HashMap<IpAddr, Arc<InterfaceSpec>>>,

    /// Direct (name, family) lookup.
    by_name_family: HashMap<(String, Family), LogicalInterfaceId>,

    /// Preferred list per family: native-family LIFs first, then LIFs of
    /// every other family appended as lower-preference alternatives.
    preferred: HashMap<Family, Vec<LogicalInterfaceId>>,

    /// Round-robin groups keyed by (name_base, family), plus the
    /// name-agnostic legacy group keyed by (`round-robin-calls`, family).
    rr_groups: HashMap<(String, Family), RrGroup>,
}

impl Registry {
    pub fn new(entries: &[crate::config::InterfaceEntry]) -> Self {
        let mut registry = Registry {
            lifs: SlotMap::with_key(),
            local_interfaces: SlotMap::with_key(),
            specs: Mutex::new(HashMap::new()),
            by_name_family: HashMap::new(),
            preferred: HashMap::new(),
            rr_groups: HashMap::new(),
        };

        for entry in entries {
            registry.add_entry(entry);
        }

        registry
    }

    fn spec_for(&self, address: IpAddr, port_min: u16, port_max: u16) -> Arc<InterfaceSpec> {
        self.specs
            .lock()
            .entry(address)
            .or_insert_with(|| Arc::new(InterfaceSpec::new(address, port_min, port_max)))
            .clone()
    }

    fn add_entry(&mut self, entry: &crate::config::InterfaceEntry) {
        let family = Family::of(entry.local_address);
        let key = (entry.name.clone(), family);

        let lif_id = *self.by_name_family.entry(key.clone()).or_insert_with(|| {
            self.lifs.insert(LogicalInterface {
                name: entry.name.clone(),
                name_base: entry.name_base.clone(),
                family,
                local_interfaces: Vec::new(),
            })
        });

        let spec = self.spec_for(entry.local_address, entry.port_min, entry.port_max);

        let li_id = self.local_interfaces.insert(LocalInterface {
            lif: lif_id,
            spec,
            advertised_address: entry.advertised_address,
            ice_foundation: format!("{}-{}", entry.name, self.local_interfaces.len()),
        });

        self.lifs[lif_id].local_interfaces.push(li_id);

        // Step 2: own family's preferred list, name_base RR group, legacy RR group.
        let preferred = self.preferred.entry(family).or_default();
        if !preferred.contains(&lif_id) {
            preferred.push(lif_id);
        }

        self.rr_group_mut(entry.name_base.clone(), family).push(lif_id);
        self.rr_group_mut(LEGACY_GROUP_NAME.to_string(), family)
            .push(lif_id);

        // Step 3: append to every *other* family's preferred list as a
        // lower-preference alternative.
        for other in Family::PROBE_ORDER {
            if other == family {
                continue;
            }
            let list = self.preferred.entry(other).or_default();
            if !list.contains(&lif_id) {
                list.push(lif_id);
            }
        }
    }

    fn rr_group_mut(&mut self, name_base: String, family: Family) -> &mut RrGroup {
        self.rr_groups.entry((name_base, family)).or_default()
    }

    pub fn lif(&self, id: LogicalInterfaceId) -> &LogicalInterface {
        &self.lifs[id]
    }

    pub fn local_interface(&self, id: LocalInterfaceId) -> &LocalInterface {
        &self.local_interfaces[id]
    }

    pub fn local_interfaces_of(&self, lif: LogicalInterfaceId) -> &[LocalInterfaceId] {
        &self.lifs[lif].local_interfaces
    }

    fn has_free_ports(&self, lif: LogicalInterfaceId, num_ports: u16) -> bool {
        self.lifs[lif]
            .local_interfaces
            .iter()
            .all(|li| self.local_interfaces[*li].spec.port_pool.free_count() >= num_ports as u32)
    }

    fn direct_lookup(&self, name: &str, family: Family) -> Option<LogicalInterfaceId> {
        self.by_name_family
            .get(&(name.to_string(), family))
            .copied()
    }

    /// Resolves a logical interface by optional name and address family,
    /// falling back to the probe order when either is omitted.
    pub fn get_logical_interface(
        &self,
        name: Option<&str>,
        family: Option<Family>,
        num_ports: u16,
    ) -> Option<LogicalInterfaceId> {
        let Some(name) = name else {
            return match family {
                Some(family) => self.preferred.get(&family).and_then(|l| l.first().copied()),
                None => Family::PROBE_ORDER
                    .iter()
                    .find_map(|family| self.preferred.get(family).and_then(|l| l.first().copied())),
            };
        };

        let family = family.unwrap_or(Family::V4);

        if let Some(group) = self.rr_groups.get(&(name.to_string(), family)) {
            for candidate in group.rotate() {
                if self.has_free_ports(candidate, num_ports) {
                    return Some(candidate);
                }
            }
        }

        self.direct_lookup(name, family)
    }

    /// One-shot startup call: marks `port` used on every configured spec so
    /// the allocator never hands it out.
    pub fn interfaces_exclude_port(&self, port: u16) {
        for spec in self.specs.lock().values() {
            spec.port_pool.try_claim(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceEntry;
    use std::net::Ipv4Addr;

    fn entry(name: &str, name_base: &str, addr: [u8; 4], min: u16, max: u16) -> InterfaceEntry {
        InterfaceEntry {
            name: name.into(),
            name_base: name_base.into(),
            advertised_address: IpAddr::V4(Ipv4Addr::from(addr)),
            local_address: IpAddr::V4(Ipv4Addr::from(addr)),
            port_min: min,
            port_max: max,
        }
    }

    #[test]
    fn direct_lookup_finds_configured_interface() {
        let registry = Registry::new(&[entry("A", "A", [10, 0, 0, 1], 10000, 10099)]);
        let lif = registry
            .get_logical_interface(Some("A"), Some(Family::V4), 2)
            .expect("interface A must be found");
        assert_eq!(registry.lif(lif).name, "A");
    }

    #[test]
    fn lookup_without_name_returns_preferred_family_head() {
        let registry = Registry::new(&[entry("A", "A", [10, 0, 0, 1], 10000, 10099)]);
        let lif = registry
            .get_logical_interface(None, Some(Family::V4), 1)
            .expect("must fall back to preferred list head");
        assert_eq!(registry.lif(lif).name, "A");
    }

    #[test]
    fn round_robin_group_skips_interfaces_without_enough_free_ports() {
        let registry = Registry::new(&[
            entry("A", "rr", [10, 0, 0, 1], 10000, 10001), // only 2 ports
            entry("B", "rr", [10, 0, 0, 2], 10000, 10099), // 100 ports
        ]);

        // Exhaust A's two ports.
        let a = registry.direct_lookup("A", Family::V4).unwrap();
        for li in registry.local_interfaces_of(a) {
            let li = registry.local_interface(*li);
            assert!(li.spec.port_pool.try_claim(10000));
            assert!(li.spec.port_pool.try_claim(10001));
        }

        let chosen = registry
            .get_logical_interface(Some("rr"), Some(Family::V4), 2)
            .expect("B must be chosen since A has no free ports");
        assert_eq!(registry.lif(chosen).name, "B");
    }
}
