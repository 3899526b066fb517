use std::collections::HashMap;

use switchyard_model::{HostRegistration, NodeLoad, ServiceRegistration, SystemLoad};

/// Load factors closer than this are treated as equal.
const LOAD_FACTOR_RESOLUTION: f32 = 0.01;

/// Which hosts a candidate list may draw from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum HostFilter {
    #[default]
    Any,
    /// Any host except these.
    Excluding(Vec<String>),
}

impl HostFilter {
    pub fn allows(&self, host: &str) -> bool {
        match self {
            HostFilter::Any => true,
            HostFilter::Excluding(excluded) => !excluded.iter().any(|h| h == host),
        }
    }
}

/// How dispatch candidates are gathered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    /// Only hosts with headroom (load factor below 1.0).
    WithCapacity,
    /// Every eligible host, busiest last.
    ByLoad,
}

/// Filters `services` down to dispatch candidates and orders them least
/// loaded first. Equal load factors prefer the host with the larger
/// `max_load`.
pub fn rank_candidates(
    services: Vec<ServiceRegistration>,
    hosts: &HashMap<String, HostRegistration>,
    load: &SystemLoad,
    filter: &HostFilter,
    mode: SelectionMode,
) -> Vec<ServiceRegistration> {
    let mut ranked: Vec<(ServiceRegistration, NodeLoad)> = services
        .into_iter()
        .filter(|service| service.is_dispatch_eligible())
        .filter(|service| filter.allows(&service.host))
        .filter_map(|service| {
            let host = hosts.get(&service.host)?;
            if !host.is_available() {
                return None;
            }
            let node = load
                .get(&service.host)
                .cloned()
                .unwrap_or_else(|| NodeLoad::new(&host.base_url, 0.0, host.max_load));
            Some((service, node))
        })
        .filter(|(_, node)| match mode {
            SelectionMode::WithCapacity => node.load_factor() < 1.0,
            SelectionMode::ByLoad => true,
        })
        .collect();

    ranked.sort_by(|(_, a), (_, b)| {
        load_bucket(a)
            .cmp(&load_bucket(b))
            .then_with(|| b.max_load.total_cmp(&a.max_load))
    });
    ranked.into_iter().map(|(service, _)| service).collect()
}

fn load_bucket(node: &NodeLoad) -> i64 {
    (node.load_factor() / LOAD_FACTOR_RESOLUTION).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> (Vec<ServiceRegistration>, HashMap<String, HostRegistration>) {
        let a = HostRegistration::new("http://a", "10.0.0.1", "a", 0, 4, 2.0);
        let b = HostRegistration::new("http://b", "10.0.0.2", "b", 0, 2, 1.0);
        let services = vec![
            ServiceRegistration::new(&b, "encode", "/encode", true),
            ServiceRegistration::new(&a, "encode", "/encode", true),
        ];
        let hosts = [a, b]
            .into_iter()
            .map(|h| (h.base_url.clone(), h))
            .collect();
        (services, hosts)
    }

    fn hosts_of(services: &[ServiceRegistration]) -> Vec<&str> {
        services.iter().map(|s| s.host.as_str()).collect()
    }

    #[test]
    fn idle_tie_prefers_larger_host() {
        let (services, hosts) = fleet();
        let mut load = SystemLoad::new();
        load.add_node_load(NodeLoad::new("http://a", 0.0, 2.0));
        load.add_node_load(NodeLoad::new("http://b", 0.0, 1.0));

        let ranked = rank_candidates(
            services,
            &hosts,
            &load,
            &HostFilter::Any,
            SelectionMode::WithCapacity,
        );
        assert_eq!(hosts_of(&ranked), vec!["http://a", "http://b"]);
    }

    #[test]
    fn lower_load_factor_wins_over_capacity() {
        let (services, hosts) = fleet();
        let mut load = SystemLoad::new();
        load.add_node_load(NodeLoad::new("http://a", 1.0, 2.0));
        load.add_node_load(NodeLoad::new("http://b", 0.0, 1.0));

        let ranked = rank_candidates(
            services,
            &hosts,
            &load,
            &HostFilter::Any,
            SelectionMode::WithCapacity,
        );
        assert_eq!(hosts_of(&ranked), vec!["http://b", "http://a"]);
    }

    #[test]
    fn capacity_mode_drops_full_hosts() {
        let (services, hosts) = fleet();
        let mut load = SystemLoad::new();
        load.add_node_load(NodeLoad::new("http://a", 2.0, 2.0));
        load.add_node_load(NodeLoad::new("http://b", 0.5, 1.0));

        let with_capacity = rank_candidates(
            services.clone(),
            &hosts,
            &load,
            &HostFilter::Any,
            SelectionMode::WithCapacity,
        );
        assert_eq!(hosts_of(&with_capacity), vec!["http://b"]);

        let by_load = rank_candidates(
            services,
            &hosts,
            &load,
            &HostFilter::Any,
            SelectionMode::ByLoad,
        );
        assert_eq!(hosts_of(&by_load), vec!["http://b", "http://a"]);
    }

    #[test]
    fn host_filter_and_maintenance_are_respected() {
        let (services, mut hosts) = fleet();
        let load = SystemLoad::new();

        let without_a = rank_candidates(
            services.clone(),
            &hosts,
            &load,
            &HostFilter::Excluding(vec!["http://a".into()]),
            SelectionMode::ByLoad,
        );
        assert_eq!(hosts_of(&without_a), vec!["http://b"]);

        if let Some(a) = hosts.get_mut("http://a") {
            a.maintenance_mode = true;
        }
        let ranked = rank_candidates(
            services,
            &hosts,
            &load,
            &HostFilter::Excluding(vec!["http://b".into()]),
            SelectionMode::ByLoad,
        );
        assert!(ranked.is_empty());
    }
}
