//! Known EVM networks and CAIP-2 chain ID resolution.
//!
//! Trimmed single-namespace version of the teacher's `KNOWN_NETWORKS` registry
//! (`x402-types::networks`): this gateway only ever quotes and settles on `eip155`
//! networks, so there is one flat table instead of a namespace-keyed one.

use std::collections::HashMap;
use std::sync::LazyLock;

/// A well-known EVM network: its human-readable name and CAIP-2 chain reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub chain_id: &'static str,
}

impl NetworkInfo {
    /// The full CAIP-2 identifier, e.g. `eip155:84532`.
    pub fn caip2(&self) -> String {
        format!("eip155:{}", self.chain_id)
    }
}

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "base",
        chain_id: "8453",
    },
    NetworkInfo {
        name: "base-sepolia",
        chain_id: "84532",
    },
    NetworkInfo {
        name: "polygon",
        chain_id: "137",
    },
    NetworkInfo {
        name: "polygon-amoy",
        chain_id: "80002",
    },
    NetworkInfo {
        name: "avalanche",
        chain_id: "43114",
    },
    NetworkInfo {
        name: "avalanche-fuji",
        chain_id: "43113",
    },
    NetworkInfo {
        name: "celo",
        chain_id: "42220",
    },
    NetworkInfo {
        name: "celo-sepolia",
        chain_id: "11142220",
    },
];

static NAME_TO_NETWORK: LazyLock<HashMap<&'static str, &'static NetworkInfo>> =
    LazyLock::new(|| KNOWN_NETWORKS.iter().map(|n| (n.name, n)).collect());

/// Resolves a `BASE_NETWORK` env value (a human name like `base-sepolia`) to its
/// CAIP-2 identifier. Falls back to treating the input as an already-CAIP-2 string
/// (`eip155:84532`) if it isn't a known name, so operators can target chains not yet
/// in the registry.
pub fn resolve_caip2(base_network: &str) -> String {
    match NAME_TO_NETWORK.get(base_network) {
        Some(info) => info.caip2(),
        None if base_network.contains(':') => base_network.to_string(),
        None => format!("eip155:{base_network}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_name() {
        assert_eq!(resolve_caip2("base-sepolia"), "eip155:84532");
        assert_eq!(resolve_caip2("celo"), "eip155:42220");
    }

    #[test]
    fn passes_through_explicit_caip2() {
        assert_eq!(resolve_caip2("eip155:999"), "eip155:999");
    }

    #[test]
    fn treats_unknown_bare_name_as_chain_id() {
        assert_eq!(resolve_caip2("999"), "eip155:999");
    }
}
