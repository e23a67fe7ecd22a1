//! Scenario planning: addresses, neighbor set and checkpoints for one run.
//!
//! The plan is the data the convergence machinery needs from a scenario: how
//! many neighbors exist, which checkpoint each must reach, and the monitor's
//! required route count. Rendering vendor daemon configs from it is left to
//! external tooling.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::config::ScenarioConfig;
use crate::core::errors::{BenchError, Result};

/// First host offset handed to tester neighbors (.1 is the bridge, .2 the monitor).
const FIRST_NEIGHBOR_OFFSET: u32 = 3;
const TESTER_ASN_BASE: u32 = 1000;
const TARGET_ASN: u32 = 1000;
const MONITOR_ASN: u32 = 1001;

/// IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Prefix {
    network: Ipv4Addr,
    len: u8,
}

impl Ipv4Prefix {
    pub fn parse(raw: &str) -> Result<Self> {
        let (addr_raw, len_raw) = raw.trim().split_once('/').ok_or_else(|| {
            BenchError::InvalidScenario {
                details: format!("expected CIDR notation (a.b.c.d/len), got {raw:?}"),
            }
        })?;
        let addr = Ipv4Addr::from_str(addr_raw).map_err(|err| BenchError::InvalidScenario {
            details: format!("bad network address {addr_raw:?}: {err}"),
        })?;
        let len = len_raw
            .parse::<u8>()
            .ok()
            .filter(|len| *len <= 32)
            .ok_or_else(|| BenchError::InvalidScenario {
                details: format!("bad prefix length {len_raw:?}"),
            })?;
        let network = Ipv4Addr::from(u32::from(addr) & mask(len));
        Ok(Self { network, len })
    }

    #[must_use]
    pub const fn network(&self) -> Ipv4Addr {
        self.network
    }

    #[must_use]
    pub const fn len(&self) -> u8 {
        self.len
    }

    #[must_use]
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask(self.len))
    }

    /// Address `offset` hosts above the network address, if still inside the prefix.
    #[must_use]
    pub fn host(&self, offset: u32) -> Option<Ipv4Addr> {
        let base = u32::from(self.network);
        let addr = base.checked_add(offset)?;
        (addr <= u32::from(self.broadcast())).then(|| Ipv4Addr::from(addr))
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.len)
    }
}

const fn mask(len: u8) -> u32 {
    if len == 0 { 0 } else { u32::MAX << (32 - len) }
}

/// One tester-side BGP neighbor of the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborPlan {
    pub address: Ipv4Addr,
    pub asn: u32,
    /// Accepted routes the target must show from this neighbor.
    pub checkpoint: u64,
}

/// Derived scenario data consumed by samplers, monitor and reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPlan {
    pub name: String,
    pub target: String,
    pub tester_type: String,
    pub local_prefix: String,
    pub target_address: Ipv4Addr,
    pub target_asn: u32,
    pub monitor_address: Ipv4Addr,
    pub monitor_asn: u32,
    pub neighbor_num: usize,
    pub prefix_num: u64,
    /// Monitor checkpoint; the `required` count of the result record.
    pub required: u64,
    pub neighbors: Vec<NeighborPlan>,
}

impl ScenarioPlan {
    pub fn from_config(scenario: &ScenarioConfig) -> Result<Self> {
        let prefix = Ipv4Prefix::parse(&scenario.local_address_prefix)?;

        let target_address = match &scenario.target_local_address {
            Some(raw) => parse_addr("target_local_address", raw)?,
            None => Ipv4Addr::from(u32::from(prefix.broadcast()).saturating_sub(1)),
        };
        let monitor_address = match &scenario.monitor_local_address {
            Some(raw) => parse_addr("monitor_local_address", raw)?,
            None => prefix.host(2).ok_or_else(|| BenchError::InvalidScenario {
                details: format!("prefix {prefix} too small for a monitor address"),
            })?,
        };

        let mrt = is_mrt_tester(&scenario.tester_type);
        let base = if mrt {
            scenario.prefix_num
        } else {
            scenario.prefix_num.saturating_mul(scenario.neighbor_num as u64)
        };
        let factor = scenario
            .required_factor
            .unwrap_or_else(|| default_required_factor(&scenario.target, &scenario.tester_type));
        let required = scale_checkpoint(base, factor);
        let per_neighbor = if mrt { required } else { scenario.prefix_num };

        let mut neighbors = Vec::with_capacity(scenario.neighbor_num);
        let mut offset = FIRST_NEIGHBOR_OFFSET;
        while neighbors.len() < scenario.neighbor_num {
            let Some(address) = prefix.host(offset) else {
                return Err(BenchError::InvalidScenario {
                    details: format!(
                        "prefix {prefix} exhausted after {} of {} neighbors",
                        neighbors.len(),
                        scenario.neighbor_num
                    ),
                });
            };
            if address == prefix.broadcast() {
                return Err(BenchError::InvalidScenario {
                    details: format!(
                        "prefix {prefix} exhausted after {} of {} neighbors",
                        neighbors.len(),
                        scenario.neighbor_num
                    ),
                });
            }
            if address != target_address && address != monitor_address {
                neighbors.push(NeighborPlan {
                    address,
                    asn: TESTER_ASN_BASE + offset,
                    checkpoint: per_neighbor,
                });
            }
            offset += 1;
        }

        Ok(Self {
            name: scenario.name.clone(),
            target: scenario.target.clone(),
            tester_type: scenario.tester_type.clone(),
            local_prefix: prefix.to_string(),
            target_address,
            target_asn: TARGET_ASN,
            monitor_address,
            monitor_asn: MONITOR_ASN,
            neighbor_num: scenario.neighbor_num,
            prefix_num: scenario.prefix_num,
            required,
            neighbors,
        })
    }

    /// Per-neighbor checkpoints keyed by neighbor address.
    #[must_use]
    pub fn neighbor_checkpoints(&self) -> BTreeMap<String, u64> {
        self.neighbors
            .iter()
            .map(|n| (n.address.to_string(), n.checkpoint))
            .collect()
    }

    /// Label used for time-series emissions of this run.
    #[must_use]
    pub fn graph_prefix(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.target, self.tester_type, self.prefix_num, self.neighbor_num
        )
    }

    /// Substitute `{target}`, `{target_address}`, `{monitor_address}` and `{name}`.
    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{target_address}", &self.target_address.to_string())
            .replace("{monitor_address}", &self.monitor_address.to_string())
            .replace("{target}", &self.target)
            .replace("{name}", &self.name)
    }

    /// Expand every element of a command line.
    #[must_use]
    pub fn expand_argv(&self, argv: &[String]) -> Vec<String> {
        argv.iter().map(|arg| self.expand(arg)).collect()
    }
}

/// MRT injectors replay one table per neighbor; each carries the full set.
#[must_use]
pub fn is_mrt_tester(tester_type: &str) -> bool {
    matches!(tester_type, "gobgp" | "bgpdump2")
}

/// Known shortfalls: GoBGP's MRT injector does not send every route, BIRD
/// rejects a handful.
#[must_use]
pub fn default_required_factor(target: &str, tester_type: &str) -> f64 {
    if tester_type == "gobgp" {
        0.93
    } else if target == "bird" {
        0.99
    } else {
        1.0
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scale_checkpoint(base: u64, factor: f64) -> u64 {
    if (factor - 1.0).abs() < f64::EPSILON {
        return base;
    }
    (base as f64 * factor).floor() as u64
}

fn parse_addr(field: &str, raw: &str) -> Result<Ipv4Addr> {
    Ipv4Addr::from_str(raw.trim()).map_err(|err| BenchError::InvalidScenario {
        details: format!("scenario.{field} {raw:?}: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(neighbors: usize, prefixes: u64) -> ScenarioConfig {
        ScenarioConfig {
            neighbor_num: neighbors,
            prefix_num: prefixes,
            ..ScenarioConfig::default()
        }
    }

    #[test]
    fn prefix_parse_masks_host_bits() {
        let prefix = Ipv4Prefix::parse("10.10.3.7/16").unwrap();
        assert_eq!(prefix.network(), Ipv4Addr::new(10, 10, 0, 0));
        assert_eq!(prefix.broadcast(), Ipv4Addr::new(10, 10, 255, 255));
        assert_eq!(prefix.to_string(), "10.10.0.0/16");
        assert!(Ipv4Prefix::parse("10.10.0.0/33").is_err());
        assert!(Ipv4Prefix::parse("10.10.0/16").is_err());
    }

    #[test]
    fn default_addresses_follow_prefix() {
        let plan = ScenarioPlan::from_config(&scenario(3, 50)).unwrap();
        assert_eq!(plan.target_address, Ipv4Addr::new(10, 10, 255, 254));
        assert_eq!(plan.monitor_address, Ipv4Addr::new(10, 10, 0, 2));
        let addrs: Vec<String> = plan.neighbors.iter().map(|n| n.address.to_string()).collect();
        assert_eq!(addrs, ["10.10.0.3", "10.10.0.4", "10.10.0.5"]);
        assert_eq!(plan.neighbors[0].asn, 1003);
        assert!(plan.neighbors.iter().all(|n| n.checkpoint == 50));
        assert_eq!(plan.required, 150);
    }

    #[test]
    fn neighbors_skip_colliding_addresses() {
        let mut cfg = scenario(2, 10);
        cfg.target_local_address = Some("10.10.0.4".to_string());
        let plan = ScenarioPlan::from_config(&cfg).unwrap();
        let addrs: Vec<String> = plan.neighbors.iter().map(|n| n.address.to_string()).collect();
        assert_eq!(addrs, ["10.10.0.3", "10.10.0.5"]);
    }

    #[test]
    fn small_prefix_is_exhausted() {
        let mut cfg = scenario(10, 10);
        cfg.local_address_prefix = "192.168.0.0/29".to_string();
        let err = ScenarioPlan::from_config(&cfg).expect_err("prefix too small");
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn required_scales_by_target_and_tester() {
        let mut cfg = scenario(10, 1000);
        cfg.target = "bird".to_string();
        assert_eq!(ScenarioPlan::from_config(&cfg).unwrap().required, 9900);

        cfg.tester_type = "gobgp".to_string();
        let mrt = ScenarioPlan::from_config(&cfg).unwrap();
        assert_eq!(mrt.required, 930);
        assert!(mrt.neighbors.iter().all(|n| n.checkpoint == 930));

        cfg.required_factor = Some(1.0);
        assert_eq!(ScenarioPlan::from_config(&cfg).unwrap().required, 1000);
    }

    #[test]
    fn expand_substitutes_placeholders() {
        let plan = ScenarioPlan::from_config(&scenario(1, 1)).unwrap();
        let argv = plan.expand_argv(&[
            "docker".to_string(),
            "exec".to_string(),
            "bgperf_{target}_target".to_string(),
            "{target_address}".to_string(),
        ]);
        assert_eq!(argv, ["docker", "exec", "bgperf_gobgp_target", "10.10.255.254"]);
        assert_eq!(plan.graph_prefix(), "gobgp_bird_1_1");
    }
}
