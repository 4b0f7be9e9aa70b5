use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
    time::{Duration, Instant},
};

use ipnet::IpNet;
use parking_lot::Mutex;

use crate::common::types::AnyResult;

/// Picks alternate local egress addresses for the relay fetch tier from a
/// set of CIDR blocks routed to this host. Addresses that produced
/// transport failures sit out a cooldown before being handed out again.
pub struct EgressPlanner {
    blocks: Vec<IpNet>,
    state: Mutex<PlannerState>,
    cooldown: Duration,
}

struct PlannerState {
    block_index: usize,
    ip_indices: Vec<u128>,
    failing: HashMap<IpAddr, Instant>,
}

impl EgressPlanner {
    pub fn new(cidrs: &[String], cooldown: Duration) -> AnyResult<Self> {
        let mut blocks = Vec::new();
        for cidr in cidrs {
            let parsed = IpNet::from_str(cidr).or_else(|_| {
                // Accept bare addresses by treating them as host routes.
                if cidr.contains(':') {
                    IpNet::from_str(&format!("{}/128", cidr))
                } else {
                    IpNet::from_str(&format!("{}/32", cidr))
                }
            })?;
            blocks.push(parsed);
        }
        if blocks.is_empty() {
            return Err("egress planner needs at least one CIDR block".into());
        }

        let ip_indices = vec![0u128; blocks.len()];
        Ok(Self {
            blocks,
            state: Mutex::new(PlannerState {
                block_index: 0,
                ip_indices,
                failing: HashMap::new(),
            }),
            cooldown,
        })
    }

    /// Next usable egress address, or `None` when every candidate tried is
    /// inside its failure cooldown.
    pub fn next_address(&self) -> Option<IpAddr> {
        let mut state = self.state.lock();
        for _ in 0..64 {
            let ip = Self::step(&self.blocks, &mut state);
            match state.failing.get(&ip) {
                Some(failed_at) if failed_at.elapsed() < self.cooldown => continue,
                Some(_) => {
                    state.failing.remove(&ip);
                    return Some(ip);
                }
                None => return Some(ip),
            }
        }
        None
    }

    pub fn mark_failed(&self, addr: IpAddr) {
        self.state.lock().failing.insert(addr, Instant::now());
    }

    fn step(blocks: &[IpNet], state: &mut PlannerState) -> IpAddr {
        let block_idx = state.block_index % blocks.len();
        let block = &blocks[block_idx];
        state.block_index = (state.block_index + 1) % blocks.len();

        let prefix_len = block.prefix_len();
        let max_bits: u8 = match block {
            IpNet::V4(_) => 32,
            IpNet::V6(_) => 128,
        };
        let size_bits = max_bits - prefix_len;

        // Random stride inside large blocks so consecutive requests don't
        // walk adjacent addresses; tiny blocks just rotate.
        let increment: u128 = if size_bits > 7 {
            use rand::Rng;
            rand::thread_rng().gen_range(10..20)
        } else {
            1
        };

        state.ip_indices[block_idx] = state.ip_indices[block_idx].wrapping_add(increment);
        let index = state.ip_indices[block_idx];

        match block {
            IpNet::V4(net) => {
                let base = u32::from(net.addr());
                let offset = if prefix_len >= 32 {
                    0
                } else {
                    (index as u32) & (!0u32 >> prefix_len)
                };
                IpAddr::V4(Ipv4Addr::from(base.wrapping_add(offset)))
            }
            IpNet::V6(net) => {
                let base = u128::from(net.addr());
                let offset = if prefix_len >= 128 {
                    0
                } else {
                    index & (!0u128 >> prefix_len)
                };
                IpAddr::V6(Ipv6Addr::from(base.wrapping_add(offset)))
            }
        }
    }
}
