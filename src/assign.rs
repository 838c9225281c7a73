//! Pure mapping from an ordered list of assigned hosts to a dense,
//! deterministic slot ranking. No state, no I/O — callers gate invocation on
//! `HostManager::count_available_slots` per `spec.md` §4.2.

use crate::error::{DriverError, DriverResult};
use crate::host::Host;

/// One worker's position in the current rendezvous generation. Ranks carry
/// no stability guarantee across generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub hostname: String,
    pub local_rank: u32,
    pub local_size: u32,
    pub cross_rank: u32,
    pub cross_size: u32,
    pub rank: u32,
    pub size: u32,
}

pub struct Assigner;

impl Assigner {
    /// Builds the dense slot ranking for `assigned_hosts`, in the order
    /// given. Fails if the total slot count falls outside `[min_np, max_np]`.
    pub fn assign(
        assigned_hosts: &[Host],
        min_np: u32,
        max_np: Option<u32>,
    ) -> DriverResult<Vec<SlotInfo>> {
        let total: u32 = assigned_hosts.iter().map(|h| h.slots).sum();

        if total < min_np {
            return Err(DriverError::InsufficientResources {
                assigned: total,
                min_np,
            });
        }
        if let Some(max_np) = max_np {
            if total > max_np {
                return Err(DriverError::TooManyResources {
                    assigned: total,
                    max_np,
                });
            }
        }

        let cross_size = assigned_hosts.len() as u32;
        let mut slots = Vec::with_capacity(total as usize);
        let mut rank = 0u32;

        for (cross_rank, host) in assigned_hosts.iter().enumerate() {
            for local_rank in 0..host.slots {
                slots.push(SlotInfo {
                    hostname: host.name.clone(),
                    local_rank,
                    local_size: host.slots,
                    cross_rank: cross_rank as u32,
                    cross_size,
                    rank,
                    size: total,
                });
                rank += 1;
            }
        }

        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, slots: u32) -> Host {
        Host {
            name: name.to_string(),
            slots,
        }
    }

    #[test]
    fn dense_ranking_is_host_major_slot_minor() {
        let hosts = vec![host("h1", 2), host("h2", 2)];
        let slots = Assigner::assign(&hosts, 4, Some(4)).unwrap();

        let ranks: Vec<u32> = slots.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert_eq!(slots[0].hostname, "h1");
        assert_eq!(slots[2].hostname, "h2");
        assert_eq!(slots[2].cross_rank, 1);
        assert_eq!(slots[2].local_rank, 0);
        assert!(slots.iter().all(|s| s.size == 4 && s.cross_size == 2));
    }

    #[test]
    fn below_min_np_is_insufficient_resources() {
        let hosts = vec![host("h1", 1)];
        let err = Assigner::assign(&hosts, 4, None).unwrap_err();
        assert!(matches!(err, DriverError::InsufficientResources { .. }));
    }

    #[test]
    fn above_max_np_is_too_many_resources() {
        let hosts = vec![host("h1", 8)];
        let err = Assigner::assign(&hosts, 1, Some(4)).unwrap_err();
        assert!(matches!(err, DriverError::TooManyResources { .. }));
    }

    #[test]
    fn unbounded_max_np_accepts_any_surplus() {
        let hosts = vec![host("h1", 100)];
        assert!(Assigner::assign(&hosts, 1, None).is_ok());
    }
}
