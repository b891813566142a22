use crate::consts::MAX_DEVICE_UID;
use crate::unique_identifier::UniqueIdentifier;

/// Outcome of one DISC_UNIQUE_BRANCH request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryOption {
    /// No unmuted device answered.
    NoDevice,
    /// Exactly one device answered with a valid response.
    Found(UniqueIdentifier),
    /// Several devices answered at once or the response was corrupted.
    Collision,
}

/// The bus operations a discovery sweep needs.
pub trait DiscoveryBus {
    type Error;

    /// Sends DISC_UNIQUE_BRANCH for the inclusive uid range and evaluates the answer.
    fn discover(
        &mut self,
        lower_bound: u64,
        upper_bound: u64,
    ) -> Result<DiscoveryOption, Self::Error>;

    /// Mutes a device. Returns false if the device didn't acknowledge.
    fn mute(&mut self, uid: UniqueIdentifier) -> Result<bool, Self::Error>;
}

/// Counters of a discovery sweep.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveryStats {
    pub branch_requests: u32,
    pub collisions: u32,
    /// Devices that answered a branch but not the following mute.
    pub mute_failures: u32,
}

/// Discovers all unmuted devices on the bus and mutes them. Found uids are written into
/// `uid_array`, the amount found is returned. Devices beyond the length of `uid_array` aren't
/// discovered.
///
/// Devices that were muted before aren't found, so send an un-mute broadcast first.
pub fn run_full_discovery<B: DiscoveryBus>(
    bus: &mut B,
    uid_array: &mut [UniqueIdentifier],
) -> Result<usize, B::Error> {
    let mut stats = DiscoveryStats::default();
    let found = discover_range(bus, 0, MAX_DEVICE_UID, uid_array, &mut stats)?;

    info!(
        "discovery found {} devices with {} branch requests",
        found, stats.branch_requests
    );

    Ok(found)
}

/// Discovers the devices in the inclusive range. Ranges with colliding answers are split in
/// half, so the recursion depth is bounded by the 48 bits of a uid.
pub fn discover_range<B: DiscoveryBus>(
    bus: &mut B,
    lower_bound: u64,
    upper_bound: u64,
    uid_array: &mut [UniqueIdentifier],
    stats: &mut DiscoveryStats,
) -> Result<usize, B::Error> {
    if uid_array.is_empty() || lower_bound > upper_bound {
        return Ok(0);
    }

    stats.branch_requests += 1;

    match bus.discover(lower_bound, upper_bound)? {
        DiscoveryOption::NoDevice => Ok(0),
        DiscoveryOption::Found(uid) => {
            if !bus.mute(uid)? {
                debug!("device {} didn't acknowledge mute", uid);
                stats.mute_failures += 1;
                return Ok(0);
            }

            info!("found device {}", uid);
            uid_array[0] = uid;

            Ok(1)
        },
        DiscoveryOption::Collision => {
            stats.collisions += 1;

            // a single uid can't be split any further
            if lower_bound == upper_bound {
                return Ok(0);
            }

            let middle = lower_bound + (upper_bound - lower_bound) / 2;

            let lower_found = discover_range(bus, lower_bound, middle, uid_array, stats)?;
            let upper_found = discover_range(
                bus,
                middle + 1,
                upper_bound,
                &mut uid_array[lower_found..],
                stats,
            )?;

            Ok(lower_found + upper_found)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    /// Bus where every unmuted device in range answers.
    struct SimulatedBus {
        devices: Vec<(u64, bool)>,
        unresponsive_to_mute: Vec<u64>,
    }

    impl SimulatedBus {
        fn new(uids: &[u64]) -> Self {
            Self {
                devices: uids.iter().map(|&uid| (uid, false)).collect(),
                unresponsive_to_mute: Vec::new(),
            }
        }
    }

    impl DiscoveryBus for SimulatedBus {
        type Error = ();

        fn discover(&mut self, lower_bound: u64, upper_bound: u64) -> Result<DiscoveryOption, ()> {
            let mut answering = self
                .devices
                .iter()
                .filter(|(uid, muted)| !muted && (lower_bound..=upper_bound).contains(uid));

            Ok(match (answering.next(), answering.next()) {
                (None, _) => DiscoveryOption::NoDevice,
                (Some((uid, _)), None) => {
                    DiscoveryOption::Found(UniqueIdentifier::try_from(*uid).unwrap())
                },
                _ => DiscoveryOption::Collision,
            })
        }

        fn mute(&mut self, uid: UniqueIdentifier) -> Result<bool, ()> {
            let uid: u64 = uid.into();
            if self.unresponsive_to_mute.contains(&uid) {
                return Ok(false);
            }

            for device in self.devices.iter_mut().filter(|(device, _)| *device == uid) {
                device.1 = true;
            }

            Ok(true)
        }
    }

    fn placeholder() -> UniqueIdentifier {
        UniqueIdentifier::new(0, 0).unwrap()
    }

    #[test]
    fn test_empty_bus() {
        let mut bus = SimulatedBus::new(&[]);
        let mut uids = [placeholder(); 4];

        assert_eq!(run_full_discovery(&mut bus, &mut uids), Ok(0));
    }

    #[test]
    fn test_dense_range_needs_two_n_minus_one_branches() {
        let devices: Vec<u64> = (0x100..0x108).collect();
        let mut bus = SimulatedBus::new(&devices);
        let mut uids = [placeholder(); 8];
        let mut stats = DiscoveryStats::default();

        let found = discover_range(&mut bus, 0x100, 0x107, &mut uids, &mut stats).unwrap();

        assert_eq!(found, 8);
        assert_eq!(stats.branch_requests, 15);
        assert_eq!(stats.collisions, 7);

        let mut found_uids: Vec<u64> = uids.iter().map(|&uid| uid.into()).collect();
        found_uids.sort_unstable();
        assert_eq!(found_uids, devices);
        assert!(bus.devices.iter().all(|(_, muted)| *muted));
    }

    #[test]
    fn test_sparse_devices_are_all_found() {
        let devices = [1, 0x7FF0_0000_0001, 0x7FF0_0000_0002, 0xFFFE_FFFF_FFFE];
        let mut bus = SimulatedBus::new(&devices);
        let mut uids = [placeholder(); 8];

        assert_eq!(run_full_discovery(&mut bus, &mut uids), Ok(4));

        let mut found_uids: Vec<u64> = uids[..4].iter().map(|&uid| uid.into()).collect();
        found_uids.sort_unstable();
        assert_eq!(found_uids, devices);
    }

    #[test]
    fn test_muted_devices_are_skipped() {
        let mut bus = SimulatedBus::new(&[10, 20]);
        bus.devices[0].1 = true;
        let mut uids = [placeholder(); 4];

        assert_eq!(run_full_discovery(&mut bus, &mut uids), Ok(1));
        assert_eq!(u64::from(uids[0]), 20);
    }

    #[test]
    fn test_unmutable_device_is_not_recorded() {
        let mut bus = SimulatedBus::new(&[10, 20]);
        bus.unresponsive_to_mute.push(10);
        let mut uids = [placeholder(); 4];
        let mut stats = DiscoveryStats::default();

        let found = discover_range(&mut bus, 0, MAX_DEVICE_UID, &mut uids, &mut stats).unwrap();

        assert_eq!(found, 1);
        assert_eq!(u64::from(uids[0]), 20);
        assert_eq!(stats.mute_failures, 1);
    }

    #[test]
    fn test_sweep_stops_when_array_is_full() {
        let mut bus = SimulatedBus::new(&[1, 2, 3, 4]);
        let mut uids = [placeholder(); 2];

        assert_eq!(run_full_discovery(&mut bus, &mut uids), Ok(2));
        assert_eq!(bus.devices.iter().filter(|(_, muted)| *muted).count(), 2);
    }
}
