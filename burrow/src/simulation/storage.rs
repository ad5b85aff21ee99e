//! Simulated disk for deterministic crash testing.
//!
//! A [`SimulatedDisk`] remembers which writes have been synced. Storages
//! opened on it inject write and sync errors at configurable rates, and
//! [`SimulatedDisk::crash`] throws away a random suffix of the unsynced
//! writes, tearing the last surviving one.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{Storage, offset_to_index};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Create a fault config with low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            write_error_rate: 0.002,
            sync_error_rate: 0.002,
        }
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            write_error_rate: 0.02,
            sync_error_rate: 0.02,
        }
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Data { offset: usize, bytes: Vec<u8> },
    SetLen(usize),
}

impl PendingWrite {
    fn apply(&self, data: &mut Vec<u8>) {
        match self {
            Self::Data { offset, bytes } => {
                let end = offset + bytes.len();
                if end > data.len() {
                    data.resize(end, 0);
                }
                data[*offset..end].copy_from_slice(bytes);
            }
            Self::SetLen(len) => data.resize(*len, 0),
        }
    }

    /// Apply only part of the write, as a power cut in the middle would.
    fn apply_torn(&self, data: &mut Vec<u8>, rng: &mut StdRng) {
        match self {
            Self::Data { offset, bytes } if !bytes.is_empty() => {
                let cut = rng.random_range(0..bytes.len());
                Self::Data {
                    offset: *offset,
                    bytes: bytes[..cut].to_vec(),
                }
                .apply(data);
            }
            other => other.apply(data),
        }
    }
}

#[derive(Debug)]
struct DiskState {
    /// What survives a crash for certain.
    durable: Vec<u8>,
    /// What reads see.
    current: Vec<u8>,
    /// Writes since the last sync, oldest first.
    unsynced: Vec<PendingWrite>,
    faults: FaultConfig,
    faults_enabled: bool,
    rng: StdRng,
    stats: SimulatedStorageStats,
}

/// Statistics about simulated storage operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedStorageStats {
    /// Number of writes, including resizes.
    pub writes: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of injected sync errors.
    pub injected_sync_errors: u64,
    /// Number of crashes.
    pub crashes: u64,
}

impl DiskState {
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if !self.faults_enabled || rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    fn record(&mut self, write: PendingWrite) -> io::Result<()> {
        self.stats.writes += 1;
        let rate = self.faults.write_error_rate;
        if self.should_inject_fault(rate) {
            self.stats.injected_write_errors += 1;
            return Err(io::Error::other("simulated write error"));
        }
        write.apply(&mut self.current);
        self.unsynced.push(write);
        Ok(())
    }
}

/// One simulated device, shared by every storage opened on it.
#[derive(Debug, Clone)]
pub struct SimulatedDisk {
    state: Arc<Mutex<DiskState>>,
}

impl SimulatedDisk {
    /// Create an empty disk; `seed` drives fault injection and crashes.
    #[must_use]
    pub fn new(seed: u64, faults: FaultConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DiskState {
                durable: Vec::new(),
                current: Vec::new(),
                unsynced: Vec::new(),
                faults,
                faults_enabled: true,
                rng: StdRng::seed_from_u64(seed),
                stats: SimulatedStorageStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A storage handle on this disk.
    #[must_use]
    pub fn storage(&self) -> Box<dyn Storage> {
        Box::new(SimulatedStorage { disk: self.clone() })
    }

    /// Turn fault injection on or off.
    pub fn set_faults_enabled(&self, enabled: bool) {
        self.lock().faults_enabled = enabled;
    }

    /// Lose power: keep every synced write and a random prefix of the
    /// unsynced ones, the last of which may be torn.
    pub fn crash(&self) {
        let mut state = self.lock();
        let state = &mut *state;
        let unsynced = std::mem::take(&mut state.unsynced);
        let mut image = state.durable.clone();

        let survivors = state.rng.random_range(0..=unsynced.len());
        for (i, write) in unsynced.iter().take(survivors).enumerate() {
            if i + 1 == survivors && state.rng.random_bool(0.5) {
                write.apply_torn(&mut image, &mut state.rng);
            } else {
                write.apply(&mut image);
            }
        }

        state.durable.clone_from(&image);
        state.current = image;
        state.stats.crashes += 1;
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SimulatedStorageStats {
        self.lock().stats
    }

    /// Bytes a reader sees right now.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().current.len()
    }
}

/// `Storage` over a [`SimulatedDisk`].
#[derive(Debug)]
pub struct SimulatedStorage {
    disk: SimulatedDisk,
}

impl Storage for SimulatedStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let state = self.disk.lock();
        let start = offset_to_index(offset)?;
        let end = start + buf.len();
        if end > state.current.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {end} bytes past end {}", state.current.len()),
            ));
        }
        buf.copy_from_slice(&state.current[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let offset = offset_to_index(offset)?;
        self.disk.lock().record(PendingWrite::Data {
            offset,
            bytes: data.to_vec(),
        })
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.disk.lock().current.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = offset_to_index(len)?;
        self.disk.lock().record(PendingWrite::SetLen(len))
    }

    fn sync(&mut self) -> io::Result<()> {
        let mut state = self.disk.lock();
        state.stats.syncs += 1;
        let rate = state.faults.sync_error_rate;
        if state.should_inject_fault(rate) {
            state.stats.injected_sync_errors += 1;
            return Err(io::Error::other("simulated sync error"));
        }
        state.unsynced.clear();
        state.durable = state.current.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synced_writes_survive_a_crash() {
        let disk = SimulatedDisk::new(1, FaultConfig::no_faults());
        let mut storage = disk.storage();
        storage.write_at(0, b"durable").expect("write");
        storage.sync().expect("sync");
        storage.write_at(7, b" and maybe more").expect("write");

        disk.crash();
        let mut buf = [0u8; 7];
        storage.read_at(0, &mut buf).expect("read");
        assert_eq!(&buf, b"durable");
        assert!(disk.len() >= 7);
    }

    #[test]
    fn test_crash_is_deterministic() {
        let run = |seed| {
            let disk = SimulatedDisk::new(seed, FaultConfig::no_faults());
            let mut storage = disk.storage();
            for i in 0..20u8 {
                storage.write_at(u64::from(i) * 4, &[i; 4]).expect("write");
            }
            disk.crash();
            disk.len()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_injected_faults() {
        let disk = SimulatedDisk::new(
            3,
            FaultConfig {
                write_error_rate: 1.0,
                sync_error_rate: 1.0,
            },
        );
        let mut storage = disk.storage();
        assert!(storage.write_at(0, b"x").is_err());
        assert!(storage.sync().is_err());

        disk.set_faults_enabled(false);
        storage.write_at(0, b"x").expect("write");
        storage.sync().expect("sync");

        let stats = disk.stats();
        assert_eq!(stats.injected_write_errors, 1);
        assert_eq!(stats.injected_sync_errors, 1);
    }
}
