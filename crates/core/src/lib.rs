pub mod bus;
pub mod memory;
pub mod metrics;
pub mod peripherals;
pub mod provisioning;
pub mod regfile;
pub mod snapshot;

use std::sync::Arc;

use ulpsim_config::BoardDescriptor;

pub use peripherals::{DeviceHooks, ResetHandler};
pub use provisioning::ProvisioningState;
pub use snapshot::{DeviceSnapshot, MachineSnapshot};


#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("Snapshot rejected: {0}")]
    Snapshot(String),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait for observing guest bus traffic in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_read(&self, _addr: u64, _value: u32) {}
    fn on_write(&self, _addr: u64, _value: u32) {}
}

/// Read-only view of guest RAM handed to devices that walk guest memory.
pub trait GuestMemory {
    fn read_u8(&self, addr: u64) -> SimResult<u8>;

    fn read_u32(&self, addr: u64) -> SimResult<u32> {
        let b0 = self.read_u8(addr)? as u32;
        let b1 = self.read_u8(addr + 1)? as u32;
        let b2 = self.read_u8(addr + 2)? as u32;
        let b3 = self.read_u8(addr + 3)? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24))
    }
}

/// Trait representing a memory-mapped peripheral.
///
/// Accesses are whole 32-bit words at byte offsets relative to the device
/// base. Nothing a device does is reported back to the guest as a fault.
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&mut self, offset: u64) -> u32;
    fn write(&mut self, offset: u64, value: u32, mem: &dyn GuestMemory);
    fn snapshot(&self) -> DeviceSnapshot;
    fn restore(&mut self, snapshot: &DeviceSnapshot) -> SimResult<()>;
}

/// Trait representing the system bus
pub trait Bus {
    fn read_u8(&mut self, addr: u64) -> SimResult<u8>;
    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()>;

    fn read_u16(&mut self, addr: u64) -> SimResult<u16> {
        let b0 = self.read_u8(addr)? as u16;
        let b1 = self.read_u8(addr + 1)? as u16;
        // Little Endian
        Ok(b0 | (b1 << 8))
    }

    fn read_u32(&mut self, addr: u64) -> SimResult<u32> {
        let b0 = self.read_u8(addr)? as u32;
        let b1 = self.read_u8(addr + 1)? as u32;
        let b2 = self.read_u8(addr + 2)? as u32;
        let b3 = self.read_u8(addr + 3)? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24))
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr + 1, ((value >> 8) & 0xFF) as u8)?;
        self.write_u8(addr + 2, ((value >> 16) & 0xFF) as u8)?;
        self.write_u8(addr + 3, ((value >> 24) & 0xFF) as u8)?;
        Ok(())
    }

    fn write_u16(&mut self, addr: u64, value: u16) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr + 1, ((value >> 8) & 0xFF) as u8)?;
        Ok(())
    }
}

/// The assembled SoC: provisioned devices plus guest RAM, driven one access at a time.
pub struct Machine {
    pub bus: bus::SystemBus,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
}

impl Machine {
    /// Build every device on `board`, seeding the fuse shadow bank from
    /// `provisioning`, then apply the boot fixups to guest memory.
    pub fn new(
        board: &BoardDescriptor,
        provisioning: &ProvisioningState,
        hooks: DeviceHooks,
    ) -> anyhow::Result<Self> {
        Self::with_cpu(board, &board.cpu, provisioning, hooks)
    }

    /// Like [`Machine::new`] for an explicitly requested CPU, which must be
    /// the one the board is wired for.
    pub fn with_cpu(
        board: &BoardDescriptor,
        cpu: &str,
        provisioning: &ProvisioningState,
        hooks: DeviceHooks,
    ) -> anyhow::Result<Self> {
        if cpu != board.cpu {
            anyhow::bail!(
                "Board '{}' can only be used with CPU {} (got {})",
                board.name,
                board.cpu,
                cpu
            );
        }

        let mut bus = bus::SystemBus::from_config(board, provisioning, hooks)?;
        if let Some(boot) = &board.boot {
            bus.apply_boot_fixups(boot, provisioning)?;
        }

        Ok(Self {
            bus,
            observers: Vec::new(),
        })
    }

    pub fn read_u32(&mut self, addr: u64) -> SimResult<u32> {
        let value = self.bus.read_u32(addr)?;
        for observer in &self.observers {
            observer.on_read(addr, value);
        }
        Ok(value)
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        self.bus.write_u32(addr, value)?;
        for observer in &self.observers {
            observer.on_write(addr, value);
        }
        Ok(())
    }

    /// Stage raw bytes in guest RAM (read-only regions included), bypassing
    /// devices and observers.
    pub fn load_bytes(&mut self, addr: u64, bytes: &[u8]) -> SimResult<()> {
        for (i, b) in bytes.iter().enumerate() {
            let at = addr.wrapping_add(i as u64);
            if !self.bus.memory.load_u8(at, *b) {
                return Err(SimulationError::MemoryViolation(at));
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            peripherals: self
                .bus
                .peripherals
                .iter()
                .map(|p| (p.name.clone(), p.dev.snapshot()))
                .collect(),
        }
    }

    /// Restore device state. Every entry is checked before any device is touched.
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> SimResult<()> {
        if snapshot.peripherals.len() != self.bus.peripherals.len() {
            return Err(SimulationError::Snapshot(format!(
                "expected {} devices, found {}",
                self.bus.peripherals.len(),
                snapshot.peripherals.len()
            )));
        }
        for ((name, snap), p) in snapshot.peripherals.iter().zip(&self.bus.peripherals) {
            if *name != p.name {
                return Err(SimulationError::Snapshot(format!(
                    "device '{}' found where '{}' was expected",
                    name, p.name
                )));
            }
            p.dev.snapshot().check_compatible(snap)?;
        }
        for ((_, snap), p) in snapshot.peripherals.iter().zip(&mut self.bus.peripherals) {
            p.dev.restore(snap)?;
        }
        Ok(())
    }
}
