use crate::{GuestMemory, SimResult, SimulationError};

/// A simple flat memory storage
#[derive(Debug)]
pub struct LinearMemory {
    pub name: String,
    pub data: Vec<u8>,
    pub base_addr: u64,
    pub read_only: bool,
}

impl LinearMemory {
    pub fn new(name: &str, size: usize, base_addr: u64) -> Self {
        Self {
            name: name.to_string(),
            data: vec![0; size],
            base_addr,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn index_of(&self, addr: u64) -> Option<usize> {
        let off = addr.checked_sub(self.base_addr)?;
        (off < self.data.len() as u64).then_some(off as usize)
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.index_of(addr).is_some()
    }

    pub fn read_u8(&self, addr: u64) -> Option<u8> {
        self.index_of(addr).map(|i| self.data[i])
    }

    /// Guest store. Returns false when `addr` is outside the region; stores to
    /// a read-only region are dropped but still count as mapped.
    pub fn write_u8(&mut self, addr: u64, value: u8) -> bool {
        let Some(i) = self.index_of(addr) else {
            return false;
        };
        if self.read_only {
            tracing::debug!("{}: dropped write to read-only {:#x}", self.name, addr);
        } else {
            self.data[i] = value;
        }
        true
    }

    /// Host-side store that ignores `read_only`, for staging images and data.
    pub fn load_u8(&mut self, addr: u64, value: u8) -> bool {
        match self.index_of(addr) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }
}

/// All RAM regions of the board.
#[derive(Debug, Default)]
pub struct MemoryMap {
    pub regions: Vec<LinearMemory>,
}

impl MemoryMap {
    pub fn region(&self, name: &str) -> Option<&LinearMemory> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> bool {
        self.regions.iter_mut().any(|r| r.write_u8(addr, value))
    }

    pub fn load_u8(&mut self, addr: u64, value: u8) -> bool {
        self.regions.iter_mut().any(|r| r.load_u8(addr, value))
    }
}

impl GuestMemory for MemoryMap {
    fn read_u8(&self, addr: u64) -> SimResult<u8> {
        self.regions
            .iter()
            .find_map(|r| r.read_u8(addr))
            .ok_or(SimulationError::MemoryViolation(addr))
    }
}
