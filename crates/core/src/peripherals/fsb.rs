use crate::regfile::{RegField, RegisterFile};
use crate::snapshot::DeviceSnapshot;
use crate::{GuestMemory, Peripheral, ProvisioningState, SimResult};

pub const FSB_WORDS: usize = 256;

/// `(first fuse word, word count, first shadow register)`
pub const FSB_REGIONS: [(usize, usize, usize); 6] = [
    (24, 8, 0),     // bank 3
    (32, 8, 8),     // bank 4
    (40, 8, 64),    // bank 5
    (48, 8, 72),    // bank 6
    (224, 32, 96),  // banks 28-31, M33 ROM patch
    (296, 64, 128), // banks 37-44
];

const LAYOUT: [RegField; 1] = [RegField::array("reg", 0, FSB_WORDS)];

/// Fuse shadow bank: read-only mirror of selected fuse banks.
#[derive(Debug)]
pub struct Fsb {
    regs: RegisterFile,
}

impl Fsb {
    pub fn new(provisioning: &ProvisioningState) -> Self {
        let mut regs = RegisterFile::new(FSB_WORDS);
        let fuses = provisioning.fuses();
        for (src, len, dst) in FSB_REGIONS {
            regs.load(dst, &fuses[src..src + len]);
        }
        Self { regs }
    }
}

impl Peripheral for Fsb {
    fn read(&mut self, offset: u64) -> u32 {
        self.regs.read(offset)
    }

    fn write(&mut self, offset: u64, value: u32, _mem: &dyn GuestMemory) {
        tracing::debug!("FSB: dropping write {:#x} <- {:#x}", offset, value);
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.regs.snapshot("imx_fsb", 1, &LAYOUT)
    }

    fn restore(&mut self, snapshot: &DeviceSnapshot) -> SimResult<()> {
        self.snapshot().check_compatible(snapshot)?;
        self.regs.restore(&LAYOUT, snapshot)
    }
}
