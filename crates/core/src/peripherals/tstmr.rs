use crate::regfile::{RegField, RegisterFile};
use crate::snapshot::DeviceSnapshot;
use crate::{GuestMemory, Peripheral, SimResult};

const TSTMR_L: usize = 0;
const TSTMR_H: usize = 1;

const LAYOUT: [RegField; 2] = [
    RegField::word("tstmr_l", TSTMR_L),
    RegField::word("tstmr_h", TSTMR_H),
];

/// Timestamp timer. There is no time source: every read of the low word is one tick.
#[derive(Debug)]
pub struct Tstmr {
    regs: RegisterFile,
}

impl Default for Tstmr {
    fn default() -> Self {
        Self::new()
    }
}

impl Tstmr {
    pub fn new() -> Self {
        Self::with_value(0)
    }

    pub fn with_value(low: u32) -> Self {
        let mut regs = RegisterFile::new(LAYOUT.len());
        regs.set_word(TSTMR_L, low);
        Self { regs }
    }
}

impl Peripheral for Tstmr {
    fn read(&mut self, offset: u64) -> u32 {
        match offset {
            0x00 => {
                let now = self.regs.word(TSTMR_L);
                self.regs.set_word(TSTMR_L, now.wrapping_add(1));
                now
            }
            _ => 0,
        }
    }

    fn write(&mut self, _offset: u64, _value: u32, _mem: &dyn GuestMemory) {}

    fn snapshot(&self) -> DeviceSnapshot {
        self.regs.snapshot("imx_tstmr", 1, &LAYOUT)
    }

    fn restore(&mut self, snapshot: &DeviceSnapshot) -> SimResult<()> {
        self.snapshot().check_compatible(snapshot)?;
        self.regs.restore(&LAYOUT, snapshot)
    }
}
