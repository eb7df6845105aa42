use crate::regfile::{RegField, RegisterFile};
use crate::snapshot::DeviceSnapshot;
use crate::{GuestMemory, Peripheral, SimResult};

/// "TEST IP", one character per ID register.
pub const ID_VALUES: [u32; 7] = [0x54, 0x45, 0x53, 0x54, 0x20, 0x49, 0x50];
pub const TEST_REG: u64 = 0x1C;

const LAYOUT: [RegField; 8] = [
    RegField::word("id0", 0),
    RegField::word("id1", 1),
    RegField::word("id2", 2),
    RegField::word("id3", 3),
    RegField::word("id4", 4),
    RegField::word("id5", 5),
    RegField::word("id6", 6),
    RegField::word("test_reg", 7),
];

/// Identification block on the mysoc evaluation board.
#[derive(Debug)]
pub struct TestIp {
    regs: RegisterFile,
}

impl Default for TestIp {
    fn default() -> Self {
        Self::new()
    }
}

impl TestIp {
    pub fn new() -> Self {
        let mut regs = RegisterFile::new(LAYOUT.len());
        regs.load(0, &ID_VALUES);
        Self { regs }
    }
}

impl Peripheral for TestIp {
    fn read(&mut self, offset: u64) -> u32 {
        match offset {
            0x00..=TEST_REG => self.regs.read(offset),
            _ => 0,
        }
    }

    fn write(&mut self, offset: u64, value: u32, _mem: &dyn GuestMemory) {
        match offset {
            TEST_REG => self.regs.write(offset, value),
            0x00..=0x18 => {
                tracing::warn!("TEST IP: register {:#x} is read-only, write ignored", offset)
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.regs.snapshot("my_test_ip", 1, &LAYOUT)
    }

    fn restore(&mut self, snapshot: &DeviceSnapshot) -> SimResult<()> {
        self.snapshot().check_compatible(snapshot)?;
        self.regs.restore(&LAYOUT, snapshot)
    }
}
