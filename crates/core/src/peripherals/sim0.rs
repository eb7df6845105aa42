use crate::regfile::{RegField, RegisterFile};
use crate::snapshot::DeviceSnapshot;
use crate::{GuestMemory, Peripheral, SimResult};

/// Reads as all ones so the boot ROM sees every DGO transfer complete.
pub const DGO_CTRL0: u64 = 0x08;
pub const DGO_GP_START: u64 = 0x10;
pub const DGO_GP_END: u64 = 0x34;

const DGO_GP: usize = 4;

const LAYOUT: [RegField; 11] = [
    RegField::word("gpr0", 0),
    RegField::word("gpr1", 1),
    RegField::word("dgo_ctrl0", 2),
    RegField::word("dgo_ctrl1", 3),
    RegField::array("dgo_gp", DGO_GP, 9),
    RegField::word("sysctrl0", 13),
    RegField::word("ssram_acc_dis", 14),
    RegField::word("rtd_sysctrl0", 15),
    RegField::word("lpav_per_dom_ctrl", 16),
    RegField::word("lpav_mst_alo_ctrl", 17),
    RegField::word("lpav_slv_alo_ctrl", 18),
];

/// Real-time domain SIM: only the DGO general purpose window is live.
#[derive(Debug)]
pub struct Sim0 {
    regs: RegisterFile,
}

impl Default for Sim0 {
    fn default() -> Self {
        Self::new()
    }
}

impl Sim0 {
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::new(19),
        }
    }
}

impl Peripheral for Sim0 {
    fn read(&mut self, offset: u64) -> u32 {
        match offset {
            DGO_CTRL0 => 0xFFFF_FFFF,
            o if (DGO_GP_START..DGO_GP_END).contains(&o) => self.regs.read(o),
            _ => 0,
        }
    }

    fn write(&mut self, offset: u64, value: u32, _mem: &dyn GuestMemory) {
        if (DGO_GP_START..DGO_GP_END).contains(&offset) {
            self.regs.write(offset, value);
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.regs.snapshot("imx_sim0", 1, &LAYOUT)
    }

    fn restore(&mut self, snapshot: &DeviceSnapshot) -> SimResult<()> {
        self.snapshot().check_compatible(snapshot)?;
        self.regs.restore(&LAYOUT, snapshot)
    }
}
