use std::sync::Arc;

use super::ResetHandler;
use crate::regfile::{RegField, RegisterFile};
use crate::snapshot::DeviceSnapshot;
use crate::{GuestMemory, Peripheral, SimResult};

pub const MU_WORDS: usize = 256;

pub const TSR: u64 = 0x124;
pub const RSR: u64 = 0x12C;
pub const TR_START: u64 = 0x200;
pub const TR_END: u64 = 0x21C;
pub const RR_START: u64 = 0x280;
pub const RR_END: u64 = 0x28C;

/// Command id asking the secure enclave to reset the whole SoC.
pub const CMD_SYSTEM_RESET: u32 = 0xC7;

const TR: usize = 128;
const RR: usize = 160;

const LAYOUT: [RegField; 15] = [
    RegField::word("ver", 0),
    RegField::word("par", 1),
    RegField::word("cr", 2),
    RegField::word("sr", 3),
    RegField::array("reserved0", 4, 68),
    RegField::word("tcr", 72),
    RegField::word("tsr", 73),
    RegField::word("rcr", 74),
    RegField::word("rsr", 75),
    RegField::array("reserved1", 76, 52),
    RegField::array("tr", TR, 16),
    RegField::array("reserved2", 144, 16),
    RegField::array("rr", RR, 16),
    RegField::array("reserved4", 176, 14),
    RegField::word("mu_attr", 190),
];

/// Command id carried in bits 16..24 of the first transmit word.
pub fn command_id(header: u32) -> u32 {
    (header >> 16) & 0xFF
}

/// S400 messaging unit: the M33 side of the secure enclave mailbox.
///
/// Status registers always report ready. Writes into the transmit window are
/// latched and the header in TR0 is decoded on every one of them; only
/// [`CMD_SYSTEM_RESET`] has an effect. Nothing is ever answered in the
/// receive window by this model.
#[derive(Debug)]
pub struct S400Mu {
    regs: RegisterFile,
    reset: Arc<dyn ResetHandler>,
}

impl S400Mu {
    pub fn new(reset: Arc<dyn ResetHandler>) -> Self {
        Self {
            regs: RegisterFile::new(MU_WORDS),
            reset,
        }
    }

    /// Host side of the mailbox: place a response in RR0.. for the guest to read.
    pub fn post_response(&mut self, words: &[u32]) {
        self.regs.load(RR, &words[..words.len().min(16)]);
    }

    fn handle_command(&mut self) {
        let header = self.regs.word(TR);
        let cid = command_id(header);
        tracing::debug!("S400 MU: tr[0] = {:#010x}", header);
        if cid == CMD_SYSTEM_RESET {
            tracing::info!("S400 MU: AHAB reset");
            self.reset.system_reset(header);
        } else {
            tracing::info!("S400 MU: unhandled command {:#04x}", cid);
        }
    }
}

impl Peripheral for S400Mu {
    fn read(&mut self, offset: u64) -> u32 {
        match offset {
            TSR | RSR => 0xFFFF_FFFF,
            o if (RR_START..=RR_END).contains(&o) => self.regs.read(o),
            _ => 0,
        }
    }

    fn write(&mut self, offset: u64, value: u32, _mem: &dyn GuestMemory) {
        if (TR_START..=TR_END).contains(&offset) {
            self.regs.write(offset, value);
            self.handle_command();
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.regs.snapshot("imx_s400_mu", 1, &LAYOUT)
    }

    fn restore(&mut self, snapshot: &DeviceSnapshot) -> SimResult<()> {
        self.snapshot().check_compatible(snapshot)?;
        self.regs.restore(&LAYOUT, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        let byte = |name: &str| LAYOUT.iter().find(|f| f.name == name).unwrap().index as u64 * 4;
        assert_eq!(byte("tcr"), 0x120);
        assert_eq!(byte("tsr"), TSR);
        assert_eq!(byte("rsr"), RSR);
        assert_eq!(byte("tr"), TR_START);
        assert_eq!(byte("rr"), RR_START);
        let last = LAYOUT[LAYOUT.len() - 1];
        assert!(last.index + last.len <= MU_WORDS);
    }

    #[test]
    fn test_command_id() {
        assert_eq!(command_id(0x17C7_0506), 0xC7);
        assert_eq!(command_id(0x00FF_0000), 0xFF);
        assert_eq!(command_id(0xFF00_FFFF), 0);
    }
}
