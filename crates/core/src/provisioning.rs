use serde::{Deserialize, Serialize};

pub const FUSE_WORDS: usize = 512;
pub const WORDS_PER_BANK: usize = 8;

/// Boot mode selected by `+BOOT_INTERNAL`.
pub const BOOT_MODE_INTERNAL: u32 = 2;

/// Provisioning words and boot straps assembled before any device exists.
///
/// Devices copy what they need at construction time and never hold on to this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningState {
    fuses: Vec<u32>,
    pub boot_mode: u32,
    pub m33_boot_cfg: u16,
    pub a35_boot_cfg: u16,
}

impl Default for ProvisioningState {
    fn default() -> Self {
        Self {
            fuses: vec![0; FUSE_WORDS],
            boot_mode: 0,
            m33_boot_cfg: 0,
            a35_boot_cfg: 0,
        }
    }
}

impl ProvisioningState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `bank * 8 + word`, or `None` when that does not fit in a `usize`.
    pub fn fuse_position(bank: usize, word: usize) -> Option<usize> {
        bank.checked_mul(WORDS_PER_BANK)?.checked_add(word)
    }

    pub fn fuses(&self) -> &[u32] {
        &self.fuses
    }

    pub fn fuse(&self, position: usize) -> Option<u32> {
        self.fuses.get(position).copied()
    }

    /// Returns false when `position` lies outside the fuse array.
    pub fn set_fuse(&mut self, position: usize, value: u32) -> bool {
        match self.fuses.get_mut(position) {
            Some(w) => {
                *w = value;
                true
            }
            None => false,
        }
    }

    /// Word the boot ROM expects in CMC0: mode in the top two bits, M33 straps below.
    pub fn boot_word(&self) -> u32 {
        (self.boot_mode << 30) | self.m33_boot_cfg as u32
    }
}
