use crate::memory::{LinearMemory, MemoryMap};
use crate::peripherals::{debug_print, fsb, s400_mu, sim0, test_ip, tstmr, DeviceHooks};
use crate::{Bus, Peripheral, ProvisioningState, SimResult, SimulationError};
use anyhow::Context;
use ulpsim_config::{BoardDescriptor, BootFixups, DeviceKind};

#[derive(Debug)]
pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub dev: Box<dyn Peripheral>,
}

impl PeripheralEntry {
    fn offset_of(&self, addr: u64) -> Option<u64> {
        addr.checked_sub(self.base).filter(|off| *off < self.size)
    }
}

/// One containing device word touched by an unaligned access.
struct Lanes {
    idx: usize,
    word: u64,
    value: u32,
}

pub struct SystemBus {
    pub memory: MemoryMap,
    pub peripherals: Vec<PeripheralEntry>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self {
            memory: MemoryMap::default(),
            peripherals: Vec::new(),
        }
    }

    /// Build RAM and devices from the board's address table. The fuse shadow
    /// bank takes its one-time copy of `provisioning` here.
    pub fn from_config(
        board: &BoardDescriptor,
        provisioning: &ProvisioningState,
        hooks: DeviceHooks,
    ) -> anyhow::Result<Self> {
        board.validate()?;
        let mut bus = Self::new();

        for range in &board.memory {
            let size = ulpsim_config::parse_size(&range.size)?;
            let size = usize::try_from(size)
                .with_context(|| format!("Memory '{}' does not fit in host memory", range.id))?;
            tracing::debug!("Mapping RAM '{}' at {:#x} ({:#x} bytes)", range.id, range.base, size);
            let region = LinearMemory::new(&range.id, size, range.base);
            bus.memory.regions.push(if range.read_only {
                region.read_only()
            } else {
                region
            });
        }

        for p_cfg in &board.devices {
            let dev: Box<dyn Peripheral> = match p_cfg.r#type {
                DeviceKind::DebugPrint => {
                    let cap = p_cfg
                        .option_u64("max_string_len")?
                        .map(|n| n as usize);
                    Box::new(
                        debug_print::DebugPrint::new(hooks.debug_output.clone())
                            .with_max_string_len(cap),
                    )
                }
                DeviceKind::Fsb => Box::new(fsb::Fsb::new(provisioning)),
                DeviceKind::S400Mu => Box::new(s400_mu::S400Mu::new(hooks.reset.clone())),
                DeviceKind::Sim0 => Box::new(sim0::Sim0::new()),
                DeviceKind::Tstmr => {
                    let initial = p_cfg.option_u64("initial")?.unwrap_or(0);
                    Box::new(tstmr::Tstmr::with_value(initial as u32))
                }
                DeviceKind::TestIp => Box::new(test_ip::TestIp::new()),
            };
            tracing::info!(
                "Mapped {:?} '{}' at {:#x}",
                p_cfg.r#type,
                p_cfg.id,
                p_cfg.base_address
            );
            bus.peripherals.push(PeripheralEntry {
                name: p_cfg.id.clone(),
                base: p_cfg.base_address,
                size: p_cfg.resolved_size()?,
                dev,
            });
        }

        Ok(bus)
    }

    /// Guest-memory side effects the boot ROM expects before firmware runs.
    pub fn apply_boot_fixups(
        &mut self,
        boot: &BootFixups,
        provisioning: &ProvisioningState,
    ) -> anyhow::Result<()> {
        let word = provisioning.boot_word();
        self.write_u32(boot.boot_word_addr, word)
            .context("Boot word address is not mapped")?;
        self.write_u32(boot.status_addr, boot.status_value)
            .context("Boot status address is not mapped")?;
        tracing::info!(
            "Boot word {:#010x} at {:#x}, status {} at {:#x}",
            word,
            boot.boot_word_addr,
            boot.status_value,
            boot.status_addr
        );
        Ok(())
    }

    pub fn peripheral(&self, name: &str) -> Option<&PeripheralEntry> {
        self.peripherals.iter().find(|p| p.name == name)
    }

    fn find_peripheral(&self, addr: u64) -> Option<(usize, u64)> {
        self.peripherals
            .iter()
            .enumerate()
            .find_map(|(i, p)| p.offset_of(addr).map(|off| (i, off)))
    }

    fn write_lanes(&mut self, lanes: Option<Lanes>) {
        if let Some(l) = lanes {
            let entry = &mut self.peripherals[l.idx];
            tracing::debug!("{}: write {:#x} <- {:#010x} (partial)", entry.name, l.word, l.value);
            entry.dev.write(l.word, l.value, &self.memory);
        }
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SystemBus {
    fn read_u8(&mut self, addr: u64) -> SimResult<u8> {
        if let Some((idx, offset)) = self.find_peripheral(addr) {
            let word = self.peripherals[idx].dev.read(offset & !3);
            return Ok(((word >> ((offset % 4) * 8)) & 0xFF) as u8);
        }
        crate::GuestMemory::read_u8(&self.memory, addr)
    }

    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()> {
        if let Some((idx, offset)) = self.find_peripheral(addr) {
            // Sub-word stores reach the device as one word write in their lane.
            let lane = (value as u32) << ((offset % 4) * 8);
            self.peripherals[idx]
                .dev
                .write(offset & !3, lane, &self.memory);
            return Ok(());
        }
        if self.memory.write_u8(addr, value) {
            return Ok(());
        }
        Err(SimulationError::MemoryViolation(addr))
    }

    // Device registers are 32 bits wide: a word access is a single device
    // operation, never four byte operations.
    fn read_u32(&mut self, addr: u64) -> SimResult<u32> {
        if let Some((idx, offset)) = self.find_peripheral(addr) {
            if offset % 4 == 0 {
                let value = self.peripherals[idx].dev.read(offset);
                tracing::debug!("{}: read {:#x} -> {:#010x}", self.peripherals[idx].name, offset, value);
                return Ok(value);
            }
        }
        // Unaligned: each containing device word is read once.
        let mut latched: Option<Lanes> = None;
        let mut value = 0u32;
        for i in 0..4u64 {
            let a = addr.wrapping_add(i);
            let byte = match self.find_peripheral(a) {
                Some((idx, offset)) => {
                    let word = offset & !3;
                    let cached = latched
                        .as_ref()
                        .filter(|l| l.idx == idx && l.word == word)
                        .map(|l| l.value);
                    let w = match cached {
                        Some(w) => w,
                        None => {
                            let w = self.peripherals[idx].dev.read(word);
                            latched = Some(Lanes { idx, word, value: w });
                            w
                        }
                    };
                    (w >> ((offset % 4) * 8)) as u8
                }
                None => crate::GuestMemory::read_u8(&self.memory, a)?,
            };
            value |= (byte as u32) << (8 * i);
        }
        Ok(value)
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        if let Some((idx, offset)) = self.find_peripheral(addr) {
            if offset % 4 == 0 {
                tracing::debug!("{}: write {:#x} <- {:#010x}", self.peripherals[idx].name, offset, value);
                self.peripherals[idx].dev.write(offset, value, &self.memory);
                return Ok(());
            }
        }
        // Unaligned: bytes landing in the same device word merge into one write.
        let mut pending: Option<Lanes> = None;
        for i in 0..4u64 {
            let a = addr.wrapping_add(i);
            let byte = (value >> (8 * i)) as u8;
            match self.find_peripheral(a) {
                Some((idx, offset)) => {
                    let word = offset & !3;
                    let lane = (byte as u32) << ((offset % 4) * 8);
                    let merged = match pending.as_mut() {
                        Some(p) if p.idx == idx && p.word == word => {
                            p.value |= lane;
                            true
                        }
                        _ => false,
                    };
                    if !merged {
                        let done = pending.replace(Lanes { idx, word, value: lane });
                        self.write_lanes(done);
                    }
                }
                None => {
                    if !self.memory.write_u8(a, byte) {
                        self.write_lanes(pending.take());
                        return Err(SimulationError::MemoryViolation(a));
                    }
                }
            }
        }
        self.write_lanes(pending);
        Ok(())
    }
}
