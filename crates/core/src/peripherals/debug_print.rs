use super::SharedWriter;
use crate::snapshot::{DeviceSnapshot, FieldSnapshot};
use crate::{GuestMemory, Peripheral, SimResult, SimulationError};

/// Opcode that starts a formatted print.
pub const PRINT_OPCODE: u32 = 0x41;

const SNAPSHOT_NAME: &str = "debug_print";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitOpcode,
    AwaitAddress,
    AwaitTrigger,
}

impl Phase {
    fn to_word(self) -> u32 {
        match self {
            Phase::AwaitOpcode => 0,
            Phase::AwaitAddress => 1,
            Phase::AwaitTrigger => 2,
        }
    }

    fn from_word(word: u32) -> Option<Self> {
        match word {
            0 => Some(Phase::AwaitOpcode),
            1 => Some(Phase::AwaitAddress),
            2 => Some(Phase::AwaitTrigger),
            _ => None,
        }
    }
}

/// Write-only debug channel mirroring firmware `printf` calls onto the host.
///
/// Three consecutive writes form one command: opcode, argument-block address,
/// trigger. The offset of each write is ignored. For [`PRINT_OPCODE`] the
/// argument block holds a pointer to the format string followed by the
/// 32-bit arguments.
pub struct DebugPrint {
    phase: Phase,
    opcode: u32,
    address: u32,
    out: SharedWriter,
    max_string_len: Option<usize>,
}

impl std::fmt::Debug for DebugPrint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugPrint")
            .field("phase", &self.phase)
            .field("opcode", &self.opcode)
            .field("address", &self.address)
            .field("max_string_len", &self.max_string_len)
            .finish()
    }
}

impl DebugPrint {
    pub fn new(out: SharedWriter) -> Self {
        Self {
            phase: Phase::AwaitOpcode,
            opcode: 0,
            address: 0,
            out,
            max_string_len: None,
        }
    }

    /// Stop each string walk after `cap` bytes. `None` walks until NUL.
    pub fn with_max_string_len(mut self, cap: Option<usize>) -> Self {
        self.max_string_len = cap;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn dispatch(&mut self, mem: &dyn GuestMemory) {
        match self.opcode {
            PRINT_OPCODE => {
                let mut text = Vec::new();
                if let Err(e) = self.render(mem, self.address, &mut text) {
                    tracing::warn!("Debug print at {:#x} aborted: {}", self.address, e);
                }
                let mut out = match self.out.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Err(e) = out.write_all(&text).and_then(|_| out.flush()) {
                    tracing::warn!("Debug print output failed: {}", e);
                }
            }
            other => tracing::debug!("Debug print: ignoring opcode {:#x}", other),
        }
    }

    /// Expand the format string referenced by the argument block at `address`.
    pub fn render(&self, mem: &dyn GuestMemory, address: u32, text: &mut Vec<u8>) -> SimResult<()> {
        let mut fmt = mem.read_u32(address as u64)?;
        let mut args = address.wrapping_add(4);
        let mut walked = 0usize;

        loop {
            if self.cap_reached(walked) {
                tracing::warn!("Debug print: format string at {:#x} exceeds cap", fmt);
                return Ok(());
            }
            let c = mem.read_u8(fmt as u64)?;
            fmt = fmt.wrapping_add(1);
            walked += 1;

            match c {
                0 => return Ok(()),
                b'%' => {
                    let spec = mem.read_u8(fmt as u64)?;
                    fmt = fmt.wrapping_add(1);
                    walked += 1;
                    match spec {
                        0 => return Ok(()),
                        b'%' => text.push(b'%'),
                        b'x' | b'X' => {
                            let v = next_arg(mem, &mut args)?;
                            text.extend_from_slice(format!("{:x}", v).as_bytes());
                        }
                        b'd' => {
                            let v = next_arg(mem, &mut args)? as i32;
                            text.extend_from_slice(v.to_string().as_bytes());
                        }
                        b'c' => {
                            let v = next_arg(mem, &mut args)?;
                            text.push(v as u8);
                        }
                        b's' => {
                            let ptr = next_arg(mem, &mut args)?;
                            self.render_str(mem, ptr, text)?;
                        }
                        _ => {}
                    }
                }
                other => text.push(other),
            }
        }
    }

    fn render_str(&self, mem: &dyn GuestMemory, mut ptr: u32, text: &mut Vec<u8>) -> SimResult<()> {
        let mut walked = 0usize;
        loop {
            if self.cap_reached(walked) {
                tracing::warn!("Debug print: %s argument at {:#x} exceeds cap", ptr);
                return Ok(());
            }
            let ch = mem.read_u8(ptr as u64)?;
            if ch == 0 {
                return Ok(());
            }
            text.push(ch);
            ptr = ptr.wrapping_add(1);
            walked += 1;
        }
    }

    fn cap_reached(&self, walked: usize) -> bool {
        self.max_string_len.is_some_and(|cap| walked >= cap)
    }
}

fn next_arg(mem: &dyn GuestMemory, args: &mut u32) -> SimResult<u32> {
    let v = mem.read_u32(*args as u64)?;
    *args = args.wrapping_add(4);
    Ok(v)
}

impl Peripheral for DebugPrint {
    fn read(&mut self, _offset: u64) -> u32 {
        0
    }

    fn write(&mut self, _offset: u64, value: u32, mem: &dyn GuestMemory) {
        match self.phase {
            Phase::AwaitOpcode => {
                self.opcode = value;
                self.phase = Phase::AwaitAddress;
            }
            Phase::AwaitAddress => {
                self.address = value;
                self.phase = Phase::AwaitTrigger;
            }
            Phase::AwaitTrigger => {
                self.phase = Phase::AwaitOpcode;
                self.dispatch(mem);
            }
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        let field = |name: &str, v: u32| FieldSnapshot {
            name: name.to_string(),
            words: vec![v],
        };
        DeviceSnapshot {
            device: SNAPSHOT_NAME.to_string(),
            version: SNAPSHOT_VERSION,
            fields: vec![
                field("phase", self.phase.to_word()),
                field("opcode", self.opcode),
                field("address", self.address),
            ],
        }
    }

    fn restore(&mut self, snapshot: &DeviceSnapshot) -> SimResult<()> {
        self.snapshot().check_compatible(snapshot)?;
        let word = |name: &str| snapshot.field(name).map(|w| w[0]).unwrap_or(0);
        self.phase = Phase::from_word(word("phase")).ok_or_else(|| {
            SimulationError::Snapshot(format!("debug_print: invalid phase {}", word("phase")))
        })?;
        self.opcode = word("opcode");
        self.address = word("address");
        Ok(())
    }
}
