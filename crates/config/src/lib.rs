use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// CPU models a board may name.
pub const KNOWN_CPUS: [&str; 2] = ["cortex-m33", "cortex-m4"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRange {
    pub id: String,
    pub base: u64,
    pub size: String, // e.g. "0x800" or "16 MiB"
    /// Guest writes are dropped (flash).
    #[serde(default)]
    pub read_only: bool,
}

/// Closed set of device models the bus knows how to build.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    DebugPrint,
    Fsb,
    S400Mu,
    Sim0,
    Tstmr,
    TestIp,
}

impl DeviceKind {
    /// Address-space span in bytes decoded by each model.
    pub fn span(self) -> u64 {
        match self {
            DeviceKind::DebugPrint => 0x10,
            DeviceKind::Fsb => 0x800,
            DeviceKind::S400Mu => 0x1000,
            DeviceKind::Sim0 => 0x1000,
            DeviceKind::Tstmr => 0x400,
            DeviceKind::TestIp => 0x1000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeviceConfig {
    pub id: String,
    pub r#type: DeviceKind,
    pub base_address: u64,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

impl DeviceConfig {
    fn new(id: &str, kind: DeviceKind, base_address: u64) -> Self {
        Self {
            id: id.to_string(),
            r#type: kind,
            base_address,
            size: None,
            config: HashMap::new(),
        }
    }

    /// Declared size, falling back to the model's span.
    pub fn resolved_size(&self) -> Result<u64> {
        match &self.size {
            Some(s) => parse_size(s).with_context(|| format!("Invalid size for device '{}'", self.id)),
            None => Ok(self.r#type.span()),
        }
    }

    pub fn option_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.config.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("Option '{}' of device '{}' must be an unsigned integer", key, self.id)),
        }
    }
}

/// Guest-memory side effects applied once all devices exist.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BootFixups {
    /// Receives `(boot_mode << 30) | m33_boot_cfg`.
    pub boot_word_addr: u64,
    pub status_addr: u64,
    pub status_value: u32,
}

impl Default for BootFixups {
    fn default() -> Self {
        Self {
            boot_word_addr: 0x3802_5000 + 0xA0,
            status_addr: 0x3701_0000 + 0x41C,
            status_value: 2,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BoardError {
    #[error("Board has an empty identifier in its {0} table")]
    EmptyId(&'static str),
    #[error("Range '{0}' has zero size")]
    ZeroSize(String),
    #[error("Range '{0}' overlaps '{1}'")]
    Overlap(String, String),
    #[error("Range '{0}' runs past the end of the address space")]
    Wraps(String),
    #[error("Unknown CPU '{0}'")]
    UnknownCpu(String),
    #[error("Device '{id}' declares size {declared:#x} but the model decodes {span:#x} bytes")]
    SpanMismatch { id: String, declared: u64, span: u64 },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardDescriptor {
    pub name: String,
    /// CPU the board is wired for; the only one it accepts.
    pub cpu: String,
    pub memory: Vec<MemoryRange>,
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub boot: Option<BootFixups>,
}

fn ram(id: &str, base: u64, size: &str) -> MemoryRange {
    MemoryRange {
        id: id.to_string(),
        base,
        size: size.to_string(),
        read_only: false,
    }
}

impl BoardDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open board descriptor at {:?}", path.as_ref()))?;
        let board: Self = serde_yaml::from_reader(f).context("Failed to parse Board Descriptor")?;
        board.validate()?;
        Ok(board)
    }

    /// Built-in board by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "imx8ulp-m33" => Some(Self::imx8ulp_m33()),
            "mysoc_evb" => Some(Self::mysoc_evb()),
            _ => None,
        }
    }

    /// The i.MX8ULP real-time domain as seen from the Cortex-M33.
    pub fn imx8ulp_m33() -> Self {
        Self {
            name: "imx8ulp-m33".to_string(),
            cpu: "cortex-m33".to_string(),
            memory: vec![
                ram("ssram0", 0x1000_0000, "0x30000"),
                ram("ssram1", 0x3000_0000, "0x80000"),
                ram("ssram2", 0x1FFC_0000, "0x40000"),
                ram("psram", 0x8000_0000, "0x1000000"),
                ram("cmc0", 0x3802_5000, "0x1000"),
                ram("fsb_low", 0x3701_0000, "0x800"),
            ],
            devices: vec![
                DeviceConfig::new("debug", DeviceKind::DebugPrint, 0x3004_EFF0),
                DeviceConfig::new("fsb", DeviceKind::Fsb, 0x3701_0800),
                DeviceConfig::new("s400_mu", DeviceKind::S400Mu, 0x3704_0000),
                DeviceConfig::new("sim0", DeviceKind::Sim0, 0x3802_B000),
                DeviceConfig::new("tstmr", DeviceKind::Tstmr, 0x3802_AC00),
            ],
            boot: Some(BootFixups::default()),
        }
    }

    /// Cortex-M4 evaluation board carrying the TEST IP identification block.
    pub fn mysoc_evb() -> Self {
        Self {
            name: "mysoc_evb".to_string(),
            cpu: "cortex-m4".to_string(),
            memory: vec![
                MemoryRange {
                    read_only: true,
                    ..ram("flash", 0x0, "4 MiB")
                },
                ram("sram", 0x2000_0000, "16 MiB"),
            ],
            devices: vec![DeviceConfig::new("test_ip", DeviceKind::TestIp, 0x4000_1000)],
            boot: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cpu.trim().is_empty() {
            anyhow::bail!("Board '{}' does not name a CPU", self.name);
        }
        if !KNOWN_CPUS.contains(&self.cpu.as_str()) {
            return Err(BoardError::UnknownCpu(self.cpu.clone()).into());
        }

        let mut ram: Vec<(String, u64, u64)> = Vec::new();
        for m in &self.memory {
            if m.id.trim().is_empty() {
                return Err(BoardError::EmptyId("memory").into());
            }
            ram.push((m.id.clone(), m.base, parse_size(&m.size)?));
        }
        let mut devices: Vec<(String, u64, u64)> = Vec::new();
        for d in &self.devices {
            if d.id.trim().is_empty() {
                return Err(BoardError::EmptyId("device").into());
            }
            let size = d.resolved_size()?;
            if size != d.r#type.span() {
                return Err(BoardError::SpanMismatch {
                    id: d.id.clone(),
                    declared: size,
                    span: d.r#type.span(),
                }
                .into());
            }
            devices.push((d.id.clone(), d.base_address, size));
        }

        // Devices may sit on top of RAM (they win on the bus), but not on each other.
        check_disjoint(&ram)?;
        check_disjoint(&devices)?;

        Ok(())
    }
}

fn check_disjoint(ranges: &[(String, u64, u64)]) -> Result<(), BoardError> {
    for (id, base, size) in ranges {
        if *size == 0 {
            return Err(BoardError::ZeroSize(id.clone()));
        }
        if base.checked_add(*size).is_none() {
            return Err(BoardError::Wraps(id.clone()));
        }
    }
    for (i, (id, base, size)) in ranges.iter().enumerate() {
        for (other, obase, osize) in &ranges[i + 1..] {
            // Both ends were checked above.
            if *base < obase + osize && *obase < base + size {
                return Err(BoardError::Overlap(id.clone(), other.clone()));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScriptInputs {
    pub boot_args: String,
    #[serde(default)]
    pub board: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReadStep {
    pub read: u64,
    #[serde(default)]
    pub expect: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WriteStep {
    pub write: u64,
    pub value: u32,
}

/// Stages a NUL-terminated string in guest memory.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WriteStrStep {
    pub write_str: u64,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WriteWordsStep {
    pub write_words: u64,
    pub words: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum ScriptStep {
    Read(ReadStep),
    Write(WriteStep),
    WriteStr(WriteStrStep),
    WriteWords(WriteWordsStep),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DebugContainsAssertion {
    pub debug_contains: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FuseAssertion {
    pub fuse: usize,
    pub equals: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum ScriptAssertion {
    DebugContains(DebugContainsAssertion),
    Fuse(FuseAssertion),
}

/// Scripted guest accesses driving the devices without a CPU model.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AccessScript {
    pub schema_version: String,
    pub inputs: ScriptInputs,
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
    #[serde(default)]
    pub assertions: Vec<ScriptAssertion>,
}

impl AccessScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open access script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Access Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.inputs.boot_args.trim().is_empty() {
            anyhow::bail!("Input 'boot_args' path cannot be empty");
        }

        for a in &self.assertions {
            if let ScriptAssertion::Fuse(f) = a {
                if f.fuse >= 512 {
                    anyhow::bail!("Fuse assertion index {} is outside the 512-word array", f.fuse);
                }
            }
        }

        Ok(())
    }
}

/// Accepts integer literals (`0x800`, `2048`) or human-readable sizes (`16 MiB`).
pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let trimmed = size_str.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(&hex.replace('_', ""), 16)
            .with_context(|| format!("Invalid hex size '{}'", size_str));
    }
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(n);
    }
    let s: Size = trimmed
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_board_is_valid() {
        let board = BoardDescriptor::imx8ulp_m33();
        assert!(board.validate().is_ok());
        assert_eq!(board.cpu, "cortex-m33");
        assert_eq!(board.devices.len(), 5);
    }

    #[test]
    fn test_board_yaml() {
        let yaml = r#"
name: "mini"
cpu: "cortex-m33"
memory:
  - id: ram
    base: 0x20000000
    size: "0x1000"
devices:
  - id: timer
    type: tstmr
    base_address: 0x40000000
    config:
      initial: 7
  - id: mu
    type: s400_mu
    base_address: 0x40001000
    size: "4096"
"#;
        let board: BoardDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert!(board.validate().is_ok());
        assert_eq!(board.devices[0].r#type, DeviceKind::Tstmr);
        assert_eq!(board.devices[0].option_u64("initial").unwrap(), Some(7));
        assert_eq!(board.devices[1].resolved_size().unwrap(), 0x1000);
        assert_eq!(board.boot, None);
    }

    #[test]
    fn test_mysoc_evb_board() {
        let board = BoardDescriptor::builtin("mysoc_evb").unwrap();
        assert!(board.validate().is_ok());
        assert_eq!(board.cpu, "cortex-m4");
        assert!(board.memory[0].read_only);
        assert_eq!(parse_size(&board.memory[1].size).unwrap(), 16 * 1024 * 1024);
        assert_eq!(board.devices[0].r#type, DeviceKind::TestIp);
        assert_eq!(board.devices[0].resolved_size().unwrap(), 0x1000);
        assert!(board.boot.is_none());
        assert!(BoardDescriptor::builtin("nope").is_none());
    }

    #[test]
    fn test_unknown_cpu_rejected() {
        let mut board = BoardDescriptor::mysoc_evb();
        board.cpu = "cortex-a35".to_string();
        let err = board.validate().unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::UnknownCpu("cortex-a35".to_string()))
        );
    }

    #[test]
    fn test_range_past_end_of_address_space_rejected() {
        let mut board = BoardDescriptor::imx8ulp_m33();
        board.devices[4].base_address = u64::MAX - 0x100;
        let err = board.validate().unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::Wraps("tstmr".to_string()))
        );

        let mut board = BoardDescriptor::mysoc_evb();
        board.memory[1].base = u64::MAX;
        assert!(board.validate().is_err());
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let mut board = BoardDescriptor::imx8ulp_m33();
        board.devices[4].base_address = 0x3802_B200;
        let err = board.validate().unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_span_mismatch_rejected() {
        let mut board = BoardDescriptor::imx8ulp_m33();
        board.devices[1].size = Some("0x400".to_string());
        let err = board.validate().unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::SpanMismatch {
                id: "fsb".to_string(),
                declared: 0x400,
                span: 0x800,
            })
        );
    }

    #[test]
    fn test_valid_script() {
        let yaml = r#"
schema_version: "1.0"
inputs:
  boot_args: "run.arg"
steps:
  - write_str: 0x20000100
    text: "hi"
  - write_words: 0x20000000
    words: [0x20000100]
  - write: 0x3004EFF0
    value: 0x41
  - read: 0x3802AC00
    expect: 0
assertions:
  - debug_contains: "hi"
  - fuse: 26
    equals: 0x1a
"#;
        let script: AccessScript = serde_yaml::from_str(yaml).unwrap();
        assert!(script.validate().is_ok());
        assert_eq!(script.steps.len(), 4);
        assert!(matches!(script.steps[0], ScriptStep::WriteStr(_)));
        assert!(matches!(script.steps[1], ScriptStep::WriteWords(_)));
        assert!(matches!(script.steps[2], ScriptStep::Write(_)));
        assert!(matches!(script.steps[3], ScriptStep::Read(ReadStep { expect: Some(0), .. })));
        assert_eq!(script.assertions.len(), 2);
    }

    #[test]
    fn test_invalid_version() {
        let yaml = r#"
schema_version: "2.0"
inputs:
  boot_args: "run.arg"
"#;
        let script: AccessScript = serde_yaml::from_str(yaml).unwrap();
        let err = script.validate().unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_empty_boot_args() {
        let yaml = r#"
schema_version: "1.0"
inputs:
  boot_args: ""
"#;
        let script: AccessScript = serde_yaml::from_str(yaml).unwrap();
        let err = script.validate().unwrap_err();
        assert!(err.to_string().contains("boot_args"));
    }

    #[test]
    fn test_parse_size_literals() {
        assert_eq!(parse_size("0x800").unwrap(), 0x800);
        assert_eq!(parse_size("2048").unwrap(), 2048);
        assert!(parse_size("lots").is_err());
    }
}
