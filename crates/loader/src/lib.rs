use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use ulpsim_core::provisioning::BOOT_MODE_INTERNAL;
use ulpsim_core::ProvisioningState;

/// File the board reads its provisioning from when nothing else is given.
pub const DEFAULT_BOOT_ARGS: &str = "run.arg";

const FUSE_PREFIX: &str = "C_ARG +";
const BOOT_INTERNAL: &str = "+BOOT_INTERNAL";
const BT_CFG_PIN_M33: &str = "BT_CFG_PIN_M33";
const BT_CFG_PIN_A35: &str = "BT_CFG_PIN_A35";

/// Read and parse a boot argument file. A missing file is an error: the
/// board cannot boot without provisioning data.
pub fn load_boot_args(path: &Path) -> Result<ProvisioningState> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read boot arguments: {:?}", path))?;
    info!("Parsing boot arguments from {:?}", path);
    Ok(parse_boot_args(&text))
}

/// Parse `KEY=VALUE` lines into provisioning state.
///
/// Recognized lines:
/// - `C_ARG +fuseN_M=0x<hex>` (also spelled `C_ARG +=fuseN_M=0x<hex>`) sets fuse word `N * 8 + M`
/// - a value containing `+BOOT_INTERNAL` selects internal boot
/// - otherwise a value containing `BT_CFG_PIN_M33`, else `BT_CFG_PIN_A35`, is
///   split again at its next `=` and the rest sets the boot straps
///
/// Everything else is ignored.
pub fn parse_boot_args(text: &str) -> ProvisioningState {
    let mut state = ProvisioningState::new();

    for line in text.lines() {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }

        if let Some(assignment) = line.strip_prefix(FUSE_PREFIX) {
            let assignment = assignment.strip_prefix('=').unwrap_or(assignment);
            if assignment.starts_with("fuse") {
                apply_fuse(&mut state, assignment);
            }
        }

        let Some((_, value)) = line.split_once('=') else {
            continue;
        };
        if value.contains(BOOT_INTERNAL) {
            state.boot_mode = BOOT_MODE_INTERNAL;
            info!("Boot Mode is {:x}", state.boot_mode);
        } else if value.contains(BT_CFG_PIN_M33) {
            if let Some(v) = nested_value(line, value) {
                state.m33_boot_cfg = hex2dec(v) as u16;
                info!("M33 BT CFG:{:x}", state.m33_boot_cfg);
            }
        } else if value.contains(BT_CFG_PIN_A35) {
            if let Some(v) = nested_value(line, value) {
                state.a35_boot_cfg = hex2dec(v) as u16;
                info!("A35 BT CFG:{:x}", state.a35_boot_cfg);
            }
        }
    }

    state
}

/// `fuseN_M=0x...`: digits before the first `_` give the bank, digits after it the word.
fn apply_fuse(state: &mut ProvisioningState, assignment: &str) {
    let Some((key, value)) = assignment.split_once('=') else {
        warn!("Fuse assignment '{}' has no value", assignment);
        return;
    };
    let Some((bank, word)) = key.split_once('_') else {
        warn!("Fuse key '{}' has no bank/word separator", key);
        return;
    };

    let value = hex2dec(value.trim());
    let position = digits(bank)
        .zip(digits(word))
        .and_then(|(bank, word)| ProvisioningState::fuse_position(bank, word));

    match position {
        Some(position) if state.set_fuse(position, value) => {
            debug!("fuse[{}] ({}) = {:#x}", position, key, value);
        }
        _ => warn!("Fuse '{}' is outside the fuse array, ignored", key),
    }
}

/// Decimal value of the ASCII digits in `s`, skipping everything else.
/// `None` once the number no longer fits in a `usize`.
fn digits(s: &str) -> Option<usize> {
    s.bytes()
        .filter(u8::is_ascii_digit)
        .try_fold(0usize, |acc, d| acc.checked_mul(10)?.checked_add((d - b'0') as usize))
}

/// Second-level `KEY=VALUE` split of a line's value: everything after the
/// next `=`, leading `=` ignored.
fn nested_value<'a>(line: &str, value: &'a str) -> Option<&'a str> {
    let nested = value
        .trim_start_matches('=')
        .split_once('=')
        .map(|(_, v)| v.trim_end())
        .filter(|v| !v.is_empty());
    if nested.is_none() {
        warn!("Boot strap line '{}' has no value", line);
    }
    nested
}

/// Hex decode the way the boot ROM tooling does: the first two characters are
/// taken to be `0x`, digits fold as `0-9`, and every other byte folds as a
/// lowercase `a-f` letter. Upper-case or out-of-range characters therefore
/// give nonsense values.
pub fn hex2dec(hex: &str) -> u32 {
    hex.bytes().skip(2).fold(0u32, |acc, c| {
        let nibble = if c.is_ascii_digit() {
            (c - b'0') as u32
        } else {
            if !(b'a'..=b'f').contains(&c) {
                warn!("Boot argument '{}' contains non-hex character {:?}", hex, c as char);
            }
            (c as u32).wrapping_sub(b'a' as u32).wrapping_add(10)
        };
        acc.wrapping_mul(16).wrapping_add(nibble)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuse_line() {
        let p = parse_boot_args("C_ARG +fuse3_2=0x1a\n");
        assert_eq!(p.fuse(3 * 8 + 2), Some(0x1a));
    }

    #[test]
    fn test_fuse_line_with_separator() {
        let p = parse_boot_args("C_ARG +=fuse37_0=0xdeadbeef\r\nC_ARG +=fuse44_7=0x10\n");
        assert_eq!(p.fuse(296), Some(0xDEAD_BEEF));
        assert_eq!(p.fuse(359), Some(0x10));
    }

    #[test]
    fn test_last_assignment_wins() {
        let p = parse_boot_args("C_ARG +fuse0_1=0x1\nC_ARG +fuse0_1=0x2\n");
        assert_eq!(p.fuse(1), Some(2));
    }

    #[test]
    fn test_out_of_range_fuse_ignored() {
        let p = parse_boot_args("C_ARG +fuse64_0=0x1\n");
        assert!(p.fuses().iter().all(|&w| w == 0));
    }

    #[test]
    fn test_overflowing_fuse_index_ignored() {
        // 2^61 * 8 wraps to position 0 if the arithmetic is not checked.
        let p = parse_boot_args("C_ARG +fuse2305843009213693952_0=0x1\n");
        assert_eq!(p, ProvisioningState::new());
        let p = parse_boot_args("C_ARG +fuse99999999999999999999999_0=0x1\n");
        assert_eq!(p, ProvisioningState::new());
        let p = parse_boot_args("C_ARG +fuse0_99999999999999999999999=0x1\n");
        assert_eq!(p, ProvisioningState::new());
    }

    #[test]
    fn test_boot_internal() {
        let p = parse_boot_args("SIM_ARGS=+BOOT_INTERNAL +other\n");
        assert_eq!(p.boot_mode, 2);
        assert_eq!(parse_boot_args("SIM_ARGS=+BOOT_EXTERNAL\n").boot_mode, 0);
        // Only the value side counts.
        assert_eq!(parse_boot_args("+BOOT_INTERNAL\n").boot_mode, 0);
    }

    #[test]
    fn test_boot_cfg_pins() {
        let p = parse_boot_args("C_ARG +=BT_CFG_PIN_M33=0x1234\nSIM_ARGS=BT_CFG_PIN_A35=0xff\n");
        assert_eq!(p.m33_boot_cfg, 0x1234);
        assert_eq!(p.a35_boot_cfg, 0xff);
        // Straps lines never touch the fuse array.
        assert!(p.fuses().iter().all(|&w| w == 0));
    }

    #[test]
    fn test_boot_cfg_nested_split() {
        // The value is split at its next '=', wherever the flag sits.
        let p = parse_boot_args("SIM_ARGS=BT_CFG_PIN_M33 pin=0x42\n");
        assert_eq!(p.m33_boot_cfg, 0x42);

        // M33 wins the else-if chain; the A35 flag in the same value is not tried.
        let p = parse_boot_args("SIM_ARGS=BT_CFG_PIN_M33 BT_CFG_PIN_A35=0x7\n");
        assert_eq!(p.m33_boot_cfg, 0x7);
        assert_eq!(p.a35_boot_cfg, 0);

        let p = parse_boot_args("SIM_ARGS=BT_CFG_PIN_M33\n");
        assert_eq!(p, ProvisioningState::new());
    }

    #[test]
    fn test_boot_cfg_truncated_to_16_bits() {
        let p = parse_boot_args("X=BT_CFG_PIN_M33=0x12345\n");
        assert_eq!(p.m33_boot_cfg, 0x2345);
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        let p = parse_boot_args("# comment\nFOO=bar\n\nC_ARG +verbose=1\n");
        assert_eq!(p, ProvisioningState::new());
    }

    #[test]
    fn test_hex2dec() {
        assert_eq!(hex2dec("0x1a"), 0x1a);
        assert_eq!(hex2dec("0xffffffff"), 0xFFFF_FFFF);
        assert_eq!(hex2dec("0x"), 0);
        // Upper-case digits are not special-cased: 'A' folds as 'A' - 'a' + 10.
        assert_eq!(hex2dec("0xA"), (b'A' as u32).wrapping_sub(b'a' as u32).wrapping_add(10));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_boot_args(Path::new("/nonexistent/run.arg")).unwrap_err();
        assert!(err.to_string().contains("boot arguments"));
    }
}
