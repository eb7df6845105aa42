use anyhow::Context;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::Path;
use ulpsim_config::{ScriptAssertion, ScriptStep};
use ulpsim_core::metrics::AccessSummary;
use ulpsim_core::{Machine, ProvisioningState};

/// Debug print sink: keeps everything for assertions, optionally echoes to stdout.
pub struct DebugTee {
    captured: Vec<u8>,
    echo: bool,
}

impl DebugTee {
    pub fn new(echo: bool) -> Self {
        Self {
            captured: Vec::new(),
            echo,
        }
    }

    pub fn captured(&self) -> String {
        String::from_utf8_lossy(&self.captured).into_owned()
    }
}

impl Write for DebugTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.captured.extend_from_slice(buf);
        if self.echo {
            io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.echo {
            io::stdout().flush()?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub status: String,
    pub board: String,
    pub boot_args: String,
    pub boot_args_sha256: String,
    pub accesses: AccessSummary,
    pub debug_output: String,
    pub failures: Vec<String>,
}

pub fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to hash {:?}", path))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Execute the steps in order. A bus error ends the run.
pub fn run_steps(machine: &mut Machine, steps: &[ScriptStep]) -> Vec<String> {
    let mut failures = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        let res = match step {
            ScriptStep::Read(r) => machine.read_u32(r.read).map(|value| {
                tracing::info!("read {:#x} -> {:#010x}", r.read, value);
                if let Some(expected) = r.expect {
                    if value != expected {
                        failures.push(format!(
                            "step {}: read {:#x} returned {:#x}, expected {:#x}",
                            i, r.read, value, expected
                        ));
                    }
                }
            }),
            ScriptStep::Write(w) => machine.write_u32(w.write, w.value),
            ScriptStep::WriteStr(s) => {
                let mut bytes = s.text.clone().into_bytes();
                bytes.push(0);
                machine.load_bytes(s.write_str, &bytes)
            }
            ScriptStep::WriteWords(w) => w
                .words
                .iter()
                .enumerate()
                .try_for_each(|(n, word)| machine.write_u32(w.write_words + 4 * n as u64, *word)),
        };
        if let Err(e) = res {
            failures.push(format!("step {}: {}", i, e));
            break;
        }
    }
    failures
}

pub fn check_assertions(
    assertions: &[ScriptAssertion],
    debug_output: &str,
    provisioning: &ProvisioningState,
) -> Vec<String> {
    let mut failures = Vec::new();
    for a in assertions {
        match a {
            ScriptAssertion::DebugContains(c) => {
                if !debug_output.contains(&c.debug_contains) {
                    failures.push(format!(
                        "debug output does not contain {:?}",
                        c.debug_contains
                    ));
                }
            }
            ScriptAssertion::Fuse(f) => {
                let actual = provisioning.fuse(f.fuse);
                if actual != Some(f.equals) {
                    failures.push(format!(
                        "fuse[{}] is {:?}, expected {:#x}",
                        f.fuse, actual, f.equals
                    ));
                }
            }
        }
    }
    failures
}
