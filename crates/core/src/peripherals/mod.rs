pub mod debug_print;
pub mod fsb;
pub mod s400_mu;
pub mod sim0;
pub mod test_ip;
pub mod tstmr;

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Host-side text sink shared by the debug print channel(s).
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Receives the secure mailbox's system-reset command.
pub trait ResetHandler: std::fmt::Debug + Send + Sync {
    fn system_reset(&self, header: u32);
}

/// Terminates the emulator immediately, flushing nothing.
#[derive(Debug, Default)]
pub struct ProcessExit;

impl ResetHandler for ProcessExit {
    fn system_reset(&self, header: u32) {
        tracing::info!("S400 MU: system reset requested (header {:#010x}), exiting", header);
        std::process::exit(0);
    }
}

/// Host collaborators handed to devices at construction time.
#[derive(Clone)]
pub struct DeviceHooks {
    pub debug_output: SharedWriter,
    pub reset: Arc<dyn ResetHandler>,
}

impl Default for DeviceHooks {
    fn default() -> Self {
        Self {
            debug_output: Arc::new(Mutex::new(std::io::stdout())),
            reset: Arc::new(ProcessExit),
        }
    }
}
