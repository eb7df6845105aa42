use crate::snapshot::{DeviceSnapshot, FieldSnapshot};
use crate::{SimResult, SimulationError};

/// A named run of words inside a [`RegisterFile`], in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegField {
    pub name: &'static str,
    pub index: usize,
    pub len: usize,
}

impl RegField {
    pub const fn word(name: &'static str, index: usize) -> Self {
        Self { name, index, len: 1 }
    }

    pub const fn array(name: &'static str, index: usize, len: usize) -> Self {
        Self { name, index, len }
    }
}

/// Fixed-size block of 32-bit cells backing one device's visible state.
///
/// Offsets are byte offsets; anything past the backing store reads as zero
/// and swallows writes. Range checks against the device span belong to the
/// bus and the owning device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    words: Vec<u32>,
}

impl RegisterFile {
    pub fn new(words: usize) -> Self {
        Self {
            words: vec![0; words],
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn read(&self, offset: u64) -> u32 {
        self.word((offset / 4) as usize)
    }

    pub fn write(&mut self, offset: u64, value: u32) {
        self.set_word((offset / 4) as usize, value);
    }

    pub fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(0)
    }

    pub fn set_word(&mut self, index: usize, value: u32) {
        if let Some(w) = self.words.get_mut(index) {
            *w = value;
        }
    }

    /// Copy `src` in starting at word `index`, dropping whatever does not fit.
    pub fn load(&mut self, index: usize, src: &[u32]) {
        if index >= self.words.len() {
            return;
        }
        let n = src.len().min(self.words.len() - index);
        self.words[index..index + n].copy_from_slice(&src[..n]);
    }

    pub fn snapshot(&self, device: &str, version: u32, layout: &[RegField]) -> DeviceSnapshot {
        DeviceSnapshot {
            device: device.to_string(),
            version,
            fields: layout
                .iter()
                .map(|f| FieldSnapshot {
                    name: f.name.to_string(),
                    words: (f.index..f.index + f.len).map(|i| self.word(i)).collect(),
                })
                .collect(),
        }
    }

    /// Write back every field of `snapshot`; the layout must match exactly.
    pub fn restore(&mut self, layout: &[RegField], snapshot: &DeviceSnapshot) -> SimResult<()> {
        if snapshot.fields.len() != layout.len() {
            return Err(SimulationError::Snapshot(format!(
                "{}: expected {} fields, found {}",
                snapshot.device,
                layout.len(),
                snapshot.fields.len()
            )));
        }
        for (f, s) in layout.iter().zip(&snapshot.fields) {
            if f.name != s.name || f.len != s.words.len() {
                return Err(SimulationError::Snapshot(format!(
                    "{}: field '{}' ({} words) does not match '{}' ({} words)",
                    snapshot.device,
                    s.name,
                    s.words.len(),
                    f.name,
                    f.len
                )));
            }
        }
        for (f, s) in layout.iter().zip(&snapshot.fields) {
            self.load(f.index, &s.words);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: [RegField; 2] = [RegField::word("ctrl", 0), RegField::array("data", 1, 3)];

    #[test]
    fn test_unbacked_offsets_read_zero() {
        let mut regs = RegisterFile::new(4);
        regs.write(0x40, 0xDEAD_BEEF);
        assert_eq!(regs.read(0x40), 0);
        regs.write(0xC, 7);
        assert_eq!(regs.read(0xC), 7);
    }

    #[test]
    fn test_load_truncates_at_end() {
        let mut regs = RegisterFile::new(4);
        regs.load(2, &[1, 2, 3]);
        assert_eq!((regs.word(2), regs.word(3)), (1, 2));
        regs.load(9, &[5]);
        assert_eq!(regs.len(), 4);
    }

    #[test]
    fn test_snapshot_restore_layout() {
        let mut regs = RegisterFile::new(4);
        regs.load(0, &[9, 8, 7, 6]);
        let snap = regs.snapshot("dev", 1, &LAYOUT);
        assert_eq!(snap.fields[1].words, vec![8, 7, 6]);

        let mut other = RegisterFile::new(4);
        other.restore(&LAYOUT, &snap).unwrap();
        assert_eq!(other, regs);

        let mut bad = snap.clone();
        bad.fields[1].words.pop();
        assert!(other.restore(&LAYOUT, &bad).is_err());
    }
}
