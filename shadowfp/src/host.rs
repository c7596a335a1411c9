//! Host access seam
//!
//! The instrumentation framework owns guest memory, symbol resolution and
//! the guest executable's identity; the engine reaches all of them through
//! [`GuestHost`]. [`MemHost`] is a plain in-memory implementation used by
//! tests and by embedders that replay recorded traces.

use crate::error::EngineError;

use shadowfp_ir::Addr;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Maximum guest string length the engine will read.
const MAX_GUEST_STR: usize = 256;

/// Services the host instrumentation framework provides to the engine.
pub trait GuestHost {
    /// Read guest memory at `addr` into `buf`.
    fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<(), EngineError>;

    /// Write `bytes` into guest memory at `addr`.
    fn write_bytes(&mut self, addr: Addr, bytes: &[u8]) -> Result<(), EngineError>;

    /// Path of the guest executable; report files are written beside it.
    fn object_path(&self) -> PathBuf;

    /// Human-readable source location of a guest instruction address.
    fn describe_origin(&self, addr: Addr) -> Option<String> {
        let _ = addr;
        None
    }

    /// Whether `addr` belongs to library code rather than the main object.
    fn is_library_code(&self, addr: Addr) -> bool {
        let _ = addr;
        false
    }

    /// Read a guest single at `addr`.
    fn read_f32(&self, addr: Addr) -> Result<f32, EngineError> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    /// Read a guest double at `addr`.
    fn read_f64(&self, addr: Addr) -> Result<f64, EngineError> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// Read a NUL-terminated guest string at `addr`, lossily decoded.
    fn read_str(&self, addr: Addr) -> Result<String, EngineError> {
        let mut bytes = Vec::new();

        for i in 0..MAX_GUEST_STR {
            let mut b = [0u8; 1];
            self.read_bytes(addr + i as Addr, &mut b)?;
            if b[0] == 0 {
                break;
            }
            bytes.push(b[0]);
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write a NUL-terminated string into guest memory at `addr`.
    fn write_str(&mut self, addr: Addr, s: &str) -> Result<(), EngineError> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.truncate(MAX_GUEST_STR - 1);
        bytes.push(0);
        self.write_bytes(addr, &bytes)
    }
}

/// Byte-addressed in-memory guest, the host stand-in for tests.
#[derive(Debug, Clone)]
pub struct MemHost {
    memory: HashMap<Addr, u8>,
    object: PathBuf,
    library_ranges: Vec<(Addr, Addr)>,
}

impl Default for MemHost {
    fn default() -> Self {
        Self {
            memory: HashMap::new(),
            object: PathBuf::from("guest"),
            library_ranges: Vec::new(),
        }
    }
}

impl MemHost {
    /// New empty guest whose reports land beside `object`.
    pub fn new<P: AsRef<Path>>(object: P) -> Self {
        Self {
            object: object.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Mark `[start, end)` as library code.
    pub fn add_library_range(&mut self, start: Addr, end: Addr) {
        self.library_ranges.push((start, end));
    }

    /// Store a double at `addr`, bypassing any instrumentation.
    pub fn poke_f64(&mut self, addr: Addr, value: f64) {
        for (i, b) in value.to_le_bytes().iter().enumerate() {
            self.memory.insert(addr + i as Addr, *b);
        }
    }

    /// Store a single at `addr`, bypassing any instrumentation.
    pub fn poke_f32(&mut self, addr: Addr, value: f32) {
        for (i, b) in value.to_le_bytes().iter().enumerate() {
            self.memory.insert(addr + i as Addr, *b);
        }
    }
}

impl GuestHost for MemHost {
    fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<(), EngineError> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self
                .memory
                .get(&(addr + i as Addr))
                .copied()
                .unwrap_or_default();
        }
        Ok(())
    }

    fn write_bytes(&mut self, addr: Addr, bytes: &[u8]) -> Result<(), EngineError> {
        for (i, b) in bytes.iter().enumerate() {
            self.memory.insert(addr + i as Addr, *b);
        }
        Ok(())
    }

    fn object_path(&self) -> PathBuf {
        self.object.clone()
    }

    fn is_library_code(&self, addr: Addr) -> bool {
        self.library_ranges
            .iter()
            .any(|(start, end)| (*start..*end).contains(&addr))
    }
}
