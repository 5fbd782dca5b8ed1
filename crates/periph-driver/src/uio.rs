//! Linux UIO interrupt source
//!
//! A UIO device node (`/dev/uioN`) exposes a peripheral's register window as
//! map 0 and its interrupt as a counter:
//!
//! ```text
//! write(fd, 1u32)   unmask (re-enable) the interrupt
//! read(fd) → u32    block until the next interrupt, returns total count
//! poll(fd, POLLIN)  readable once an interrupt is pending
//! ```
//!
//! [`IrqPump`] turns that into [`SharedIrqLine::raise`] calls on a dedicated
//! thread, so the same completion signals work against real hardware and the
//! simulated devices.

use crate::error::{PeriphError, Result};
use crate::irq::SharedIrqLine;
use crate::mmio::{MappedRegion, Registers};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::io::{read, write};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const SYS_CLASS_UIO: &str = "/sys/class/uio";

/// An open UIO device with its register window mapped
#[derive(Debug)]
pub struct UioDevice {
    path: PathBuf,
    file: File,
    region: Arc<MappedRegion>,
}

impl UioDevice {
    /// Open `path` and map `map_size` bytes of map 0.
    ///
    /// # Errors
    ///
    /// Returns error if the node is missing, cannot be opened, or the map
    /// fails.
    pub fn open(path: &Path, map_size: usize) -> Result<Self> {
        if !path.exists() {
            return Err(PeriphError::device_not_found(path));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let region = MappedRegion::map(file.try_clone()?, 0, map_size)?;
        tracing::info!("Opened {} ({map_size:#x} byte window)", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            region: Arc::new(region),
        })
    }

    /// Find the UIO node whose sysfs `name` matches (the device-tree node
    /// name or the `uio_pdrv_genirq` binding).
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no UIO device carries that name.
    pub fn find(name: &str) -> Result<PathBuf> {
        let entries = std::fs::read_dir(SYS_CLASS_UIO)
            .map_err(|_| PeriphError::device_not_found(SYS_CLASS_UIO))?;
        for entry in entries.flatten() {
            let Ok(found) = std::fs::read_to_string(entry.path().join("name")) else {
                continue;
            };
            if found.trim() == name {
                let node = Path::new("/dev").join(entry.file_name());
                tracing::debug!("UIO '{name}' is {}", node.display());
                return Ok(node);
            }
        }
        Err(PeriphError::device_not_found(format!("{SYS_CLASS_UIO}/*/name == {name}")))
    }

    /// Size of map 0 as reported by sysfs for the node at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if sysfs has no map 0 entry or it does not parse.
    pub fn map_size(path: &Path) -> Result<usize> {
        let node = path
            .file_name()
            .ok_or_else(|| PeriphError::device_not_found(path))?;
        let size_path = Path::new(SYS_CLASS_UIO)
            .join(node)
            .join("maps/map0/size");
        let raw = std::fs::read_to_string(&size_path)?;
        let raw = raw.trim().trim_start_matches("0x");
        usize::from_str_radix(raw, 16).map_err(|e| {
            PeriphError::invalid_config(format!("{}: {e}", size_path.display()))
        })
    }

    /// Register interface over map 0
    pub fn registers(&self) -> Registers {
        Registers::new(self.region.clone())
    }

    /// Device node path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-enable the interrupt.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub fn unmask(&self) -> Result<()> {
        write(&self.file, &1u32.to_ne_bytes())
            .map_err(|e| PeriphError::transfer_failed(format!("UIO unmask failed: {e}")))?;
        Ok(())
    }

    /// Block until the next interrupt; returns the kernel's interrupt count.
    ///
    /// # Errors
    ///
    /// Returns error if the read fails or is short.
    pub fn wait_interrupt(&self) -> Result<u32> {
        let mut buf = [0u8; 4];
        let n = read(&self.file, &mut buf)
            .map_err(|e| PeriphError::transfer_failed(format!("UIO read failed: {e}")))?;
        if n != buf.len() {
            return Err(PeriphError::transfer_failed(format!("UIO short read ({n} bytes)")));
        }
        Ok(u32::from_ne_bytes(buf))
    }

    /// Wait up to `timeout` for an interrupt. `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns error if polling or the read fails.
    pub fn poll_interrupt(&self, timeout: Duration) -> Result<Option<u32>> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut fds = [PollFd::new(&self.file, PollFlags::IN)];
        let ready = poll(&mut fds, ms)
            .map_err(|e| PeriphError::transfer_failed(format!("UIO poll failed: {e}")))?;
        if ready == 0 {
            return Ok(None);
        }
        self.wait_interrupt().map(Some)
    }
}

/// Thread forwarding UIO interrupts to a [`SharedIrqLine`]
///
/// Stops and joins on drop.
#[derive(Debug)]
pub struct IrqPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IrqPump {
    /// Poll interval; bounds how long drop waits for the thread
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Start forwarding interrupts from `device` to `line`.
    ///
    /// # Errors
    ///
    /// Returns error if the initial unmask or the thread spawn fails.
    pub fn spawn(device: UioDevice, line: Arc<SharedIrqLine>) -> Result<Self> {
        device.unmask()?;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name(format!("irq{}-pump", line.number()))
            .spawn(move || pump(&device, &line, &flag))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the thread to stop and wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("interrupt pump thread panicked");
            }
        }
    }
}

impl Drop for IrqPump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump(device: &UioDevice, line: &SharedIrqLine, stop: &AtomicBool) {
    tracing::debug!("pumping {} → irq {}", device.path().display(), line.number());
    while !stop.load(Ordering::Acquire) {
        match device.poll_interrupt(IrqPump::POLL_INTERVAL) {
            Ok(None) => {}
            Ok(Some(total)) => {
                if !line.raise() {
                    tracing::debug!("irq {}: unclaimed (kernel count {total})", line.number());
                }
                if let Err(e) = device.unmask() {
                    tracing::error!("{e}");
                    break;
                }
            }
            Err(e) => {
                tracing::error!("{e}");
                break;
            }
        }
    }
    tracing::debug!("irq {} pump stopped", line.number());
}
