//! Keyboard capture (evdev grab + uinput passthrough)
//!
//! Grabs every keyboard that has a numpad so its keys stop reaching other
//! applications, feeds key events through the [`HotkeyDispatcher`], and
//! re-emits whatever the dispatcher did not consume on a virtual keyboard.

use crate::dispatch::HotkeyDispatcher;
use anyhow::{Context, Result};
use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AttributeSet, Device, EventType, InputEvent, InputEventKind, Key,
};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix of every virtual device this program creates
pub const DEVICE_NAME_PREFIX: &str = "numpad-mouse";

/// Idle poll interval when no device had events
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Key event values
const KEY_RELEASED: i32 = 0;
const KEY_PRESSED: i32 = 1;
const KEY_REPEAT: i32 = 2;

/// Keyboards exposing numpad keys, skipping our own virtual devices
pub fn find_keyboards() -> Vec<PathBuf> {
    let mut found = Vec::new();
    for (path, dev) in evdev::enumerate() {
        let name = dev.name().unwrap_or_default();
        if name.starts_with(DEVICE_NAME_PREFIX) {
            continue;
        }
        let has_numpad = dev
            .supported_keys()
            .map(|keys| keys.contains(Key::KEY_KP5) || keys.contains(Key::KEY_KP8))
            .unwrap_or(false);
        if has_numpad {
            info!("Found keyboard: {} ({})", name, path.display());
            found.push(path);
        }
    }
    found
}

/// Whether an EV_KEY value means "held"
pub fn is_pressed(value: i32) -> bool {
    matches!(value, KEY_PRESSED | KEY_REPEAT)
}

struct CapturedKeyboard {
    path: PathBuf,
    device: Device,
    passthrough: Option<VirtualDevice>,
}

/// Set of grabbed keyboards
pub struct KeyboardCapture {
    keyboards: Vec<CapturedKeyboard>,
}

impl KeyboardCapture {
    /// Open and grab each device
    ///
    /// A device that cannot be opened or grabbed is skipped with a warning;
    /// only an empty result is an error.
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            anyhow::bail!("No keyboard with a numpad found (are you in the 'input' group?)");
        }
        let mut keyboards = Vec::with_capacity(paths.len());
        for path in paths {
            match open_keyboard(path) {
                Ok(kb) => keyboards.push(kb),
                Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
            }
        }
        if keyboards.is_empty() {
            anyhow::bail!("None of the {} keyboard(s) could be grabbed", paths.len());
        }
        Ok(Self { keyboards })
    }

    /// Read events until `running` is cleared or every device is gone
    pub fn run(&mut self, dispatcher: &HotkeyDispatcher, running: &AtomicBool) -> Result<()> {
        while running.load(Ordering::SeqCst) {
            let mut had_events = false;
            let mut lost = Vec::new();

            for (index, kb) in self.keyboards.iter_mut().enumerate() {
                match kb.device.fetch_events() {
                    Ok(events) => {
                        for ev in events {
                            had_events = true;
                            forward_event(dispatcher, kb.passthrough.as_mut(), ev);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        warn!("Device disconnected: {} ({})", kb.path.display(), e);
                        lost.push(index);
                    }
                }
            }

            for index in lost.into_iter().rev() {
                let mut kb = self.keyboards.remove(index);
                let _ = kb.device.ungrab();
            }
            if self.keyboards.is_empty() {
                anyhow::bail!("All captured keyboards disconnected");
            }

            if !had_events {
                thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(())
    }
}

impl Drop for KeyboardCapture {
    fn drop(&mut self) {
        // Closing the fd releases the grab too; ungrab first so keys flow again at once
        for kb in &mut self.keyboards {
            let _ = kb.device.ungrab();
        }
    }
}

fn open_keyboard(path: &Path) -> Result<CapturedKeyboard> {
    let mut device = Device::open(path)
        .with_context(|| format!("Failed to open evdev device: {}", path.display()))?;
    set_nonblocking(&device).context("Failed to set evdev device non-blocking")?;

    // Build the passthrough before grabbing so a failure leaves the keyboard usable
    let passthrough = match build_passthrough(&device) {
        Ok(vdev) => Some(vdev),
        Err(e) => {
            warn!("No passthrough for {}: {:#}", path.display(), e);
            None
        }
    };

    device
        .grab()
        .with_context(|| format!("Failed to grab evdev device: {}", path.display()))?;
    info!("Grabbed device: {}", path.display());

    Ok(CapturedKeyboard {
        path: path.to_path_buf(),
        device,
        passthrough,
    })
}

fn build_passthrough(source: &Device) -> Result<VirtualDevice> {
    let mut keys = AttributeSet::<Key>::new();
    if let Some(src_keys) = source.supported_keys() {
        for key in src_keys.iter() {
            keys.insert(key);
        }
    }
    let name = format!(
        "{}-passthrough-{}",
        DEVICE_NAME_PREFIX,
        std::process::id()
    );
    VirtualDeviceBuilder::new()
        .context("Failed to create uinput builder")?
        .name(&name)
        .with_keys(&keys)
        .context("Failed to set key capabilities")?
        .build()
        .context("Failed to build uinput device")
}

/// Dispatch one event, re-emitting unconsumed keys
fn forward_event(dispatcher: &HotkeyDispatcher, passthrough: Option<&mut VirtualDevice>, ev: InputEvent) {
    let InputEventKind::Key(key) = ev.kind() else {
        return;
    };
    let value = ev.value();
    if !matches!(value, KEY_RELEASED | KEY_PRESSED | KEY_REPEAT) {
        debug!("Ignoring key {:?} with value {}", key, value);
        return;
    }

    if dispatcher.handle_key(key.code(), is_pressed(value)) {
        return;
    }
    if let Some(vdev) = passthrough {
        let event = InputEvent::new(EventType::KEY, key.code(), value);
        if let Err(e) = vdev.emit(&[event]) {
            warn!("uinput emit failed: {e}");
        }
    }
}

/// Switch the device fd to O_NONBLOCK so one idle keyboard never stalls the poll
fn set_nonblocking(device: &Device) -> Result<()> {
    let fd = device.as_raw_fd();
    // SAFETY: `fd` belongs to `device`, which outlives both calls
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error()).context("Failed to read evdev fd flags");
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: as above
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error()).context("Failed to set O_NONBLOCK on evdev fd");
    }
    Ok(())
}
