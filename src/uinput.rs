//! Virtual mouse device using evdev/uinput
//!
//! Creates a relative pointer with wheels and three buttons. Works the same
//! under X11, Wayland and the console because the kernel sees it as real
//! hardware.

use crate::sink::{MotionSink, MouseButton, SinkError};
use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AttributeSet, EventType, InputEvent, Key, RelativeAxisType,
};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors from virtual mouse creation
#[derive(Debug, Error)]
pub enum UinputError {
    #[error("/dev/uinput not found - is the uinput kernel module loaded?")]
    NotFound,
    #[error("Failed to create virtual device: {0}")]
    CreateDevice(#[source] std::io::Error),
}

/// Virtual mouse device
pub struct UinputMouse {
    device: Mutex<VirtualDevice>,
    name: String,
}

impl UinputMouse {
    /// Create a new virtual mouse
    ///
    /// The process id is part of the device name so that two instances never
    /// collide.
    pub fn new() -> Result<Self, UinputError> {
        if !std::path::Path::new("/dev/uinput").exists() {
            return Err(UinputError::NotFound);
        }

        let name = format!("numpad-mouse-{}", std::process::id());

        let mut keys = AttributeSet::<Key>::new();
        for button in MouseButton::ALL {
            keys.insert(button_key(button));
        }

        let mut axes = AttributeSet::<RelativeAxisType>::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);
        axes.insert(RelativeAxisType::REL_WHEEL);
        axes.insert(RelativeAxisType::REL_HWHEEL);

        let device = VirtualDeviceBuilder::new()
            .map_err(UinputError::CreateDevice)?
            .name(&name)
            .with_keys(&keys)
            .map_err(UinputError::CreateDevice)?
            .with_relative_axes(&axes)
            .map_err(UinputError::CreateDevice)?
            .build()
            .map_err(UinputError::CreateDevice)?;

        Ok(Self {
            device: Mutex::new(device),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device path (e.g., /dev/input/eventX)
    pub fn device_path(&self) -> Option<std::path::PathBuf> {
        self.device
            .lock()
            .enumerate_dev_nodes_blocking()
            .ok()?
            .next()?
            .ok()
    }

    /// Emit a batch; `emit` terminates it with SYN_REPORT
    fn emit(&self, events: &[InputEvent]) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }
        self.device.lock().emit(events).map_err(SinkError::Emit)
    }

    fn button(&self, button: MouseButton, value: i32) -> Result<(), SinkError> {
        self.emit(&[InputEvent::new(
            EventType::KEY,
            button_key(button).code(),
            value,
        )])
    }
}

impl MotionSink for UinputMouse {
    fn move_by(&self, dx: i32, dy: i32) -> Result<(), SinkError> {
        self.emit(&relative_events(
            (RelativeAxisType::REL_X, dx),
            (RelativeAxisType::REL_Y, dy),
        ))
    }

    fn scroll(&self, dx: i32, dy: i32) -> Result<(), SinkError> {
        self.emit(&relative_events(
            (RelativeAxisType::REL_WHEEL, dy),
            (RelativeAxisType::REL_HWHEEL, dx),
        ))
    }

    fn press(&self, button: MouseButton) -> Result<(), SinkError> {
        self.button(button, 1)
    }

    fn release(&self, button: MouseButton) -> Result<(), SinkError> {
        self.button(button, 0)
    }
}

/// Build REL events for the nonzero components only
fn relative_events(
    first: (RelativeAxisType, i32),
    second: (RelativeAxisType, i32),
) -> Vec<InputEvent> {
    [first, second]
        .into_iter()
        .filter(|&(_, value)| value != 0)
        .map(|(axis, value)| InputEvent::new(EventType::RELATIVE, axis.0, value))
        .collect()
}

fn button_key(button: MouseButton) -> Key {
    match button {
        MouseButton::Left => Key::BTN_LEFT,
        MouseButton::Right => Key::BTN_RIGHT,
        MouseButton::Middle => Key::BTN_MIDDLE,
    }
}
