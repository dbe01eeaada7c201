//! Device options.
//!
//! A [`DeviceOption`] is a named, typed value cell. Its descriptor comes
//! from the device and may be swapped out when the device asks for an
//! option reload; callers keep holding the same `Arc<DeviceOption>` across
//! reloads. Values are read lazily and cached until the next reload.
//!
//! Everything the descriptor already rules out is rejected locally, before
//! a request is sent: reading an inactive option, writing an inactive or
//! hardware-only option, automatic mode on options that do not support it,
//! values of the wrong type and values outside the constraint.

use crate::backend::DeviceBackend;
use crate::constraint::Constraint;
use crate::error::{Error, Result};
use crate::wire::{to_fixed, Capabilities, Unit, ValueType};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Value of an option, tagged with its type.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i32),
    /// Fixed-point value, as a float
    Fixed(f64),
    /// String value
    String(String),
    /// Button press (no payload)
    Button,
}

impl OptionValue {
    /// Type tag matching this value
    pub fn value_type(&self) -> ValueType {
        match self {
            OptionValue::Bool(_) => ValueType::Boolean,
            OptionValue::Int(_) => ValueType::Integer,
            OptionValue::Fixed(_) => ValueType::Fixed,
            OptionValue::String(_) => ValueType::String,
            OptionValue::Button => ValueType::Button,
        }
    }

    /// Parses text into a value of the given type.
    ///
    /// Booleans accept `true/false`, `yes/no`, `on/off` and `1/0`. Buttons
    /// accept any text.
    pub fn parse(value_type: ValueType, text: &str) -> Result<Self> {
        let invalid = || Error::InvalidValue {
            value_type,
            text: text.to_string(),
        };
        let trimmed = text.trim();
        match value_type {
            ValueType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(OptionValue::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(OptionValue::Bool(false)),
                _ => Err(invalid()),
            },
            ValueType::Integer => trimmed
                .parse()
                .map(OptionValue::Int)
                .map_err(|_| invalid()),
            ValueType::Fixed => trimmed
                .parse()
                .map(OptionValue::Fixed)
                .map_err(|_| invalid()),
            ValueType::String => Ok(OptionValue::String(text.to_string())),
            ValueType::Button => Ok(OptionValue::Button),
            ValueType::Group => Err(invalid()),
        }
    }

    /// Returns the boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload
    pub fn as_int(&self) -> Option<i32> {
        match self {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the fixed-point payload
    pub fn as_fixed(&self) -> Option<f64> {
        match self {
            OptionValue::Fixed(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Fixed(v) => write!(f, "{}", v),
            OptionValue::String(s) => f.write_str(s),
            OptionValue::Button => f.write_str("<button>"),
        }
    }
}

/// What a control-option request should do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionCommand<'a> {
    /// Read the current value
    Get,
    /// Write the given value
    Set(&'a OptionValue),
    /// Let the device choose the value
    Automatic,
}

/// Metadata describing one option
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDescriptor {
    /// Position of the option in the device's option list
    pub number: i32,
    /// Unique option name
    pub name: String,
    /// Short title
    pub title: String,
    /// Longer description
    pub description: String,
    /// Value type tag
    pub value_type: ValueType,
    /// Physical unit
    pub unit: Unit,
    /// Value size in bytes
    pub size: i32,
    /// Capability flags
    pub capabilities: Capabilities,
    /// Value constraint
    pub constraint: Arc<Constraint>,
}

impl OptionDescriptor {
    /// Number of words the value occupies
    pub fn size_words(&self) -> i32 {
        self.size / 4
    }

    /// True unless the inactive flag is set
    pub fn is_active(&self) -> bool {
        !self.capabilities.contains(Capabilities::INACTIVE)
    }

    /// True when software may write the option
    pub fn is_settable(&self) -> bool {
        self.capabilities.contains(Capabilities::SOFT_SELECT)
    }

    /// True when the option supports automatic mode
    pub fn is_automatic(&self) -> bool {
        self.capabilities.contains(Capabilities::AUTOMATIC)
    }
}

/// A device option bound to the device that owns it.
pub struct DeviceOption {
    descriptor: RwLock<Arc<OptionDescriptor>>,
    cache: Mutex<Option<OptionValue>>,
    backend: Weak<dyn DeviceBackend>,
}

impl DeviceOption {
    /// Creates an option cell bound to a backend
    pub fn new(descriptor: OptionDescriptor, backend: Weak<dyn DeviceBackend>) -> Self {
        Self {
            descriptor: RwLock::new(Arc::new(descriptor)),
            cache: Mutex::new(None),
            backend,
        }
    }

    /// Snapshot of the current descriptor
    pub fn descriptor(&self) -> Arc<OptionDescriptor> {
        Arc::clone(&self.descriptor.read())
    }

    /// Option number
    pub fn number(&self) -> i32 {
        self.descriptor.read().number
    }

    /// Option name
    pub fn name(&self) -> String {
        self.descriptor.read().name.clone()
    }

    /// Option title
    pub fn title(&self) -> String {
        self.descriptor.read().title.clone()
    }

    /// Option description
    pub fn description(&self) -> String {
        self.descriptor.read().description.clone()
    }

    /// Value type tag
    pub fn value_type(&self) -> ValueType {
        self.descriptor.read().value_type
    }

    /// Physical unit
    pub fn unit(&self) -> Unit {
        self.descriptor.read().unit
    }

    /// Capability flags
    pub fn capabilities(&self) -> Capabilities {
        self.descriptor.read().capabilities
    }

    /// Value constraint
    pub fn constraint(&self) -> Arc<Constraint> {
        Arc::clone(&self.descriptor.read().constraint)
    }

    /// True unless the option is inactive
    pub fn is_active(&self) -> bool {
        self.descriptor.read().is_active()
    }

    /// Returns the cached value without any request
    pub fn cached(&self) -> Option<OptionValue> {
        self.cache.lock().clone()
    }

    /// Reads the value, hitting the device only on the first call
    pub fn get(&self) -> Result<OptionValue> {
        let desc = self.descriptor();
        check_not_group(&desc)?;
        if !desc.is_active() {
            return Err(Error::OptionInactive {
                name: desc.name.clone(),
            });
        }
        if desc.value_type == ValueType::Button {
            return Ok(OptionValue::Button);
        }
        if let Some(value) = self.cached() {
            return Ok(value);
        }

        let value = self.backend()?.control_option(&desc, OptionCommand::Get)?;
        *self.cache.lock() = Some(value.clone());
        Ok(value)
    }

    /// Writes a value and caches what the device confirmed
    pub fn set(&self, value: &OptionValue) -> Result<OptionValue> {
        let desc = self.descriptor();
        check_not_group(&desc)?;
        if !desc.is_active() {
            return Err(Error::OptionInactive {
                name: desc.name.clone(),
            });
        }
        if !desc.is_settable() {
            return Err(Error::OptionReadOnly {
                name: desc.name.clone(),
            });
        }
        if value.value_type() != desc.value_type {
            return Err(Error::TypeMismatch {
                name: desc.name.clone(),
                expected: desc.value_type,
                actual: value.value_type(),
            });
        }
        let permitted = match value {
            OptionValue::Int(v) => desc.constraint.is_valid_int(*v),
            OptionValue::Fixed(v) => desc.constraint.is_valid_int(to_fixed(*v)),
            OptionValue::String(s) => desc.constraint.is_valid_str(s),
            OptionValue::Bool(_) | OptionValue::Button => true,
        };
        if !permitted {
            return Err(Error::constraint_violation(desc.name.clone(), value));
        }

        debug!("set option {} to {}", desc.name, value);
        let confirmed = self
            .backend()?
            .control_option(&desc, OptionCommand::Set(value))?;
        self.store(&confirmed);
        Ok(confirmed)
    }

    /// Parses text for this option's type and writes it
    pub fn set_str(&self, text: &str) -> Result<OptionValue> {
        let value = OptionValue::parse(self.value_type(), text)?;
        self.set(&value)
    }

    /// Puts the option in automatic mode and caches the chosen value
    pub fn set_automatic(&self) -> Result<OptionValue> {
        let desc = self.descriptor();
        check_not_group(&desc)?;
        if !desc.is_automatic() || !desc.is_active() {
            return Err(Error::AutomaticNotAllowed {
                name: desc.name.clone(),
            });
        }

        debug!("set option {} to automatic", desc.name);
        let chosen = self
            .backend()?
            .control_option(&desc, OptionCommand::Automatic)?;
        self.store(&chosen);
        Ok(chosen)
    }

    /// Swaps in a fresh descriptor and drops the cached value
    pub(crate) fn rebind(&self, descriptor: OptionDescriptor) {
        *self.descriptor.write() = Arc::new(descriptor);
        self.clear_cache();
    }

    pub(crate) fn clear_cache(&self) {
        self.cache.lock().take();
    }

    fn store(&self, value: &OptionValue) {
        if *value != OptionValue::Button {
            *self.cache.lock() = Some(value.clone());
        }
    }

    fn backend(&self) -> Result<Arc<dyn DeviceBackend>> {
        self.backend
            .upgrade()
            .ok_or_else(|| Error::device_closed(self.name()))
    }
}

impl fmt::Debug for DeviceOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceOption")
            .field("descriptor", &self.descriptor())
            .field("cached", &self.cached())
            .finish()
    }
}

fn check_not_group(desc: &OptionDescriptor) -> Result<()> {
    if desc.value_type == ValueType::Group {
        return Err(Error::GroupOption {
            name: desc.name.clone(),
        });
    }
    Ok(())
}
