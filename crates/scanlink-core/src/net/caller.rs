//! Remote procedure calls of the SANE network protocol.
//!
//! [`ProcedureCaller`] owns the control channel and implements one method
//! per command. Every reply that can carry a resource challenge is handled
//! with a bounded loop: the first challenge is answered with an Authorize
//! call and the request is repeated once; a second challenge fails with
//! [`Error::AuthenticationFailed`].

use crate::backend::Parameters;
use crate::cancel::CancelToken;
use crate::constraint::Constraint;
use crate::error::{Error, Result};
use crate::image::{ByteOrder, Image, ImageConfig, ImageLayout};
use crate::net::auth::{answer_challenge, Credentials};
use crate::net::transport::Transport;
use crate::option::{OptionCommand, OptionDescriptor, OptionValue};
use crate::wire::{
    from_fixed, read_record, to_fixed, Capabilities, Command, ConstraintKind, FrameFormat,
    OptionAction, OptionInfo, SaneVersion, Unit, ValueType, Wire, STRING_SLOT,
};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Device entry returned by GetDevices
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// Unique device name, used to open it
    pub name: String,
    /// Manufacturer
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Device type, e.g. "flatbed scanner"
    pub kind: String,
}

/// Raw bytes of a finished acquisition and the geometry to decode them
#[derive(Debug, Clone)]
pub(crate) struct RawScan {
    pub(crate) data: Bytes,
    pub(crate) layout: ImageLayout,
    pub(crate) frames: usize,
}

struct StartReply {
    status: i32,
    port: i32,
    byte_order: ByteOrder,
}

/// Serializes procedure calls over one control channel.
pub(crate) struct ProcedureCaller<T> {
    wire: Wire<T>,
    exited: bool,
}

impl<T: Transport> ProcedureCaller<T> {
    pub(crate) fn new(transport: T) -> Self {
        Self {
            wire: Wire::new(transport),
            exited: false,
        }
    }

    /// True once Exit has been sent
    pub(crate) fn is_exited(&self) -> bool {
        self.exited
    }

    fn begin(&mut self, command: Command) -> Result<()> {
        if self.exited {
            return Err(Error::ConnectionClosed);
        }
        trace!("call {:?}", command);
        self.wire.send_word(command.word());
        Ok(())
    }

    pub(crate) fn initialize(
        &mut self,
        version: SaneVersion,
        username: &str,
    ) -> Result<SaneVersion> {
        self.begin(Command::Initialize)?;
        self.wire.send_word(version.code());
        self.wire.send_string(username);

        let status = self.wire.read_word()?;
        let daemon = self.wire.read_word()?;
        check_status(status)?;
        let daemon = SaneVersion::from_code(daemon);
        debug!("initialized as {:?}, daemon version {}", username, daemon);
        Ok(daemon)
    }

    pub(crate) fn get_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        self.begin(Command::GetDevices)?;

        let status = self.wire.read_word()?;
        let devices = self.wire.read_pointer_array(|w, _| {
            Ok(DeviceInfo {
                name: w.read_string()?,
                vendor: w.read_string()?,
                model: w.read_string()?,
                kind: w.read_string()?,
            })
        })?;
        check_status(status)?;
        debug!("daemon lists {} devices", devices.len());
        Ok(devices)
    }

    pub(crate) fn open(&mut self, name: &str, credentials: &Credentials) -> Result<i32> {
        let mut authorized = false;
        loop {
            self.begin(Command::Open)?;
            self.wire.send_string(name);

            let status = self.wire.read_word()?;
            let handle = self.wire.read_word()?;
            let resource = self.wire.read_string()?;

            if !resource.is_empty() {
                self.answer(&resource, credentials, &mut authorized)?;
                continue;
            }
            check_status(status)?;
            debug!("opened {:?} as handle {}", name, handle);
            return Ok(handle);
        }
    }

    pub(crate) fn close(&mut self, handle: i32) -> Result<()> {
        self.begin(Command::Close)?;
        self.wire.send_word(handle);
        self.wire.read_word()?;
        debug!("closed handle {}", handle);
        Ok(())
    }

    pub(crate) fn get_option_descriptors(&mut self, handle: i32) -> Result<Vec<OptionDescriptor>> {
        self.begin(Command::GetOptionDescriptors)?;
        self.wire.send_word(handle);

        let descriptors = self
            .wire
            .read_pointer_array(|w, index| read_descriptor(w, index as i32))?;
        debug!("handle {} has {} option descriptors", handle, descriptors.len());
        Ok(descriptors)
    }

    /// Gets, sets or automates one option.
    ///
    /// `reload` runs when the daemon flags that every option descriptor
    /// must be refetched; it receives this caller so it can issue the
    /// request without re-entering the session lock.
    pub(crate) fn control_option<F>(
        &mut self,
        handle: i32,
        descriptor: &OptionDescriptor,
        command: OptionCommand<'_>,
        credentials: &Credentials,
        reload: F,
    ) -> Result<OptionValue>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if let OptionCommand::Set(value) = command {
            if value.value_type() != descriptor.value_type {
                return Err(Error::TypeMismatch {
                    name: descriptor.name.clone(),
                    expected: descriptor.value_type,
                    actual: value.value_type(),
                });
            }
        }
        let action = match command {
            OptionCommand::Get => OptionAction::Get,
            OptionCommand::Set(_) => OptionAction::Set,
            OptionCommand::Automatic => OptionAction::Automatic,
        };

        let mut authorized = false;
        let (info, value) = loop {
            self.begin(Command::ControlOption)?;
            self.wire.send_word(handle);
            self.wire.send_word(descriptor.number);
            self.wire.send_word(action.word());
            self.wire.send_word(descriptor.value_type.word());
            let sent_size = self.send_option_value(descriptor, command);

            let status = self.wire.read_word()?;
            let info = OptionInfo::from_bits_retain(self.wire.read_word()?);
            let echoed_type = self.wire.read_word()?;
            let echoed_size = self.wire.read_word()?;
            let value = self.read_option_value(descriptor.value_type)?;
            let resource = self.wire.read_string()?;

            if echoed_type != descriptor.value_type.word() {
                return Err(Error::protocol_violation(format!(
                    "option {} echoed type {} for a {:?} request",
                    descriptor.name, echoed_type, descriptor.value_type
                )));
            }
            if echoed_size != sent_size {
                return Err(Error::protocol_violation(format!(
                    "option {} echoed size {}, sent {}",
                    descriptor.name, echoed_size, sent_size
                )));
            }
            if !resource.is_empty() {
                self.answer(&resource, credentials, &mut authorized)?;
                continue;
            }
            check_status(status)?;
            break (info, value);
        };

        if info.contains(OptionInfo::INEXACT) {
            debug!("option {} rounded to {}", descriptor.name, value);
        }
        if info.contains(OptionInfo::RELOAD_OPTIONS) {
            debug!("option {} requests an option reload", descriptor.name);
            reload(self)?;
        }
        Ok(value)
    }

    pub(crate) fn get_parameters(&mut self, handle: i32) -> Result<Parameters> {
        self.begin(Command::GetParameters)?;
        self.wire.send_word(handle);

        let status = self.wire.read_word()?;
        let params = Parameters {
            format: FrameFormat::from_word(self.wire.read_word()?),
            last_frame: self.wire.read_word()? == 1,
            bytes_per_line: self.wire.read_word()?,
            pixels_per_line: self.wire.read_word()?,
            lines: self.wire.read_word()?,
            depth: self.wire.read_word()?,
        };
        check_status(status)?;
        trace!("parameters {:?}", params);
        Ok(params)
    }

    pub(crate) fn cancel(&mut self, handle: i32) -> Result<()> {
        self.begin(Command::Cancel)?;
        self.wire.send_word(handle);
        self.wire.read_word()?;
        debug!("cancelled acquisition on handle {}", handle);
        Ok(())
    }

    pub(crate) fn authorize(&mut self, resource: &str, credentials: &Credentials) -> Result<()> {
        let reply = answer_challenge(resource, &credentials.password);
        debug!("authorizing {:?} for resource {:?}", credentials.username, reply.resource);

        self.begin(Command::Authorize)?;
        self.wire.send_string(&reply.resource);
        self.wire.send_string(&credentials.username);
        self.wire.send_string(&reply.password);
        self.wire.read_word()?;
        Ok(())
    }

    /// Ends the session. Exit has no reply.
    pub(crate) fn exit(&mut self) -> Result<()> {
        self.begin(Command::Exit)?;
        self.exited = true;
        self.wire.flush()
    }

    /// Runs an acquisition and reassembles the image
    pub(crate) fn scan(
        &mut self,
        handle: i32,
        credentials: &Credentials,
        cancel: &CancelToken,
        config: &ImageConfig,
    ) -> Result<Image> {
        let raw = self.acquire(handle, credentials, cancel)?;
        Image::assemble(raw.data, raw.layout, config)
    }

    /// Reads frames until the daemon reports the last one.
    pub(crate) fn acquire(
        &mut self,
        handle: i32,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<RawScan> {
        let mut data = BytesMut::new();
        let mut frames = 0;
        loop {
            let (params, start) = self.start_frame(handle, credentials, cancel)?;
            if !params.format.is_complete_image() {
                self.cancel_quietly(handle);
                return Err(Error::UnsupportedFrameFormat(params.format));
            }
            let port = u16::try_from(start.port).map_err(|_| {
                Error::protocol_violation(format!("invalid data port {}", start.port))
            })?;

            let before = data.len();
            match self.read_frame(port, cancel, &mut data) {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    self.cancel_quietly(handle);
                    return Err(Error::Cancelled);
                }
                Err(e) => return Err(e),
            }
            frames += 1;
            debug!("frame {} carried {} bytes", frames, data.len() - before);

            if params.last_frame {
                let lines = if params.lines < 0 || frames > 1 {
                    derived_lines(data.len(), params.bytes_per_line)
                } else {
                    params.lines as usize
                };
                return Ok(RawScan {
                    data: data.freeze(),
                    layout: ImageLayout {
                        width: params.pixels_per_line.max(0) as usize,
                        lines,
                        depth: params.depth,
                        color: params.format.is_color(),
                        byte_order: start.byte_order,
                    },
                    frames,
                });
            }
        }
    }

    fn start_frame(
        &mut self,
        handle: i32,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<(Parameters, StartReply)> {
        let mut authorized = false;
        loop {
            let params = self.get_parameters(handle)?;
            if cancel.is_cancelled() {
                self.cancel_quietly(handle);
                return Err(Error::Cancelled);
            }

            self.begin(Command::Start)?;
            self.wire.send_word(handle);
            let reply = StartReply {
                status: self.wire.read_word()?,
                port: self.wire.read_word()?,
                byte_order: ByteOrder::from_word(self.wire.read_word()?),
            };
            let resource = self.wire.read_string()?;

            if !resource.is_empty() {
                self.answer(&resource, credentials, &mut authorized)?;
                continue;
            }
            check_status(reply.status)?;
            debug!("frame started on port {}, {:?}", reply.port, reply.byte_order);
            return Ok((params, reply));
        }
    }

    fn read_frame(&self, port: u16, cancel: &CancelToken, data: &mut BytesMut) -> Result<()> {
        let channel = self
            .wire
            .get_ref()
            .open_data_channel(port)
            .map_err(|e| Error::connect(format!("data port {}", port), e))?;
        let (mut reader, abort) = channel.into_parts();
        let _armed = abort.map(|hook| cancel.arm(hook));

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match read_record(&mut reader, data) {
                Ok(Some(_)) => {}
                Ok(None) => return Ok(()),
                Err(_) if cancel.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => return Err(e),
            }
        }
    }

    fn cancel_quietly(&mut self, handle: i32) {
        if let Err(e) = self.cancel(handle) {
            warn!("failed to cancel acquisition on handle {}: {}", handle, e);
        }
    }

    fn answer(
        &mut self,
        resource: &str,
        credentials: &Credentials,
        authorized: &mut bool,
    ) -> Result<()> {
        if *authorized {
            return Err(Error::authentication_failed(resource));
        }
        self.authorize(resource, credentials)?;
        *authorized = true;
        Ok(())
    }

    /// Queues the value payload and returns the size the daemon must echo
    fn send_option_value(
        &mut self,
        descriptor: &OptionDescriptor,
        command: OptionCommand<'_>,
    ) -> i32 {
        if descriptor.value_type == ValueType::String {
            let text = match command {
                OptionCommand::Set(OptionValue::String(s)) => s.as_str(),
                _ => "",
            };
            let size = text.len().min(STRING_SLOT) as i32;
            self.wire.send_word(size);
            self.wire.send_string(text);
            return size;
        }

        let word = match command {
            OptionCommand::Get => 1,
            OptionCommand::Automatic if descriptor.value_type == ValueType::Fixed => to_fixed(1.0),
            OptionCommand::Automatic => 1,
            OptionCommand::Set(value) => match value {
                OptionValue::Bool(b) => i32::from(*b),
                OptionValue::Int(v) => *v,
                OptionValue::Fixed(v) => to_fixed(*v),
                OptionValue::Button | OptionValue::String(_) => 1,
            },
        };
        let size = descriptor.size_words() * 4;
        self.wire.send_word(size);
        self.wire.send_word(1);
        self.wire.send_word(word);
        size
    }

    fn read_option_value(&mut self, value_type: ValueType) -> Result<OptionValue> {
        Ok(match value_type {
            ValueType::Boolean => OptionValue::Bool(self.read_value_words()? == 1),
            ValueType::Integer => OptionValue::Int(self.read_value_words()?),
            ValueType::Fixed => OptionValue::Fixed(from_fixed(self.read_value_words()?)),
            ValueType::String => OptionValue::String(self.wire.read_string()?),
            ValueType::Button => {
                self.wire.read_word()?;
                OptionValue::Button
            }
            ValueType::Group => return Err(Error::UnsupportedValueType(ValueType::Group.word())),
        })
    }

    /// Reads a word array and returns its first element
    fn read_value_words(&mut self) -> Result<i32> {
        let count = self.wire.read_word()?;
        let mut first = 0;
        for i in 0..count.max(0) {
            let word = self.wire.read_word()?;
            if i == 0 {
                first = word;
            }
        }
        Ok(first)
    }
}

fn read_descriptor<S>(wire: &mut Wire<S>, number: i32) -> Result<OptionDescriptor>
where
    S: std::io::Read + std::io::Write,
{
    let name = wire.read_string()?;
    let title = wire.read_string()?;
    let description = wire.read_string()?;
    let value_type = wire.read_word()?;
    let unit = wire.read_word()?;
    let size = wire.read_word()?;
    let capabilities = wire.read_word()?;
    let kind = ConstraintKind::try_from(wire.read_word()?)?;
    let constraint = Constraint::decode(kind, wire)?;

    Ok(OptionDescriptor {
        number,
        name,
        title,
        description,
        value_type: ValueType::try_from(value_type)?,
        unit: Unit::from_word(unit),
        size,
        capabilities: Capabilities::from_bits_retain(capabilities),
        constraint: Arc::new(constraint),
    })
}

fn check_status(status: i32) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(Error::status(status))
    }
}

fn derived_lines(len: usize, bytes_per_line: i32) -> usize {
    if bytes_per_line > 0 {
        len / bytes_per_line as usize
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, Script};
    use crate::wire::Status;
    use pretty_assertions::assert_eq;

    type Sent = Arc<parking_lot::Mutex<Vec<u8>>>;

    fn caller(replies: Script) -> (ProcedureCaller<MockTransport>, Sent) {
        let mock = MockTransport::new(replies);
        let sent = mock.sent_handle();
        (ProcedureCaller::new(mock), sent)
    }

    fn creds() -> Credentials {
        Credentials::new(Some("bob"), Some("pw"))
    }

    fn int_option(number: i32, constraint: Constraint) -> OptionDescriptor {
        OptionDescriptor {
            number,
            name: "resolution".to_string(),
            title: "Resolution".to_string(),
            description: String::new(),
            value_type: ValueType::Integer,
            unit: Unit::Dpi,
            size: 4,
            capabilities: Capabilities::SOFT_SELECT | Capabilities::SOFT_DETECT,
            constraint: Arc::new(constraint),
        }
    }

    /// Reply to a word-typed control-option request
    fn control_reply(status: i32, info: i32, value: i32, resource: &str) -> Script {
        Script::new()
            .words(&[status, info, 1, 4, 1, value])
            .string(resource)
    }

    fn parameters_reply(format: i32, last: bool, bpl: i32, ppl: i32, lines: i32) -> Script {
        Script::new().words(&[0, format, i32::from(last), bpl, ppl, lines, 8])
    }

    fn start_reply(port: i32, resource: &str) -> Script {
        Script::new().words(&[0, port, 0x4321]).string(resource)
    }

    #[test]
    fn test_initialize() {
        let (mut caller, sent) = caller(Script::new().word(0).word(3));
        let version = caller.initialize(SaneVersion::CLIENT, "bob").unwrap();
        assert_eq!(version.code(), 3);

        let expected = Script::new().word(0).word(0x0100_0003).slot("bob").into_bytes();
        assert_eq!(*sent.lock(), expected);
    }

    #[test]
    fn test_initialize_failure_status() {
        let (mut caller, _) = caller(Script::new().word(11).word(0));
        let err = caller.initialize(SaneVersion::CLIENT, "bob").unwrap_err();
        assert_eq!(err.sane_status(), Some(Status::AccessDenied));
    }

    #[test]
    fn test_get_devices() {
        let replies = Script::new()
            .word(0)
            .word(3)
            .word(0)
            .string("pixma:04A9")
            .string("Canon")
            .string("MG5300")
            .string("multi-function peripheral")
            .word(1)
            .word(0)
            .string("test:0")
            .string("Noname")
            .string("frontend-tester")
            .string("virtual device");
        let (mut caller, sent) = caller(replies);
        let devices = caller.get_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].vendor, "Canon");
        assert_eq!(devices[1].name, "test:0");
        assert_eq!(*sent.lock(), Script::new().word(1).into_bytes());
    }

    #[test]
    fn test_open_with_md5_challenge() {
        let replies = Script::new()
            .words(&[0, 0])
            .string("test$MD5$salt")
            .word(0)
            .words(&[0, 7])
            .string("");
        let (mut caller, sent) = caller(replies);
        assert_eq!(caller.open("test:0", &creds()).unwrap(), 7);

        let auth = answer_challenge("test$MD5$salt", "pw");
        let expected = Script::new()
            .word(2)
            .slot("test:0")
            .word(9)
            .slot("test")
            .slot("bob")
            .slot(&auth.password)
            .word(2)
            .slot("test:0")
            .into_bytes();
        assert_eq!(*sent.lock(), expected);
    }

    #[test]
    fn test_open_double_challenge_fails() {
        let replies = Script::new()
            .words(&[0, 0])
            .string("res")
            .word(0)
            .words(&[0, 0])
            .string("res");
        let (mut caller, _) = caller(replies);
        let err = caller.open("test:0", &creds()).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed { resource } if resource == "res"));
    }

    #[test]
    fn test_open_failure_status() {
        let replies = Script::new().words(&[3, 0]).string("");
        let (mut caller, _) = caller(replies);
        let err = caller.open("test:0", &creds()).unwrap_err();
        assert_eq!(err.sane_status(), Some(Status::DeviceBusy));
    }

    #[test]
    fn test_option_descriptors() {
        let replies = Script::new()
            .word(3)
            .word(0)
            .descriptor("", 1, 4, 4)
            .word(0)
            .string("mode")
            .string("Scan mode")
            .string("Selects the scan mode")
            .words(&[3, 0, 32, 5, 3])
            .word(2)
            .string("Color")
            .string("Gray")
            .word(0)
            .string("resolution")
            .string("Scan resolution")
            .string("")
            .words(&[1, 4, 4, 5, 1])
            .words(&[0, 75, 1200, 25]);
        let (mut caller, _) = caller(replies);
        let options = caller.get_option_descriptors(1).unwrap();

        assert_eq!(options.len(), 3);
        assert_eq!(options[1].number, 1);
        assert_eq!(options[1].value_type, ValueType::String);
        assert_eq!(
            *options[1].constraint,
            Constraint::StringEnum(vec!["Color".into(), "Gray".into()])
        );
        assert_eq!(options[2].number, 2);
        assert_eq!(options[2].unit, Unit::Dpi);
        assert_eq!(
            *options[2].constraint,
            Constraint::Range {
                min: 75,
                max: 1200,
                quant: 25
            }
        );
    }

    #[test]
    fn test_unknown_constraint_tag() {
        let replies = Script::new()
            .words(&[1, 0])
            .string("x")
            .string("x")
            .string("")
            .words(&[1, 0, 4, 5, 9]);
        let (mut caller, _) = caller(replies);
        assert!(matches!(
            caller.get_option_descriptors(1),
            Err(Error::UnsupportedConstraint(9))
        ));
    }

    #[test]
    fn test_control_option_set_coerced() {
        let (mut caller, sent) = caller(control_reply(0, 1, 300, ""));
        let desc = int_option(2, Constraint::None);
        let mut reloaded = false;
        let value = caller
            .control_option(1, &desc, OptionCommand::Set(&OptionValue::Int(307)), &creds(), |_| {
                reloaded = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(value, OptionValue::Int(300));
        assert!(!reloaded);

        let expected = Script::new().words(&[5, 1, 2, 1, 1, 4, 1, 307]).into_bytes();
        assert_eq!(*sent.lock(), expected);
    }

    #[test]
    fn test_control_option_reload_flag() {
        let (mut caller, _) = caller(control_reply(0, 2, 150, ""));
        let desc = int_option(2, Constraint::None);
        let mut reloaded = false;
        caller
            .control_option(1, &desc, OptionCommand::Get, &creds(), |_| {
                reloaded = true;
                Ok(())
            })
            .unwrap();
        assert!(reloaded);
    }

    #[test]
    fn test_control_option_echo_mismatch() {
        let replies = Script::new().words(&[0, 0, 1, 8, 1, 300]).string("");
        let (mut caller, _) = caller(replies);
        let desc = int_option(2, Constraint::None);
        let err = caller
            .control_option(1, &desc, OptionCommand::Get, &creds(), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_control_option_challenge_retry() {
        let replies = control_reply(0, 0, 0, "resource")
            .word(0)
            .then(control_reply(0, 0, 600, ""));
        let (mut caller, _) = caller(replies);
        let desc = int_option(2, Constraint::None);
        let value = caller
            .control_option(1, &desc, OptionCommand::Get, &creds(), |_| Ok(()))
            .unwrap();
        assert_eq!(value, OptionValue::Int(600));
    }

    #[test]
    fn test_control_option_string_request() {
        let replies = Script::new()
            .words(&[0, 0, 3, 4])
            .string("Gray")
            .string("");
        let (mut caller, sent) = caller(replies);
        let mut desc = int_option(1, Constraint::None);
        desc.value_type = ValueType::String;
        desc.size = 32;
        let value = caller
            .control_option(
                1,
                &desc,
                OptionCommand::Set(&OptionValue::String("Gray".into())),
                &creds(),
                |_| Ok(()),
            )
            .unwrap();
        assert_eq!(value, OptionValue::String("Gray".into()));

        let expected = Script::new().words(&[5, 1, 1, 1, 3, 4]).slot("Gray").into_bytes();
        assert_eq!(*sent.lock(), expected);
    }

    #[test]
    fn test_control_option_automatic_fixed() {
        let replies = Script::new()
            .words(&[0, 0, 2, 4, 1, to_fixed(2.5)])
            .string("");
        let (mut caller, sent) = caller(replies);
        let mut desc = int_option(4, Constraint::None);
        desc.value_type = ValueType::Fixed;
        let value = caller
            .control_option(1, &desc, OptionCommand::Automatic, &creds(), |_| Ok(()))
            .unwrap();
        assert_eq!(value, OptionValue::Fixed(2.5));

        let expected = Script::new()
            .words(&[5, 1, 4, 2, 2, 4, 1, 65536])
            .into_bytes();
        assert_eq!(*sent.lock(), expected);
    }

    #[test]
    fn test_get_parameters_reads_all_words_before_status() {
        let replies = Script::new()
            .words(&[9, 0, 1, 100, 100, 10, 8])
            .word(0);
        let (mut caller, _) = caller(replies);
        let err = caller.get_parameters(1).unwrap_err();
        assert_eq!(err.sane_status(), Some(Status::IoError));
        // stream stays aligned for the next call
        caller.cancel(1).unwrap();
    }

    #[test]
    fn test_exit_marks_closed() {
        let (mut caller, sent) = caller(Script::new());
        caller.exit().unwrap();
        assert_eq!(*sent.lock(), Script::new().word(10).into_bytes());
        assert!(matches!(caller.get_devices(), Err(Error::ConnectionClosed)));
        assert_eq!(sent.lock().len(), 4);
    }

    #[test]
    fn test_three_frame_concatenation() {
        let replies = parameters_reply(0, false, 4, 4, 1)
            .then(start_reply(7000, ""))
            .then(parameters_reply(0, false, 4, 4, 1))
            .then(start_reply(7001, ""))
            .then(parameters_reply(0, true, 4, 4, 1))
            .then(start_reply(7002, ""));
        let mock = MockTransport::new(replies)
            .with_data(Script::records(&[b"ab", b"cd"]))
            .with_data(Script::records(&[b"efgh"]))
            .with_data(Script::records(&[b"ij", b"kl"]));
        let ports = mock.ports_handle();
        let mut caller = ProcedureCaller::new(mock);

        let raw = caller.acquire(1, &creds(), &CancelToken::new()).unwrap();
        assert_eq!(&raw.data[..], b"abcdefghijkl");
        assert_eq!(raw.frames, 3);
        assert_eq!(raw.layout.lines, 3);
        assert_eq!(*ports.lock(), vec![7000, 7001, 7002]);

        let image = Image::assemble(raw.data, raw.layout, &ImageConfig::new()).unwrap();
        assert_eq!(image.height(), 3);
    }

    #[test]
    fn test_scan_unknown_line_count() {
        let replies = parameters_reply(0, true, 3, 3, -1).then(start_reply(7000, ""));
        let mock = MockTransport::new(replies).with_data(Script::records(&[b"abcdef", b"ghi"]));
        let mut caller = ProcedureCaller::new(mock);
        let image = caller
            .scan(1, &creds(), &CancelToken::new(), &ImageConfig::new())
            .unwrap();
        assert_eq!(image.height(), 3);
        assert_eq!(image.width(), 3);
    }

    #[test]
    fn test_scan_start_challenge_refetches_parameters() {
        let replies = parameters_reply(0, true, 2, 2, 1)
            .then(start_reply(0, "scanner$MD5$1234"))
            .word(0)
            .then(parameters_reply(0, true, 2, 2, 1))
            .then(start_reply(7000, ""));
        let mock = MockTransport::new(replies).with_data(Script::records(&[b"xy"]));
        let sent = mock.sent_handle();
        let mut caller = ProcedureCaller::new(mock);
        caller
            .scan(5, &creds(), &CancelToken::new(), &ImageConfig::new())
            .unwrap();

        let auth = answer_challenge("scanner$MD5$1234", "pw");
        let expected = Script::new()
            .words(&[6, 5, 7, 5, 9])
            .slot("scanner")
            .slot("bob")
            .slot(&auth.password)
            .words(&[6, 5, 7, 5])
            .into_bytes();
        assert_eq!(*sent.lock(), expected);
    }

    #[test]
    fn test_scan_cancelled_before_start() {
        let replies = parameters_reply(0, true, 2, 2, 1).word(0);
        let mock = MockTransport::new(replies);
        let sent = mock.sent_handle();
        let mut caller = ProcedureCaller::new(mock);
        let token = CancelToken::new();
        token.cancel();

        let err = caller.scan(5, &creds(), &token, &ImageConfig::new()).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(*sent.lock(), Script::new().words(&[6, 5, 8, 5]).into_bytes());
    }

    #[test]
    fn test_scan_cancel_preempts_blocked_read() {
        let replies = parameters_reply(0, true, 2, 2, 1)
            .then(start_reply(7000, ""))
            .word(0);
        let mock = MockTransport::new(replies).with_stalled_data();
        let sent = mock.sent_handle();
        let mut caller = ProcedureCaller::new(mock);
        let token = CancelToken::new();

        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(50));
                token.cancel();
            })
        };
        let err = caller.scan(5, &creds(), &token, &ImageConfig::new()).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, Error::Cancelled));
        let sent = sent.lock();
        assert_eq!(&sent[sent.len() - 8..], &Script::new().words(&[8, 5]).into_bytes()[..]);
    }

    #[test]
    fn test_scan_separate_planes_unsupported() {
        let replies = parameters_reply(2, false, 2, 2, 1)
            .then(start_reply(7000, ""))
            .word(0);
        let mut caller = ProcedureCaller::new(MockTransport::new(replies));
        let err = caller
            .scan(5, &creds(), &CancelToken::new(), &ImageConfig::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFrameFormat(FrameFormat::Red)));
    }
}
