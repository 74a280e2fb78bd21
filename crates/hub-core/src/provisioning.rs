//! Provisioning data and the line protocol of the serial configuration portal.
//!
//! The portal speaks one command per line:
//!
//! ```text
//! ssid <network name>
//! password <passphrase>
//! name <device name>
//! show
//! save
//! cancel
//! ```

use heapless::{String, Vec};

pub const SSID_BYTES: usize = 32;
pub const PASSWORD_BYTES: usize = 64;
pub const DEVICE_NAME_BYTES: usize = 40;
pub const LINE_BYTES: usize = 128;

/// Settings collected by the configuration portal.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Provisioning {
    pub ssid: String<SSID_BYTES>,
    pub password: String<PASSWORD_BYTES>,
    pub device_name: String<DEVICE_NAME_BYTES>,
}

impl Provisioning {
    pub fn is_complete(&self) -> bool {
        !self.ssid.is_empty()
    }
}

/// Abstract provisioning persistence backend.
pub trait ProvisioningStore {
    type Error;

    fn load(&mut self) -> Result<Option<Provisioning>, Self::Error>;
    fn save(&mut self, provisioning: &Provisioning) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Field {
    Ssid,
    Password,
    DeviceName,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisioningError {
    UnknownKeyword,
    MissingValue,
    ValueTooLong,
    MissingSsid,
}

impl ProvisioningError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownKeyword => "unknown keyword",
            Self::MissingValue => "missing value",
            Self::ValueTooLong => "value too long",
            Self::MissingSsid => "ssid required before save",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineOutcome {
    Updated(Field),
    Show,
    Help,
    /// Draft is complete and should be persisted.
    Save,
    Cancel,
}

/// One portal session editing a draft of the provisioning data.
#[derive(Clone, Debug, Default)]
pub struct ProvisioningSession {
    draft: Provisioning,
}

impl ProvisioningSession {
    pub fn new(current: Provisioning) -> Self {
        Self { draft: current }
    }

    pub fn draft(&self) -> &Provisioning {
        &self.draft
    }

    pub fn into_draft(self) -> Provisioning {
        self.draft
    }

    pub fn apply_line(&mut self, line: &str) -> Result<LineOutcome, ProvisioningError> {
        let line = line.trim();
        let (keyword, value) = match line.split_once(' ') {
            Some((keyword, value)) => (keyword, value.trim()),
            None => (line, ""),
        };

        match keyword {
            "ssid" => {
                set_field(&mut self.draft.ssid, value)?;
                Ok(LineOutcome::Updated(Field::Ssid))
            }
            "password" => {
                // An open network has no passphrase.
                self.draft.password.clear();
                self.draft
                    .password
                    .push_str(value)
                    .map_err(|_| ProvisioningError::ValueTooLong)?;
                Ok(LineOutcome::Updated(Field::Password))
            }
            "name" => {
                set_field(&mut self.draft.device_name, value)?;
                Ok(LineOutcome::Updated(Field::DeviceName))
            }
            "show" => Ok(LineOutcome::Show),
            "help" | "?" => Ok(LineOutcome::Help),
            "save" => {
                if !self.draft.is_complete() {
                    return Err(ProvisioningError::MissingSsid);
                }
                Ok(LineOutcome::Save)
            }
            "cancel" | "exit" => Ok(LineOutcome::Cancel),
            _ => Err(ProvisioningError::UnknownKeyword),
        }
    }
}

fn set_field<const N: usize>(
    field: &mut String<N>,
    value: &str,
) -> Result<(), ProvisioningError> {
    if value.is_empty() {
        return Err(ProvisioningError::MissingValue);
    }
    if value.len() > N {
        return Err(ProvisioningError::ValueTooLong);
    }
    field.clear();
    field
        .push_str(value)
        .map_err(|_| ProvisioningError::ValueTooLong)
}

/// Assembles serial bytes into lines, dropping lines that overflow.
#[derive(Clone, Debug, Default)]
pub struct LineBuffer {
    bytes: Vec<u8, LINE_BYTES>,
    overflowed: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte; returns a finished non-empty line.
    pub fn push(&mut self, byte: u8) -> Option<String<LINE_BYTES>> {
        if byte == b'\n' || byte == b'\r' {
            let overflowed = core::mem::replace(&mut self.overflowed, false);
            let bytes = core::mem::take(&mut self.bytes);
            if overflowed || bytes.is_empty() {
                return None;
            }
            return String::from_utf8(bytes).ok();
        }

        if self.overflowed {
            return None;
        }
        if self.bytes.push(byte).is_err() {
            self.overflowed = true;
            self.bytes.clear();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buffer: &mut LineBuffer, bytes: &[u8]) -> std::vec::Vec<std::string::String> {
        bytes
            .iter()
            .filter_map(|b| buffer.push(*b))
            .map(|line| std::string::String::from(line.as_str()))
            .collect()
    }

    #[test]
    fn session_collects_fields_and_saves() {
        let mut session = ProvisioningSession::new(Provisioning::default());
        assert_eq!(
            session.apply_line("ssid Home Network"),
            Ok(LineOutcome::Updated(Field::Ssid))
        );
        assert_eq!(
            session.apply_line("password  secret pass "),
            Ok(LineOutcome::Updated(Field::Password))
        );
        assert_eq!(
            session.apply_line("name Garage Sensor"),
            Ok(LineOutcome::Updated(Field::DeviceName))
        );
        assert_eq!(session.apply_line("save"), Ok(LineOutcome::Save));

        let saved = session.into_draft();
        assert_eq!(saved.ssid.as_str(), "Home Network");
        assert_eq!(saved.password.as_str(), "secret pass");
        assert_eq!(saved.device_name.as_str(), "Garage Sensor");
    }

    #[test]
    fn save_requires_ssid() {
        let mut session = ProvisioningSession::new(Provisioning::default());
        assert_eq!(session.apply_line("save"), Err(ProvisioningError::MissingSsid));
    }

    #[test]
    fn rejects_unknown_and_oversized_input() {
        let mut session = ProvisioningSession::new(Provisioning::default());
        assert_eq!(
            session.apply_line("channel 6"),
            Err(ProvisioningError::UnknownKeyword)
        );
        assert_eq!(session.apply_line("ssid"), Err(ProvisioningError::MissingValue));
        let long = "x".repeat(SSID_BYTES + 1);
        assert_eq!(
            session.apply_line(&std::format!("ssid {long}")),
            Err(ProvisioningError::ValueTooLong)
        );
        assert!(session.draft().ssid.is_empty());
    }

    #[test]
    fn line_buffer_splits_on_cr_and_lf() {
        let mut buffer = LineBuffer::new();
        let lines = feed(&mut buffer, b"ssid a\r\nsave\n");
        assert_eq!(lines, ["ssid a", "save"]);
    }

    #[test]
    fn line_buffer_drops_overflowing_line() {
        let mut buffer = LineBuffer::new();
        let mut input = std::vec![b'a'; LINE_BYTES + 10];
        input.extend_from_slice(b"\nshow\n");
        let lines = feed(&mut buffer, &input);
        assert_eq!(lines, ["show"]);
    }
}
