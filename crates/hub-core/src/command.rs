//! Remote commands accepted on the command topic.

/// A parsed remote command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// `deepsleep <seconds>`; `0` keeps the device awake.
    SetSleepSeconds(u32),
    /// `restart` or `reboot`.
    Restart,
    /// `status`.
    Status,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandError {
    Empty,
    NotUtf8,
    Unknown,
    MissingArgument,
    InvalidNumber,
    TrailingInput,
    OutOfRange,
}

impl CommandError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::NotUtf8 => "not_utf8",
            Self::Unknown => "unknown_command",
            Self::MissingArgument => "missing_argument",
            Self::InvalidNumber => "invalid_number",
            Self::TrailingInput => "trailing_input",
            Self::OutOfRange => "out_of_range",
        }
    }
}

impl Command {
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        let text = core::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
        let mut words = text.split_ascii_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?;

        let command = if verb.eq_ignore_ascii_case("deepsleep") {
            let arg = words.next().ok_or(CommandError::MissingArgument)?;
            let seconds = arg
                .parse::<u32>()
                .map_err(|_| CommandError::InvalidNumber)?;
            Self::SetSleepSeconds(seconds)
        } else if verb.eq_ignore_ascii_case("restart") || verb.eq_ignore_ascii_case("reboot") {
            Self::Restart
        } else if verb.eq_ignore_ascii_case("status") {
            Self::Status
        } else {
            return Err(CommandError::Unknown);
        };

        if words.next().is_some() {
            return Err(CommandError::TrailingInput);
        }
        Ok(command)
    }
}

/// Accepts a requested sleep interval if it is within `0..=max_seconds`.
pub fn check_sleep_seconds(seconds: u32, max_seconds: u32) -> Result<u32, CommandError> {
    if seconds > max_seconds {
        return Err(CommandError::OutOfRange);
    }
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deepsleep_with_seconds() {
        assert_eq!(
            Command::parse(b"deepsleep 60"),
            Ok(Command::SetSleepSeconds(60))
        );
        assert_eq!(
            Command::parse(b"  DeepSleep   0\n"),
            Ok(Command::SetSleepSeconds(0))
        );
    }

    #[test]
    fn restart_has_an_alias() {
        assert_eq!(Command::parse(b"restart"), Ok(Command::Restart));
        assert_eq!(Command::parse(b"reboot"), Ok(Command::Restart));
        assert_eq!(Command::parse(b"status"), Ok(Command::Status));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(Command::parse(b""), Err(CommandError::Empty));
        assert_eq!(Command::parse(b"deepsleep"), Err(CommandError::MissingArgument));
        assert_eq!(Command::parse(b"deepsleep -5"), Err(CommandError::InvalidNumber));
        assert_eq!(Command::parse(b"deepsleep 10 20"), Err(CommandError::TrailingInput));
        assert_eq!(Command::parse(b"selfdestruct"), Err(CommandError::Unknown));
        assert_eq!(Command::parse(&[0xFF, 0xFE]), Err(CommandError::NotUtf8));
    }

    #[test]
    fn sleep_interval_bounds_are_inclusive() {
        assert_eq!(check_sleep_seconds(0, 3_600), Ok(0));
        assert_eq!(check_sleep_seconds(3_600, 3_600), Ok(3_600));
        assert_eq!(
            check_sleep_seconds(3_601, 3_600),
            Err(CommandError::OutOfRange)
        );
    }
}
