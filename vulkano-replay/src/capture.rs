//! Captures, and the JSON-lines log they are persisted as.
//!
//! A capture log is a text file with one JSON value per line. The first line is a
//! [`LogRecord::Header`]. It may be followed by a [`LogRecord::InitialState`] snapshot of the
//! state the commands start from, and then by one [`LogRecord::Command`] per command, in stream
//! order. The [`CaptureLogger`] transform writes such logs; [`Capture::read`] loads them.
//!
//! [`CaptureLogger`]: crate::transforms::capture_logger::CaptureLogger

use crate::{
    command::{Cmd, CmdId},
    state::GlobalState,
};
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    io::{self, BufRead},
};

/// The version of the log format written by this crate.
pub const CAPTURE_LOG_VERSION: u32 = 1;

/// Describes where a capture comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureHeader {
    /// The version of the log format.
    pub version: u32,

    /// The name of the application that was captured.
    pub application_name: String,
}

impl Default for CaptureHeader {
    #[inline]
    fn default() -> Self {
        Self {
            version: CAPTURE_LOG_VERSION,
            application_name: String::new(),
        }
    }
}

/// One line of a capture log.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRecord {
    Header(CaptureHeader),
    InitialState(Box<GlobalState>),
    Command { id: CmdId, cmd: Cmd },
}

/// A captured command stream.
///
/// The position of a command in `commands` is its [`CmdId`].
#[derive(Clone, Debug, Default)]
pub struct Capture {
    pub header: CaptureHeader,

    /// The state that the first command executes in, if it was captured.
    pub initial_state: Option<GlobalState>,

    pub commands: Vec<Cmd>,
}

impl Capture {
    /// Reads a capture log.
    ///
    /// The commands of the log are renumbered in the order they appear: a log that was written
    /// from the middle of a stream is loaded as a capture starting at command 0.
    pub fn read(reader: impl BufRead) -> Result<Self, CaptureError> {
        let mut header = None;
        let mut initial_state = None;
        let mut commands = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(CaptureError::Io)?;

            if line.trim().is_empty() {
                continue;
            }

            let record: LogRecord =
                serde_json::from_str(&line).map_err(|error| CaptureError::Parse {
                    line: index + 1,
                    error,
                })?;

            match record {
                LogRecord::Header(h) if header.is_none() => header = Some(h),
                LogRecord::Header(_) => {
                    log::warn!("ignoring a second header at line {}", index + 1);
                }
                _ if header.is_none() => return Err(CaptureError::MissingHeader),
                LogRecord::InitialState(state) => initial_state = Some(*state),
                LogRecord::Command { cmd, .. } => commands.push(cmd),
            }
        }

        Ok(Capture {
            header: header.ok_or(CaptureError::MissingHeader)?,
            initial_state,
            commands,
        })
    }

    /// Returns the command with the given id.
    #[inline]
    pub fn command(&self, id: CmdId) -> Option<&Cmd> {
        usize::try_from(id.0)
            .ok()
            .and_then(|index| self.commands.get(index))
    }
}

/// Error that can happen when reading a capture log.
#[derive(Debug)]
pub enum CaptureError {
    /// Reading the log failed.
    Io(io::Error),

    /// A line of the log is not a valid record.
    Parse {
        line: usize,
        error: serde_json::Error,
    },

    /// The log doesn't start with a header.
    MissingHeader,
}

impl Error for CaptureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse { error, .. } => Some(error),
            Self::MissingHeader => None,
        }
    }
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Io(_) => write!(f, "reading the capture log failed"),
            Self::Parse { line, .. } => write!(f, "line {line} of the capture log is invalid"),
            Self::MissingHeader => write!(f, "the capture log doesn't start with a header"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Capture, CaptureError};
    use crate::command::Cmd;

    #[test]
    fn header_comes_first() {
        let log = concat!(
            r#"{"command":{"id":0,"cmd":{"DeviceWaitIdle":{"device":1}}}}"#,
            "\n",
        );

        assert!(matches!(
            Capture::read(log.as_bytes()),
            Err(CaptureError::MissingHeader),
        ));
        assert!(matches!(
            Capture::read(&b""[..]),
            Err(CaptureError::MissingHeader),
        ));
    }

    #[test]
    fn commands_are_renumbered() {
        let log = concat!(
            r#"{"header":{"version":1,"application_name":"triangle"}}"#,
            "\n",
            "\n",
            r#"{"command":{"id":41,"cmd":{"DeviceWaitIdle":{"device":1}}}}"#,
            "\n",
            r#"{"command":{"id":42,"cmd":{"QueueWaitIdle":{"queue":2}}}}"#,
            "\n",
        );

        let capture = Capture::read(log.as_bytes()).unwrap();
        assert_eq!(capture.header.application_name, "triangle");
        assert!(capture.initial_state.is_none());
        assert_eq!(capture.commands.len(), 2);
        assert!(matches!(
            capture.command(crate::command::CmdId(1)),
            Some(Cmd::QueueWaitIdle { .. }),
        ));
    }

    #[test]
    fn parse_errors_name_the_line() {
        let log = concat!(
            r#"{"header":{"version":1,"application_name":""}}"#,
            "\n",
            "{not json}\n",
        );

        assert!(matches!(
            Capture::read(log.as_bytes()),
            Err(CaptureError::Parse { line: 2, .. }),
        ));
    }
}
