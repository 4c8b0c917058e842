//! Writing a command stream to a capture log.

use crate::{
    capture::CaptureHeader,
    command::{Cmd, CmdId},
    state::GlobalState,
    transform::{Transform, TransformError, Writer},
    NonExhaustive,
};
use serde::Serialize;
use std::io::Write;

/// Parameters to create a new `CaptureLogger`.
#[derive(Clone, Debug)]
pub struct CaptureLoggerCreateInfo {
    /// The header written on the first line of the log.
    ///
    /// The default value is a header of the current log format, with an empty application
    /// name.
    pub header: CaptureHeader,

    /// Whether to write a snapshot of the state that the first logged command executes in.
    ///
    /// Without it, the log can only be loaded into a state that already matches the one the
    /// stream started from.
    ///
    /// The default value is `false`.
    pub initial_state: bool,

    pub _ne: NonExhaustive,
}

impl Default for CaptureLoggerCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            header: CaptureHeader::default(),
            initial_state: false,
            _ne: NonExhaustive(()),
        }
    }
}

/// The serialized form of a [`LogRecord`](crate::capture::LogRecord), borrowing what it writes.
#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum LogRecordRef<'a> {
    Header(&'a CaptureHeader),
    InitialState(&'a GlobalState),
    Command { id: CmdId, cmd: &'a Cmd },
}

/// A transform that forwards every command unchanged, and writes the ones that the state
/// accepts to a JSON-lines capture log.
///
/// The log is written to `W` one line at a time. Wrap unbuffered writers such as files in a
/// [`BufWriter`](std::io::BufWriter); the logger flushes `W` when it is flushed itself.
/// Commands that only exist inside a transform chain, insertion points and host memory
/// requests, are not logged.
#[derive(Debug)]
pub struct CaptureLogger<W> {
    writer: W,
    header: Option<CaptureHeader>,
    initial_state: bool,
    lines: u64,
}

impl<W: Write> CaptureLogger<W> {
    pub fn new(writer: W, create_info: CaptureLoggerCreateInfo) -> Self {
        let CaptureLoggerCreateInfo {
            header,
            initial_state,
            _ne: _,
        } = create_info;

        CaptureLogger {
            writer,
            header: Some(header),
            initial_state,
            lines: 0,
        }
    }

    /// Returns the number of lines written so far.
    #[inline]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Returns the writer the log is written to.
    #[inline]
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, record: &LogRecordRef<'_>) -> Result<(), TransformError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;

        Ok(())
    }

    /// Writes the header and the initial state, if they haven't been written yet.
    fn start(&mut self, state: &GlobalState) -> Result<(), TransformError> {
        let Some(header) = self.header.take() else {
            return Ok(());
        };

        self.write_line(&LogRecordRef::Header(&header))?;

        if self.initial_state {
            log::debug!("logging an initial state of {} images", state.images.len());
            self.write_line(&LogRecordRef::InitialState(state))?;
        }

        Ok(())
    }
}

impl<W: Write> Transform for CaptureLogger<W> {
    fn name(&self) -> &'static str {
        "capture logger"
    }

    fn transform(
        &mut self,
        id: CmdId,
        cmd: Cmd,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        self.start(out.state())?;

        if cmd.is_synthetic() {
            return out.mutate_and_write(id, cmd);
        }

        // Serialized before it is forwarded, since forwarding consumes it.
        let line = serde_json::to_vec(&LogRecordRef::Command { id, cmd: &cmd })?;
        out.mutate_and_write(id, cmd)?;

        self.writer.write_all(&line)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;

        Ok(())
    }

    fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        self.start(out.state())?;
        self.writer.flush()?;
        log::debug!("wrote {} lines of capture log", self.lines);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CaptureLogger, CaptureLoggerCreateInfo};
    use crate::{
        capture::{Capture, CaptureHeader, CAPTURE_LOG_VERSION},
        command::{Cmd, CmdId, InsertionCommand},
        sub_cmd_idx::SubCmdIdx,
        tests::TestScene,
    };
    use parking_lot::Mutex;
    use std::{io, sync::Arc};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);

            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn logs_forwarded_commands() {
        let mut scene = TestScene::new();
        let command_buffer = scene.record_single_subpass(2);
        let first_id = scene.next_id();
        let stream = [
            scene.submit_cmd(&[command_buffer]),
            Cmd::Insertion(InsertionCommand {
                idx: SubCmdIdx::from([first_id]),
                command_buffer: None,
                pending_command_buffers: Vec::new(),
                queue: scene.queue,
            }),
            Cmd::DeviceWaitIdle {
                device: scene.device,
            },
        ];

        let buffer = SharedBuffer::default();
        let mut transformer = scene.transformer();
        transformer.add(CaptureLogger::new(
            buffer.clone(),
            CaptureLoggerCreateInfo {
                header: CaptureHeader {
                    application_name: "triangle".to_owned(),
                    ..Default::default()
                },
                initial_state: true,
                ..Default::default()
            },
        ));
        transformer.transform_all(first_id, stream).unwrap();
        transformer.flush().unwrap();

        let log = buffer.0.lock().clone();
        assert_eq!(log.iter().filter(|&&byte| byte == b'\n').count(), 4);

        let capture = Capture::read(&log[..]).unwrap();
        assert_eq!(capture.header.version, CAPTURE_LOG_VERSION);
        assert_eq!(capture.header.application_name, "triangle");
        assert_eq!(capture.commands.len(), 2);
        assert!(matches!(capture.commands[0], Cmd::QueueSubmit { .. }));
        assert!(matches!(
            capture.command(CmdId(1)),
            Some(Cmd::DeviceWaitIdle { .. }),
        ));

        let initial_state = capture.initial_state.unwrap();
        assert_eq!(
            initial_state.command_buffers[command_buffer].commands,
            scene.state().command_buffers[command_buffer].commands,
        );
        assert!(initial_state.queues[scene.queue].last_draw_info.is_none());
    }

    #[test]
    fn empty_stream_still_has_a_header() {
        let scene = TestScene::new();
        let buffer = SharedBuffer::default();
        let mut transformer = scene.transformer();
        transformer.add(CaptureLogger::new(
            buffer.clone(),
            CaptureLoggerCreateInfo::default(),
        ));
        transformer.flush().unwrap();

        let log = buffer.0.lock().clone();
        let capture = Capture::read(&log[..]).unwrap();
        assert!(capture.initial_state.is_none());
        assert!(capture.commands.is_empty());
    }
}
