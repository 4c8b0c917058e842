//! The end of a transform chain.
//!
//! A [`ReplayWriter`] applies every command that reaches it to the [`GlobalState`], then hands
//! it to a [`ReplayBuilder`], which encodes it for the replay target. The wire encoding is up to
//! the builder. [`CommandRecorder`] is a builder that keeps the commands in memory, and answers
//! posts from a callback, which is how the transforms are tested.

use crate::{
    command::{Cmd, CmdId, PostCommand},
    state::GlobalState,
    transform::{RequestError, TransformError, Writer},
    DeviceSize,
};
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

/// Encodes commands for a replay target.
pub trait ReplayBuilder {
    /// Encodes a command. `state` already reflects the effects of the command.
    fn encode(&mut self, id: CmdId, cmd: &Cmd, state: &GlobalState) -> Result<(), ReplayError>;

    /// Asks the replay target to send back host memory once it has executed every command
    /// encoded so far. The handler of `post` must eventually be fulfilled.
    fn post(&mut self, post: PostCommand) -> Result<(), ReplayError>;
}

/// The writer at the end of a transform chain.
#[derive(Debug)]
pub struct ReplayWriter<B> {
    state: GlobalState,
    builder: B,
}

impl<B: ReplayBuilder> ReplayWriter<B> {
    #[inline]
    pub fn new(state: GlobalState, builder: B) -> Self {
        ReplayWriter { state, builder }
    }

    #[inline]
    pub fn builder(&self) -> &B {
        &self.builder
    }

    #[inline]
    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    /// Returns the state and the builder.
    #[inline]
    pub fn into_parts(self) -> (GlobalState, B) {
        (self.state, self.builder)
    }
}

impl<B: ReplayBuilder> Writer for ReplayWriter<B> {
    #[inline]
    fn state(&self) -> &GlobalState {
        &self.state
    }

    #[inline]
    fn state_mut(&mut self) -> &mut GlobalState {
        &mut self.state
    }

    fn mutate_and_write(&mut self, id: CmdId, cmd: Cmd) -> Result<(), TransformError> {
        match cmd {
            Cmd::Insertion(insertion) => {
                log::trace!("dropping insertion point {}", insertion.idx);

                Ok(())
            }
            Cmd::Post(post) => self.builder.post(post).map_err(TransformError::Replay),
            cmd => {
                cmd.mutate(&mut self.state)
                    .map_err(|error| TransformError::Mutate { id, error })?;

                self.builder
                    .encode(id, &cmd, &self.state)
                    .map_err(TransformError::Replay)
            }
        }
    }
}

/// A [`ReplayBuilder`] that keeps every command in memory.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    commands: Vec<(CmdId, Cmd)>,
    posts: Vec<PostCommand>,
}

impl CommandRecorder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the commands encoded so far.
    #[inline]
    pub fn commands(&self) -> &[(CmdId, Cmd)] {
        &self.commands
    }

    /// Returns the posts that have not been delivered yet.
    #[inline]
    pub fn pending_posts(&self) -> &[PostCommand] {
        &self.posts
    }

    /// Answers every pending post with the data returned by `read`, in the order they were
    /// made.
    pub fn deliver_posts(
        &mut self,
        mut read: impl FnMut(&PostCommand) -> Result<Vec<u8>, ReplayError>,
    ) {
        for post in std::mem::take(&mut self.posts) {
            let result = read(&post).map_err(RequestError::Replay);
            post.handler.fulfill(result);
        }
    }
}

impl ReplayBuilder for CommandRecorder {
    fn encode(&mut self, id: CmdId, cmd: &Cmd, _state: &GlobalState) -> Result<(), ReplayError> {
        self.commands.push((id, cmd.clone()));

        Ok(())
    }

    fn post(&mut self, post: PostCommand) -> Result<(), ReplayError> {
        self.posts.push(post);

        Ok(())
    }
}

/// Error that can happen when talking to a replay target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayError {
    /// The connection to the replay target was lost.
    Disconnected,

    /// The replay target rejected a command.
    Rejected {
        command: &'static str,
        reason: String,
    },

    /// The replay target could not read back the requested host memory.
    HostMemoryUnavailable { address: u64, size: DeviceSize },
}

impl Error for ReplayError {}

impl Display for ReplayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Disconnected => write!(f, "the connection to the replay target was lost"),
            Self::Rejected { command, reason } => {
                write!(f, "the replay target rejected {command}: {reason}")
            }
            Self::HostMemoryUnavailable { address, size } => write!(
                f,
                "the replay target could not read {size} bytes of host memory at {address:#x}",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandRecorder, ReplayError, ReplayWriter};
    use crate::{
        command::{Cmd, CmdId, InsertionCommand, PostCommand},
        device::Device,
        state::{GlobalState, MutateError},
        transform::{promise, RequestError, TransformError, Writer},
    };

    #[test]
    fn mutates_before_encoding() {
        let mut writer = ReplayWriter::new(GlobalState::new(), CommandRecorder::new());
        let device = Device::from_raw(1);

        writer
            .mutate_and_write(
                CmdId(0),
                Cmd::CreateDevice {
                    create_info: Default::default(),
                    device,
                },
            )
            .unwrap();
        assert!(writer.state().devices.contains(&device));

        let error = writer
            .mutate_and_write(CmdId(1), Cmd::DeviceWaitIdle {
                device: Device::from_raw(2),
            })
            .unwrap_err();
        assert!(matches!(
            error,
            TransformError::Mutate {
                id: CmdId(1),
                error: MutateError::UnknownHandle { .. },
            },
        ));
        assert!(error.is_recoverable());

        writer
            .write(Cmd::Insertion(InsertionCommand {
                idx: [0].into(),
                command_buffer: None,
                pending_command_buffers: Vec::new(),
                queue: Default::default(),
            }))
            .unwrap();
        assert_eq!(writer.builder().commands().len(), 1);
    }

    #[test]
    fn posts_are_answered() {
        let mut writer = ReplayWriter::new(GlobalState::new(), CommandRecorder::new());
        let (first, first_receiver) = promise::channel();
        let (second, second_receiver) = promise::channel();

        for handler in [first, second] {
            writer
                .write(Cmd::Post(PostCommand {
                    address: 0x1000,
                    size: 4,
                    handler,
                }))
                .unwrap();
        }

        let mut calls = 0;
        writer.builder_mut().deliver_posts(|post| {
            calls += 1;

            if calls == 1 {
                Ok(vec![0; post.size as usize])
            } else {
                Err(ReplayError::Disconnected)
            }
        });

        assert_eq!(first_receiver.try_recv().unwrap().unwrap(), [0; 4]);
        assert!(matches!(
            second_receiver.try_recv(),
            Some(Err(RequestError::Replay(ReplayError::Disconnected))),
        ));
        assert!(writer.builder().pending_posts().is_empty());
    }
}
