//! The transform framework.
//!
//! A [`Transform`] consumes commands one at a time and writes zero or more commands to the
//! next stage through a [`Writer`]. A [`Transformer`] chains transforms: the output of each
//! transform is the input of the next one, and the output of the last one reaches a
//! [`ReplayWriter`], which applies it to the [`GlobalState`] and encodes it.
//!
//! Every stage of a chain sees the same state. Because the state is only changed when a command
//! reaches the end of the chain, a transform that writes a command can rely on its effects as
//! soon as the write returns. This is how a transform creates an object and then refers to it
//! in the commands that follow.
//!
//! # Errors
//!
//! A command that can't be applied to the state is dropped rather than forwarded, so that later
//! stages only ever see commands that applied cleanly. [`TransformError::is_recoverable`] tells
//! which errors are handled this way. Errors that concern a single request are delivered
//! through the [`Promise`] of that request instead.
//!
//! [`ReplayWriter`]: crate::replay::ReplayWriter

pub use self::promise::{channel, Promise, Receiver};
use crate::{
    alloc::AllocError,
    command::{Cmd, CmdId},
    memory::MemoryPropertyFlags,
    replay::{ReplayBuilder, ReplayError, ReplayWriter},
    shader::ShaderError,
    state::{GlobalState, MutateError},
    sub_cmd_idx::SubCmdIdx,
    Handle,
};
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    io,
    sync::Arc,
};

pub mod promise;

/// The downstream end of a transform.
pub trait Writer {
    /// Returns the state, as of the last command that reached the end of the chain.
    fn state(&self) -> &GlobalState;

    /// Returns the state mutably. Object tables must only be changed by writing commands; this
    /// is meant for bookkeeping outside of them, such as the host memory model.
    fn state_mut(&mut self) -> &mut GlobalState;

    /// Passes a command on to the next stage. Once this returns successfully, the command has
    /// been applied to the state.
    fn mutate_and_write(&mut self, id: CmdId, cmd: Cmd) -> Result<(), TransformError>;

    /// Passes on a command synthesized by a transform.
    #[inline]
    fn write(&mut self, cmd: Cmd) -> Result<(), TransformError> {
        self.mutate_and_write(CmdId::DERIVED, cmd)
    }
}

/// A stage of a transform chain.
pub trait Transform {
    /// Returns the name of the transform, used in log messages.
    fn name(&self) -> &'static str;

    /// Processes one command. To forward the command unchanged, write it to `out` with the same
    /// `id`.
    fn transform(&mut self, id: CmdId, cmd: Cmd, out: &mut dyn Writer)
        -> Result<(), TransformError>;

    /// Called once after the last command, to write trailing commands and report requests that
    /// could not be served.
    #[inline]
    fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        let _ = out;

        Ok(())
    }
}

/// A writer that passes commands through the remaining stages of a chain.
pub struct ChainWriter<'a, 's> {
    transforms: &'a mut [Box<dyn Transform>],
    sink: &'a mut (dyn Writer + 's),
}

impl<'a, 's> ChainWriter<'a, 's> {
    #[inline]
    pub fn new(transforms: &'a mut [Box<dyn Transform>], sink: &'a mut (dyn Writer + 's)) -> Self {
        ChainWriter { transforms, sink }
    }
}

impl Writer for ChainWriter<'_, '_> {
    #[inline]
    fn state(&self) -> &GlobalState {
        self.sink.state()
    }

    #[inline]
    fn state_mut(&mut self) -> &mut GlobalState {
        self.sink.state_mut()
    }

    fn mutate_and_write(&mut self, id: CmdId, cmd: Cmd) -> Result<(), TransformError> {
        match self.transforms.split_first_mut() {
            Some((first, rest)) => first.transform(
                id,
                cmd,
                &mut ChainWriter {
                    transforms: rest,
                    sink: &mut *self.sink,
                },
            ),
            None => self.sink.mutate_and_write(id, cmd),
        }
    }
}

/// Drives commands through a chain of transforms into a [`ReplayWriter`].
pub struct Transformer<B> {
    transforms: Vec<Box<dyn Transform>>,
    sink: ReplayWriter<B>,
}

impl<B: ReplayBuilder> Transformer<B> {
    /// Creates a chain without any transforms, starting from `state`.
    #[inline]
    pub fn new(state: GlobalState, builder: B) -> Self {
        Transformer {
            transforms: Vec::new(),
            sink: ReplayWriter::new(state, builder),
        }
    }

    /// Appends a transform to the chain.
    #[inline]
    pub fn add(&mut self, transform: impl Transform + 'static) -> &mut Self {
        self.transforms.push(Box::new(transform));
        self
    }

    #[inline]
    pub fn state(&self) -> &GlobalState {
        self.sink.state()
    }

    #[inline]
    pub fn state_mut(&mut self) -> &mut GlobalState {
        self.sink.state_mut()
    }

    #[inline]
    pub fn builder(&self) -> &B {
        self.sink.builder()
    }

    #[inline]
    pub fn builder_mut(&mut self) -> &mut B {
        self.sink.builder_mut()
    }

    /// Drives one input command through the chain.
    ///
    /// If the command or any command derived from it can't be applied to the state, the
    /// error is logged and the rest of the derived work is dropped. Other errors are returned.
    pub fn transform(&mut self, id: CmdId, cmd: Cmd) -> Result<(), TransformError> {
        let name = cmd.name();

        match ChainWriter::new(&mut self.transforms, &mut self.sink).mutate_and_write(id, cmd) {
            Err(err) if err.is_recoverable() => {
                log::warn!("dropping {name} (command {id}): {err}");

                Ok(())
            }
            result => result,
        }
    }

    /// Drives every command of `cmds` through the chain, numbering them from `first_id`.
    pub fn transform_all(
        &mut self,
        first_id: u64,
        cmds: impl IntoIterator<Item = Cmd>,
    ) -> Result<(), TransformError> {
        for (index, cmd) in cmds.into_iter().enumerate() {
            self.transform(CmdId(first_id + index as u64), cmd)?;
        }

        Ok(())
    }

    /// Flushes every transform, in chain order. What a transform writes when it is flushed
    /// passes through the later transforms before they are flushed themselves.
    ///
    /// Every transform is flushed even if an earlier one fails. The errors are returned
    /// together.
    pub fn flush(&mut self) -> Result<(), Vec<TransformError>> {
        let mut errors = Vec::new();

        for index in 0..self.transforms.len() {
            let (head, rest) = self.transforms.split_at_mut(index + 1);
            let transform = &mut head[index];
            let name = transform.name();

            if let Err(err) = transform.flush(&mut ChainWriter::new(rest, &mut self.sink)) {
                log::error!("flushing {name} failed: {err}");
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Flushes the chain and returns the final state and the builder.
    pub fn finish(mut self) -> Result<(GlobalState, B), Vec<TransformError>> {
        self.flush()?;

        Ok(self.sink.into_parts())
    }
}

/// Error that can happen in a transform chain.
#[derive(Debug)]
pub enum TransformError {
    /// A command could not be applied to the state.
    Mutate { id: CmdId, error: MutateError },

    /// The replay target could not accept a command.
    Replay(ReplayError),

    /// Scratch memory for a synthesized command could not be allocated.
    Alloc(AllocError),

    /// A shader needed by a synthesized pipeline is not available.
    Shader(ShaderError),

    /// An object that a rewritten command refers to is not tracked.
    MissingObject {
        type_name: &'static str,
        handle: u64,
    },

    /// The device has no memory type with the required properties.
    NoSuitableMemoryType(MemoryPropertyFlags),

    /// Writing the capture log failed.
    Io(io::Error),

    /// Serializing a command for the capture log failed.
    Serialize(serde_json::Error),

    /// Commands that were requested to be split were never seen.
    RequestedCommandsNotFound(Vec<SubCmdIdx>),
}

impl TransformError {
    pub(crate) fn missing<H: Handle>(handle: H) -> Self {
        TransformError::MissingObject {
            type_name: H::TYPE_NAME,
            handle: handle.as_raw(),
        }
    }

    /// Returns whether the error only concerns the command being processed, which is dropped,
    /// while the chain carries on.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Mutate { .. } | Self::MissingObject { .. })
    }
}

impl Error for TransformError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Mutate { error, .. } => Some(error),
            Self::Replay(err) => Some(err),
            Self::Alloc(err) => Some(err),
            Self::Shader(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Serialize(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for TransformError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Mutate { id, .. } => write!(f, "command {id} could not be applied to the state"),
            Self::Replay(_) => write!(f, "the replay target could not accept a command"),
            Self::Alloc(_) => write!(f, "scratch memory could not be allocated"),
            Self::Shader(_) => write!(f, "a builtin shader is not available"),
            Self::MissingObject { type_name, handle } => {
                write!(f, "cannot find {type_name} {handle:#x}")
            }
            Self::NoSuitableMemoryType(property_flags) => write!(
                f,
                "the device has no memory type with the properties {property_flags:?}",
            ),
            Self::Io(_) => write!(f, "writing the capture log failed"),
            Self::Serialize(_) => write!(f, "a command could not be serialized"),
            Self::RequestedCommandsNotFound(idxs) => {
                write!(f, "the requested commands were not found:")?;

                for idx in idxs {
                    write!(f, " {idx}")?;
                }

                Ok(())
            }
        }
    }
}

impl From<MutateError> for TransformError {
    #[inline]
    fn from(error: MutateError) -> Self {
        // Only reached for commands that a transform synthesizes.
        Self::Mutate {
            id: CmdId::DERIVED,
            error,
        }
    }
}

impl From<ReplayError> for TransformError {
    #[inline]
    fn from(err: ReplayError) -> Self {
        Self::Replay(err)
    }
}

impl From<AllocError> for TransformError {
    #[inline]
    fn from(err: AllocError) -> Self {
        Self::Alloc(err)
    }
}

impl From<ShaderError> for TransformError {
    #[inline]
    fn from(err: ShaderError) -> Self {
        Self::Shader(err)
    }
}

impl From<io::Error> for TransformError {
    #[inline]
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for TransformError {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err)
    }
}

/// Error delivered to the [`Promise`] of a request that could not be served.
#[derive(Clone, Debug)]
pub enum RequestError {
    /// There is no render pass at the requested command.
    NoRenderPass,

    /// An attachment of the framebuffer was destroyed before the requested command.
    AttachmentDestroyed,

    /// The framebuffer has no attachment of the requested kind.
    InvalidAttachment { index: Option<u32> },

    /// A command buffer involved in the request has not completed recording.
    CommandBufferNotRecorded,

    /// The request needs a graphics queue, but the command is submitted to a queue without
    /// graphics capability.
    NotGraphicsQueue,

    /// The device supports none of the combined depth/stencil formats.
    NoDepthStencilFormat,

    /// A pipeline of the render pass already uses the stencil test.
    StencilInUse,

    /// The attachment is multisampled, which the request doesn't support.
    Multisampled,

    /// The requested command was never seen.
    CommandNotFound(SubCmdIdx),

    /// The requested command is not part of a queue submission.
    NoQueueSubmit(SubCmdIdx),

    /// The commands serving the request were recorded, but the submission that would have
    /// executed them could not be applied.
    NotSubmitted,

    /// The commands serving the request could not be written. Shared between the requests
    /// that the same commands serve.
    Transform(Arc<TransformError>),

    /// The replay target could not send back the result.
    Replay(ReplayError),

    /// The request was dropped without being served.
    Abandoned,
}

impl Error for RequestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transform(err) => Some(err.as_ref()),
            Self::Replay(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::NoRenderPass => write!(f, "there is no render pass at the requested command"),
            Self::AttachmentDestroyed => write!(f, "the attachment has been destroyed"),
            Self::InvalidAttachment { index: Some(index) } => {
                write!(f, "the framebuffer has no color attachment {index}")
            }
            Self::InvalidAttachment { index: None } => {
                write!(f, "the framebuffer has no depth attachment")
            }
            Self::CommandBufferNotRecorded => {
                write!(f, "the command buffer has not completed recording")
            }
            Self::NotGraphicsQueue => write!(
                f,
                "the queue has no graphics capability, so only same-size, single-sample color \
                reads are supported",
            ),
            Self::NoDepthStencilFormat => {
                write!(f, "the device supports no combined depth/stencil format")
            }
            Self::StencilInUse => write!(f, "the stencil buffer is already in use"),
            Self::Multisampled => write!(f, "multisampled attachments are not supported"),
            Self::CommandNotFound(idx) => write!(f, "command {idx} was not found"),
            Self::NoQueueSubmit(idx) => write!(f, "command {idx} is not part of a queue submit"),
            Self::NotSubmitted => {
                write!(f, "the commands serving the request were never submitted")
            }
            Self::Transform(_) => write!(f, "the commands serving the request failed"),
            Self::Replay(_) => write!(f, "the replay target did not send back the result"),
            Self::Abandoned => write!(f, "the request was dropped"),
        }
    }
}

impl From<TransformError> for RequestError {
    #[inline]
    fn from(err: TransformError) -> Self {
        Self::Transform(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::{Transform, TransformError, Transformer, Writer};
    use crate::{
        command::{Cmd, CmdId},
        device::Device,
        replay::CommandRecorder,
        state::GlobalState,
    };

    /// Duplicates every `DeviceWaitIdle`, and writes one more at flush.
    struct Doubler;

    impl Transform for Doubler {
        fn name(&self) -> &'static str {
            "doubler"
        }

        fn transform(
            &mut self,
            id: CmdId,
            cmd: Cmd,
            out: &mut dyn Writer,
        ) -> Result<(), TransformError> {
            if let Cmd::DeviceWaitIdle { device } = cmd {
                out.write(Cmd::DeviceWaitIdle { device })?;
            }

            out.mutate_and_write(id, cmd)
        }

        fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
            let device = *out.state().devices.keys().next().unwrap();

            out.write(Cmd::DeviceWaitIdle { device })
        }
    }

    /// Counts what reaches it, including the output of earlier flushes.
    struct Counter(usize);

    impl Transform for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn transform(
            &mut self,
            id: CmdId,
            cmd: Cmd,
            out: &mut dyn Writer,
        ) -> Result<(), TransformError> {
            self.0 += 1;
            out.mutate_and_write(id, cmd)
        }

        fn flush(&mut self, _out: &mut dyn Writer) -> Result<(), TransformError> {
            assert_eq!(self.0, 7);

            Ok(())
        }
    }

    #[test]
    fn chain_order() {
        let device = Device::from_raw(1);
        let mut transformer = Transformer::new(GlobalState::new(), CommandRecorder::new());
        transformer.add(Doubler).add(Counter(0));

        transformer
            .transform_all(
                0,
                [
                    Cmd::CreateDevice {
                        create_info: Default::default(),
                        device,
                    },
                    Cmd::DeviceWaitIdle { device },
                    // Not applicable, dropped.
                    Cmd::DestroyDevice {
                        device: Device::from_raw(9),
                    },
                    Cmd::DeviceWaitIdle { device },
                ],
            )
            .unwrap();
        transformer.flush().unwrap();

        let ids: Vec<_> = transformer
            .builder()
            .commands()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(
            ids,
            [
                CmdId(0),
                CmdId::DERIVED,
                CmdId(1),
                CmdId::DERIVED,
                CmdId(3),
                CmdId::DERIVED,
            ],
        );
    }
}
