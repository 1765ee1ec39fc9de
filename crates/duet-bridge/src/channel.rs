//! File-backed stdio channels for one invocation.
//!
//! Each invocation gets three files named `<id>.stdin`, `<id>.stdout` and
//! `<id>.stderr` in the work directory, where `<id>` is random per
//! invocation. The input file is created exclusively and written once before
//! the sandbox starts; the sandbox appends to the other two. All handles are
//! owned here, so dropping [`Channels`] closes them and removes the files on
//! every exit path.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::decode::{decode, DecodedValue, StreamReadout};
use crate::error::{BridgeError, Result};

/// Which standard stream a channel stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Guest stdin, written by the host
    Input,
    /// Guest stdout
    Output,
    /// Guest stderr
    Error,
}

impl ChannelKind {
    fn suffix(self) -> &'static str {
        match self {
            ChannelKind::Input => ".stdin",
            ChannelKind::Output => ".stdout",
            ChannelKind::Error => ".stderr",
        }
    }
}

/// One ephemeral channel file.
#[derive(Debug)]
pub struct Channel {
    kind: ChannelKind,
    file: NamedTempFile,
}

impl Channel {
    fn create(dir: &Path, id: &str, kind: ChannelKind) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(id)
            .suffix(kind.suffix())
            .rand_bytes(0)
            .tempfile_in(dir)
            .map_err(|e| BridgeError::channel(format!("create {id}{}", kind.suffix()), e))?;
        Ok(Self { kind, file })
    }

    /// Stream this channel replaces.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Handle given to the sandbox. Input is read from the start; output and
    /// error are appended to.
    fn sandbox_handle(&self) -> Result<File> {
        let handle = match self.kind {
            ChannelKind::Input => self.file.reopen(),
            ChannelKind::Output | ChannelKind::Error => {
                OpenOptions::new().append(true).open(self.file.path())
            }
        };
        handle.map_err(|e| BridgeError::channel(format!("open {}", self.path().display()), e))
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        let context = || format!("read {}", self.path().display());
        let mut reader = self
            .file
            .reopen()
            .map_err(|e| BridgeError::channel(context(), e))?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| BridgeError::channel(context(), e))?;
        Ok(bytes)
    }

    fn close(self) -> Result<()> {
        let path = self.path().to_path_buf();
        self.file
            .close()
            .map_err(|e| BridgeError::channel(format!("remove {}", path.display()), e))
    }
}

/// Raw file handles wired into the sandbox's stdin, stdout and stderr.
#[derive(Debug)]
pub struct StdioHandles {
    /// Read handle over the input channel
    pub stdin: File,
    /// Append handle over the output channel
    pub stdout: File,
    /// Append handle over the error channel
    pub stderr: File,
}

/// The three channels of one invocation.
#[derive(Debug)]
pub struct Channels {
    id: String,
    input: Channel,
    output: Channel,
    error: Channel,
    input_written: bool,
}

impl Channels {
    /// Create three uniquely named channels under `work_dir`.
    pub fn open(work_dir: impl AsRef<Path>) -> Result<Self> {
        let id = format!("duet-{:032x}", rand::random::<u128>());
        Self::open_with_id(work_dir.as_ref(), id)
    }

    fn open_with_id(dir: &Path, id: String) -> Result<Self> {
        // A failure here drops the channels already created, which removes them.
        let input = Channel::create(dir, &id, ChannelKind::Input)?;
        let output = Channel::create(dir, &id, ChannelKind::Output)?;
        let error = Channel::create(dir, &id, ChannelKind::Error)?;
        tracing::debug!(%id, dir = %dir.display(), "opened channels");

        Ok(Self {
            id,
            input,
            output,
            error,
            input_written: false,
        })
    }

    /// Per-invocation identifier shared by the three file names.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Channel for the given stream.
    pub fn channel(&self, kind: ChannelKind) -> &Channel {
        match kind {
            ChannelKind::Input => &self.input,
            ChannelKind::Output => &self.output,
            ChannelKind::Error => &self.error,
        }
    }

    /// Paths of the input, output and error files.
    pub fn paths(&self) -> [PathBuf; 3] {
        [
            self.input.path().to_path_buf(),
            self.output.path().to_path_buf(),
            self.error.path().to_path_buf(),
        ]
    }

    /// Serialize `value` as compact JSON into the input channel and sync it.
    ///
    /// The input channel is write-once.
    pub fn write_input(&mut self, value: &Value) -> Result<()> {
        let path = self.input.path().display().to_string();
        let context = || format!("write {path}");
        if self.input_written {
            return Err(BridgeError::channel(
                context(),
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "input already written"),
            ));
        }

        let bytes = serde_json::to_vec(value).map_err(|e| BridgeError::channel(context(), e.into()))?;
        let file = self.input.file.as_file_mut();
        let written = file.write_all(&bytes).and_then(|()| file.sync_data());
        written.map_err(|e| BridgeError::channel(context(), e))?;

        self.input_written = true;
        tracing::debug!(id = %self.id, bytes = bytes.len(), "wrote input");
        Ok(())
    }

    /// Handles for the sandbox's stdio. Fails until the input is written.
    pub fn stdio(&self) -> Result<StdioHandles> {
        if !self.input_written {
            return Err(BridgeError::channel(
                format!("open {}", self.input.path().display()),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "input must be written before the sandbox starts",
                ),
            ));
        }

        Ok(StdioHandles {
            stdin: self.input.sandbox_handle()?,
            stdout: self.output.sandbox_handle()?,
            stderr: self.error.sandbox_handle()?,
        })
    }

    /// Decode the output channel.
    pub fn read_output(&self) -> Result<DecodedValue> {
        Ok(decode(&self.output.read_all()?))
    }

    /// Decode the error channel.
    pub fn read_error(&self) -> Result<DecodedValue> {
        Ok(decode(&self.error.read_all()?))
    }

    /// Read and decode both output channels.
    pub fn readout(&self) -> Result<StreamReadout> {
        let output = self.read_output()?;
        let error = self.read_error()?;
        Ok(StreamReadout::new(output, error))
    }

    /// Close all handles and remove the files.
    ///
    /// Every channel is closed even if an earlier one fails; the first
    /// failure is returned.
    pub fn release(self) -> Result<()> {
        let Channels {
            id,
            input,
            output,
            error,
            ..
        } = self;

        let mut first_err = None;
        for channel in [input, output, error] {
            if let Err(e) = channel.close() {
                tracing::warn!(%id, "channel release failed: {}", e);
                first_err.get_or_insert(e);
            }
        }
        tracing::debug!(%id, "released channels");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).expect("read_dir").count()
    }

    #[test]
    fn test_open_creates_three_named_files() {
        let dir = tempfile::tempdir().unwrap();
        let channels = Channels::open(dir.path()).unwrap();

        assert_eq!(entries(dir.path()), 3);
        let [input, output, error] = channels.paths();
        let id = channels.id();
        assert_eq!(input.file_name().unwrap().to_str().unwrap(), format!("{id}.stdin"));
        assert_eq!(output.file_name().unwrap().to_str().unwrap(), format!("{id}.stdout"));
        assert_eq!(error.file_name().unwrap().to_str().unwrap(), format!("{id}.stderr"));
    }

    #[test]
    fn test_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = Channels::open(dir.path()).unwrap();
        let b = Channels::open(dir.path()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(entries(dir.path()), 6);
    }

    #[test]
    fn test_id_collision_is_channel_error() {
        let dir = tempfile::tempdir().unwrap();
        let _first = Channels::open_with_id(dir.path(), "fixed".to_string()).unwrap();
        let err = Channels::open_with_id(dir.path(), "fixed".to_string()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Channel);
        // Only the first invocation's files remain.
        assert_eq!(entries(dir.path()), 3);
    }

    #[test]
    fn test_input_written_compact() {
        let dir = tempfile::tempdir().unwrap();
        let mut channels = Channels::open(dir.path()).unwrap();
        channels.write_input(&json!({"n": 100, "tags": ["a", "b"]})).unwrap();

        let mut stdin = channels.stdio().unwrap().stdin;
        let mut text = String::new();
        stdin.read_to_string(&mut text).unwrap();
        assert_eq!(text, r#"{"n":100,"tags":["a","b"]}"#);
    }

    #[test]
    fn test_input_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut channels = Channels::open(dir.path()).unwrap();
        channels.write_input(&json!(1)).unwrap();
        assert!(channels.write_input(&json!(2)).is_err());
    }

    #[test]
    fn test_stdio_requires_input() {
        let dir = tempfile::tempdir().unwrap();
        let channels = Channels::open(dir.path()).unwrap();
        let err = channels.stdio().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Channel);
    }

    #[test]
    fn test_output_appends_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let mut channels = Channels::open(dir.path()).unwrap();
        channels.write_input(&json!(null)).unwrap();

        let mut first = channels.stdio().unwrap();
        first.stdout.write_all(b"[1,").unwrap();
        let mut second = channels.stdio().unwrap();
        second.stdout.write_all(b"2]\n").unwrap();
        drop((first, second));

        assert_eq!(channels.read_output().unwrap(), DecodedValue::Json(json!([1, 2])));
        assert!(channels.read_error().unwrap().is_empty());
    }

    #[test]
    fn test_release_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut channels = Channels::open(dir.path()).unwrap();
        channels.write_input(&json!({"k": "v"})).unwrap();
        let stdio = channels.stdio().unwrap();
        drop(stdio);

        channels.release().unwrap();
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn test_drop_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _channels = Channels::open(dir.path()).unwrap();
            assert_eq!(entries(dir.path()), 3);
        }
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn test_missing_work_dir_is_channel_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Channels::open(dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Channel);
    }
}
