//! Byte sources and sinks for the stream cipher.
//!
//! Sources are plain [`Read`] implementations; [`Source`] opens files,
//! memory buffers and standard input uniformly and reports the length when it
//! is knowable.
//!
//! Sinks implement [`ByteSink`], a [`Write`] that can be committed or
//! discarded. Nothing a sink receives becomes visible at its destination until
//! `commit`; `discard` removes every byte written since the sink was created.
//! This is what lets the decryptor stream plaintext without ever releasing
//! bytes whose tag has not verified.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use zeroize::Zeroize;

use streamseal_common::{Error, Result};

/// Read until `buf` is full or the reader is exhausted.
///
/// Returns the number of bytes read; fewer than `buf.len()` means end of
/// input.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Where plaintext or ciphertext comes from.
pub enum Source {
    /// A file on disk.
    File(PathBuf),
    /// An in-memory buffer.
    Memory(Vec<u8>),
    /// Standard input.
    Stdin,
    /// Any other reader. Its length is unknown.
    Reader(Box<dyn Read + Send>),
}

impl Source {
    /// Open the source, returning a reader and the length if known.
    ///
    /// Only regular files report a length. Pipes, FIFOs and character
    /// devices opened by path report `None` like standard input.
    pub fn open(self) -> Result<(Box<dyn Read + Send>, Option<u64>)> {
        Ok(match self {
            Source::File(path) => {
                let file = File::open(&path)?;
                let metadata = file.metadata()?;
                let len = metadata.is_file().then(|| metadata.len());
                (Box::new(file), len)
            }
            Source::Memory(bytes) => {
                let len = bytes.len() as u64;
                (Box::new(io::Cursor::new(bytes)), Some(len))
            }
            Source::Stdin => (Box::new(io::stdin()), None),
            Source::Reader(reader) => (reader, None),
        })
    }

    /// Open the source and determine its exact length.
    ///
    /// Sources of unknown length are read fully into memory first.
    pub fn open_sized(self) -> Result<(Box<dyn Read + Send>, u64)> {
        match self.open()? {
            (reader, Some(len)) => Ok((reader, len)),
            (mut reader, None) => {
                let bytes = spool(&mut reader)?;
                debug!(len = bytes.len(), "Spooled source of unknown length");
                let len = bytes.len() as u64;
                Ok((Box::new(io::Cursor::new(bytes)), len))
            }
        }
    }
}

fn spool<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = read_full(reader, &mut chunk)?;
        out.try_reserve(n)?;
        out.extend_from_slice(&chunk[..n]);
        if n < chunk.len() {
            return Ok(out);
        }
    }
}

/// A [`Write`] destination with all-or-nothing visibility.
pub trait ByteSink: Write {
    /// Make everything written so far visible at the destination.
    fn commit(&mut self) -> Result<()>;

    /// Drop everything written since creation. The sink must not be written
    /// to afterwards.
    fn discard(&mut self) -> Result<()>;
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn discard(&mut self) -> Result<()> {
        (**self).discard()
    }
}

impl<S: ByteSink + ?Sized> ByteSink for Box<S> {
    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn discard(&mut self) -> Result<()> {
        (**self).discard()
    }
}

fn out_of_memory(e: std::collections::TryReserveError) -> io::Error {
    io::Error::new(io::ErrorKind::OutOfMemory, e)
}

/// Growable in-memory sink.
///
/// Discarding wipes and truncates back to the length the buffer had when the
/// sink was created.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Vec<u8>,
    start: usize,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to an existing buffer; its current contents are kept on discard.
    pub fn with_buffer(buf: Vec<u8>) -> Self {
        let start = buf.len();
        Self { buf, start }
    }

    /// Bytes currently held.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Take the buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.try_reserve(data.len()).map_err(out_of_memory)?;
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteSink for MemorySink {
    fn commit(&mut self) -> Result<()> {
        self.start = self.buf.len();
        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        self.buf[self.start..].zeroize();
        self.buf.truncate(self.start);
        Ok(())
    }
}

/// File sink that writes to a temporary file next to the destination and
/// renames it into place on commit.
///
/// An existing destination file is only replaced once the data is committed.
#[derive(Debug)]
pub struct FileSink {
    dest: PathBuf,
    temp: Option<NamedTempFile>,
}

impl FileSink {
    /// Start writing toward `dest`.
    pub fn create(dest: impl AsRef<Path>) -> Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(&dir)?;
        Ok(Self {
            dest,
            temp: Some(temp),
        })
    }

    fn temp(&mut self) -> io::Result<&mut NamedTempFile> {
        self.temp
            .as_mut()
            .ok_or_else(|| io::Error::other("file sink already committed or discarded"))
    }
}

impl Write for FileSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.temp()?.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp()?.flush()
    }
}

impl ByteSink for FileSink {
    fn commit(&mut self) -> Result<()> {
        let mut temp = self.temp.take().ok_or_else(|| {
            Error::InvalidInput("file sink already committed or discarded".into())
        })?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.dest).map_err(|e| Error::Io(e.error))?;
        debug!(path = %self.dest.display(), "Committed file sink");
        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        if let Some(temp) = self.temp.take() {
            temp.close()?;
            debug!(path = %self.dest.display(), "Discarded file sink");
        }
        Ok(())
    }
}

/// Sink that holds everything in memory and forwards it to `W` on commit.
///
/// Used for destinations that cannot take bytes back, such as standard output.
#[derive(Debug)]
pub struct SpoolSink<W: Write> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: Write> SpoolSink<W> {
    /// Wrap `inner`; nothing reaches it until [`ByteSink::commit`].
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Take back the wrapped writer, dropping anything uncommitted.
    pub fn into_inner(mut self) -> W {
        self.buf.zeroize();
        self.inner
    }
}

impl<W: Write> Write for SpoolSink<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.try_reserve(data.len()).map_err(out_of_memory)?;
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> ByteSink for SpoolSink<W> {
    fn commit(&mut self) -> Result<()> {
        self.inner.write_all(&self.buf)?;
        self.inner.flush()?;
        self.buf.clear();
        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        self.buf.zeroize();
        Ok(())
    }
}

/// Standard output sink.
pub type StdoutSink = SpoolSink<io::Stdout>;

/// Create a sink for standard output.
pub fn stdout_sink() -> StdoutSink {
    SpoolSink::new(io::stdout())
}
