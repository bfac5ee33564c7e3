//! Streaming AES-256-GCM encryption for large payloads.
//!
//! A stream is a single GCM message framed so that a reader can recover its
//! parameters and the exact plaintext length:
//!
//! ```text
//! ivlen=<bits>,taglen=<bytes>\n   clear, fed to GCM as associated data
//! IV                              clear, ivlen/8 bytes
//! Enc("datalen=<N>\n")            encrypted length header
//! Enc(plaintext)                  N bytes
//! tag                             taglen bytes
//! ```
//!
//! Plaintext is processed in fixed-size chunks, so memory use does not grow
//! with the payload. Output goes to a [`ByteSink`], which is committed only
//! when the whole operation succeeds; on decryption that means only after the
//! tag has verified.

use std::io::{self, Read, Write};
use std::path::Path;

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::StreamConfig;
use crate::frame::{InnerHeader, StreamHeader, MAX_HEADER_LINE, MAX_INNER_HEADER};
use crate::gcm::{GcmContext, MAX_TEXT_LEN};
use crate::io::{read_full, ByteSink, FileSink, MemorySink, Source};
use crate::iv::{build_iv, IvBuilder};
use crate::keys::SymmetricKey;
use streamseal_common::{Error, Result};

/// Encrypts plaintext streams under one key.
pub struct Encryptor<'a> {
    key: &'a SymmetricKey,
    config: StreamConfig,
}

impl<'a> Encryptor<'a> {
    /// Create an encryptor with the default parameters.
    pub fn new(key: &'a SymmetricKey) -> Self {
        Self {
            key,
            config: StreamConfig::default(),
        }
    }

    /// Use custom stream parameters.
    ///
    /// # Errors
    /// - `InvalidConfig` if the parameters do not validate
    pub fn with_config(mut self, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// The parameters in use.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Encrypt `plaintext_size` bytes from `reader` into `sink`.
    ///
    /// The IV comes from `ivs`, consuming one counter value. `aad`, when
    /// given, is authenticated but not written; the decryptor must supply the
    /// same bytes.
    ///
    /// # Postconditions
    /// - On success the sink is committed and holds the complete stream
    /// - On failure the sink is discarded
    ///
    /// # Returns
    /// Total bytes written to the sink.
    ///
    /// # Errors
    /// - `InvalidIvConstruction` if the device id does not fit the IV length
    /// - `ShortRead` if the reader ends before `plaintext_size` bytes
    /// - I/O errors from reader or sink
    pub fn encrypt_stream<R, S>(
        &self,
        ivs: &IvBuilder,
        aad: Option<&[u8]>,
        reader: &mut R,
        plaintext_size: u64,
        sink: &mut S,
    ) -> Result<u64>
    where
        R: Read + ?Sized,
        S: ByteSink + ?Sized,
    {
        let result = ivs
            .next_iv(self.config.iv_len_bits)
            .and_then(|iv| self.write_stream(&iv, aad, reader, plaintext_size, sink));
        settle(sink, result)
    }

    /// Encrypt with an explicit device id and counter value.
    ///
    /// The caller is responsible for never repeating `(device_id, counter)`
    /// under the same key. Prefer [`Encryptor::encrypt_stream`] with an
    /// [`IvBuilder`].
    pub fn encrypt_with_counter<R, S>(
        &self,
        device_id: &[u8],
        counter: u64,
        aad: Option<&[u8]>,
        reader: &mut R,
        plaintext_size: u64,
        sink: &mut S,
    ) -> Result<u64>
    where
        R: Read + ?Sized,
        S: ByteSink + ?Sized,
    {
        let result = build_iv(device_id, counter, self.config.iv_len_bits)
            .and_then(|iv| self.write_stream(&iv, aad, reader, plaintext_size, sink));
        settle(sink, result)
    }

    /// Encrypt everything `source` yields.
    pub fn encrypt_source<S: ByteSink + ?Sized>(
        &self,
        ivs: &IvBuilder,
        aad: Option<&[u8]>,
        source: Source,
        sink: &mut S,
    ) -> Result<u64> {
        let (mut reader, size) = match source.open_sized() {
            Ok(opened) => opened,
            Err(e) => return settle(sink, Err(e)),
        };
        self.encrypt_stream(ivs, aad, &mut reader, size, sink)
    }

    fn write_stream<R, S>(
        &self,
        iv: &[u8],
        aad: Option<&[u8]>,
        reader: &mut R,
        plaintext_size: u64,
        sink: &mut S,
    ) -> Result<u64>
    where
        R: Read + ?Sized,
        S: Write + ?Sized,
    {
        let header = StreamHeader {
            iv_len_bits: self.config.iv_len_bits,
            tag_len: self.config.tag_len,
        };
        let header_bytes = header.encode();
        let mut inner = InnerHeader {
            data_len: plaintext_size,
        }
        .encode();

        if plaintext_size > MAX_TEXT_LEN - inner.len() as u64 {
            return Err(Error::InvalidInput(format!(
                "plaintext of {} bytes exceeds the GCM message limit",
                plaintext_size
            )));
        }

        debug!(
            size = plaintext_size,
            iv_bits = header.iv_len_bits,
            tag_len = header.tag_len,
            "Encrypting stream"
        );

        let mut ctx = GcmContext::new(self.key, iv)?;

        put(sink, &header_bytes)?;
        ctx.update_aad(&header_bytes)?;
        if let Some(aad) = aad {
            ctx.update_aad(aad)?;
        }
        put(sink, iv)?;

        ctx.encrypt_in_place(&mut inner)?;
        put(sink, &inner)?;

        let mut total = (header_bytes.len() + iv.len() + inner.len()) as u64;
        let mut buffer = chunk_buffer(self.config.chunk_size)?;
        let mut remaining = plaintext_size;

        while remaining > 0 {
            let want = remaining.min(buffer.len() as u64) as usize;
            let n = read_full(reader, &mut buffer[..want])?;
            if n < want {
                return Err(Error::ShortRead {
                    expected: plaintext_size,
                    actual: plaintext_size - remaining + n as u64,
                });
            }
            ctx.encrypt_in_place(&mut buffer[..n])?;
            put(sink, &buffer[..n])?;
            remaining -= n as u64;
            total += n as u64;
        }

        let tag = ctx.finalize(header.tag_len)?;
        put(sink, &tag)?;
        sink.flush()?;
        total += tag.len() as u64;

        debug!(total, "Stream encrypted");
        Ok(total)
    }
}

/// Decrypts streams produced by [`Encryptor`].
///
/// IV and tag lengths are read from each stream's header.
pub struct Decryptor<'a> {
    key: &'a SymmetricKey,
    chunk_size: usize,
}

impl<'a> Decryptor<'a> {
    /// Create a new decryptor.
    pub fn new(key: &'a SymmetricKey) -> Self {
        Self {
            key,
            chunk_size: StreamConfig::default().chunk_size,
        }
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Decrypt a stream from `reader` into `sink`.
    ///
    /// # Preconditions
    /// - `aad` matches what the encryptor authenticated (or both are absent)
    ///
    /// # Postconditions
    /// - On success the sink is committed and holds exactly the plaintext
    /// - On any failure the sink is discarded; no unauthenticated plaintext
    ///   survives
    ///
    /// # Returns
    /// The plaintext length.
    ///
    /// # Errors
    /// - `MalformedHeader` / `IvTooShort` for a bad clear header
    /// - `ShortRead` if the stream is truncated before the IV or tag
    /// - `AuthenticationFailure` if anything after the clear header was
    ///   modified, or the key or AAD is wrong
    pub fn decrypt_stream<R, S>(
        &self,
        aad: Option<&[u8]>,
        reader: &mut R,
        sink: &mut S,
    ) -> Result<u64>
    where
        R: Read + ?Sized,
        S: ByteSink + ?Sized,
    {
        let result = self.read_stream(aad, reader, sink);
        settle(sink, result)
    }

    /// Decrypt everything `source` yields.
    pub fn decrypt_source<S: ByteSink + ?Sized>(
        &self,
        aad: Option<&[u8]>,
        source: Source,
        sink: &mut S,
    ) -> Result<u64> {
        let (mut reader, _) = match source.open() {
            Ok(opened) => opened,
            Err(e) => return settle(sink, Err(e)),
        };
        self.decrypt_stream(aad, &mut reader, sink)
    }

    fn read_stream<R, S>(&self, aad: Option<&[u8]>, reader: &mut R, sink: &mut S) -> Result<u64>
    where
        R: Read + ?Sized,
        S: Write + ?Sized,
    {
        let line = read_header_line(reader)?;
        let header = StreamHeader::parse(&line)?;

        let mut iv = Vec::new();
        iv.try_reserve_exact(header.iv_len())?;
        iv.resize(header.iv_len(), 0);
        let n = read_full(reader, &mut iv)?;
        if n < iv.len() {
            return Err(Error::ShortRead {
                expected: iv.len() as u64,
                actual: n as u64,
            });
        }

        debug!(
            iv_bits = header.iv_len_bits,
            tag_len = header.tag_len,
            "Decrypting stream"
        );

        let mut ctx = GcmContext::new(self.key, &iv)?;
        ctx.update_aad(&line)?;
        if let Some(aad) = aad {
            ctx.update_aad(aad)?;
        }

        let mut body = TrailerReader::new(reader, header.tag_len)?;
        let mut buffer = chunk_buffer(self.chunk_size)?;

        match self.read_body(&mut ctx, &mut body, &mut buffer, sink) {
            Ok(written) => {
                let tag = body.into_trailer()?;
                verify(ctx, &tag)?;
                debug!(size = written, "Stream decrypted and verified");
                Ok(written)
            }
            Err(e) if is_structural(&e) => {
                // The framing inside the ciphertext is unauthenticated until the
                // tag checks out. Run the rest of the body through GHASH so a
                // modified stream reports as such.
                drain(&mut ctx, &mut body, &mut buffer)?;
                let tag = body.into_trailer()?;
                verify(ctx, &tag)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Decrypt the length header and the plaintext, writing plaintext to `sink`.
    ///
    /// Succeeds only if the body holds exactly the declared number of bytes.
    fn read_body<R, S>(
        &self,
        ctx: &mut GcmContext,
        body: &mut TrailerReader<'_, R>,
        buffer: &mut [u8],
        sink: &mut S,
    ) -> Result<u64>
    where
        R: Read + ?Sized,
        S: Write + ?Sized,
    {
        let inner = read_inner_header(ctx, body)?;
        let data_len = inner.data_len;
        if data_len > MAX_TEXT_LEN {
            return Err(Error::MalformedHeader(format!(
                "datalen {} exceeds the GCM message limit",
                data_len
            )));
        }

        let mut written = 0u64;
        while written < data_len {
            let want = (data_len - written).min(buffer.len() as u64) as usize;
            let n = read_full(body, &mut buffer[..want])?;
            ctx.decrypt_in_place(&mut buffer[..n])?;
            if n < want {
                return Err(Error::ShortRead {
                    expected: data_len,
                    actual: written + n as u64,
                });
            }
            put(sink, &buffer[..n])?;
            written += n as u64;
        }

        let mut probe = [0u8; 1];
        if read_full(body, &mut probe)? > 0 {
            ctx.decrypt_in_place(&mut probe)?;
            return Err(Error::MalformedHeader(format!(
                "ciphertext continues past datalen={}",
                data_len
            )));
        }

        sink.flush()?;
        Ok(written)
    }
}

/// Read the clear header line of a stream without decrypting anything.
pub fn inspect<R: Read + ?Sized>(reader: &mut R) -> Result<StreamHeader> {
    StreamHeader::parse(&read_header_line(reader)?)
}

/// Encrypt a byte slice in memory.
pub fn encrypt_bytes(key: &SymmetricKey, ivs: &IvBuilder, data: &[u8]) -> Result<Vec<u8>> {
    let mut sink = MemorySink::new();
    Encryptor::new(key).encrypt_stream(ivs, None, &mut &data[..], data.len() as u64, &mut sink)?;
    Ok(sink.into_inner())
}

/// Decrypt a byte slice in memory.
pub fn decrypt_bytes(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut sink = MemorySink::new();
    Decryptor::new(key).decrypt_stream(None, &mut &data[..], &mut sink)?;
    Ok(sink.into_inner())
}

/// Encrypt the file at `input` into `output`.
///
/// `output` only appears once the ciphertext is complete.
pub fn encrypt_file(
    key: &SymmetricKey,
    ivs: &IvBuilder,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<u64> {
    let mut sink = FileSink::create(output)?;
    Encryptor::new(key).encrypt_source(ivs, None, Source::File(input.as_ref().into()), &mut sink)
}

/// Decrypt the file at `input` into `output`.
///
/// `output` only appears once the tag has verified.
pub fn decrypt_file(
    key: &SymmetricKey,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<u64> {
    let mut sink = FileSink::create(output)?;
    Decryptor::new(key).decrypt_source(None, Source::File(input.as_ref().into()), &mut sink)
}

/// Commit the sink on success, discard it on failure.
fn settle<S: ByteSink + ?Sized, T>(sink: &mut S, result: Result<T>) -> Result<T> {
    let result = result.and_then(|value| sink.commit().map(|_| value));
    if let Err(e) = &result {
        if let Err(discard_err) = sink.discard() {
            warn!(error = %discard_err, "Failed to discard sink");
        }
        debug!(error = %e, "Stream operation failed, output discarded");
    }
    result
}

fn verify(ctx: GcmContext, tag: &[u8]) -> Result<()> {
    ctx.verify(tag).map_err(|e| {
        warn!("Authentication tag did not verify");
        e
    })
}

fn is_structural(e: &Error) -> bool {
    matches!(e, Error::MalformedHeader(_) | Error::ShortRead { .. })
}

fn put<S: Write + ?Sized>(sink: &mut S, bytes: &[u8]) -> Result<()> {
    sink.write_all(bytes).map_err(|e| match e.kind() {
        io::ErrorKind::OutOfMemory => Error::Allocation(e.to_string()),
        _ => Error::Io(e),
    })
}

fn chunk_buffer(size: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)?;
    buf.resize(size, 0);
    Ok(Zeroizing::new(buf))
}

/// Read up to and including the first newline.
fn read_header_line<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    while line.len() < MAX_HEADER_LINE {
        if read_full(reader, &mut byte)? == 0 {
            return Err(Error::MalformedHeader(if line.is_empty() {
                "empty stream".into()
            } else {
                "header is not newline terminated".into()
            }));
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            return Ok(line);
        }
    }
    Err(Error::MalformedHeader(format!(
        "header line longer than {} bytes",
        MAX_HEADER_LINE
    )))
}

/// Decrypt byte by byte until the length header's newline.
///
/// Going one byte at a time means no plaintext or tag bytes are pulled in
/// with the header.
fn read_inner_header<R: Read + ?Sized>(
    ctx: &mut GcmContext,
    body: &mut TrailerReader<'_, R>,
) -> Result<InnerHeader> {
    let mut text = Zeroizing::new(Vec::with_capacity(MAX_INNER_HEADER));
    let mut byte = [0u8; 1];
    while text.len() < MAX_INNER_HEADER {
        if read_full(body, &mut byte)? == 0 {
            break;
        }
        ctx.decrypt_in_place(&mut byte)?;
        text.push(byte[0]);
        if byte[0] == b'\n' {
            return InnerHeader::parse(&text);
        }
    }
    Err(Error::MalformedHeader(
        "length header not found in ciphertext".into(),
    ))
}

/// Decrypt and throw away the rest of the body so the tag can be checked.
fn drain<R: Read + ?Sized>(
    ctx: &mut GcmContext,
    body: &mut TrailerReader<'_, R>,
    buffer: &mut [u8],
) -> Result<()> {
    loop {
        let n = read_full(body, buffer)?;
        if n == 0 {
            return Ok(());
        }
        ctx.decrypt_in_place(&mut buffer[..n])?;
    }
}

/// Reader over everything except the final `keep` bytes of the input.
///
/// The held-back bytes are the authentication tag; they are available from
/// [`TrailerReader::into_trailer`] once the body has been read to the end.
struct TrailerReader<'r, R: ?Sized> {
    inner: &'r mut R,
    held: Vec<u8>,
    keep: usize,
    eof: bool,
}

const TRAILER_REFILL: usize = 4096;

impl<'r, R: Read + ?Sized> TrailerReader<'r, R> {
    fn new(inner: &'r mut R, keep: usize) -> Result<Self> {
        let mut held = Vec::new();
        held.try_reserve_exact(keep + TRAILER_REFILL)?;
        Ok(Self {
            inner,
            held,
            keep,
            eof: false,
        })
    }

    fn into_trailer(self) -> Result<Vec<u8>> {
        if !self.eof || self.held.len() > self.keep {
            return Err(Error::InvalidInput(
                "trailer requested before the body was consumed".into(),
            ));
        }
        if self.held.len() < self.keep {
            return Err(Error::ShortRead {
                expected: self.keep as u64,
                actual: self.held.len() as u64,
            });
        }
        Ok(self.held)
    }

    fn refill(&mut self) -> io::Result<()> {
        let start = self.held.len();
        self.held.resize(start + TRAILER_REFILL, 0);
        match self.inner.read(&mut self.held[start..]) {
            Ok(n) => {
                self.held.truncate(start + n);
                self.eof = n == 0;
                Ok(())
            }
            Err(e) => {
                self.held.truncate(start);
                if e.kind() == io::ErrorKind::Interrupted {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

impl<R: Read + ?Sized> Read for TrailerReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let available = self.held.len().saturating_sub(self.keep);
            if available > 0 {
                let n = available.min(buf.len());
                buf[..n].copy_from_slice(&self.held[..n]);
                self.held.drain(..n);
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}
