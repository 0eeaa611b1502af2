//! Uniform binary-input handle.
//!
//! A [`DataSource`] wraps one of seven backings (path, owned or static
//! bytes, owned or static strings, seekable or unseekable streams) and
//! lazily materializes whichever view a consumer demands: a contiguous
//! byte span, a string, a fresh read stream, or the originating path.
//! The first view incompatible with the backing populates a memory cache
//! exactly once; all later views answer from it.
//!
//! The handle also accumulates MIME-type evidence: detectors record
//! `(mime type, confidence)` hypotheses which only ever strengthen, and
//! parser dispatch reads the highest-confidence hypothesis back.

use crate::error::{DocpipeError, Result};
use crate::mime::{Confidence, MimeType, confidence};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`DataSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// An originating file extension hint, stored with its leading dot,
/// compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        if ext.starts_with('.') {
            FileExtension(ext)
        } else {
            FileExtension(format!(".{ext}"))
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(FileExtension::new)
    }

    /// The extension including the leading dot, lowercase.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The extension without the leading dot.
    pub fn bare(&self) -> &str {
        self.0.trim_start_matches('.')
    }
}

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Shared handle to a seekable stream backing.
#[derive(Clone)]
pub struct SeekableStream(Arc<Mutex<Box<dyn ReadSeek>>>);

/// Shared handle to an unseekable stream backing.
#[derive(Clone)]
pub struct UnseekableStream(Arc<Mutex<Box<dyn Read + Send>>>);

impl UnseekableStream {
    pub fn new<T: Read + Send + 'static>(reader: T) -> Self {
        UnseekableStream(Arc::new(Mutex::new(Box::new(reader))))
    }
}

enum Backing {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
    StaticBytes(&'static [u8]),
    Text(Arc<str>),
    StaticText(&'static str),
    Seekable(SeekableStream),
    Unseekable(UnseekableStream),
}

/// Length cap for [`DataSource::string`] reads.
#[derive(Debug, Clone, Copy)]
pub struct LengthLimit(pub usize);

pub struct DataSource {
    backing: Backing,
    file_extension: Option<FileExtension>,
    mime_types: AHashMap<MimeType, Confidence>,
    /// Incrementally filled prefix for limited reads from streams.
    partial: Arc<Mutex<Vec<u8>>>,
    /// Fully materialized content; set at most once, shared across clones.
    full: Arc<once_cell::sync::OnceCell<Arc<[u8]>>>,
    /// Whether the single allowed `istream()` of an unseekable backing was handed out.
    stream_taken: Arc<AtomicBool>,
    id: SourceId,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match &self.backing {
            Backing::Path(p) => format!("path({})", p.display()),
            Backing::Bytes(b) => format!("bytes({})", b.len()),
            Backing::StaticBytes(b) => format!("static-bytes({})", b.len()),
            Backing::Text(s) => format!("text({})", s.len()),
            Backing::StaticText(s) => format!("static-text({})", s.len()),
            Backing::Seekable(_) => "seekable-stream".to_string(),
            Backing::Unseekable(_) => "unseekable-stream".to_string(),
        };
        f.debug_struct("DataSource")
            .field("backing", &backing)
            .field("file_extension", &self.file_extension)
            .field("id", &self.id)
            .finish()
    }
}

impl Clone for DataSource {
    /// Clones share buffers, stream handles, caches, and the identifier;
    /// a clone is the same logical source seen from another message.
    fn clone(&self) -> Self {
        let backing = match &self.backing {
            Backing::Path(p) => Backing::Path(p.clone()),
            Backing::Bytes(b) => Backing::Bytes(b.clone()),
            Backing::StaticBytes(b) => Backing::StaticBytes(b),
            Backing::Text(s) => Backing::Text(s.clone()),
            Backing::StaticText(s) => Backing::StaticText(s),
            Backing::Seekable(s) => Backing::Seekable(s.clone()),
            Backing::Unseekable(s) => Backing::Unseekable(s.clone()),
        };
        DataSource {
            backing,
            file_extension: self.file_extension.clone(),
            mime_types: self.mime_types.clone(),
            partial: self.partial.clone(),
            full: self.full.clone(),
            stream_taken: self.stream_taken.clone(),
            id: self.id,
        }
    }
}

impl DataSource {
    fn with_backing(backing: Backing) -> Self {
        DataSource {
            backing,
            file_extension: None,
            mime_types: AHashMap::new(),
            partial: Arc::new(Mutex::new(Vec::new())),
            full: Arc::new(once_cell::sync::OnceCell::new()),
            stream_taken: Arc::new(AtomicBool::new(false)),
            id: SourceId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let file_extension = FileExtension::from_path(&path);
        let mut source = Self::with_backing(Backing::Path(path));
        source.file_extension = file_extension;
        source
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::with_backing(Backing::Bytes(bytes.into()))
    }

    pub fn from_static_bytes(bytes: &'static [u8]) -> Self {
        Self::with_backing(Backing::StaticBytes(bytes))
    }

    pub fn from_string<S: Into<String>>(text: S) -> Self {
        Self::with_backing(Backing::Text(text.into().into()))
    }

    pub fn from_static_str(text: &'static str) -> Self {
        Self::with_backing(Backing::StaticText(text))
    }

    pub fn from_seekable_stream<T: ReadSeek + 'static>(stream: T) -> Self {
        Self::with_backing(Backing::Seekable(SeekableStream(Arc::new(Mutex::new(
            Box::new(stream),
        )))))
    }

    pub fn from_unseekable_stream<T: Read + Send + 'static>(stream: T) -> Self {
        Self::with_backing(Backing::Unseekable(UnseekableStream::new(stream)))
    }

    /// Wrap an already-shared unseekable stream handle.
    pub fn from_shared_unseekable(stream: UnseekableStream) -> Self {
        Self::with_backing(Backing::Unseekable(stream))
    }

    /// Attach an originating file-extension hint.
    pub fn with_file_extension(mut self, ext: FileExtension) -> Self {
        self.file_extension = Some(ext);
        self
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn file_extension(&self) -> Option<&FileExtension> {
        self.file_extension.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Contiguous view of the full content. Materializes the memory cache
    /// on first call if the backing is a path or stream.
    pub fn span(&self) -> Result<&[u8]> {
        match &self.backing {
            Backing::Bytes(b) => Ok(b),
            Backing::StaticBytes(b) => Ok(b),
            Backing::Text(s) => Ok(s.as_bytes()),
            Backing::StaticText(s) => Ok(s.as_bytes()),
            _ => {
                let cache = self.materialize()?;
                Ok(cache)
            }
        }
    }

    /// Up to `limit` bytes decoded as UTF-8 text (lossily); the whole
    /// content when no limit is given. Limited reads of stream backings
    /// only consume `limit` bytes from the stream.
    pub fn string(&self, limit: Option<LengthLimit>) -> Result<String> {
        match limit {
            None => Ok(String::from_utf8_lossy(self.span()?).into_owned()),
            Some(LengthLimit(limit)) => {
                let prefix = self.prefix(limit)?;
                Ok(String::from_utf8_lossy(&prefix).into_owned())
            }
        }
    }

    /// A readable stream positioned at offset zero.
    ///
    /// For an unseekable backing at most one stream may ever be handed
    /// out; once `span()` or `string()` has materialized the cache, later
    /// calls read from the cache instead.
    pub fn istream(&self) -> Result<Box<dyn Read + Send>> {
        if let Some(full) = self.full.get() {
            return Ok(Box::new(Cursor::new(full.clone())));
        }
        match &self.backing {
            Backing::Bytes(b) => Ok(Box::new(Cursor::new(b.clone()))),
            Backing::StaticBytes(b) => Ok(Box::new(Cursor::new(*b))),
            Backing::Text(s) => Ok(Box::new(Cursor::new(s.as_bytes().to_vec()))),
            Backing::StaticText(s) => Ok(Box::new(Cursor::new(s.as_bytes()))),
            Backing::Path(p) => Ok(Box::new(std::fs::File::open(p)?)),
            Backing::Seekable(s) => {
                s.0.lock().seek(SeekFrom::Start(0))?;
                Ok(Box::new(SharedSeekableRead(s.clone())))
            }
            Backing::Unseekable(s) => {
                if self.stream_taken.swap(true, Ordering::SeqCst) {
                    return Err(DocpipeError::validation(
                        "unseekable stream was already handed out; call span() or string() first",
                    ));
                }
                Ok(Box::new(SharedUnseekableRead(s.clone())))
            }
        }
    }

    /// Record detection evidence. Confidences are additive: the stored
    /// value is the maximum of the existing and new values.
    pub fn add_mime_type(&mut self, mime: MimeType, conf: Confidence) {
        let conf = conf.min(confidence::CERTAIN);
        let entry = self.mime_types.entry(mime).or_insert(0);
        if conf > *entry {
            *entry = conf;
        }
    }

    /// The recorded confidence for `mime`, or 0 if absent.
    pub fn mime_type_confidence(&self, mime: &MimeType) -> Confidence {
        self.mime_types.get(mime).copied().unwrap_or(confidence::NONE)
    }

    /// The maximum confidence across all recorded hypotheses.
    pub fn highest_mime_type_confidence(&self) -> Confidence {
        self.mime_types.values().copied().max().unwrap_or(confidence::NONE)
    }

    /// True iff a hypothesis holding the maximum confidence is in `set`.
    /// When several types share the maximum, any of them being in `set`
    /// suffices.
    pub fn has_highest_confidence_mime_type_in(&self, set: &[MimeType]) -> bool {
        let highest = self.highest_mime_type_confidence();
        if highest == confidence::NONE && self.mime_types.is_empty() {
            return false;
        }
        self.mime_types
            .iter()
            .filter(|(_, c)| **c == highest)
            .any(|(m, _)| set.contains(m))
    }

    /// All recorded hypotheses holding the maximum confidence.
    pub fn highest_confidence_mime_types(&self) -> Vec<MimeType> {
        let highest = self.highest_mime_type_confidence();
        self.mime_types
            .iter()
            .filter(|(_, c)| **c == highest)
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn mime_types(&self) -> impl Iterator<Item = (&MimeType, Confidence)> {
        self.mime_types.iter().map(|(m, c)| (m, *c))
    }

    /// Fails with a `file_encrypted` error when any recorded hypothesis
    /// marks the source as password protected.
    pub fn assert_not_encrypted(&self) -> Result<()> {
        for (mime, conf) in &self.mime_types {
            if *conf > confidence::NONE && mime.is_encrypted_marker() {
                return Err(DocpipeError::file_encrypted(format!(
                    "detected as {mime}"
                )));
            }
        }
        Ok(())
    }

    /// Up to `limit` raw bytes from the start of the content, reading
    /// streams no further than `limit`.
    pub fn peek(&self, limit: usize) -> Result<Vec<u8>> {
        self.prefix(limit)
    }

    /// Read up to `limit` bytes without draining streams past the limit.
    fn prefix(&self, limit: usize) -> Result<Vec<u8>> {
        if let Some(full) = self.full.get() {
            return Ok(full[..full.len().min(limit)].to_vec());
        }
        match &self.backing {
            Backing::Bytes(b) => Ok(b[..b.len().min(limit)].to_vec()),
            Backing::StaticBytes(b) => Ok(b[..b.len().min(limit)].to_vec()),
            Backing::Text(s) => Ok(s.as_bytes()[..s.len().min(limit)].to_vec()),
            Backing::StaticText(s) => Ok(s.as_bytes()[..s.len().min(limit)].to_vec()),
            Backing::Path(p) => {
                let mut file = std::fs::File::open(p)?;
                let mut buf = vec![0u8; limit];
                let n = read_up_to(&mut file, &mut buf)?;
                buf.truncate(n);
                Ok(buf)
            }
            Backing::Seekable(s) => {
                let mut stream = s.0.lock();
                stream.seek(SeekFrom::Start(0))?;
                let mut buf = vec![0u8; limit];
                let n = read_up_to(&mut *stream, &mut buf)?;
                buf.truncate(n);
                Ok(buf)
            }
            Backing::Unseekable(s) => {
                let mut partial = self.partial.lock();
                if partial.len() < limit {
                    let mut stream = s.0.lock();
                    let mut chunk = vec![0u8; limit - partial.len()];
                    let n = read_up_to(&mut *stream, &mut chunk)?;
                    partial.extend_from_slice(&chunk[..n]);
                }
                Ok(partial[..partial.len().min(limit)].to_vec())
            }
        }
    }

    /// Fill the full memory cache from a path or stream backing, resuming
    /// after any partially read prefix, and return the cached content.
    fn materialize(&self) -> Result<&[u8]> {
        if let Some(full) = self.full.get() {
            return Ok(full);
        }
        let data: Vec<u8> = match &self.backing {
            Backing::Path(p) => std::fs::read(p)?,
            Backing::Seekable(s) => {
                let mut stream = s.0.lock();
                stream.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf)?;
                buf
            }
            Backing::Unseekable(s) => {
                let mut partial = self.partial.lock();
                let mut buf = std::mem::take(&mut *partial);
                let mut stream = s.0.lock();
                stream.read_to_end(&mut buf)?;
                buf
            }
            // In-memory backings never reach here.
            Backing::Bytes(b) => b.to_vec(),
            Backing::StaticBytes(b) => b.to_vec(),
            Backing::Text(s) => s.as_bytes().to_vec(),
            Backing::StaticText(s) => s.as_bytes().to_vec(),
        };
        let cache = self.full.get_or_init(|| data.into());
        Ok(cache)
    }
}

fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct SharedSeekableRead(SeekableStream);

impl Read for SharedSeekableRead {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.0.lock().read(buf)
    }
}

struct SharedUnseekableRead(UnseekableStream);

impl Read for SharedUnseekableRead {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.0.lock().read(buf)
    }
}
