//! Event sources feeding the ingestion loop.
//!
//! A source produces [`SourceMessage`]s: an optional key plus the raw payload
//! bytes. Decoding happens in the loop, so a source never fails on content.
//!
//! Line-oriented sources accept either a bare JSON payload per line or
//! `KEY<TAB>JSON`, the framing a Kafka console consumer prints with a tab
//! key delimiter.

use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{LinesStream, ReceiverStream};

use crate::config::SourceSettings;
use crate::ingest::{EventSource, IngestError};

/// One message pulled from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// Position of the message within the source, starting at 0.
    pub offset: u64,
}

impl SourceMessage {
    /// Splits a line into key and payload.
    pub fn from_line(line: &str, offset: u64) -> Self {
        if let Some((prefix, rest)) = line.split_once('\t') {
            if !prefix.trim_start().starts_with('{') {
                let key = prefix.trim();
                return Self {
                    key: (!key.is_empty()).then(|| key.to_string()),
                    payload: rest.as_bytes().to_vec(),
                    offset,
                };
            }
        }
        Self {
            key: None,
            payload: line.as_bytes().to_vec(),
            offset,
        }
    }
}

/// Opens the source described by `settings`.
pub fn from_settings(settings: &SourceSettings) -> Result<Box<dyn EventSource>, IngestError> {
    match settings.kind.as_str() {
        "file" => Ok(Box::new(FileSource::new(
            settings.path.clone(),
            settings.follow,
            Duration::from_millis(settings.poll_interval_ms),
        ))),
        "stdin" => Ok(Box::new(ReaderSource::new(tokio::io::stdin()))),
        other => Err(IngestError::Source(format!("unsupported source kind '{}'", other))),
    }
}

/// Reads a JSON-lines topic file from its first line.
///
/// Every start replays the whole file, so previously ingested events are
/// delivered again. With `follow` set the source keeps polling for appended
/// lines and never ends on its own.
pub struct FileSource {
    path: PathBuf,
    follow: bool,
    poll_interval: Duration,
}

impl FileSource {
    pub fn new(path: PathBuf, follow: bool, poll_interval: Duration) -> Self {
        Self {
            path,
            follow,
            poll_interval,
        }
    }
}

impl EventSource for FileSource {
    fn messages(&self) -> BoxStream<'static, SourceMessage> {
        let path = self.path.clone();
        let follow = self.follow;
        let poll_interval = self.poll_interval;

        Box::pin(async_stream::stream! {
            let file = loop {
                match tokio::fs::File::open(&path).await {
                    Ok(file) => break file,
                    Err(e) if follow => {
                        tracing::debug!(path = %path.display(), error = %e, "waiting for source file");
                        tokio::time::sleep(poll_interval).await;
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "cannot open source file");
                        return;
                    }
                }
            };

            let mut reader = BufReader::new(file);
            let mut offset = 0u64;
            let mut pending = String::new();
            loop {
                match reader.read_line(&mut pending).await {
                    Ok(0) => {
                        if !follow {
                            if !pending.trim().is_empty() {
                                yield SourceMessage::from_line(pending.trim_end(), offset);
                            }
                            return;
                        }
                        tokio::time::sleep(poll_interval).await;
                    }
                    // A line without its newline may still be in the middle of being written.
                    Ok(_) if !pending.ends_with('\n') && follow => continue,
                    Ok(_) => {
                        let line = std::mem::take(&mut pending);
                        let line = line.trim_end_matches(['\r', '\n']);
                        if !line.trim().is_empty() {
                            yield SourceMessage::from_line(line, offset);
                            offset += 1;
                        }
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "source read failed");
                        return;
                    }
                }
            }
        })
    }
}

/// Reads JSON lines from any async reader, typically standard input.
///
/// The reader is consumed by the first call to `messages`; later calls yield
/// an empty stream.
pub struct ReaderSource {
    reader: Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>,
}

impl ReaderSource {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
        }
    }
}

impl EventSource for ReaderSource {
    fn messages(&self) -> BoxStream<'static, SourceMessage> {
        let reader = match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(reader) = reader else {
            return futures::stream::empty().boxed();
        };

        LinesStream::new(BufReader::new(reader).lines())
            .take_while(|line| {
                if let Err(e) = line {
                    tracing::error!(error = %e, "source read failed");
                }
                futures::future::ready(line.is_ok())
            })
            .filter_map(|line| futures::future::ready(line.ok()))
            .filter(|line| futures::future::ready(!line.trim().is_empty()))
            .enumerate()
            .map(|(offset, line)| SourceMessage::from_line(&line, offset as u64))
            .boxed()
    }
}

/// In-process source fed through a channel. The stream ends when every
/// sender is dropped.
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::Receiver<SourceMessage>>>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<SourceMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                receiver: Mutex::new(Some(rx)),
            },
        )
    }
}

impl EventSource for ChannelSource {
    fn messages(&self) -> BoxStream<'static, SourceMessage> {
        let receiver = match self.receiver.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match receiver {
            Some(rx) => ReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}
