//! File Transfer Engine (FT), §4.7.
//!
//! Chunked file and recursive folder send/receive, layered as ordinary
//! peer messages on top of [`crate::session::OutboundHandle`] on the
//! send side, and driven message-by-message from
//! [`crate::session::PeerEvent::FileMessage`] on the receive side —
//! this engine never touches the socket directly, so it works the
//! same whether the session is direct or relayed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use rift_core::frame::MsgType;
use rift_core::messages::{
    FileChunkHeader, FileHeader, FolderEntry, FolderHeader, FILE_CHUNK_HEADER_LEN,
    FOLDER_ATTR_DIRECTORY,
};
use wavry_common::{CoreConfig, CoreError, Progress, ProgressObserver};

use crate::session::OutboundHandle;

const MIB: u64 = 1024 * 1024;

/// The session's writer is always a dedicated task draining an
/// `OutboundHandle` channel (§5, §9 single-writer invariant); this
/// satisfies §4.7's "FT MUST NOT let two writers touch the socket
/// concurrently" rule architecturally rather than by mode-switching
/// the caller's own send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMode {
    Async,
}

impl WriterMode {
    fn max_send_attempts(self) -> u32 {
        match self {
            WriterMode::Async => 3,
        }
    }
}

/// Cooperative cancellation flag, checked at chunk and frame
/// boundaries. Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Adaptive pacing interval for the chunk just sent, keyed by total
/// transfer size (§4.7 step 4e). `None` means no sleep this chunk.
fn pacing_interval(total_size: u64, chunk_index: u32) -> Option<Duration> {
    let n = chunk_index + 1;
    if total_size > 100 * MIB {
        (n % 4 == 0).then_some(Duration::from_millis(30))
    } else if total_size > 10 * MIB {
        (n % 8 == 0).then_some(Duration::from_millis(20))
    } else {
        (n % 16 == 0).then_some(Duration::from_millis(5))
    }
}

/// Quiescence sleep before `FILE_END`, proportional to size (§4.7
/// step 5), to let a slow receiver drain its socket buffer.
fn quiescence_delay(total_size: u64) -> Duration {
    if total_size > 100 * MIB {
        Duration::from_millis(500)
    } else if total_size > 10 * MIB {
        Duration::from_millis(200)
    } else {
        Duration::from_millis(100)
    }
}

fn validate_file_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(CoreError::protocol(format!("unsafe file name: {name}")));
    }
    Ok(())
}

fn unix_mtime(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Throttles progress callbacks to at most one per 100 ms (§4.7 step
/// 4d), always letting the first and last updates through.
struct ProgressThrottle<'a> {
    observer: &'a dyn ProgressObserver,
    last_emit: Option<Instant>,
}

impl<'a> ProgressThrottle<'a> {
    fn new(observer: &'a dyn ProgressObserver) -> Self {
        Self {
            observer,
            last_emit: None,
        }
    }

    fn advance(&mut self, bytes_done: u64, force: bool) {
        let now = Instant::now();
        let due = force
            || self
                .last_emit
                .map(|t| now.duration_since(t) >= Duration::from_millis(100))
                .unwrap_or(true);
        if due {
            self.observer.on_progress(Progress::Advanced { bytes_done });
            self.last_emit = Some(now);
        }
    }
}

pub struct FileTransferEngine {
    config: CoreConfig,
}

impl FileTransferEngine {
    pub fn new(config: CoreConfig) -> Self {
        Self { config }
    }

    async fn send_with_retries(
        &self,
        outbound: &OutboundHandle,
        mode: WriterMode,
        msg_type: u8,
        payload: Vec<u8>,
    ) -> Result<(), CoreError> {
        let max_attempts = mode.max_send_attempts();
        let mut attempt = 1;
        loop {
            match outbound.send(msg_type, 0, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(_) if attempt < max_attempts => {
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send one file's chunk stream (`FILE_DATA` only), shared by a
    /// standalone file send (wrapped in `FILE_START`/`FILE_END`) and a
    /// folder entry's inline file stream (neither).
    async fn send_chunk_stream(
        &self,
        path: &Path,
        total_size: u64,
        outbound: &OutboundHandle,
        mode: WriterMode,
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<(), CoreError> {
        let chunk_size = self.config.chunk_size.min(rift_core::messages::MAX_CHUNK_SIZE);
        let total_chunks = total_size.div_ceil(chunk_size as u64) as u32;
        let mut file = fs::File::open(path).await?;
        let mut throttle = ProgressThrottle::new(observer);
        let mut bytes_sent: u64 = 0;

        for chunk_index in 0..total_chunks {
            if cancel.is_cancelled() {
                observer.on_progress(Progress::Cancelled);
                return Err(CoreError::Cancelled);
            }

            let remaining = total_size - bytes_sent;
            let this_chunk = remaining.min(chunk_size as u64) as usize;
            let mut buf = vec![0u8; this_chunk];
            file.read_exact(&mut buf).await?;

            let header = FileChunkHeader {
                chunk_index,
                chunk_size: this_chunk as u32,
            };
            let mut payload = Vec::with_capacity(FILE_CHUNK_HEADER_LEN + this_chunk);
            payload.extend_from_slice(&header.encode());
            payload.extend_from_slice(&buf);
            self.send_with_retries(outbound, mode, MsgType::FileData as u8, payload)
                .await?;

            bytes_sent += this_chunk as u64;
            throttle.advance(bytes_sent, chunk_index + 1 == total_chunks);

            if let Some(sleep) = pacing_interval(total_size, chunk_index) {
                tokio::time::sleep(sleep).await;
            }
            if let Some(sleep) = self.config.pacing_sleep_for_depth(outbound.queue_depth_hint()) {
                tokio::time::sleep(sleep).await;
            }
        }
        Ok(())
    }

    /// Send a single file end to end (§4.7 "Sending a file").
    pub async fn send_file(
        &self,
        path: &Path,
        outbound: &OutboundHandle,
        mode: WriterMode,
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<(), CoreError> {
        let metadata = fs::metadata(path).await?;
        let size = metadata.len();
        if size == 0 {
            let err = CoreError::Empty;
            observer.on_progress(Progress::failed(&err));
            return Err(err);
        }
        if size > self.config.file_size_cap {
            let err = CoreError::FileTooLarge(size, self.config.file_size_cap);
            observer.on_progress(Progress::failed(&err));
            return Err(err);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        validate_file_name(&name)?;

        observer.on_progress(Progress::Started { total_bytes: size });

        let chunk_size = self.config.chunk_size.min(rift_core::messages::MAX_CHUNK_SIZE);
        let total_chunks = size.div_ceil(chunk_size as u64) as u32;
        let header = FileHeader {
            name,
            size,
            file_count: 1,
            total_chunks,
        };
        let header_wire = header.encode().map_err(|e| CoreError::protocol(e.to_string()))?;
        debug!(size, total_chunks, "sending file");
        self.send_with_retries(outbound, mode, MsgType::FileStart as u8, header_wire)
            .await?;

        let result = self
            .send_chunk_stream(path, size, outbound, mode, observer, cancel)
            .await;
        if let Err(e) = result {
            observer.on_progress(Progress::failed(&e));
            return Err(e);
        }

        tokio::time::sleep(quiescence_delay(size)).await;
        self.send_with_retries(outbound, mode, MsgType::FileEnd as u8, Vec::new())
            .await?;
        observer.on_progress(Progress::Completed);
        info!(size, "file send complete");
        Ok(())
    }

    /// Send a directory tree end to end (§4.7 "Sending a folder").
    pub async fn send_folder(
        &self,
        root: &Path,
        outbound: &OutboundHandle,
        mode: WriterMode,
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<(), CoreError> {
        let entries = walk_folder(root)?;
        let total_size: u64 = entries.iter().filter(|e| !e.is_dir).map(|e| e.size).sum();
        let total_files = entries.iter().filter(|e| !e.is_dir).count() as u32;
        let total_folders = entries.iter().filter(|e| e.is_dir).count() as u32;
        if total_size > self.config.file_size_cap {
            let err = CoreError::FolderTooLarge(total_size, self.config.file_size_cap);
            observer.on_progress(Progress::failed(&err));
            return Err(err);
        }

        let folder_name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        validate_file_name(&folder_name)?;

        observer.on_progress(Progress::Started {
            total_bytes: total_size,
        });

        let header = FolderHeader {
            folder_name,
            total_files,
            total_folders,
            total_size,
        };
        let header_wire = header.encode().map_err(|e| CoreError::protocol(e.to_string()))?;
        self.send_with_retries(outbound, mode, MsgType::FolderStart as u8, header_wire)
            .await?;

        let mut bytes_sent = 0u64;
        for entry in &entries {
            if cancel.is_cancelled() {
                observer.on_progress(Progress::Cancelled);
                return Err(CoreError::Cancelled);
            }
            let wire_entry = FolderEntry {
                relative_path: entry.relative_path.clone(),
                attributes: if entry.is_dir { FOLDER_ATTR_DIRECTORY } else { 0 },
                size: entry.size,
                mtime_unix: entry.mtime_unix,
            };
            self.send_with_retries(
                outbound,
                mode,
                MsgType::FolderEntry as u8,
                wire_entry.encode().map_err(|e| CoreError::protocol(e.to_string()))?,
            )
            .await?;

            if !entry.is_dir {
                self.send_chunk_stream(&entry.absolute_path, entry.size, outbound, mode, observer, cancel)
                    .await
                    .map_err(|e| {
                        observer.on_progress(Progress::failed(&e));
                        e
                    })?;
                bytes_sent += entry.size;
                observer.on_progress(Progress::Advanced {
                    bytes_done: bytes_sent,
                });
            }
        }

        self.send_with_retries(outbound, mode, MsgType::FolderEnd as u8, Vec::new())
            .await?;
        observer.on_progress(Progress::Completed);
        Ok(())
    }
}

struct WalkEntry {
    relative_path: String,
    absolute_path: PathBuf,
    is_dir: bool,
    size: u64,
    mtime_unix: u64,
}

/// Depth-first pre-order walk matching §4.7's send order: a directory
/// entry immediately precedes its children.
fn walk_folder(root: &Path) -> Result<Vec<WalkEntry>, CoreError> {
    let mut out = Vec::new();
    walk_into(root, root, &mut out)?;
    Ok(out)
}

fn walk_into(root: &Path, dir: &Path, out: &mut Vec<WalkEntry>) -> Result<(), CoreError> {
    let mut children: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    children.sort_by_key(|e| e.file_name());
    for child in children {
        let path = child.path();
        let metadata = child.metadata()?;
        let relative_path = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        if metadata.is_dir() {
            out.push(WalkEntry {
                relative_path,
                absolute_path: path.clone(),
                is_dir: true,
                size: 0,
                mtime_unix: unix_mtime(&metadata),
            });
            walk_into(root, &path, out)?;
        } else {
            out.push(WalkEntry {
                relative_path,
                absolute_path: path,
                is_dir: false,
                size: metadata.len(),
                mtime_unix: unix_mtime(&metadata),
            });
        }
    }
    Ok(())
}

/// Receive-side state machine for a single `FILE_START..FILE_END` run
/// (§4.7 "Receiving a file").
enum FileRecvState {
    Idle,
    Active {
        file: fs::File,
        dest_path: PathBuf,
        total_size: u64,
        bytes_written: u64,
        next_chunk: u32,
        total_chunks: u32,
    },
}

pub struct FileReceiver {
    dest_dir: PathBuf,
    state: FileRecvState,
}

impl FileReceiver {
    pub fn new(dest_dir: PathBuf) -> Self {
        Self {
            dest_dir,
            state: FileRecvState::Idle,
        }
    }

    pub async fn handle_message(
        &mut self,
        msg_type: u8,
        payload: &[u8],
        observer: &dyn ProgressObserver,
    ) -> Result<(), CoreError> {
        let mt = MsgType::try_from(msg_type).map_err(|e| CoreError::protocol(e.to_string()))?;
        match mt {
            MsgType::FileStart => {
                let header = FileHeader::decode(payload).map_err(|e| CoreError::protocol(e.to_string()))?;
                validate_file_name(&header.name)?;
                let dest_path = self.dest_dir.join(&header.name);
                let file = fs::File::create(&dest_path).await?;
                observer.on_progress(Progress::Started {
                    total_bytes: header.size,
                });
                self.state = FileRecvState::Active {
                    file,
                    dest_path,
                    total_size: header.size,
                    bytes_written: 0,
                    next_chunk: 0,
                    total_chunks: header.total_chunks,
                };
                Ok(())
            }
            MsgType::FileData => self.write_chunk(payload, observer).await,
            MsgType::FileEnd => {
                let FileRecvState::Active { mut file, bytes_written, total_size, .. } =
                    std::mem::replace(&mut self.state, FileRecvState::Idle)
                else {
                    return Err(CoreError::protocol("FILE_END with no active transfer"));
                };
                file.flush().await?;
                if bytes_written != total_size {
                    return Err(CoreError::protocol(format!(
                        "file ended after {bytes_written} of {total_size} declared bytes"
                    )));
                }
                observer.on_progress(Progress::Completed);
                info!(total_size, "file receive complete");
                Ok(())
            }
            other => Err(CoreError::protocol(format!(
                "unexpected message {:#04x} for file receiver",
                other as u8
            ))),
        }
    }

    async fn write_chunk(&mut self, payload: &[u8], observer: &dyn ProgressObserver) -> Result<(), CoreError> {
        let FileRecvState::Active {
            file,
            next_chunk,
            bytes_written,
            ..
        } = &mut self.state
        else {
            return Err(CoreError::protocol("FILE_DATA with no active transfer"));
        };

        let chunk_header = FileChunkHeader::decode(payload).map_err(|e| CoreError::protocol(e.to_string()))?;
        if chunk_header.chunk_index != *next_chunk {
            return Err(CoreError::protocol(format!(
                "out-of-order chunk: expected {}, got {}",
                next_chunk, chunk_header.chunk_index
            )));
        }
        if chunk_header.chunk_size as usize > rift_core::messages::MAX_CHUNK_SIZE {
            return Err(CoreError::protocol("chunk exceeds the 64 KiB ceiling"));
        }
        let body = &payload[FILE_CHUNK_HEADER_LEN..];
        if body.len() != chunk_header.chunk_size as usize {
            return Err(CoreError::protocol("chunk body does not match declared chunk_size"));
        }

        file.write_all(body).await?;
        *bytes_written += body.len() as u64;
        *next_chunk += 1;
        if *next_chunk % 32 == 0 {
            file.flush().await?;
        }
        observer.on_progress(Progress::Advanced {
            bytes_done: *bytes_written,
        });
        Ok(())
    }

    /// Abandon the active transfer and delete its partial file — the
    /// caller invokes this on cancellation or transport loss.
    pub async fn abort(&mut self) {
        if let FileRecvState::Active { dest_path, .. } =
            std::mem::replace(&mut self.state, FileRecvState::Idle)
        {
            let _ = fs::remove_file(&dest_path).await;
        }
    }
}

/// Receive-side state machine for a `FOLDER_START..FOLDER_END` run
/// (§4.7 "Receiving a folder"). Each `FOLDER_ENTRY` either creates a
/// subdirectory or opens the next file to receive; subsequent
/// `FILE_DATA` messages (with no `FILE_START`) route to that file.
pub struct FolderReceiver {
    staging_root: Option<PathBuf>,
    dest_parent: PathBuf,
    current_file: Option<(fs::File, PathBuf, u32, u64)>,
}

impl FolderReceiver {
    pub fn new(dest_parent: PathBuf) -> Self {
        Self {
            staging_root: None,
            dest_parent,
            current_file: None,
        }
    }

    pub async fn handle_message(
        &mut self,
        msg_type: u8,
        payload: &[u8],
        observer: &dyn ProgressObserver,
    ) -> Result<(), CoreError> {
        let mt = MsgType::try_from(msg_type).map_err(|e| CoreError::protocol(e.to_string()))?;
        match mt {
            MsgType::FolderStart => {
                let header =
                    FolderHeader::decode(payload).map_err(|e| CoreError::protocol(e.to_string()))?;
                validate_file_name(&header.folder_name)?;
                let root = self.dest_parent.join(&header.folder_name);
                fs::create_dir_all(&root).await?;
                observer.on_progress(Progress::Started {
                    total_bytes: header.total_size,
                });
                self.staging_root = Some(root);
                Ok(())
            }
            MsgType::FolderEntry => {
                let entry =
                    FolderEntry::decode(payload).map_err(|e| CoreError::protocol(e.to_string()))?;
                let root = self
                    .staging_root
                    .as_ref()
                    .ok_or_else(|| CoreError::protocol("FOLDER_ENTRY before FOLDER_START"))?;
                let path = root.join(&entry.relative_path);
                if entry.is_directory() {
                    fs::create_dir_all(&path).await?;
                } else {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                    let file = fs::File::create(&path).await?;
                    self.current_file = Some((file, path, 0, entry.size));
                }
                Ok(())
            }
            MsgType::FileData => {
                let (file, _path, next_chunk, _size) = self
                    .current_file
                    .as_mut()
                    .ok_or_else(|| CoreError::protocol("FILE_DATA with no active folder entry"))?;
                let chunk_header =
                    FileChunkHeader::decode(payload).map_err(|e| CoreError::protocol(e.to_string()))?;
                if chunk_header.chunk_index != *next_chunk {
                    return Err(CoreError::protocol("out-of-order chunk inside folder entry"));
                }
                let body = &payload[FILE_CHUNK_HEADER_LEN..];
                file.write_all(body).await?;
                *next_chunk += 1;
                if *next_chunk % 32 == 0 {
                    file.flush().await?;
                }
                Ok(())
            }
            MsgType::FolderEnd => {
                if let Some((mut file, _, _, _)) = self.current_file.take() {
                    file.flush().await?;
                }
                observer.on_progress(Progress::Completed);
                Ok(())
            }
            other => Err(CoreError::protocol(format!(
                "unexpected message {:#04x} for folder receiver",
                other as u8
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    struct RecordingObserver(Mutex<Vec<Progress>>);
    impl RecordingObserver {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }
    }
    impl ProgressObserver for RecordingObserver {
        fn on_progress(&self, event: Progress) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn outbound_pair() -> (OutboundHandle, mpsc::Receiver<(u8, u8, Vec<u8>)>) {
        crate::session::test_support::outbound_channel(64)
    }

    #[tokio::test]
    async fn send_and_receive_file_round_trips() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let src_path = src_dir.path().join("note.txt");
        let content = vec![7u8; 200_000];
        tokio::fs::write(&src_path, &content).await.unwrap();

        let engine = FileTransferEngine::new(CoreConfig::default());
        let (outbound, mut rx) = outbound_pair();
        let observer = RecordingObserver::new();
        let cancel = CancelToken::new();

        let sender = tokio::spawn({
            let outbound = outbound.clone();
            async move {
                engine
                    .send_file(&src_path, &outbound, WriterMode::Async, &observer, &cancel)
                    .await
                    .unwrap();
            }
        });

        let mut receiver = FileReceiver::new(dst_dir.path().to_path_buf());
        let recv_observer = RecordingObserver::new();
        while let Some((msg_type, _flags, payload)) = rx.recv().await {
            receiver
                .handle_message(msg_type, &payload, &recv_observer)
                .await
                .unwrap();
            if msg_type == MsgType::FileEnd as u8 {
                break;
            }
        }
        sender.await.unwrap();

        let received = tokio::fs::read(dst_dir.path().join("note.txt")).await.unwrap();
        assert_eq!(received, content);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_sending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        tokio::fs::write(&path, b"small").await.unwrap();

        let mut config = CoreConfig::default();
        config.file_size_cap = 1;
        let engine = FileTransferEngine::new(config);
        let (outbound, _rx) = outbound_pair();
        let observer = RecordingObserver::new();
        let cancel = CancelToken::new();

        let result = engine
            .send_file(&path, &outbound, WriterMode::Async, &observer, &cancel)
            .await;
        assert!(matches!(result, Err(CoreError::FileTooLarge(_, _))));
    }

    #[tokio::test]
    async fn empty_file_is_rejected_before_sending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        tokio::fs::write(&path, b"").await.unwrap();

        let engine = FileTransferEngine::new(CoreConfig::default());
        let (outbound, mut rx) = outbound_pair();
        let observer = RecordingObserver::new();
        let cancel = CancelToken::new();

        let result = engine
            .send_file(&path, &outbound, WriterMode::Async, &observer, &cancel)
            .await;
        assert!(matches!(result, Err(CoreError::Empty)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_send_stops_before_file_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, vec![1u8; 1_000_000]).await.unwrap();

        let engine = FileTransferEngine::new(CoreConfig::default());
        let (outbound, mut rx) = outbound_pair();
        let observer = RecordingObserver::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = engine
            .send_file(&path, &outbound, WriterMode::Async, &observer, &cancel)
            .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.0, MsgType::FileStart as u8);
        assert!(rx.try_recv().is_err() || rx.try_recv().unwrap().0 != MsgType::FileEnd as u8);
    }

    #[tokio::test]
    async fn folder_send_and_receive_round_trips() {
        let src = tempdir().unwrap();
        let root = src.path().join("project");
        tokio::fs::create_dir_all(root.join("sub")).await.unwrap();
        tokio::fs::write(root.join("a.txt"), b"aaa").await.unwrap();
        tokio::fs::write(root.join("sub/b.txt"), b"bbbbb").await.unwrap();

        let dst = tempdir().unwrap();
        let engine = FileTransferEngine::new(CoreConfig::default());
        let (outbound, mut rx) = outbound_pair();
        let observer = RecordingObserver::new();
        let cancel = CancelToken::new();

        let sender = tokio::spawn({
            let outbound = outbound.clone();
            async move {
                engine
                    .send_folder(&root, &outbound, WriterMode::Async, &observer, &cancel)
                    .await
                    .unwrap();
            }
        });

        let mut receiver = FolderReceiver::new(dst.path().to_path_buf());
        let recv_observer = RecordingObserver::new();
        while let Some((msg_type, _flags, payload)) = rx.recv().await {
            receiver
                .handle_message(msg_type, &payload, &recv_observer)
                .await
                .unwrap();
            if msg_type == MsgType::FolderEnd as u8 {
                break;
            }
        }
        sender.await.unwrap();

        let a = tokio::fs::read(dst.path().join("project/a.txt")).await.unwrap();
        let b = tokio::fs::read(dst.path().join("project/sub/b.txt")).await.unwrap();
        assert_eq!(a, b"aaa");
        assert_eq!(b, b"bbbbb");
    }

    #[test]
    fn pacing_follows_size_tiers() {
        assert_eq!(pacing_interval(200 * MIB, 3), Some(Duration::from_millis(30)));
        assert_eq!(pacing_interval(20 * MIB, 7), Some(Duration::from_millis(20)));
        assert_eq!(pacing_interval(1 * MIB, 15), Some(Duration::from_millis(5)));
        assert_eq!(pacing_interval(1 * MIB, 1), None);
    }

    #[test]
    fn rejects_unsafe_file_names() {
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("a/b").is_err());
        assert!(validate_file_name("ok.txt").is_ok());
    }
}
