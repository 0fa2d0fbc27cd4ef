//! Wire encoding for the per-message payloads dispatched inside a
//! peer session (§3 Data Model, §4.6 Dispatch, §4.7 File Transfer).
//!
//! Every struct here is a pure, allocation-light encode/decode pair.
//! Validation beyond "does this parse" (path traversal, size caps,
//! sequencing) is the File Transfer Engine's job in `wavry-peer`.

use crate::frame::FrameError;

/// Fixed on-wire name field width used by `FileHeader`/`FolderHeader`.
pub const NAME_FIELD_LEN: usize = 260;

fn write_fixed_name(buf: &mut [u8], name: &str) -> Result<(), FrameError> {
    let bytes = name.as_bytes();
    if bytes.len() >= NAME_FIELD_LEN {
        return Err(FrameError::PayloadLengthMismatch);
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn read_fixed_name(buf: &[u8]) -> Result<String, FrameError> {
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..nul].to_vec()).map_err(|_| FrameError::PayloadLengthMismatch)
}

/// `{x, y, w, h: u16, encoding: u8, reserved: u8, data_size: u32}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRectHeader {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
    pub encoding: u8,
    pub data_size: u32,
}

pub const SCREEN_RECT_HEADER_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PixelEncoding {
    Raw = 0,
    Rle = 1,
}

impl TryFrom<u8> for PixelEncoding {
    type Error = FrameError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PixelEncoding::Raw),
            1 => Ok(PixelEncoding::Rle),
            other => Err(FrameError::UnknownMsgType(other)),
        }
    }
}

impl ScreenRectHeader {
    pub fn encode(&self) -> [u8; SCREEN_RECT_HEADER_LEN] {
        let mut buf = [0u8; SCREEN_RECT_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.x.to_le_bytes());
        buf[2..4].copy_from_slice(&self.y.to_le_bytes());
        buf[4..6].copy_from_slice(&self.w.to_le_bytes());
        buf[6..8].copy_from_slice(&self.h.to_le_bytes());
        buf[8] = self.encoding;
        buf[9] = 0; // reserved
        buf[10..14].copy_from_slice(&(self.data_size).to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < SCREEN_RECT_HEADER_LEN {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            x: u16::from_le_bytes([buf[0], buf[1]]),
            y: u16::from_le_bytes([buf[2], buf[3]]),
            w: u16::from_le_bytes([buf[4], buf[5]]),
            h: u16::from_le_bytes([buf[6], buf[7]]),
            encoding: buf[8],
            data_size: u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]),
        })
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MouseButtons: u8 {
        const LEFT = 0b001;
        const RIGHT = 0b010;
        const MIDDLE = 0b100;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MouseFlags: u8 {
        const MOVE = 0x01;
        const DOWN = 0x02;
        const UP = 0x04;
        const WHEEL = 0x08;
    }
}

/// `{x, y: u16, buttons: u8, flags: u8, wheel_delta: i16}` (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub x: u16,
    pub y: u16,
    pub buttons: MouseButtons,
    pub flags: MouseFlags,
    pub wheel_delta: i16,
}

pub const MOUSE_EVENT_LEN: usize = 8;

impl MouseEvent {
    pub fn encode(&self) -> [u8; MOUSE_EVENT_LEN] {
        let mut buf = [0u8; MOUSE_EVENT_LEN];
        buf[0..2].copy_from_slice(&self.x.to_le_bytes());
        buf[2..4].copy_from_slice(&self.y.to_le_bytes());
        buf[4] = self.buttons.bits();
        buf[5] = self.flags.bits();
        buf[6..8].copy_from_slice(&self.wheel_delta.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < MOUSE_EVENT_LEN {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            x: u16::from_le_bytes([buf[0], buf[1]]),
            y: u16::from_le_bytes([buf[2], buf[3]]),
            buttons: MouseButtons::from_bits_truncate(buf[4]),
            flags: MouseFlags::from_bits_truncate(buf[5]),
            wheel_delta: i16::from_le_bytes([buf[6], buf[7]]),
        })
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyFlags: u8 {
        const DOWN = 0x01;
        const UP = 0x02;
        const EXTENDED = 0x04;
    }
}

/// `{vk, scan: u16, flags: u8, reserved[3]}` (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub vk: u16,
    pub scan: u16,
    pub flags: KeyFlags,
}

pub const KEY_EVENT_LEN: usize = 8;

impl KeyEvent {
    pub fn encode(&self) -> [u8; KEY_EVENT_LEN] {
        let mut buf = [0u8; KEY_EVENT_LEN];
        buf[0..2].copy_from_slice(&self.vk.to_le_bytes());
        buf[2..4].copy_from_slice(&self.scan.to_le_bytes());
        buf[4] = self.flags.bits();
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < KEY_EVENT_LEN {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            vk: u16::from_le_bytes([buf[0], buf[1]]),
            scan: u16::from_le_bytes([buf[2], buf[3]]),
            flags: KeyFlags::from_bits_truncate(buf[4]),
        })
    }
}

/// `{name[260], size_hi, size_lo, file_count, total_chunks: u32}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    pub size: u64,
    pub file_count: u32,
    pub total_chunks: u32,
}

pub const FILE_HEADER_LEN: usize = NAME_FIELD_LEN + 16;

impl FileHeader {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = vec![0u8; FILE_HEADER_LEN];
        write_fixed_name(&mut buf[..NAME_FIELD_LEN], &self.name)?;
        let size_hi = (self.size >> 32) as u32;
        let size_lo = (self.size & 0xFFFF_FFFF) as u32;
        buf[260..264].copy_from_slice(&size_hi.to_le_bytes());
        buf[264..268].copy_from_slice(&size_lo.to_le_bytes());
        buf[268..272].copy_from_slice(&self.file_count.to_le_bytes());
        buf[272..276].copy_from_slice(&self.total_chunks.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FILE_HEADER_LEN {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        let name = read_fixed_name(&buf[..NAME_FIELD_LEN])?;
        let size_hi = u32::from_le_bytes([buf[260], buf[261], buf[262], buf[263]]);
        let size_lo = u32::from_le_bytes([buf[264], buf[265], buf[266], buf[267]]);
        let file_count = u32::from_le_bytes([buf[268], buf[269], buf[270], buf[271]]);
        let total_chunks = u32::from_le_bytes([buf[272], buf[273], buf[274], buf[275]]);
        Ok(Self {
            name,
            size: (u64::from(size_hi) << 32) | u64::from(size_lo),
            file_count,
            total_chunks,
        })
    }
}

/// `{chunk_index, chunk_size: u32}` followed by the chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileChunkHeader {
    pub chunk_index: u32,
    pub chunk_size: u32,
}

pub const FILE_CHUNK_HEADER_LEN: usize = 8;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

impl FileChunkHeader {
    pub fn encode(&self) -> [u8; FILE_CHUNK_HEADER_LEN] {
        let mut buf = [0u8; FILE_CHUNK_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.chunk_index.to_le_bytes());
        buf[4..8].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FILE_CHUNK_HEADER_LEN {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            chunk_index: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            chunk_size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// `FOLDER_START`: `{folder_name[260], total_files, total_folders,
/// total_size_hi, total_size_lo: u32}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderHeader {
    pub folder_name: String,
    pub total_files: u32,
    pub total_folders: u32,
    pub total_size: u64,
}

pub const FOLDER_HEADER_LEN: usize = NAME_FIELD_LEN + 16;

impl FolderHeader {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = vec![0u8; FOLDER_HEADER_LEN];
        write_fixed_name(&mut buf[..NAME_FIELD_LEN], &self.folder_name)?;
        buf[260..264].copy_from_slice(&self.total_files.to_le_bytes());
        buf[264..268].copy_from_slice(&self.total_folders.to_le_bytes());
        let size_hi = (self.total_size >> 32) as u32;
        let size_lo = (self.total_size & 0xFFFF_FFFF) as u32;
        buf[268..272].copy_from_slice(&size_hi.to_le_bytes());
        buf[272..276].copy_from_slice(&size_lo.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FOLDER_HEADER_LEN {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        let folder_name = read_fixed_name(&buf[..NAME_FIELD_LEN])?;
        let total_files = u32::from_le_bytes([buf[260], buf[261], buf[262], buf[263]]);
        let total_folders = u32::from_le_bytes([buf[264], buf[265], buf[266], buf[267]]);
        let size_hi = u32::from_le_bytes([buf[268], buf[269], buf[270], buf[271]]);
        let size_lo = u32::from_le_bytes([buf[272], buf[273], buf[274], buf[275]]);
        Ok(Self {
            folder_name,
            total_files,
            total_folders,
            total_size: (u64::from(size_hi) << 32) | u64::from(size_lo),
        })
    }
}

pub const FOLDER_ATTR_DIRECTORY: u32 = 0x10; // FILE_ATTRIBUTE_DIRECTORY

/// `FOLDER_ENTRY`: `{relative_path (u16-prefixed), attributes,
/// size_hi, size_lo: u32, mtime: u64}`. Unlike `FileHeader`'s fixed
/// 260-byte name, a relative path inside a deep tree can exceed that,
/// so it is length-prefixed instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub relative_path: String,
    pub attributes: u32,
    pub size: u64,
    pub mtime_unix: u64,
}

impl FolderEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes & FOLDER_ATTR_DIRECTORY != 0
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let path_bytes = self.relative_path.as_bytes();
        if path_bytes.len() > u16::MAX as usize {
            return Err(FrameError::PayloadLengthMismatch);
        }
        let mut buf = Vec::with_capacity(2 + path_bytes.len() + 20);
        buf.extend_from_slice(&(path_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(path_bytes);
        buf.extend_from_slice(&self.attributes.to_le_bytes());
        let size_hi = (self.size >> 32) as u32;
        let size_lo = (self.size & 0xFFFF_FFFF) as u32;
        buf.extend_from_slice(&size_hi.to_le_bytes());
        buf.extend_from_slice(&size_lo.to_le_bytes());
        buf.extend_from_slice(&self.mtime_unix.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 2 {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        let path_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let rest = &buf[2..];
        if rest.len() < path_len + 16 {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        let relative_path = String::from_utf8(rest[..path_len].to_vec())
            .map_err(|_| FrameError::PayloadLengthMismatch)?;
        let tail = &rest[path_len..];
        let attributes = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let size_hi = u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]);
        let size_lo = u32::from_le_bytes([tail[8], tail[9], tail[10], tail[11]]);
        let mtime_unix = u64::from_le_bytes([
            tail[12], tail[13], tail[14], tail[15], tail[16], tail[17], tail[18], tail[19],
        ]);
        Ok(Self {
            relative_path,
            attributes,
            size: (u64::from(size_hi) << 32) | u64::from(size_lo),
            mtime_unix,
        })
    }
}

/// `{data_length: u32, is_file: u8, reserved[3]}` followed by bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardPayload {
    pub is_file: bool,
    pub data: Vec<u8>,
}

pub const CLIPBOARD_HEADER_LEN: usize = 8;

impl ClipboardPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CLIPBOARD_HEADER_LEN + self.data.len());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.push(self.is_file as u8);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < CLIPBOARD_HEADER_LEN {
            return Err(FrameError::HeaderTooShort(buf.len()));
        }
        let data_length =
            u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let is_file = buf[4] != 0;
        if buf.len() < CLIPBOARD_HEADER_LEN + data_length {
            return Err(FrameError::PayloadLengthMismatch);
        }
        Ok(Self {
            is_file,
            data: buf[CLIPBOARD_HEADER_LEN..CLIPBOARD_HEADER_LEN + data_length].to_vec(),
        })
    }

    /// Build a file-list clipboard payload: a 32-bit count followed by
    /// null-terminated path strings (§3).
    pub fn from_file_paths(paths: &[String]) -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(&(paths.len() as u32).to_le_bytes());
        for path in paths {
            data.extend_from_slice(path.as_bytes());
            data.push(0);
        }
        Self {
            is_file: true,
            data,
        }
    }

    pub fn file_paths(&self) -> Result<Vec<String>, FrameError> {
        if !self.is_file || self.data.len() < 4 {
            return Err(FrameError::PayloadLengthMismatch);
        }
        let count =
            u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]);
        let mut paths = Vec::with_capacity(count as usize);
        let mut rest = &self.data[4..];
        for _ in 0..count {
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(FrameError::PayloadLengthMismatch)?;
            let path = String::from_utf8(rest[..nul].to_vec())
                .map_err(|_| FrameError::PayloadLengthMismatch)?;
            paths.push(path);
            rest = &rest[nul + 1..];
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_rect_header_round_trips() {
        let header = ScreenRectHeader {
            x: 10,
            y: 20,
            w: 640,
            h: 480,
            encoding: PixelEncoding::Rle as u8,
            data_size: 123_456,
        };
        assert_eq!(ScreenRectHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn mouse_event_round_trips() {
        let ev = MouseEvent {
            x: 100,
            y: 200,
            buttons: MouseButtons::LEFT,
            flags: MouseFlags::DOWN,
            wheel_delta: -5,
        };
        assert_eq!(MouseEvent::decode(&ev.encode()).unwrap(), ev);
    }

    #[test]
    fn key_event_round_trips() {
        let ev = KeyEvent {
            vk: 0x41,
            scan: 0x1e,
            flags: KeyFlags::DOWN | KeyFlags::EXTENDED,
        };
        assert_eq!(KeyEvent::decode(&ev.encode()).unwrap(), ev);
    }

    #[test]
    fn file_header_round_trips() {
        let fh = FileHeader {
            name: "report.pdf".to_string(),
            size: 104_857_600,
            file_count: 1,
            total_chunks: 3200,
        };
        let wire = fh.encode().unwrap();
        assert_eq!(FileHeader::decode(&wire).unwrap(), fh);
    }

    #[test]
    fn folder_entry_round_trips_nested_path() {
        let entry = FolderEntry {
            relative_path: "sub/b.txt".to_string(),
            attributes: 0,
            size: 20,
            mtime_unix: 1_700_000_000,
        };
        let wire = entry.encode().unwrap();
        assert_eq!(FolderEntry::decode(&wire).unwrap(), entry);
        assert!(!entry.is_directory());
    }

    #[test]
    fn folder_entry_directory_flag() {
        let entry = FolderEntry {
            relative_path: "sub".to_string(),
            attributes: FOLDER_ATTR_DIRECTORY,
            size: 0,
            mtime_unix: 0,
        };
        assert!(entry.is_directory());
    }

    #[test]
    fn clipboard_text_round_trips() {
        let cp = ClipboardPayload {
            is_file: false,
            data: b"hello clipboard".to_vec(),
        };
        let wire = cp.encode();
        assert_eq!(ClipboardPayload::decode(&wire).unwrap(), cp);
    }

    #[test]
    fn clipboard_file_list_round_trips() {
        let paths = vec!["C:\\a.txt".to_string(), "C:\\b.txt".to_string()];
        let cp = ClipboardPayload::from_file_paths(&paths);
        let wire = cp.encode();
        let decoded = ClipboardPayload::decode(&wire).unwrap();
        assert_eq!(decoded.file_paths().unwrap(), paths);
    }
}
