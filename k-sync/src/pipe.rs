//! The duplex sync protocol.
//!
//! Frames are length-delimited JSON records; file bodies travel as raw byte
//! runs between frames, in the exact order of the missing-path list. The
//! sequence is fixed:
//!
//! 1. sender → destination directory
//! 2. sender → source manifest
//! 3. receiver → list of paths it needs
//! 4. sender → one body per requested path
//! 5. receiver → total count of changes applied

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SyncError};
use crate::walk::{walk_tree, FileMeta};

const MAX_FRAME: u32 = 64 << 20;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
enum Frame {
    Dest(String),
    Manifest(BTreeMap<String, FileMeta>),
    Missing(Vec<String>),
    Count(u64),
}

/// One side of the sync protocol over any reliable byte stream.
pub struct Pipe<R: Read, W: Write> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> Pipe<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Pipe { reader, writer }
    }

    /// Sender side: synchronize `local_dir` into `remote_dir` on the peer.
    /// Returns the number of changes the receiver applied.
    pub fn send(&mut self, local_dir: &Path, remote_dir: &str) -> Result<u64, SyncError> {
        self.send_frame(&Frame::Dest(remote_dir.to_string()))?;
        let manifest = walk_tree(local_dir)?;
        self.send_frame(&Frame::Manifest(manifest.clone()))?;

        let Frame::Missing(missing) = self.recv_frame()? else {
            return Err(SyncError::UnexpectedFrame { expected: "missing" });
        };
        for path in &missing {
            let meta = manifest
                .get(path)
                .ok_or_else(|| SyncError::UnknownPath(path.clone()))?;
            self.send_file(&local_dir.join(path), meta.size)?;
            tracing::debug!("sent {} ({} bytes)", path, meta.size);
        }

        let Frame::Count(n) = self.recv_frame()? else {
            return Err(SyncError::UnexpectedFrame { expected: "count" });
        };
        Ok(n)
    }

    /// Receiver side: reconcile the destination named in the first frame
    /// with the sender's manifest, then report the change count.
    pub fn receive(&mut self) -> Result<(), SyncError> {
        let Frame::Dest(dir) = self.recv_frame()? else {
            return Err(SyncError::UnexpectedFrame { expected: "dest" });
        };
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let local = walk_tree(&dir)?;

        let Frame::Manifest(remote) = self.recv_frame()? else {
            return Err(SyncError::UnexpectedFrame { expected: "manifest" });
        };

        let mut n: u64 = 0;
        let mut missing = Vec::new();
        for (path, fr) in &remote {
            let fl = local.get(path);
            let differs = fl.is_none_or(|fl| fl.sha != fr.sha);
            let apath = dir.join(path);
            if fr.symlink && differs {
                n += 1;
                replace_with_symlink(&apath, &fr.sha)?;
            } else if differs {
                n += 1;
                missing.push(path.clone());
            } else if let Some(fl) = fl {
                if fl.mode != fr.mode {
                    n += 1;
                    chmod(&apath, fr.mode)?;
                }
            }
        }
        self.send_frame(&Frame::Missing(missing.clone()))?;

        for path in &missing {
            let fr = &remote[path];
            let apath = dir.join(path);
            if let Some(parent) = apath.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            self.receive_file(&apath, fr.mode, fr.size)?;
        }

        for path in local.keys() {
            if !remote.contains_key(path) {
                n += 1;
                let apath = dir.join(path);
                std::fs::remove_file(&apath).map_err(|e| io_err(&apath, e))?;
            }
        }
        self.send_frame(&Frame::Count(n))
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), SyncError> {
        let payload = serde_json::to_vec(frame)?;
        self.writer
            .write_all(&(payload.len() as u32).to_be_bytes())
            .map_err(stream_err)?;
        self.writer.write_all(&payload).map_err(stream_err)?;
        self.writer.flush().map_err(stream_err)
    }

    fn recv_frame(&mut self) -> Result<Frame, SyncError> {
        let mut len = [0u8; 4];
        self.reader.read_exact(&mut len).map_err(stream_err)?;
        let len = u32::from_be_bytes(len);
        if len > MAX_FRAME {
            return Err(SyncError::FrameTooLarge(len));
        }
        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload).map_err(stream_err)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    fn send_file(&mut self, path: &Path, size: u64) -> Result<(), SyncError> {
        let mut file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
        let copied = std::io::copy(&mut file, &mut self.writer).map_err(|e| io_err(path, e))?;
        if copied != size {
            return Err(SyncError::BadCopy {
                path: path.display().to_string(),
                actual: copied,
                expected: size,
            });
        }
        self.writer.flush().map_err(stream_err)
    }

    /// Replace the destination file so the declared mode applies at
    /// creation, then stream exactly `size` bytes into it.
    fn receive_file(&mut self, path: &Path, mode: u32, size: u64) -> Result<(), SyncError> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(path, err)),
        }
        let mut file = open_create(path, mode)?;
        let copied =
            std::io::copy(&mut self.reader.by_ref().take(size), &mut file).map_err(|e| io_err(path, e))?;
        if copied != size {
            return Err(SyncError::BadCopy {
                path: path.display().to_string(),
                actual: copied,
                expected: size,
            });
        }
        // The creation mode is subject to the umask; make it exact.
        chmod(path, mode)
    }
}

fn stream_err(source: std::io::Error) -> SyncError {
    io_err("sync stream", source)
}

fn replace_with_symlink(path: &Path, target: &str) -> Result<(), SyncError> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            std::fs::remove_dir_all(path).map_err(|e| io_err(path, e))?
        }
        Ok(_) => std::fs::remove_file(path).map_err(|e| io_err(path, e))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(path, err)),
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    symlink(target, path)
}

#[cfg(unix)]
fn symlink(target: &str, path: &Path) -> Result<(), SyncError> {
    std::os::unix::fs::symlink(target, path).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn symlink(_target: &str, path: &Path) -> Result<(), SyncError> {
    Err(io_err(
        path,
        std::io::Error::other("symlinks require a unix host"),
    ))
}

#[cfg(unix)]
fn open_create(path: &Path, mode: u32) -> Result<std::fs::File, SyncError> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode & 0o7777)
        .open(path)
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn open_create(path: &Path, _mode: u32) -> Result<std::fs::File, SyncError> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}

#[cfg(unix)]
fn chmod(path: &Path, mode: u32) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn chmod(_path: &Path, _mode: u32) -> Result<(), SyncError> {
    Ok(())
}
