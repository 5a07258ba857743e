//! Publishing provider images into the process
//!
//! An image is written to a file the kernel can resolve (an anonymous memfd
//! by default, or a real file in a directory) and that file is mapped
//! read+execute. The mapping is what gets executed when a probe fires; the
//! file path is what external tracers attach uprobes to.
//!
//! Publishing never fails the caller. When any step is unavailable, the
//! image stays in memory only and its probes become no-ops.

#![allow(unsafe_code)] // memfd_create, mmap and munmap require unsafe

use log::{debug, warn};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Where provider images are published
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImageBacking {
    /// Anonymous memory file, visible as `/proc/<pid>/fd/<fd>`
    #[default]
    Memfd,
    /// `<dir>/<provider>-<pid>.so`, removed when the provider is dropped
    Directory(PathBuf),
    /// Not published: notes are inspectable, probes never fire
    InMemory,
}

/// Executable mapping of one image
pub(crate) struct Mapping {
    addr: NonNull<u8>,
    len: usize,
}

// The mapping is immutable (PROT_READ | PROT_EXEC) for its whole lifetime.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    pub(crate) fn base(&self) -> *const u8 {
        self.addr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: addr/len come from a successful mmap and are unmapped once.
        let rc = unsafe { libc::munmap(self.addr.as_ptr().cast(), self.len) };
        if rc != 0 {
            warn!("munmap of provider image failed: {}", io::Error::last_os_error());
        }
    }
}

/// A published image: backing file plus its executable mapping
pub(crate) struct PublishedImage {
    path: Option<PathBuf>,
    remove_on_drop: bool,
    mapping: Option<Mapping>,
    // Keeps the memfd alive, and with it the /proc/<pid>/fd path
    _file: Option<File>,
}

impl PublishedImage {
    fn detached() -> Self {
        Self { path: None, remove_on_drop: false, mapping: None, _file: None }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn mapping(&self) -> Option<&Mapping> {
        self.mapping.as_ref()
    }
}

impl Drop for PublishedImage {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }
        if let Some(path) = &self.path {
            if let Err(e) = std::fs::remove_file(path) {
                debug!("Could not remove {}: {e}", path.display());
            }
        }
    }
}

/// Publish `image` for `provider` according to `backing`
pub(crate) fn publish(provider: &str, image: &[u8], backing: &ImageBacking) -> PublishedImage {
    let created = match backing {
        ImageBacking::InMemory => return PublishedImage::detached(),
        ImageBacking::Memfd => create_memfd(provider, image).map(|(file, path)| (file, path, false)),
        ImageBacking::Directory(dir) => {
            create_in_directory(dir, provider, image).map(|(file, path)| (file, path, true))
        }
    };

    let (file, path, remove_on_drop) = match created {
        Ok(created) => created,
        Err(e) => {
            warn!("Cannot publish provider {provider}: {e}; its probes will not fire");
            return PublishedImage::detached();
        }
    };

    let mapping = if prodbp_common::probes_supported() {
        match map_executable(&file, image.len()) {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                warn!("Cannot map provider {provider} executable: {e}; its probes will not fire");
                None
            }
        }
    } else {
        warn!("Probe stubs are not supported on this architecture; provider {provider} is inert");
        None
    };

    debug!("Published provider {provider} at {}", path.display());
    PublishedImage { path: Some(path), remove_on_drop, mapping, _file: Some(file) }
}

#[cfg(target_os = "linux")]
fn create_memfd(provider: &str, image: &[u8]) -> io::Result<(File, PathBuf)> {
    use std::ffi::CString;
    use std::os::fd::{AsRawFd, FromRawFd};

    let name = CString::new(format!("prodbp_{provider}"))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: name is a valid NUL-terminated string for the duration of the call.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by memfd_create and is owned by nobody else.
    let mut file = unsafe { File::from_raw_fd(fd) };
    file.write_all(image)?;

    let path = PathBuf::from(format!("/proc/{}/fd/{}", std::process::id(), file.as_raw_fd()));
    Ok((file, path))
}

#[cfg(not(target_os = "linux"))]
fn create_memfd(_provider: &str, _image: &[u8]) -> io::Result<(File, PathBuf)> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "memfd_create is Linux only"))
}

/// File name of a directory-backed image; unique per process
fn image_file_name(provider: &str) -> String {
    format!("{provider}-{}.so", std::process::id())
}

fn create_in_directory(dir: &Path, provider: &str, image: &[u8]) -> io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(image_file_name(provider));
    // Never take over a file another publisher owns and will remove
    let mut file = File::options().write(true).create_new(true).open(&path)?;
    file.write_all(image)?;
    file.sync_all()?;
    Ok((file, path))
}

#[cfg(unix)]
fn map_executable(file: &File, len: usize) -> io::Result<Mapping> {
    use std::os::fd::AsRawFd;

    if len == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty image"));
    }
    // SAFETY: a fresh private read+exec mapping of a file we own; no existing
    // memory is affected.
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_EXEC,
            libc::MAP_PRIVATE,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    let addr = NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| io::Error::other("mmap returned null"))?;
    Ok(Mapping { addr, len })
}

#[cfg(not(unix))]
fn map_executable(_file: &File, _len: usize) -> io::Result<Mapping> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "executable mappings need a unix host"))
}
