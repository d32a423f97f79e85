use crate::errors::{PageStoreError, Result};
use crate::fix::{FixMode, UnfixMode};
use crate::frame::Frame;
use crate::page::Page;
use crate::PageId;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

#[derive(Debug)]
struct State {
    page_count: u32,
    attached: HashMap<PageId, Arc<Frame>>,
    /// Pages allocated since the last detach; rolled back on recover.
    newly_allocated: Vec<PageId>,
    verification: Option<HashSet<PageId>>,
}

/// A disk file of fixed-size pages.
///
/// Pages are fixed into in-memory frames and stay attached until the next
/// [`detach_page_all`](Self::detach_page_all) (success: dirty frames are
/// flushed) or [`recover_page_all`](Self::recover_page_all) (failure:
/// discardable snapshots are restored and nothing reaches disk). This gives
/// callers all-or-nothing semantics per operation without a log.
#[derive(Debug)]
pub struct PagedFile {
    path: PathBuf,
    file: File,
    page_size: usize,
    state: Mutex<State>,
}

impl PagedFile {
    /// Creates a new store. Fails if `path` already exists.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(PageStoreError::AlreadyExists(path));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PageStoreError::Io {
                path: path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| PageStoreError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file,
            page_size,
            state: Mutex::new(State {
                page_count: 0,
                attached: HashMap::new(),
                newly_allocated: Vec::new(),
                verification: None,
            }),
        })
    }

    /// Opens an existing store.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| PageStoreError::Io {
                path: path.clone(),
                source,
            })?;
        let len = file
            .metadata()
            .map_err(|source| PageStoreError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        let page_count = (len / page_size as u64) as u32;
        Ok(Self {
            path,
            file,
            page_size,
            state: Mutex::new(State {
                page_count,
                attached: HashMap::new(),
                newly_allocated: Vec::new(),
                verification: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fixes `page_id` under `mode` and returns a pinned handle.
    pub fn fix_page(&self, page_id: PageId, mode: FixMode) -> Result<Page> {
        let mut state = self.lock_state();
        if page_id >= state.page_count {
            return Err(PageStoreError::UnknownPage(page_id));
        }
        let frame = match state.attached.get(&page_id) {
            Some(frame) => Arc::clone(frame),
            None => {
                let data = self.read_page_bytes(page_id)?;
                let frame = Arc::new(Frame::new(page_id, data));
                state.attached.insert(page_id, Arc::clone(&frame));
                frame
            }
        };
        if mode.is_discardable() {
            let mut snapshot = frame.snapshot.lock().expect("snapshot latch poisoned");
            if snapshot.is_none() {
                let data = frame.data.read().expect("page latch poisoned");
                *snapshot = Some(data.clone());
            }
        }
        tracing::trace!(page_id, ?mode, "fix page");
        Ok(Page::new(frame))
    }

    /// Releases a page handle. `UnfixMode::Dirty` schedules the frame for
    /// the next successful detach.
    pub fn unfix_page(&self, page: Page, mode: UnfixMode) {
        if mode == UnfixMode::Dirty {
            page.frame.dirty.store(true, Ordering::Relaxed);
        }
        tracing::trace!(page_id = page.id(), ?mode, "unfix page");
        drop(page);
    }

    /// Appends a fresh zeroed page and fixes it under `mode`.
    pub fn allocate_page(&self, mode: FixMode) -> Result<Page> {
        let mut state = self.lock_state();
        let page_id = state.page_count;
        state.page_count += 1;
        state.newly_allocated.push(page_id);
        let frame = Arc::new(Frame::new(
            page_id,
            vec![0u8; self.page_size].into_boxed_slice(),
        ));
        // A fresh page must reach disk even if never modified again.
        frame.dirty.store(true, Ordering::Relaxed);
        if mode.is_discardable() {
            let mut snapshot = frame.snapshot.lock().expect("snapshot latch poisoned");
            *snapshot = Some(vec![0u8; self.page_size].into_boxed_slice());
        }
        state.attached.insert(page_id, Arc::clone(&frame));
        tracing::debug!(page_id, "allocate page");
        Ok(Page::new(frame))
    }

    pub fn last_page_id(&self) -> Option<PageId> {
        let state = self.lock_state();
        state.page_count.checked_sub(1)
    }

    pub fn next_page_id(&self, page_id: PageId) -> Option<PageId> {
        let state = self.lock_state();
        let next = page_id.checked_add(1)?;
        (next < state.page_count).then_some(next)
    }

    pub fn is_used_page(&self, page_id: PageId) -> bool {
        let state = self.lock_state();
        page_id < state.page_count
    }

    /// Successful-end epilogue: flushes dirty attached frames and drops all
    /// attachments and snapshots.
    pub fn detach_page_all(&self) -> Result<()> {
        let mut state = self.lock_state();
        for frame in state.attached.values() {
            if frame.dirty.load(Ordering::Relaxed) {
                let data = frame.data.read().expect("page latch poisoned");
                self.write_page_bytes(frame.page_id, &data)?;
                frame.dirty.store(false, Ordering::Relaxed);
            }
            *frame.snapshot.lock().expect("snapshot latch poisoned") = None;
        }
        state.attached.clear();
        state.newly_allocated.clear();
        Ok(())
    }

    /// Failure epilogue: restores discardable snapshots, rolls back pages
    /// allocated since the last detach, writes nothing.
    pub fn recover_page_all(&self) {
        let mut state = self.lock_state();
        for frame in state.attached.values() {
            let mut snapshot = frame.snapshot.lock().expect("snapshot latch poisoned");
            if let Some(saved) = snapshot.take() {
                let mut data = frame.data.write().expect("page latch poisoned");
                *data = saved;
            }
            frame.dirty.store(false, Ordering::Relaxed);
        }
        if let Some(first) = state.newly_allocated.iter().copied().min() {
            state.page_count = first;
        }
        state.newly_allocated.clear();
        state.attached.clear();
        tracing::debug!(path = %self.path.display(), "recovered attached pages");
    }

    /// Begins a verification pass; subsequent
    /// [`notify_use_page`](Self::notify_use_page) calls are recorded.
    pub fn start_verification(&self) {
        let mut state = self.lock_state();
        state.verification = Some(HashSet::new());
    }

    /// Records `page_id` as in use by the caller's own structures.
    pub fn notify_use_page(&self, page_id: PageId) {
        let mut state = self.lock_state();
        if let Some(used) = state.verification.as_mut() {
            used.insert(page_id);
        }
    }

    /// Fixes a page during verification and records it as visited.
    pub fn verify_page(&self, page_id: PageId, mode: FixMode) -> Result<Page> {
        self.notify_use_page(page_id);
        self.fix_page(page_id, mode)
    }

    /// Ends the verification pass and returns every allocated page the
    /// caller never claimed, ascending.
    pub fn end_verification(&self) -> Vec<PageId> {
        let mut state = self.lock_state();
        let used = state.verification.take().unwrap_or_default();
        let mut unused: Vec<PageId> = (0..state.page_count)
            .filter(|id| !used.contains(id))
            .collect();
        unused.sort_unstable();
        unused
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("page store state poisoned")
    }

    fn read_page_bytes(&self, page_id: PageId) -> Result<Box<[u8]>> {
        let mut buf = vec![0u8; self.page_size];
        let offset = page_id as u64 * self.page_size as u64;
        let mut read = 0;
        while read < self.page_size {
            let n = self
                .read_at(&mut buf[read..], offset + read as u64)
                .map_err(|source| PageStoreError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            if n == 0 {
                // Allocated but never flushed; the remainder reads as zero.
                break;
            }
            read += n;
        }
        Ok(buf.into_boxed_slice())
    }

    fn write_page_bytes(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let offset = page_id as u64 * self.page_size as u64;
        let mut written = 0;
        while written < data.len() {
            let n = self
                .write_at(&data[written..], offset + written as u64)
                .map_err(|source| PageStoreError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            if n == 0 {
                return Err(PageStoreError::Io {
                    path: self.path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "disk write made no progress",
                    ),
                });
            }
            written += n;
        }
        Ok(())
    }

    #[inline]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        #[cfg(unix)]
        {
            self.file.read_at(buf, offset)
        }
        #[cfg(windows)]
        {
            self.file.seek_read(buf, offset)
        }
    }

    #[inline]
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        #[cfg(unix)]
        {
            self.file.write_at(buf, offset)
        }
        #[cfg(windows)]
        {
            self.file.seek_write(buf, offset)
        }
    }
}
