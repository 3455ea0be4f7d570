/// Candidate resolution and matching
///
/// A handle value from the snapshot is never inspected directly. It is
/// duplicated with the same access rights, the duplicate is resolved to its
/// final path, and the duplicate is closed again before anything else
/// happens. Handle tables change under our feet, so every failure on the
/// way (not a file, access denied, already closed) just drops the candidate.
use crate::config::types::HandleValue;
use crate::kernel::handle_table::HandleEntry;
use crate::kernel::HandleApi;
use crate::utils::path_norm::NormalizedPath;

/// Duplicated handle, closed on drop
struct LocalHandle<'a, A: HandleApi + ?Sized> {
    api: &'a A,
    value: HandleValue,
}

impl<'a, A: HandleApi + ?Sized> LocalHandle<'a, A> {
    fn duplicate(api: &'a A, source: HandleValue) -> std::io::Result<Self> {
        let value = api.duplicate_handle(source)?;
        Ok(Self { api, value })
    }
}

impl<A: HandleApi + ?Sized> Drop for LocalHandle<'_, A> {
    fn drop(&mut self) {
        if !self.api.close_handle(self.value) {
            log::warn!("Failed to close duplicated handle {}", self.value);
        }
    }
}

/// Own-process handle together with the file it resolved to
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ResolvedHandle {
    pub entry: HandleEntry,
    pub path: NormalizedPath,
}

/// Resolve one own-process handle to its normalized path
pub fn resolve_entry<A: HandleApi + ?Sized>(api: &A, entry: &HandleEntry) -> Option<NormalizedPath> {
    let duplicate = match LocalHandle::duplicate(api, entry.handle_value) {
        Ok(handle) => handle,
        Err(e) => {
            log::debug!("Skipping handle {}: duplicate failed: {}", entry.handle_value, e);
            return None;
        }
    };

    let resolved = api.final_path_name(duplicate.value);
    drop(duplicate);

    match resolved {
        Ok(raw) => Some(NormalizedPath::from_kernel_path(&raw)),
        Err(e) => {
            log::debug!("Skipping handle {}: no final path: {}", entry.handle_value, e);
            None
        }
    }
}

/// Walk the caller's own entries and resolve each one.
///
/// Entries owned by other processes are never touched.
pub struct CandidateWalk<'a, A: HandleApi + ?Sized, I> {
    api: &'a A,
    entries: I,
    own_pid: u32,
    pub own_handles: usize,
    pub unresolved: usize,
}

impl<'a, A, I> CandidateWalk<'a, A, I>
where
    A: HandleApi + ?Sized,
    I: Iterator<Item = HandleEntry>,
{
    pub fn new(api: &'a A, entries: I) -> Self {
        Self {
            api,
            entries,
            own_pid: api.current_process_id(),
            own_handles: 0,
            unresolved: 0,
        }
    }
}

impl<A, I> Iterator for CandidateWalk<'_, A, I>
where
    A: HandleApi + ?Sized,
    I: Iterator<Item = HandleEntry>,
{
    type Item = ResolvedHandle;

    fn next(&mut self) -> Option<ResolvedHandle> {
        for entry in self.entries.by_ref() {
            if entry.process_id != self.own_pid {
                continue;
            }
            self.own_handles += 1;

            match resolve_entry(self.api, &entry) {
                Some(path) => return Some(ResolvedHandle { entry, path }),
                None => self.unresolved += 1,
            }
        }
        None
    }
}
