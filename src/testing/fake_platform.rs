/// In-memory platform for exercising the liberation flow off Windows
///
/// Models a machine-wide handle table (handles owned by this and other
/// processes), handle duplication, path resolution, and a Restart Manager
/// that releases other processes' handles on forced shutdown. Every native
/// call is counted so tests can assert on cleanup discipline.
use crate::config::types::{HandleValue, NtStatus};
use crate::kernel::handle_table::{encode_table, EntryLayout, HandleEntry};
use crate::kernel::restart_manager::NOTHING_HELD_CODE;
use crate::kernel::{HandleApi, RestartManagerApi, SessionIdentity};
use crate::utils::path_norm::NormalizedPath;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

const FILE_TYPE_INDEX: u16 = 37;
const EVENT_TYPE_INDEX: u16 = 16;
const FIRST_DUPLICATE_VALUE: usize = 0x10_0000;

/// One open handle somewhere on the fake machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeHandle {
    pub owner_pid: u32,
    pub value: HandleValue,
    /// `None` for objects that are not files
    pub path: Option<String>,
    pub granted_access: u32,
    pub object_type_index: u16,
}

impl FakeHandle {
    pub fn file(owner_pid: u32, value: usize, path: impl Into<String>) -> Self {
        Self {
            owner_pid,
            value: HandleValue(value),
            path: Some(path.into()),
            granted_access: 0x0012_019F,
            object_type_index: FILE_TYPE_INDEX,
        }
    }

    /// A handle to something without a file path (event, mutex, ...)
    pub fn object(owner_pid: u32, value: usize) -> Self {
        Self {
            owner_pid,
            value: HandleValue(value),
            path: None,
            granted_access: 0x001F_0003,
            object_type_index: EVENT_TYPE_INDEX,
        }
    }
}

/// Scripted answer for one handle-table query
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryStep {
    /// Report a short buffer and ask for this many bytes
    TooSmall(u32),
    /// Fail with this status
    Fail(NtStatus),
}

#[derive(Default)]
struct FakeState {
    handles: Vec<FakeHandle>,
    closed: Vec<HandleValue>,
    duplicates: HashMap<HandleValue, Option<String>>,
    next_duplicate: usize,
    duplicates_created: usize,
    denied_duplicates: HashSet<HandleValue>,
    refused_closes: HashSet<HandleValue>,
    query_steps: VecDeque<QueryStep>,
    query_sizes: Vec<usize>,

    next_session: u32,
    sessions_started: usize,
    ended_sessions: Vec<u32>,
    registered: Vec<(u32, String)>,
    shutdown_flags: Vec<u32>,
    released: Vec<FakeHandle>,
    rm_start_error: Option<u32>,
    rm_register_error: Option<u32>,
    rm_shutdown_code: Option<u32>,
    rm_end_code: u32,
}

/// Substitutable platform; see module docs
pub struct FakePlatform {
    pid: u32,
    layout: EntryLayout,
    state: Mutex<FakeState>,
}

impl FakePlatform {
    /// Fake machine where the calling process has id `pid`
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            layout: EntryLayout::native(),
            state: Mutex::new(FakeState {
                next_duplicate: FIRST_DUPLICATE_VALUE,
                next_session: 1,
                ..FakeState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut FakeState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_layout(mut self, layout: EntryLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_handle(mut self, handle: FakeHandle) -> Self {
        self.state_mut().handles.push(handle);
        self
    }

    pub fn with_handles(mut self, handles: impl IntoIterator<Item = FakeHandle>) -> Self {
        self.state_mut().handles.extend(handles);
        self
    }

    pub fn with_query_steps(mut self, steps: impl IntoIterator<Item = QueryStep>) -> Self {
        self.state_mut().query_steps.extend(steps);
        self
    }

    /// `DuplicateHandle` fails with access denied for this value
    pub fn with_denied_duplicate(mut self, value: usize) -> Self {
        self.state_mut().denied_duplicates.insert(HandleValue(value));
        self
    }

    /// `CloseHandle` on this original value fails
    pub fn with_refused_close(mut self, value: usize) -> Self {
        self.state_mut().refused_closes.insert(HandleValue(value));
        self
    }

    pub fn with_rm_start_error(mut self, code: u32) -> Self {
        self.state_mut().rm_start_error = Some(code);
        self
    }

    pub fn with_rm_register_error(mut self, code: u32) -> Self {
        self.state_mut().rm_register_error = Some(code);
        self
    }

    pub fn with_rm_shutdown_code(mut self, code: u32) -> Self {
        self.state_mut().rm_shutdown_code = Some(code);
        self
    }

    pub fn with_rm_end_code(mut self, code: u32) -> Self {
        self.state_mut().rm_end_code = code;
        self
    }

    /// Open a handle after construction
    pub fn open(&self, handle: FakeHandle) {
        self.state().handles.push(handle);
    }

    pub fn is_open(&self, owner_pid: u32, value: usize) -> bool {
        self.state()
            .handles
            .iter()
            .any(|h| h.owner_pid == owner_pid && h.value == HandleValue(value))
    }

    /// Handles open on `path` (suffix-equivalent), any owner
    pub fn holders_of(&self, path: &str) -> Vec<FakeHandle> {
        let target = NormalizedPath::from_kernel_path(path);
        self.state()
            .handles
            .iter()
            .filter(|h| {
                h.path
                    .as_deref()
                    .map(|p| NormalizedPath::from_kernel_path(p).is_equivalent(&target))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Original handles closed through `close_handle`
    pub fn closed_handles(&self) -> Vec<HandleValue> {
        self.state().closed.clone()
    }

    pub fn duplicates_created(&self) -> usize {
        self.state().duplicates_created
    }

    /// Duplicates created and not yet closed
    pub fn open_duplicates(&self) -> usize {
        self.state().duplicates.len()
    }

    pub fn query_calls(&self) -> usize {
        self.state().query_sizes.len()
    }

    pub fn query_buffer_sizes(&self) -> Vec<usize> {
        self.state().query_sizes.clone()
    }

    pub fn sessions_started(&self) -> usize {
        self.state().sessions_started
    }

    pub fn sessions_ended(&self) -> usize {
        self.state().ended_sessions.len()
    }

    pub fn ended_session_handles(&self) -> Vec<u32> {
        self.state().ended_sessions.clone()
    }

    pub fn registered_paths(&self) -> Vec<String> {
        self.state()
            .registered
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }

    pub fn shutdown_flags(&self) -> Vec<u32> {
        self.state().shutdown_flags.clone()
    }

    /// Other-process handles released by forced shutdown
    pub fn released_handles(&self) -> Vec<FakeHandle> {
        self.state().released.clone()
    }

    fn table_entries(&self, state: &FakeState) -> Vec<HandleEntry> {
        state
            .handles
            .iter()
            .enumerate()
            .map(|(i, h)| HandleEntry {
                process_id: h.owner_pid,
                object_type_index: h.object_type_index,
                attributes: 0,
                handle_value: h.value,
                object: 0x1000 + i * 0x40,
                granted_access: h.granted_access,
            })
            .collect()
    }
}

impl HandleApi for FakePlatform {
    fn current_process_id(&self) -> u32 {
        self.pid
    }

    fn handle_table_layout(&self) -> EntryLayout {
        self.layout
    }

    fn query_system_handles(&self, buffer: &mut [u8]) -> (NtStatus, u32) {
        let mut state = self.state();
        state.query_sizes.push(buffer.len());

        match state.query_steps.pop_front() {
            Some(QueryStep::TooSmall(required)) => return (NtStatus::INFO_LENGTH_MISMATCH, required),
            Some(QueryStep::Fail(status)) => return (status, 0),
            None => {}
        }

        let entries = self.table_entries(&state);
        let required = self.layout.required_len(entries.len());
        let reported = u32::try_from(required).unwrap_or(u32::MAX);
        if encode_table(&self.layout, &entries, buffer) {
            (NtStatus::SUCCESS, reported)
        } else {
            (NtStatus::INFO_LENGTH_MISMATCH, reported)
        }
    }

    fn duplicate_handle(&self, handle: HandleValue) -> io::Result<HandleValue> {
        let mut state = self.state();
        let path = state
            .handles
            .iter()
            .find(|h| h.owner_pid == self.pid && h.value == handle)
            .map(|h| h.path.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid handle"))?;

        if state.denied_duplicates.contains(&handle) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"));
        }

        let duplicate = HandleValue(state.next_duplicate);
        state.next_duplicate += 4;
        state.duplicates_created += 1;
        state.duplicates.insert(duplicate, path);
        Ok(duplicate)
    }

    fn final_path_name(&self, handle: HandleValue) -> io::Result<String> {
        let state = self.state();
        let path = match state.duplicates.get(&handle) {
            Some(path) => path.clone(),
            None => state
                .handles
                .iter()
                .find(|h| h.owner_pid == self.pid && h.value == handle)
                .and_then(|h| h.path.clone()),
        };

        path.map(|p| format!(r"\\?\{}", p))
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "not a file object"))
    }

    fn close_handle(&self, handle: HandleValue) -> bool {
        let mut state = self.state();
        if state.duplicates.remove(&handle).is_some() {
            return true;
        }
        if state.refused_closes.contains(&handle) {
            return false;
        }

        let pid = self.pid;
        match state
            .handles
            .iter()
            .position(|h| h.owner_pid == pid && h.value == handle)
        {
            Some(index) => {
                state.handles.remove(index);
                state.closed.push(handle);
                true
            }
            None => false,
        }
    }
}

impl RestartManagerApi for FakePlatform {
    fn start_session(&self) -> std::result::Result<SessionIdentity, u32> {
        let mut state = self.state();
        if let Some(code) = state.rm_start_error {
            return Err(code);
        }
        let handle = state.next_session;
        state.next_session += 1;
        state.sessions_started += 1;
        Ok(SessionIdentity {
            handle,
            key: format!("{:032x}", handle),
        })
    }

    fn register_file(&self, session: u32, path: &str) -> u32 {
        let mut state = self.state();
        if let Some(code) = state.rm_register_error {
            return code;
        }
        state.registered.push((session, path.to_string()));
        0
    }

    fn shutdown(&self, session: u32, flags: u32) -> u32 {
        let mut state = self.state();
        state.shutdown_flags.push(flags);
        if let Some(code) = state.rm_shutdown_code {
            return code;
        }

        let targets: Vec<NormalizedPath> = state
            .registered
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, p)| NormalizedPath::from_kernel_path(p))
            .collect();

        let pid = self.pid;
        let (released, kept): (Vec<FakeHandle>, Vec<FakeHandle>) =
            std::mem::take(&mut state.handles).into_iter().partition(|h| {
                h.owner_pid != pid
                    && h.path.as_deref().is_some_and(|p| {
                        let held = NormalizedPath::from_kernel_path(p);
                        targets.iter().any(|t| t.is_equivalent(&held))
                    })
            });
        state.handles = kept;

        if released.is_empty() {
            return NOTHING_HELD_CODE;
        }
        state.released.extend(released);
        0
    }

    fn end_session(&self, session: u32) -> u32 {
        let mut state = self.state();
        state.ended_sessions.push(session);
        state.rm_end_code
    }
}
