//! C ABI over [`SearchIndex`].
//!
//! Hosts hold an opaque `*mut SearchIndex` and exchange NUL-terminated UTF-8
//! strings. Logging stays off until the host calls
//! [`strata_logger_initialize`]. Functions returning `bool` or a count log the error and return
//! `false` or `0`; [`strata_search`] returns a JSON [`BridgeResponse`] that
//! the host must release with [`strata_string_free`].
//!
//! # Safety
//!
//! Every pointer argument must be null or valid for the duration of the
//! call. A handle must come from [`strata_index_create`] or
//! [`strata_index_load`] and must not be used after [`strata_index_free`].

use std::ffi::{CStr, CString, c_char};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::ptr;

use env_logger::{Builder, Target};
use log::{LevelFilter, error, info};

use crate::analysis::TokenizerKind;
use crate::bridge::{BridgeResponse, SearchIndex, SearchRequestPayload, SearchResponse};
use crate::config::IndexConfig;
use crate::error::{Result, StrataError};

/// Name of the log file written under the host's log directory.
pub const LOG_FILE_NAME: &str = "strata.log";

/// Borrow a C string as `&str`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn borrow_str<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(StrataError::invariant(format!("{name} is null")));
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let value = unsafe { CStr::from_ptr(ptr) };
    value
        .to_str()
        .map_err(|e| StrataError::invariant(format!("{name} is not valid UTF-8: {e}")))
}

/// # Safety
///
/// `handle` must be null or a live handle.
unsafe fn borrow_index<'a>(handle: *mut SearchIndex) -> Result<&'a SearchIndex> {
    // SAFETY: live handle or null per the caller contract.
    unsafe { handle.as_ref() }.ok_or_else(|| StrataError::invariant("index handle is null"))
}

fn into_c_string(value: String) -> *mut c_char {
    match CString::new(value) {
        Ok(value) => value.into_raw(),
        Err(e) => {
            error!("response contains a NUL byte: {e}");
            ptr::null_mut()
        }
    }
}

fn report<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!("{operation} failed: {e}");
            None
        }
    }
}

/// Log records go to a file, to stderr or to both.
#[derive(Debug)]
struct LogSink {
    file: Option<File>,
    console: bool,
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = &mut self.file {
            file.write_all(buf)?;
        }
        if self.console {
            io::stderr().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        if self.console {
            io::stderr().flush()?;
        }
        Ok(())
    }
}

/// Host level names; `warning` is `warn` and `fatal` is `error`.
fn parse_level(name: &str) -> Result<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "fatal" | "error" => Ok(LevelFilter::Error),
        "warning" | "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        other => Err(StrataError::config(format!("unknown log level: {other}"))),
    }
}

fn init_logger(log_dir: Option<&str>, level: &str, console: bool) -> Result<()> {
    let level = parse_level(level)?;
    let file = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(Path::new(dir).join(LOG_FILE_NAME))?,
            )
        }
        None => None,
    };
    if file.is_none() && !console {
        return Err(StrataError::config("logging needs a log directory or the console"));
    }

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(LogSink { file, console })))
        .try_init()
        .map_err(|e| StrataError::other(format!("logger is already initialized: {e}")))?;
    info!("logging initialized at {level}");
    Ok(())
}

/// Route this library's log records to `log_dir/strata.log` and, when
/// `console_logging` is set, to stderr.
///
/// `log_dir` may be null when `console_logging` is set. `log_level` is one
/// of `trace`, `debug`, `info`, `warning`, `error`, `fatal` or `off`. Only
/// the first successful call takes effect; later calls return `false`.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_logger_initialize(
    log_dir: *const c_char,
    log_level: *const c_char,
    console_logging: bool,
) -> bool {
    let result = (|| {
        let log_dir = if log_dir.is_null() {
            None
        } else {
            // SAFETY: forwarded caller contract.
            Some(unsafe { borrow_str(log_dir, "log_dir") }?)
        };
        // SAFETY: forwarded caller contract.
        let log_level = unsafe { borrow_str(log_level, "log_level") }?;
        init_logger(log_dir, log_level, console_logging)
    })();
    match result {
        Ok(()) => true,
        Err(e) => {
            // The logger may not be up; tell the host directly.
            eprintln!("strata_logger_initialize failed: {e}");
            false
        }
    }
}

/// Create an index in `dir`. `config_json` may be null for the defaults.
///
/// Returns null on error.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_index_create(
    dir: *const c_char,
    config_json: *const c_char,
) -> *mut SearchIndex {
    let result = (|| {
        // SAFETY: forwarded caller contract.
        let dir = unsafe { borrow_str(dir, "dir") }?;
        let config = if config_json.is_null() {
            IndexConfig::default()
        } else {
            // SAFETY: forwarded caller contract.
            IndexConfig::from_json_str(unsafe { borrow_str(config_json, "config_json") }?)?
        };
        SearchIndex::create(dir, config)
    })();
    match report("strata_index_create", result) {
        Some(index) => Box::into_raw(Box::new(index)),
        None => ptr::null_mut(),
    }
}

/// Create an index in `dir` with the default configuration and the named
/// tokenizer (`word`, `whitespace` or `keyword`). Returns null on error.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_index_create_with_tokenizer(
    dir: *const c_char,
    tokenizer: *const c_char,
) -> *mut SearchIndex {
    let result = (|| {
        // SAFETY: forwarded caller contract.
        let dir = unsafe { borrow_str(dir, "dir") }?;
        // SAFETY: forwarded caller contract.
        let tokenizer: TokenizerKind = unsafe { borrow_str(tokenizer, "tokenizer") }?.parse()?;
        let config = IndexConfig {
            tokenizer,
            ..Default::default()
        };
        SearchIndex::create(dir, config)
    })();
    match report("strata_index_create_with_tokenizer", result) {
        Some(index) => Box::into_raw(Box::new(index)),
        None => ptr::null_mut(),
    }
}

/// Open the index in `dir`. Returns null on error.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_index_load(dir: *const c_char) -> *mut SearchIndex {
    // SAFETY: forwarded caller contract.
    let result = unsafe { borrow_str(dir, "dir") }.and_then(SearchIndex::open);
    match report("strata_index_load", result) {
        Some(index) => Box::into_raw(Box::new(index)),
        None => ptr::null_mut(),
    }
}

/// Tokenize `text` and buffer it under `row_id`.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_index_doc(
    handle: *mut SearchIndex,
    row_id: u64,
    text: *const c_char,
) -> bool {
    let result = (|| {
        // SAFETY: forwarded caller contract.
        let index = unsafe { borrow_index(handle) }?;
        // SAFETY: forwarded caller contract.
        let text = unsafe { borrow_str(text, "text") }?;
        index.index_text(row_id, text)
    })();
    report("strata_index_doc", result).is_some()
}

/// Delete the documents whose row id is in the JSON array `row_ids_json`.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_delete_row_ids(
    handle: *mut SearchIndex,
    row_ids_json: *const c_char,
) -> bool {
    let result = (|| {
        // SAFETY: forwarded caller contract.
        let index = unsafe { borrow_index(handle) }?;
        // SAFETY: forwarded caller contract.
        let row_ids: Vec<u64> = serde_json::from_str(unsafe { borrow_str(row_ids_json, "row_ids_json") }?)?;
        index.delete_row_ids(&row_ids)
    })();
    report("strata_delete_row_ids", result).is_some()
}

/// Commit buffered documents and deletes.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_writer_commit(handle: *mut SearchIndex) -> bool {
    // SAFETY: forwarded caller contract.
    let result = unsafe { borrow_index(handle) }.and_then(|index| index.commit());
    report("strata_writer_commit", result).is_some()
}

/// Run the search described by the JSON `request_json`
/// ([`SearchRequestPayload`]) and return a JSON
/// `BridgeResponse<SearchResponse>`.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_search(
    handle: *mut SearchIndex,
    request_json: *const c_char,
) -> *mut c_char {
    let result = (|| {
        // SAFETY: forwarded caller contract.
        let index = unsafe { borrow_index(handle) }?;
        // SAFETY: forwarded caller contract.
        let payload: SearchRequestPayload =
            serde_json::from_str(unsafe { borrow_str(request_json, "request_json") }?)?;
        index.search(&payload)
    })();
    if let Err(e) = &result {
        error!("strata_search failed: {e}");
    }
    into_c_string(BridgeResponse::<SearchResponse>::from(result).to_json())
}

/// Number of documents with a row id in `[low, high]` matching `query`.
/// Returns 0 on error.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_count_in_rowid_range(
    handle: *mut SearchIndex,
    query: *const c_char,
    low: u64,
    high: u64,
    use_regex: bool,
) -> u64 {
    let result = (|| {
        // SAFETY: forwarded caller contract.
        let index = unsafe { borrow_index(handle) }?;
        // SAFETY: forwarded caller contract.
        let query = unsafe { borrow_str(query, "query") }?;
        index.count_in_rowid_range(query, low, high, use_regex)
    })();
    report("strata_count_in_rowid_range", result).unwrap_or(0)
}

/// Whether a document with a row id in `[low, high]` matches `query`.
///
/// # Safety
///
/// See the module documentation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_search_in_rowid_range(
    handle: *mut SearchIndex,
    query: *const c_char,
    low: u64,
    high: u64,
    use_regex: bool,
) -> bool {
    let result = (|| {
        // SAFETY: forwarded caller contract.
        let index = unsafe { borrow_index(handle) }?;
        // SAFETY: forwarded caller contract.
        let query = unsafe { borrow_str(query, "query") }?;
        index.search_in_rowid_range(query, low, high, use_regex)
    })();
    report("strata_search_in_rowid_range", result).unwrap_or(false)
}

/// Release a string returned by this library.
///
/// # Safety
///
/// `value` must be null or come from this library and not be freed twice.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_string_free(value: *mut c_char) {
    if !value.is_null() {
        // SAFETY: allocated by `CString::into_raw` per the caller contract.
        drop(unsafe { CString::from_raw(value) });
    }
}

/// Wait for merging threads, commit and release the index.
///
/// # Safety
///
/// `handle` must be null or a live handle, which is invalid afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_index_free(handle: *mut SearchIndex) {
    if handle.is_null() {
        return;
    }
    // SAFETY: allocated by `Box::into_raw` per the caller contract.
    let index = unsafe { Box::from_raw(handle) };
    report("strata_index_free", index.close());
}
