//! FFI bindings for Vigil
//!
//! This module provides C-compatible functions for driving the monitoring
//! engine from other languages. All functions take and return JSON as C
//! strings (null-terminated). Returned strings are allocated by Rust and must
//! be freed with `vigil_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::Utc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::MonitorError;
use crate::pipeline::{replay, MonitorEngine, SessionManifest};
use crate::sample::{SampleAdapter, SampleRecord};
use crate::types::SessionId;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Read a required C string argument
unsafe fn arg(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("Null {} pointer", name));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_string)
        .map_err(|_| format!("Invalid {} string (not UTF-8)", name))
}

fn parse_session_id(s: &str) -> Result<SessionId, String> {
    Uuid::parse_str(s.trim())
        .map(SessionId)
        .map_err(|e| format!("Invalid session id '{}': {}", s, e))
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Run `body` and hand its JSON result to C, recording any error
fn respond(body: impl FnOnce() -> Result<String, String>) -> *mut c_char {
    clear_last_error();
    match body() {
        Ok(json) => string_to_cstr(&json),
        Err(msg) => {
            set_last_error(&msg);
            ptr::null_mut()
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| MonitorError::from(e).to_string())
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay a recorded session and return the replay report as JSON.
///
/// # Safety
/// - `manifest_json` and `samples_ndjson` must be valid null-terminated C strings.
/// - `config_json` may be NULL to use the default configuration.
/// - Returns a newly allocated string that must be freed with `vigil_free_string`.
/// - Returns NULL on error; call `vigil_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vigil_replay(
    manifest_json: *const c_char,
    samples_ndjson: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    respond(|| {
        let manifest: SessionManifest = serde_json::from_str(&arg(manifest_json, "manifest")?)
            .map_err(|e| format!("Invalid manifest: {}", e))?;
        let records = SampleAdapter::parse_ndjson(&arg(samples_ndjson, "samples")?)
            .map_err(|e| e.to_string())?;
        let config = if config_json.is_null() {
            EngineConfig::default()
        } else {
            EngineConfig::from_json(&arg(config_json, "config")?).map_err(|e| e.to_string())?
        };
        let report = replay(&manifest, records, &config).map_err(|e| e.to_string())?;
        to_json(&report)
    })
}

// ============================================================================
// Stateful Engine API
// ============================================================================

/// Opaque handle to a MonitorEngine
pub struct VigilEngineHandle {
    engine: MonitorEngine,
}

/// Create a new engine.
///
/// # Safety
/// - `config_json` may be NULL to use the default configuration.
/// - Returns a pointer that must be freed with `vigil_engine_free`.
/// - Returns NULL if the configuration is invalid.
#[no_mangle]
pub unsafe extern "C" fn vigil_engine_new(config_json: *const c_char) -> *mut VigilEngineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        Ok(EngineConfig::default())
    } else {
        arg(config_json, "config")
            .and_then(|json| EngineConfig::from_json(&json).map_err(|e| e.to_string()))
    };

    match config {
        Ok(config) => Box::into_raw(Box::new(VigilEngineHandle {
            engine: MonitorEngine::new(config),
        })),
        Err(msg) => {
            set_last_error(&msg);
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vigil_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn vigil_engine_free(engine: *mut VigilEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

unsafe fn engine_mut<'a>(engine: *mut VigilEngineHandle) -> Result<&'a mut MonitorEngine, String> {
    if engine.is_null() {
        return Err("Null engine pointer".to_string());
    }
    Ok(&mut (*engine).engine)
}

/// Open a session from a manifest and return its id as a JSON string.
///
/// A manifest carrying a calibration profile starts monitoring immediately;
/// otherwise the session starts calibrating.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vigil_engine_new`.
/// - `manifest_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vigil_free_string`.
#[no_mangle]
pub unsafe extern "C" fn vigil_engine_open_session(
    engine: *mut VigilEngineHandle,
    manifest_json: *const c_char,
) -> *mut c_char {
    respond(|| {
        let engine = engine_mut(engine)?;
        let manifest: SessionManifest = serde_json::from_str(&arg(manifest_json, "manifest")?)
            .map_err(|e| format!("Invalid manifest: {}", e))?;

        let now = Utc::now();
        let session_id = manifest.session_id.unwrap_or_default();
        let result = engine
            .open_session(manifest.to_session(session_id, now))
            .and_then(|id| match manifest.calibration {
                Some(profile) => engine.use_calibration(id, profile, now),
                None => engine.start_calibration(id, now),
            });
        result.map_err(|e| e.to_string())?;
        to_json(&session_id)
    })
}

/// Process one sample record and return the violations it finalized as a
/// JSON array.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vigil_engine_new`.
/// - `sample_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vigil_free_string`.
/// - Returns NULL when the sample was rejected; call `vigil_last_error`.
#[no_mangle]
pub unsafe extern "C" fn vigil_engine_process(
    engine: *mut VigilEngineHandle,
    sample_json: *const c_char,
) -> *mut c_char {
    respond(|| {
        let engine = engine_mut(engine)?;
        let record: SampleRecord = serde_json::from_str(&arg(sample_json, "sample")?)
            .map_err(|e| format!("Invalid sample: {}", e))?;
        let events = engine
            .process(record.session_id, record)
            .map_err(|e| e.to_string())?;
        to_json(&events)
    })
}

/// Return the session's current risk snapshot as JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vigil_engine_new`.
/// - `session_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vigil_free_string`.
#[no_mangle]
pub unsafe extern "C" fn vigil_engine_snapshot(
    engine: *mut VigilEngineHandle,
    session_id: *const c_char,
) -> *mut c_char {
    respond(|| {
        let engine = engine_mut(engine)?;
        let id = parse_session_id(&arg(session_id, "session id")?)?;
        let snapshot = engine.snapshot(id, Utc::now()).map_err(|e| e.to_string())?;
        to_json(&snapshot)
    })
}

/// Complete a session and return its resulting status as a JSON string.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vigil_engine_new`.
/// - `session_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vigil_free_string`.
#[no_mangle]
pub unsafe extern "C" fn vigil_engine_complete(
    engine: *mut VigilEngineHandle,
    session_id: *const c_char,
) -> *mut c_char {
    respond(|| {
        let engine = engine_mut(engine)?;
        let id = parse_session_id(&arg(session_id, "session id")?)?;
        let status = engine.complete(id, Utc::now()).map_err(|e| e.to_string())?;
        to_json(&status)
    })
}

/// Drain published events (violations, alerts, status changes) as a JSON
/// array.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vigil_engine_new`.
/// - `session_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vigil_free_string`.
#[no_mangle]
pub unsafe extern "C" fn vigil_engine_drain_events(
    engine: *mut VigilEngineHandle,
    session_id: *const c_char,
) -> *mut c_char {
    respond(|| {
        let engine = engine_mut(engine)?;
        let id = parse_session_id(&arg(session_id, "session id")?)?;
        let events = engine.drain_events(id).map_err(|e| e.to_string())?;
        to_json(&events)
    })
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Vigil functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Vigil function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn vigil_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Vigil function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn vigil_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Vigil library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn vigil_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
