//! FFI interface for C/C++ hosts
//!
//! A host opens a collector, sends it JSON commands and frees every result
//! it gets back. Strings cross the boundary as JSON in null-terminated UTF-8.

use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::LazyLock;

use serde::Serialize;

use crate::document::HtmlDocument;
use crate::engine::ExtractionEngine;
use crate::error::TemplateError;
use crate::logging::init_logging;
use crate::registry::TemplateRegistry;
use crate::service::Collector;

/// Stateless extraction uses the bundled templates only.
static BUILTIN_ENGINE: LazyLock<Result<ExtractionEngine, TemplateError>> =
    LazyLock::new(|| TemplateRegistry::with_builtin().map(|r| ExtractionEngine::new(r.into())));

/// Result struct returned to the host
/// Both pointers are owned by Rust and must be freed via free_command_result
#[repr(C)]
pub struct CommandResultFFI {
    /// JSON response (null-terminated), or null on failure
    pub json_ptr: *mut c_char,
    /// Error message (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

/// Handle returned by `collector_open`
#[repr(C)]
pub struct CollectorOpenFFI {
    /// Opaque collector, or null on failure; release with `collector_close`
    pub collector: *mut Collector,
    pub error_ptr: *mut c_char,
}

/// Open a collector persisted at `path`, or in memory when `path` is null.
///
/// Also installs the stderr log subscriber if none is set yet.
///
/// # Safety
/// - `path` must be null or a valid null-terminated C string
/// - A non-null `error_ptr` in the result must be freed via `free_error_message`
#[no_mangle]
pub unsafe extern "C" fn collector_open(path: *const c_char) -> CollectorOpenFFI {
    let _ = init_logging("info");

    let opened = if path.is_null() {
        Collector::in_memory()
    } else {
        match CStr::from_ptr(path).to_str() {
            Ok(p) => Collector::open(p),
            Err(_) => return open_error("Invalid UTF-8 in store path"),
        }
    };

    match opened {
        Ok(collector) => CollectorOpenFFI {
            collector: Box::into_raw(Box::new(collector)),
            error_ptr: ptr::null_mut(),
        },
        Err(e) => open_error(&format!("Failed to open collector: {}", e)),
    }
}

/// Run one JSON command (`{"action": ..., ...}`) against a collector.
///
/// Command failures are reported inside the JSON response
/// (`{"success": false, "error": ...}`); `error_ptr` is only set when the
/// call itself is malformed.
///
/// # Safety
/// - `collector` must come from `collector_open` and not be closed yet
/// - `request_json` must be a valid null-terminated C string
/// - Caller must free the result via `free_command_result`
#[no_mangle]
pub unsafe extern "C" fn collector_handle(
    collector: *const Collector,
    request_json: *const c_char,
) -> CommandResultFFI {
    let Some(collector) = collector.as_ref() else {
        return make_error_result("Collector is null");
    };
    let request = match read_c_str(request_json, "request JSON") {
        Ok(s) => s,
        Err(msg) => return make_error_result(&msg),
    };

    make_string_result(collector.handle_json(request))
}

/// Close a collector opened by `collector_open`.
///
/// # Safety
/// - `collector` must come from `collector_open`; it must not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn collector_close(collector: *mut Collector) {
    if !collector.is_null() {
        drop(Box::from_raw(collector));
    }
}

/// Extract records from HTML with the bundled templates, without storing them.
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `url` must be a valid null-terminated C string
/// - Caller must free the result via `free_command_result`
#[no_mangle]
pub unsafe extern "C" fn extract_records_ffi(
    html_ptr: *const c_char,
    html_len: usize,
    url: *const c_char,
) -> CommandResultFFI {
    let html = match read_html(html_ptr, html_len) {
        Ok(h) => h,
        Err(msg) => return make_error_result(msg),
    };
    let url = match read_c_str(url, "URL") {
        Ok(s) => s,
        Err(msg) => return make_error_result(&msg),
    };
    let engine = match BUILTIN_ENGINE.as_ref() {
        Ok(engine) => engine,
        Err(e) => return make_error_result(&format!("Bundled templates are invalid: {}", e)),
    };

    let document = HtmlDocument::parse(html);
    match engine.extract(&document, url) {
        Ok(records) => make_json_result(&records),
        Err(e) => make_error_result(&e.to_string()),
    }
}

/// Free a CommandResultFFI
///
/// # Safety
/// - `result` must have been returned by this library
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn free_command_result(result: CommandResultFFI) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

/// Free the error message of a failed `collector_open`
///
/// # Safety
/// - `message` must be the `error_ptr` of a `CollectorOpenFFI`, freed once
#[no_mangle]
pub unsafe extern "C" fn free_error_message(message: *mut c_char) {
    if !message.is_null() {
        drop(CString::from_raw(message));
    }
}

unsafe fn read_html<'a>(html_ptr: *const c_char, html_len: usize) -> Result<&'a str, &'static str> {
    if html_ptr.is_null() || html_len == 0 {
        return Ok("");
    }
    let slice = std::slice::from_raw_parts(html_ptr as *const u8, html_len);
    std::str::from_utf8(slice).map_err(|_| "Invalid UTF-8 in HTML content")
}

unsafe fn read_c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{} is null", what));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| format!("Invalid UTF-8 in {}", what))
}

fn make_json_result<T: Serialize + ?Sized>(value: &T) -> CommandResultFFI {
    match serde_json::to_string(value) {
        Ok(json) => make_string_result(json),
        Err(e) => make_error_result(&format!("Failed to serialize result: {}", e)),
    }
}

fn make_string_result(json: String) -> CommandResultFFI {
    match CString::new(json) {
        Ok(cstr) => CommandResultFFI {
            json_ptr: cstr.into_raw(),
            error_ptr: ptr::null_mut(),
        },
        Err(_) => make_error_result("Result JSON contains null bytes"),
    }
}

fn c_message(msg: &str) -> *mut c_char {
    CString::new(msg.replace('\0', " "))
        .unwrap_or_default()
        .into_raw()
}

// Helper to create error result
fn make_error_result(msg: &str) -> CommandResultFFI {
    CommandResultFFI {
        json_ptr: ptr::null_mut(),
        error_ptr: c_message(msg),
    }
}

fn open_error(msg: &str) -> CollectorOpenFFI {
    CollectorOpenFFI {
        collector: ptr::null_mut(),
        error_ptr: c_message(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take_json(result: CommandResultFFI) -> serde_json::Value {
        assert!(result.error_ptr.is_null());
        let text = CStr::from_ptr(result.json_ptr).to_str().unwrap().to_string();
        free_command_result(result);
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_collector_round_trip() {
        unsafe {
            let opened = collector_open(ptr::null());
            assert!(opened.error_ptr.is_null());
            let collector = opened.collector;

            let request = CString::new(
                r#"{"action": "collectData", "url": "https://item.jd.com/7.html", "html": "<div class='sku-name'>Kettle</div>"}"#,
            )
            .unwrap();
            let response = take_json(collector_handle(collector, request.as_ptr()));
            assert_eq!(response["success"], true);
            assert_eq!(response["data"]["records"][0]["title"], "Kettle");

            let request = CString::new(r#"{"action": "getHistory"}"#).unwrap();
            let response = take_json(collector_handle(collector, request.as_ptr()));
            assert_eq!(response["data"].as_array().unwrap().len(), 1);

            let request = CString::new(r#"{"action": "nope"}"#).unwrap();
            let response = take_json(collector_handle(collector, request.as_ptr()));
            assert_eq!(response["success"], false);

            collector_close(collector);
        }
    }

    #[test]
    fn test_null_arguments_are_errors() {
        unsafe {
            let result = collector_handle(ptr::null(), ptr::null());
            assert!(result.json_ptr.is_null());
            assert_eq!(CStr::from_ptr(result.error_ptr).to_str().unwrap(), "Collector is null");
            free_command_result(result);

            let html = "<div class='sku-name'>x</div>";
            let result = extract_records_ffi(html.as_ptr() as *const c_char, html.len(), ptr::null());
            assert_eq!(CStr::from_ptr(result.error_ptr).to_str().unwrap(), "URL is null");
            free_command_result(result);
        }
    }

    #[test]
    fn test_stateless_extraction() {
        let html = r#"<ul id="J_goodsList">
            <li class="gl-item"><div class="p-name"><em>Pot</em></div><div class="p-price"><i>59.00</i></div></li>
            <li class="gl-item"><div class="p-shop"><a>Shop only</a></div></li>
        </ul>"#;
        let url = CString::new("https://search.jd.com/Search?keyword=pot").unwrap();
        unsafe {
            let records = take_json(extract_records_ffi(
                html.as_ptr() as *const c_char,
                html.len(),
                url.as_ptr(),
            ));
            let records = records.as_array().unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0]["title"], "Pot");
            assert_eq!(records[0]["price"], "¥59.00");
            assert_eq!(records[0]["pageKind"], "listing");
        }
    }

    #[test]
    fn test_invalid_utf8_html() {
        let bytes = [0xffu8, 0xfe];
        let url = CString::new("https://item.jd.com/1.html").unwrap();
        unsafe {
            let result = extract_records_ffi(bytes.as_ptr() as *const c_char, bytes.len(), url.as_ptr());
            assert!(result.json_ptr.is_null());
            free_command_result(result);
        }
    }
}
