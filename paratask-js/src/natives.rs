//! Native functions backing the worker prelude

use crate::conversion::{arg_string, js_str};
use boa_engine::{js_string, Context, JsNativeError, JsResult, JsValue, NativeFunction};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};

/// Register `__paratask_log`, `__paratask_resolve_module` and `__paratask_read_file`
pub fn register_natives(context: &mut Context) -> JsResult<()> {
    context.register_global_builtin_callable(
        js_string!("__paratask_log"),
        2,
        NativeFunction::from_fn_ptr(console_log),
    )?;
    context.register_global_builtin_callable(
        js_string!("__paratask_resolve_module"),
        2,
        NativeFunction::from_fn_ptr(resolve_module_native),
    )?;
    context.register_global_builtin_callable(
        js_string!("__paratask_read_file"),
        1,
        NativeFunction::from_fn_ptr(read_file_native),
    )?;
    Ok(())
}

fn console_log(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let level = arg_string(args, 0, context)?;
    let text = arg_string(args, 1, context)?;

    match level.as_str() {
        "error" => error!(target: "paratask::console", "{}", text),
        "warn" => warn!(target: "paratask::console", "{}", text),
        "debug" => debug!(target: "paratask::console", "{}", text),
        "trace" => trace!(target: "paratask::console", "{}", text),
        _ => info!(target: "paratask::console", "{}", text),
    }

    Ok(JsValue::undefined())
}

fn resolve_module_native(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let specifier = arg_string(args, 0, context)?;
    let base = arg_string(args, 1, context)?;

    match resolve_module(&specifier, Path::new(&base)) {
        Some(path) => {
            trace!(specifier = %specifier, path = %path.display(), "Resolved module");
            Ok(js_str(&path.to_string_lossy()))
        }
        None => Err(JsNativeError::error()
            .with_message(format!("Cannot find module '{}'", specifier))
            .into()),
    }
}

fn read_file_native(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    match std::fs::read_to_string(&path) {
        Ok(source) => Ok(js_str(&source)),
        Err(e) => Err(JsNativeError::error()
            .with_message(format!("Cannot read module '{}': {}", path, e))
            .into()),
    }
}

/// Resolve a `require()` specifier.
///
/// Relative and absolute specifiers resolve against `base`; bare specifiers
/// are looked up in `node_modules` directories from `base` upwards. Each
/// location is tried as-is, then with `.js` and `.json`, then as a directory
/// holding `index.js` or `index.json`.
pub fn resolve_module(specifier: &str, base: &Path) -> Option<PathBuf> {
    if specifier.is_empty() {
        return None;
    }

    let is_path = specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || Path::new(specifier).is_absolute();

    if is_path {
        return probe(&base.join(specifier));
    }

    base.ancestors()
        .map(|dir| dir.join("node_modules").join(specifier))
        .find_map(|candidate| probe(&candidate))
}

fn probe(location: &Path) -> Option<PathBuf> {
    let candidates = [
        location.to_path_buf(),
        with_suffix(location, ".js"),
        with_suffix(location, ".json"),
        location.join("index.js"),
        location.join("index.json"),
    ];

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .map(|found| found.canonicalize().unwrap_or(found))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
