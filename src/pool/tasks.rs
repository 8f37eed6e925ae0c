// src/pool/tasks.rs
//! Task handlers executed on worker threads
//!
//! Each handler is a plain synchronous function taking owned parameters and
//! returning a structured JSON result. Handlers never touch pool state;
//! everything they need arrives in the request.

use crate::pool::protocol::{
    AnalyzeParams, BenchmarkParams, ManifestParams, ScanParams, TaskRequest,
};
use crate::utils::errors::{EngineError, Result};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Directories skipped during scans regardless of depth
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "target",
    "dist",
    "build",
    ".cache",
];

/// Upper bound on benchmark iterations
const MAX_BENCHMARK_ITERATIONS: u64 = 100_000_000;

/// Run one task request to completion
pub fn execute(request: TaskRequest) -> Result<Value> {
    match request {
        TaskRequest::ParseManifest(params) => parse_manifest(&params),
        TaskRequest::ScanDirectory(params) => scan_directory(&params),
        TaskRequest::AnalyzeCode(params) => analyze_code(&params),
        TaskRequest::Benchmark(params) => benchmark(&params),
    }
}

/// Shallow-parse a package manifest, returning name/version and dependency
/// maps. An absent manifest is the empty result, not an error.
fn parse_manifest(params: &ManifestParams) -> Result<Value> {
    let path = Path::new(&params.path);
    if !path.exists() {
        debug!(path = %params.path, "manifest absent, returning empty result");
        return Ok(json!({
            "name": "",
            "version": "",
            "dependencies": {},
            "devDependencies": {},
        }));
    }

    let raw = std::fs::read_to_string(path)?;
    let manifest: Value = serde_json::from_str(&raw)
        .map_err(|e| EngineError::TaskFailed(format!("invalid manifest json: {}", e)))?;

    let string_map = |v: Option<&Value>| -> BTreeMap<String, String> {
        v.and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(json!({
        "name": manifest.get("name").and_then(Value::as_str).unwrap_or(""),
        "version": manifest.get("version").and_then(Value::as_str).unwrap_or(""),
        "dependencies": string_map(manifest.get("dependencies")),
        "devDependencies": string_map(manifest.get("devDependencies")),
    }))
}

/// Recursive directory scan bounded by `max_depth`, skipping conventional
/// ignore directories and filtering by suffix patterns.
fn scan_directory(params: &ScanParams) -> Result<Value> {
    let mut files = Vec::new();
    let root = Path::new(&params.path);
    if root.is_dir() {
        walk(root, 0, params.max_depth, &params.patterns, &mut files)?;
    }
    files.sort();

    Ok(json!({
        "files": files,
        "count": files.len(),
    }))
}

fn walk(
    dir: &Path,
    depth: usize,
    max_depth: usize,
    patterns: &[String],
    out: &mut Vec<String>,
) -> Result<()> {
    if depth > max_depth {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if path.is_dir() {
            if IGNORED_DIRS.contains(&name.as_str()) {
                continue;
            }
            walk(&path, depth + 1, max_depth, patterns, out)?;
        } else if matches_patterns(&name, patterns) {
            out.push(path.to_string_lossy().to_string());
        }
    }
    Ok(())
}

/// Suffix match for glob-like patterns (`*.rs` matches `main.rs`); an empty
/// pattern list matches everything
fn matches_patterns(name: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| {
        let suffix = p.trim_start_matches('*');
        name.ends_with(suffix)
    })
}

/// Lightweight structural analysis via line-prefix heuristics. Intentionally
/// approximate; this is not a parser.
fn analyze_code(params: &AnalyzeParams) -> Result<Value> {
    let raw = std::fs::read_to_string(&params.path)?;

    let mut imports = 0u64;
    let mut exports = 0u64;
    let mut functions = 0u64;
    let mut classes = 0u64;
    let mut lines = 0u64;

    for line in raw.lines() {
        lines += 1;
        let trimmed = line.trim_start();

        if trimmed.starts_with("import ") || trimmed.starts_with("use ") {
            imports += 1;
        }
        if trimmed.starts_with("export ") || trimmed.starts_with("pub ") {
            exports += 1;
        }

        // Visibility prefixes still count toward the declaration tallies
        let decl = trimmed
            .strip_prefix("export ")
            .or_else(|| trimmed.strip_prefix("pub "))
            .unwrap_or(trimmed);
        let decl = decl.strip_prefix("default ").unwrap_or(decl);

        if decl.starts_with("function ")
            || decl.starts_with("async function ")
            || decl.starts_with("fn ")
            || decl.starts_with("async fn ")
        {
            functions += 1;
        }
        if decl.starts_with("class ") || decl.starts_with("struct ") {
            classes += 1;
        }
    }

    Ok(json!({
        "path": params.path,
        "lines": lines,
        "imports": imports,
        "exports": exports,
        "functions": functions,
        "classes": classes,
    }))
}

/// Synthetic CPU-bound load: checksum over a stream of random square roots
fn benchmark(params: &BenchmarkParams) -> Result<Value> {
    let iterations = params.iterations.min(MAX_BENCHMARK_ITERATIONS);
    let mut rng = rand::thread_rng();
    let seed: f64 = rng.gen_range(1.0..1000.0);

    let start = Instant::now();
    let mut checksum = 0.0f64;
    for i in 0..iterations {
        checksum += (seed + i as f64).sqrt();
    }
    let elapsed = start.elapsed();

    Ok(json!({
        "iterations": iterations,
        "checksum": checksum,
        "durationMs": elapsed.as_secs_f64() * 1000.0,
    }))
}
