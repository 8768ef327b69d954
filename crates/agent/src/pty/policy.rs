// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawn-time policy: environment sanitization and shell / working
//! directory validation.
//!
//! Everything here runs before `forkpty`; nothing in the child depends on
//! policy decisions, so a rejected spawn leaves no process behind.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::PtyError;

/// Dynamic-loader variables that must never reach a spawned shell.
pub const BASELINE_ENV_BLACKLIST: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "LD_AUDIT",
    "LD_DEBUG",
    "LD_DEBUG_OUTPUT",
    "LD_PROFILE",
    "LD_SHOW_AUXV",
    "MALLOC_TRACE",
];

/// Caps on client-supplied environment entries.
#[derive(Debug, Clone)]
pub struct EnvLimits {
    pub max_key_len: usize,
    pub max_value_len: usize,
    pub max_total_bytes: usize,
    pub max_vars: usize,
}

impl Default for EnvLimits {
    fn default() -> Self {
        Self {
            max_key_len: 256,
            max_value_len: 4096,
            max_total_bytes: 32 * 1024,
            max_vars: 100,
        }
    }
}

/// Environment construction policy for spawned processes.
#[derive(Debug, Clone, Default)]
pub struct EnvPolicy {
    /// When non-empty, start from an empty environment and copy only these
    /// names from the system environment. Otherwise copy everything and
    /// strip the blacklist.
    pub whitelist: Vec<String>,
    /// Extra names to strip in blacklist mode, on top of the baseline.
    pub blacklist: Vec<String>,
    pub limits: EnvLimits,
}

impl EnvPolicy {
    /// Build the child environment: system environment filtered per policy,
    /// forced terminal defaults, then validated custom entries on top.
    pub fn build_env(
        &self,
        custom: &[(String, String)],
    ) -> Result<HashMap<String, String>, PtyError> {
        self.validate_custom(custom)?;

        let mut env: HashMap<String, String> = if self.whitelist.is_empty() {
            let mut all: HashMap<String, String> = std::env::vars().collect();
            for name in BASELINE_ENV_BLACKLIST {
                all.remove(*name);
            }
            for name in &self.blacklist {
                all.remove(name);
            }
            all
        } else {
            std::env::vars().filter(|(k, _)| self.whitelist.iter().any(|w| w == k)).collect()
        };

        env.insert("TERM".to_owned(), "xterm-256color".to_owned());
        env.insert("COLORTERM".to_owned(), "truecolor".to_owned());
        env.entry("LANG".to_owned()).or_insert_with(|| "en_US.UTF-8".to_owned());

        for (k, v) in custom {
            env.insert(k.clone(), v.clone());
        }
        Ok(env)
    }

    fn validate_custom(&self, custom: &[(String, String)]) -> Result<(), PtyError> {
        if custom.len() > self.limits.max_vars {
            return Err(PtyError::EnvLimitExceeded(format!(
                "{} custom vars exceeds cap {}",
                custom.len(),
                self.limits.max_vars
            )));
        }

        let mut total = 0usize;
        for (k, v) in custom {
            if k.len() > self.limits.max_key_len {
                return Err(PtyError::EnvLimitExceeded(format!(
                    "key {} bytes exceeds cap {}",
                    k.len(),
                    self.limits.max_key_len
                )));
            }
            if v.len() > self.limits.max_value_len {
                return Err(PtyError::EnvLimitExceeded(format!(
                    "value for {k} is {} bytes, cap {}",
                    v.len(),
                    self.limits.max_value_len
                )));
            }
            total += k.len() + v.len();
        }
        if total > self.limits.max_total_bytes {
            return Err(PtyError::EnvLimitExceeded(format!(
                "custom env totals {total} bytes, cap {}",
                self.limits.max_total_bytes
            )));
        }
        Ok(())
    }
}

/// Validate and canonicalize a shell path.
///
/// Canonicalization happens before every check so the file inspected is the
/// file executed. Relative traversal is rejected outright, even when it
/// would canonicalize somewhere legal.
pub fn validate_shell(shell: &str, allowed_shells: &[PathBuf]) -> Result<PathBuf, PtyError> {
    if shell.contains("..") || shell.contains("./") {
        return Err(PtyError::ShellNotAllowed(format!("relative segment in {shell}")));
    }

    let canonical = Path::new(shell)
        .canonicalize()
        .map_err(|_| PtyError::ShellNotFound(shell.to_owned()))?;

    let meta = std::fs::metadata(&canonical)
        .map_err(|_| PtyError::ShellNotFound(shell.to_owned()))?;
    if !meta.is_file() {
        return Err(PtyError::ShellNotFound(format!("{shell} is not a regular file")));
    }

    let mode = meta.permissions().mode();
    if mode & 0o111 == 0 {
        return Err(PtyError::ShellNotExecutable(shell.to_owned()));
    }
    if mode & 0o002 != 0 {
        return Err(PtyError::ShellNotAllowed(format!("{shell} is world-writable")));
    }

    if !allowed_shells.is_empty() {
        let permitted = allowed_shells.iter().any(|allowed| {
            allowed.canonicalize().map(|a| a == canonical).unwrap_or(false)
        });
        if !permitted {
            return Err(PtyError::ShellNotAllowed(format!("{shell} not in allowed set")));
        }
    }

    Ok(canonical)
}

/// Validate a working directory: must exist, be a directory, and (when the
/// allow-list is non-empty) canonicalize under one of its entries.
pub fn validate_working_dir(
    dir: &Path,
    allowed_dirs: &[PathBuf],
) -> Result<PathBuf, PtyError> {
    let canonical = dir
        .canonicalize()
        .map_err(|_| PtyError::WorkingDirInvalid(dir.display().to_string()))?;

    if !canonical.is_dir() {
        return Err(PtyError::WorkingDirInvalid(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    if !allowed_dirs.is_empty() {
        let permitted = allowed_dirs.iter().any(|allowed| {
            allowed
                .canonicalize()
                .map(|a| canonical.starts_with(&a))
                .unwrap_or(false)
        });
        if !permitted {
            return Err(PtyError::WorkingDirInvalid(format!(
                "{} outside allowed roots",
                dir.display()
            )));
        }
    }

    Ok(canonical)
}

/// Dimension caps from the capability exchange.
pub const MAX_COLS: u16 = 1000;
pub const MAX_ROWS: u16 = 500;

pub fn validate_dimensions(cols: u16, rows: u16) -> Result<(), PtyError> {
    if cols == 0 || cols > MAX_COLS || rows == 0 || rows > MAX_ROWS {
        return Err(PtyError::DimensionsInvalid { cols, rows });
    }
    Ok(())
}

/// Pick a shell when the client didn't name one: `$SHELL` if it validates,
/// then the conventional fallbacks.
pub fn detect_shell(allowed_shells: &[PathBuf]) -> Result<PathBuf, PtyError> {
    if let Ok(shell) = std::env::var("SHELL") {
        if let Ok(path) = validate_shell(&shell, allowed_shells) {
            return Ok(path);
        }
    }
    for candidate in ["/bin/bash", "/bin/zsh", "/bin/sh"] {
        if let Ok(path) = validate_shell(candidate, allowed_shells) {
            return Ok(path);
        }
    }
    Err(PtyError::ShellNotFound("no usable shell detected".to_owned()))
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
