// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Container spec
//!
//! The runtime-agnostic description of one step container, plus the
//! translation helpers: resource strings to bytes/nano-CPUs, and the shell
//! command that carries a step script into the container.

use crate::environment::CLONE_DIR;

/// Where the step script lands inside the container
pub const SCRIPT_PATH: &str = "/tmp/bbpl-script.sh";

/// Where the after-script lands inside the container
pub const AFTER_SCRIPT_PATH: &str = "/tmp/bbpl-after-script.sh";

/// Everything the driver needs to create one container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    /// `host:container` bind mounts
    pub binds: Vec<String>,
    pub working_dir: Option<String>,
    pub network: Option<String>,
    pub user: Option<String>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    /// Container ports, e.g. `5432/tcp`
    pub exposed_ports: Vec<String>,
    /// (container port, host port)
    pub port_bindings: Vec<(String, String)>,
}

impl ContainerSpec {
    /// Spec for a step running `script` (and optionally `after_script`)
    /// with the workspace bind-mounted at the clone dir
    pub fn for_step(
        image: &str,
        workspace: &str,
        script: &[String],
        after_script: &[String],
    ) -> Self {
        Self {
            image: image.to_string(),
            command: build_step_command(script, after_script),
            binds: vec![format!("{workspace}:{CLONE_DIR}")],
            working_dir: Some(CLONE_DIR.to_string()),
            ..Default::default()
        }
    }
}

/// Parse a memory limit string (`^\d+[kmg]?$`, case-insensitive) to bytes
pub fn parse_memory(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (digits, multiplier) = match value.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&value[..value.len() - 1], 1024i64),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&value[..value.len() - 1], 1024i64 * 1024),
        Some(c) if c.eq_ignore_ascii_case(&'g') => {
            (&value[..value.len() - 1], 1024i64 * 1024 * 1024)
        }
        _ => (value, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()?.checked_mul(multiplier)
}

/// Parse a CPU limit string (positive decimal) to nano-CPUs, floored
pub fn parse_cpus(value: &str) -> Option<i64> {
    let parsed: f64 = value.trim().parse().ok()?;
    if parsed <= 0.0 || !parsed.is_finite() {
        return None;
    }
    Some((parsed * 1e9) as i64)
}

/// Embed `text` in single quotes, escaping embedded single quotes as
/// `'\''` so the shell reproduces it byte for byte
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// One `/bin/bash -c` invocation that writes the step script into the
/// container, marks it executable, and runs it. With an after-script the
/// main script's exit code is preserved across the trailer.
pub fn build_step_command(script: &[String], after_script: &[String]) -> Vec<String> {
    let main_body = script_body(script);

    let command = if after_script.is_empty() {
        format!(
            "printf '%s\\n' {} > {SCRIPT_PATH} && chmod +x {SCRIPT_PATH} && {SCRIPT_PATH}",
            shell_quote(&main_body),
        )
    } else {
        let after_body = script_body(after_script);
        format!(
            "printf '%s\\n' {} > {SCRIPT_PATH} && chmod +x {SCRIPT_PATH} && \
             printf '%s\\n' {} > {AFTER_SCRIPT_PATH} && chmod +x {AFTER_SCRIPT_PATH} && \
             ({SCRIPT_PATH}; ec=$?; {AFTER_SCRIPT_PATH}; exit $ec)",
            shell_quote(&main_body),
            shell_quote(&after_body),
        )
    };

    vec!["/bin/bash".to_string(), "-c".to_string(), command]
}

fn script_body(lines: &[String]) -> String {
    let mut body = String::from("#!/bin/bash\nset -e\n");
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    // printf appends the final newline
    body.pop();
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory("512"), Some(512));
        assert_eq!(parse_memory("4k"), Some(4 * 1024));
        assert_eq!(parse_memory("4K"), Some(4 * 1024));
        assert_eq!(parse_memory("8m"), Some(8 * 1024 * 1024));
        assert_eq!(parse_memory("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory("2G"), Some(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_parse_memory_rejects_garbage() {
        assert_eq!(parse_memory(""), None);
        assert_eq!(parse_memory("g"), None);
        assert_eq!(parse_memory("4gb"), None);
        assert_eq!(parse_memory("-4g"), None);
        assert_eq!(parse_memory("4.5g"), None);
    }

    #[test]
    fn test_parse_cpus() {
        assert_eq!(parse_cpus("1"), Some(1_000_000_000));
        assert_eq!(parse_cpus("2.5"), Some(2_500_000_000));
        assert_eq!(parse_cpus("0.1"), Some(100_000_000));
        assert_eq!(parse_cpus("0"), None);
        assert_eq!(parse_cpus("-1"), None);
        assert_eq!(parse_cpus("lots"), None);
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        // round-trip sanity: the quoted form contains no bare quote runs
        assert_eq!(shell_quote("''"), r"''\'''\'''");
    }

    #[test]
    fn test_step_command_shape() {
        let command = build_step_command(&["echo hello".to_string()], &[]);
        assert_eq!(command[0], "/bin/bash");
        assert_eq!(command[1], "-c");
        assert!(command[2].contains(SCRIPT_PATH));
        assert!(command[2].contains("chmod +x"));
        assert!(command[2].contains("echo hello"));
        assert!(!command[2].contains(AFTER_SCRIPT_PATH));
    }

    #[test]
    fn test_step_command_with_after_script_preserves_exit_code() {
        let command = build_step_command(
            &["make build".to_string()],
            &["make report".to_string()],
        );
        let body = &command[2];
        assert!(body.contains(AFTER_SCRIPT_PATH));
        assert!(body.contains("ec=$?"));
        assert!(body.contains("exit $ec"));
    }

    #[test]
    fn test_script_with_single_quotes_survives_quoting() {
        let command = build_step_command(&["echo 'quoted words'".to_string()], &[]);
        assert!(command[2].contains(r"echo '\''quoted words'\''"));
    }

    #[test]
    fn test_step_spec_mounts_workspace() {
        let spec = ContainerSpec::for_step(
            "node:20",
            "/home/dev/project",
            &["npm test".to_string()],
            &[],
        );
        assert_eq!(spec.image, "node:20");
        assert_eq!(spec.binds, vec![format!("/home/dev/project:{CLONE_DIR}")]);
        assert_eq!(spec.working_dir.as_deref(), Some(CLONE_DIR));
    }
}
