use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CompileError;

/// Heredoc terminator used unless the code already contains it.
pub(crate) const DEFAULT_TERMINATOR: &str = "LANGCODE_EOF";

/// Printed between the compile and run phases so callers can tell
/// compiler diagnostics from program output.
pub(crate) const EXEC_SEPARATOR: &str = "----exec-out----";

/// A shell program that stages the toolchain, compiles the submitted code,
/// runs it, and removes its scratch directory on exit.
#[derive(Debug, Clone)]
pub struct Script {
    text: String,
    terminator: String,
}

impl Script {
    /// Build the run script for `code`.
    ///
    /// Rejects code longer than `max_chars` characters before doing
    /// anything else.
    pub fn build(code: &str, max_chars: usize) -> Result<Self, CompileError> {
        if code.chars().count() > max_chars {
            return Err(CompileError::TooLong { limit: max_chars });
        }
        let terminator = choose_terminator(code);
        let text = format!(
            r#"set -euo pipefail
WORKDIR=$(mktemp -d /tmp/sandbox-XXXX)
trap 'cd / && rm -rf "$WORKDIR"' EXIT
cp -r /lang/compiler "$WORKDIR"/
cp -r /lang/liblang "$WORKDIR"/ 2>/dev/null || true
cp -r /lang/*.lang "$WORKDIR"/ 2>/dev/null || true
cd "$WORKDIR"
cat > test.lang <<'{terminator}'
{code}
{terminator}
chown "$(id -u):$(id -g)" test.lang || true
chmod +x compiler 2>/dev/null || true
./compiler test.lang out
echo "{EXEC_SEPARATOR}"
./out || true
"#
        );
        Ok(Self { text, terminator })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn terminator(&self) -> &str {
        &self.terminator
    }
}

/// Pick a heredoc terminator that does not occur anywhere in `code`.
fn choose_terminator(code: &str) -> String {
    if !code.contains(DEFAULT_TERMINATOR) {
        return DEFAULT_TERMINATOR.to_string();
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut suffix = nanos;
    loop {
        let candidate = format!("{DEFAULT_TERMINATOR}_{suffix}");
        if !code.contains(&candidate) {
            return candidate;
        }
        suffix = suffix.wrapping_add(1);
    }
}
