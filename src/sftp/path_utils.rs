//! Path utilities for SFTP operations
//!
//! Paths handed to a remote shell must be quoted: the listing command runs
//! through the user's login shell, not the SFTP subsystem.

/// Quote a path for a POSIX shell command line.
///
/// Wraps in single quotes; embedded single quotes become `'\''`.
pub fn shell_quote(path: &str) -> String {
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('\'');
    for c in path.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Build the directory listing command for `path`
pub fn list_command(path: &str) -> String {
    format!("ls -al {}", shell_quote(path))
}
