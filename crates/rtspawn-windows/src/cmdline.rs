//! Command-line assembly for `CreateProcessW`.

use std::ffi::OsStr;

const NEEDS_QUOTES: &[char] = &[' ', '\t', '\n', '\u{b}', '\u{c}', '"'];

fn needs_quotes(arg: &str) -> bool {
    arg.is_empty() || arg.contains(NEEDS_QUOTES)
}

/// Append one argument, quoting it when it is empty or holds whitespace or
/// a double quote. Embedded quotes are doubled.
pub fn push_quoted(cmdline: &mut String, arg: &str) {
    if !needs_quotes(arg) {
        cmdline.push_str(arg);
        return;
    }
    cmdline.push('"');
    for c in arg.chars() {
        if c == '"' {
            cmdline.push('"');
        }
        cmdline.push(c);
    }
    cmdline.push('"');
}

/// Build the single command line handed to the child: the program followed
/// by every argument, separated by spaces.
pub fn build_command_line<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> String {
    let mut cmdline = String::new();
    push_quoted(&mut cmdline, &program.to_string_lossy());
    for arg in args {
        cmdline.push(' ');
        push_quoted(&mut cmdline, &arg.as_ref().to_string_lossy());
    }
    cmdline
}
