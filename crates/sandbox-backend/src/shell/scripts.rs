//! Generators for the self-contained scripts run by [`super::ShellSandbox`].
//!
//! Every string parameter is base64-encoded before it is embedded, and the script
//! body travels through a quoted heredoc, so no parameter is ever interpreted by
//! the shell or by the Python parser.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

const HEREDOC_DELIMITER: &str = "__SANDBOX_SCRIPT__";

/// Exit code the edit script uses when `old_string` does not occur.
pub(crate) const EDIT_EXIT_NOT_FOUND: i32 = 1;
/// Exit code the edit script uses when `old_string` is ambiguous.
pub(crate) const EDIT_EXIT_MULTIPLE: i32 = 2;
/// File missing, undecodable or not writable; reported as not found.
const EDIT_EXIT_UNREADABLE: i32 = 4;
/// Exit code the write script uses when the target already exists.
pub(crate) const WRITE_EXIT_EXISTS: i32 = 3;

pub(crate) const READ_NOT_FOUND_MARKER: &str = "Error: File not found";

const PRELUDE: &str = r#"import base64
import json
import os
import sys


def arg(value):
    return base64.b64decode(value).decode("utf-8")


def emit(text):
    sys.stdout.buffer.write(text.encode("utf-8", "surrogateescape"))
    sys.stdout.buffer.flush()
"#;

pub(crate) fn encode(value: &str) -> String {
    BASE64.encode(value.as_bytes())
}

fn py_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// Wrap a script body as `python3 -` fed by a quoted heredoc.
fn python(body: &str, stderr: StderrMode) -> String {
    let redirect = match stderr {
        StderrMode::Merge => "2>&1",
        StderrMode::Discard => "2>/dev/null",
    };
    format!("python3 - {redirect} <<'{HEREDOC_DELIMITER}'\n{PRELUDE}\n{body}\n{HEREDOC_DELIMITER}")
}

#[derive(Clone, Copy)]
enum StderrMode {
    Merge,
    Discard,
}

pub(crate) fn read(file_path: &str, offset: u64, limit: u64) -> String {
    let body = format!(
        r#"path = arg("{path}")
offset = {offset}
limit = {limit}

if not os.path.isfile(path):
    emit("{marker}\n")
    sys.exit(1)

if os.path.getsize(path) == 0:
    emit("{empty}\n")
    sys.exit(0)

with open(path, "r", encoding="utf-8", errors="replace", newline="") as f:
    text = f.read()

lines = text.split("\n")
if text.endswith("\n"):
    lines.pop()

out = []
for i, line in enumerate(lines[offset:offset + limit]):
    out.append("%6d\t%s" % (offset + i + 1, line))
emit("\n".join(out))"#,
        path = encode(file_path),
        marker = READ_NOT_FOUND_MARKER,
        empty = crate::format::EMPTY_FILE_NOTICE,
    );
    python(&body, StderrMode::Merge)
}

pub(crate) fn write(file_path: &str, content: &str) -> String {
    let body = format!(
        r#"path = arg("{path}")
content = arg("{content}")

parent = os.path.dirname(path) or "."
try:
    os.makedirs(parent, exist_ok=True)
except OSError as e:
    emit("Error: %s\n" % e)
    sys.exit(1)

try:
    fd = os.open(path, os.O_WRONLY | os.O_CREAT | os.O_EXCL, 0o644)
except FileExistsError:
    sys.exit({exists})
except OSError as e:
    emit("Error: %s\n" % e)
    sys.exit(1)

with os.fdopen(fd, "w", encoding="utf-8", newline="") as f:
    f.write(content)"#,
        path = encode(file_path),
        content = encode(content),
        exists = WRITE_EXIT_EXISTS,
    );
    python(&body, StderrMode::Merge)
}

pub(crate) fn edit(file_path: &str, old_string: &str, new_string: &str, replace_all: bool) -> String {
    let body = format!(
        r#"path = arg("{path}")
old = arg("{old}")
new = arg("{new}")
replace_all = {replace_all}

try:
    with open(path, "r", encoding="utf-8", newline="") as f:
        text = f.read()
except (OSError, UnicodeDecodeError):
    sys.exit({unreadable})

count = text.count(old)
if count == 0:
    sys.exit({not_found})
if count > 1 and not replace_all:
    sys.exit({multiple})

if replace_all:
    result = text.replace(old, new)
else:
    result = text.replace(old, new, 1)
    count = 1

try:
    with open(path, "w", encoding="utf-8", newline="") as f:
        f.write(result)
except OSError:
    sys.exit({unreadable})

emit(str(count))"#,
        path = encode(file_path),
        old = encode(old_string),
        new = encode(new_string),
        replace_all = py_bool(replace_all),
        not_found = EDIT_EXIT_NOT_FOUND,
        multiple = EDIT_EXIT_MULTIPLE,
        unreadable = EDIT_EXIT_UNREADABLE,
    );
    python(&body, StderrMode::Merge)
}

pub(crate) fn ls(path: &str) -> String {
    let body = format!(
        r#"path = arg("{path}")

try:
    with os.scandir(path) as it:
        for entry in it:
            emit(json.dumps({{"path": entry.name, "is_dir": entry.is_dir(follow_symlinks=False)}}) + "\n")
except OSError:
    pass"#,
        path = encode(path),
    );
    python(&body, StderrMode::Discard)
}

pub(crate) fn grep(pattern: &str, path: &str, glob: Option<&str>) -> String {
    let body = format!(
        r#"import subprocess

pattern = arg("{pattern}")
path = arg("{path}")
include = arg("{glob}")

cmd = ["grep", "-rHnF"]
if include:
    cmd.append("--include=" + include)
cmd += ["-e", pattern, "--", path]

try:
    proc = subprocess.run(cmd, stdout=subprocess.PIPE, stderr=subprocess.DEVNULL)
except OSError:
    sys.exit(0)

sys.stdout.buffer.write(proc.stdout)"#,
        pattern = encode(pattern),
        path = encode(path),
        glob = encode(glob.unwrap_or_default()),
    );
    python(&body, StderrMode::Discard)
}

pub(crate) fn glob(pattern: &str, path: &str) -> String {
    let body = format!(
        r#"import glob

path = arg("{path}")
pattern = arg("{pattern}")

try:
    os.chdir(path)
except OSError:
    sys.exit(0)

for m in sorted(glob.glob(pattern, recursive=True)):
    try:
        st = os.stat(m)
    except OSError:
        continue
    emit(json.dumps({{"path": m, "size": st.st_size, "mtime": st.st_mtime, "is_dir": os.path.isdir(m)}}) + "\n")"#,
        path = encode(path),
        pattern = encode(pattern),
    );
    python(&body, StderrMode::Discard)
}
