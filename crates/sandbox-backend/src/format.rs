//! Text shapes shared by every backend, so that callers cannot tell backends apart
//! by the strings they return.

pub const DEFAULT_READ_LIMIT: u64 = 2000;

pub const EMPTY_FILE_NOTICE: &str = "System reminder: File exists but has empty contents";

pub fn file_not_found(file_path: &str) -> String {
    format!("Error: File '{file_path}' not found")
}

pub fn file_already_exists(file_path: &str) -> String {
    format!("Error: File '{file_path}' already exists")
}

pub fn write_failed(file_path: &str) -> String {
    format!("Failed to write file '{file_path}'")
}

pub fn string_not_found(old_string: &str) -> String {
    format!("Error: String not found in file: '{old_string}'")
}

pub fn multiple_occurrences(old_string: &str) -> String {
    format!(
        "Error: String '{old_string}' appears multiple times. Use replace_all=True to replace all occurrences."
    )
}

pub const EMPTY_OLD_STRING: &str = "Error: old_string must not be empty";

pub fn output_truncated(operation: &str) -> String {
    format!("Error: {operation} output was truncated")
}

/// Render lines `[offset + 1, offset + limit]` of `content` as `{n:>6}\t{line}`.
///
/// Lines are split on `\n` only, so carriage returns survive the round trip.
pub fn format_numbered_lines(content: &str, offset: u64, limit: u64) -> String {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);

    content
        .split_inclusive('\n')
        .enumerate()
        .skip(offset)
        .take(limit)
        .map(|(index, line)| {
            let line = line.strip_suffix('\n').unwrap_or(line);
            format!("{:>6}\t{}", index + 1, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip the `{n:>6}\t` prefix produced by [`format_numbered_lines`].
pub fn strip_line_numbers(formatted: &str) -> String {
    formatted
        .split('\n')
        .map(|line| line.split_once('\t').map_or(line, |(_, text)| text))
        .collect::<Vec<_>>()
        .join("\n")
}
