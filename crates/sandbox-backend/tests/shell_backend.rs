use sandbox_backend::format::{EMPTY_FILE_NOTICE, strip_line_numbers};
use sandbox_backend::{
    FileOperationError, LocalExecutor, SandboxBackend, ShellSandbox, dispatch_tool,
};
use serde_json::json;
use tempfile::TempDir;

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn sandbox() -> Option<(TempDir, ShellSandbox<LocalExecutor>)> {
    if !python_available() {
        return None;
    }
    let dir = TempDir::new().unwrap();
    let executor = LocalExecutor::new(dir.path()).unwrap();
    Some((dir, ShellSandbox::new(executor)))
}

fn path_in(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

#[tokio::test]
async fn second_write_fails_and_keeps_original() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let path = path_in(&dir, "nested/new.txt");

    let first = sandbox.write(&path, "original").await;
    assert!(first.is_ok(), "{first:?}");
    assert_eq!(first.path.as_deref(), Some(path.as_str()));

    let second = sandbox.write(&path, "replacement").await;
    assert_eq!(
        second.error,
        Some(format!("Error: File '{path}' already exists"))
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
}

#[tokio::test]
async fn read_after_write_is_numbered() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let path = path_in(&dir, "lines.txt");
    sandbox.write(&path, "alpha\nbeta\ngamma\n").await;

    assert_eq!(
        sandbox.read(&path, 0, 2000).await,
        "     1\talpha\n     2\tbeta\n     3\tgamma"
    );
    assert_eq!(sandbox.read(&path, 1, 1).await, "     2\tbeta");
}

#[tokio::test]
async fn read_reports_missing_and_empty_files() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let missing = path_in(&dir, "missing.txt");
    assert_eq!(
        sandbox.read(&missing, 0, 2000).await,
        format!("Error: File '{missing}' not found")
    );

    let empty = path_in(&dir, "empty.txt");
    std::fs::write(&empty, "").unwrap();
    assert_eq!(sandbox.read(&empty, 0, 2000).await, EMPTY_FILE_NOTICE);
}

#[tokio::test]
async fn hostile_content_round_trips() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let path = path_in(&dir, "it's $HOME `x`.txt");
    let content = "echo \"$(rm -rf /)\" 'single' `tick`\n\\n literal\n\ttabbed\ttwice\n__SANDBOX_SCRIPT__\nünïcödé; trailing  ";

    let written = sandbox.write(&path, content).await;
    assert!(written.is_ok(), "{written:?}");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), content);

    let read = sandbox.read(&path, 0, 2000).await;
    assert_eq!(strip_line_numbers(&read), content);
}

fn numbered_content(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("{i:05} {}\n", "x".repeat(69)))
        .collect()
}

#[tokio::test]
async fn large_content_round_trips() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let path = path_in(&dir, "large.txt");
    let content = numbered_content(3000);
    assert!(content.len() > 200_000);

    let written = sandbox.write(&path, &content).await;
    assert!(written.is_ok(), "{written:?}");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), content);

    let read = sandbox.read(&path, 0, 3000).await;
    assert_eq!(strip_line_numbers(&read), content.trim_end_matches('\n'));
}

#[tokio::test]
async fn reads_beyond_the_execute_cap_are_complete() {
    if !python_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let executor = LocalExecutor::new(dir.path())
        .unwrap()
        .with_max_output_bytes(1000);
    let sandbox = ShellSandbox::new(executor);
    let path = path_in(&dir, "window.txt");
    std::fs::write(&path, numbered_content(2500)).unwrap();

    let read = sandbox.read(&path, 0, 2000).await;
    assert_eq!(read.lines().count(), 2000);
    assert!(read.ends_with(&format!("  2000\t01999 {}", "x".repeat(69))));

    let executed = sandbox.execute("yes | head -c 5000").await;
    assert_eq!(executed.output.len(), 1000);
    assert!(executed.truncated);
}

#[tokio::test]
async fn large_listings_are_complete() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let name = |i: usize| format!("entry-{i:04}-{}.txt", "n".repeat(40));
    for i in 0..2500 {
        std::fs::write(dir.path().join(name(i)), "x").unwrap();
    }
    let root = dir.path().to_string_lossy().into_owned();

    let listed = sandbox.ls_info(&root).await;
    assert_eq!(listed.len(), 2500);
    assert_eq!(listed[0].path, name(0));
    assert_eq!(listed[2499].path, name(2499));

    let globbed = sandbox.glob_info("*.txt", &root).await;
    assert_eq!(globbed.len(), 2500);
    assert_eq!(globbed[2499].path, name(2499));
    assert_eq!(globbed[2499].size, Some(1));
}

#[tokio::test]
async fn edit_refuses_ambiguity_then_replaces_all() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let path = path_in(&dir, "twice.txt");
    std::fs::write(&path, "foo bar foo").unwrap();

    let ambiguous = sandbox.edit(&path, "foo", "baz", false).await;
    assert_eq!(
        ambiguous.error.as_deref(),
        Some("Error: String 'foo' appears multiple times. Use replace_all=True to replace all occurrences.")
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "foo bar foo");

    let all = sandbox.edit(&path, "foo", "baz", true).await;
    assert_eq!(all.occurrences, Some(2));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "baz bar baz");
}

#[tokio::test]
async fn edit_of_absent_string_leaves_file_alone() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let path = path_in(&dir, "once.txt");
    std::fs::write(&path, "hello world").unwrap();

    let result = sandbox.edit(&path, "absent", "x", false).await;
    assert_eq!(
        result.error.as_deref(),
        Some("Error: String not found in file: 'absent'")
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello world");

    let single = sandbox.edit(&path, "world", "there", false).await;
    assert_eq!(single.occurrences, Some(1));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello there");

    let missing = path_in(&dir, "nope.txt");
    assert_eq!(
        sandbox.edit(&missing, "a", "b", false).await.error,
        Some(format!("Error: File '{missing}' not found"))
    );
}

#[tokio::test]
async fn ls_lists_one_level_and_tolerates_missing_dirs() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/deep.txt"), "x").unwrap();
    std::fs::write(dir.path().join("b.txt"), "x").unwrap();

    let entries = sandbox.ls_info(&dir.path().to_string_lossy()).await;
    let listed: Vec<(&str, bool)> = entries
        .iter()
        .map(|e| (e.path.as_str(), e.is_dir))
        .collect();
    assert_eq!(listed, vec![("b.txt", false), ("sub", true)]);

    assert!(sandbox.ls_info(&path_in(&dir, "missing")).await.is_empty());
}

#[tokio::test]
async fn grep_is_literal_and_honours_glob() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    std::fs::write(dir.path().join("a.rs"), "fn main() {}\nlet x = a.*b;\n").unwrap();
    std::fs::write(dir.path().join("b.txt"), "a.*b here too\n").unwrap();
    std::fs::write(dir.path().join("c.rs"), "aXXb\n").unwrap();

    let root = dir.path().to_string_lossy().into_owned();
    let mut matches = sandbox.grep_raw("a.*b", Some(&root), None).await.unwrap();
    matches.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(matches.len(), 2);
    assert!(matches[0].path.ends_with("a.rs"));
    assert_eq!(matches[0].line, 2);
    assert_eq!(matches[0].text, "let x = a.*b;");

    let rust_only = sandbox
        .grep_raw("a.*b", Some(&root), Some("*.rs"))
        .await
        .unwrap();
    assert_eq!(rust_only.len(), 1);

    let none = sandbox
        .grep_raw("no such text", Some(&root), None)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn glob_is_sorted_with_metadata() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    std::fs::create_dir_all(dir.path().join("pkg/inner")).unwrap();
    std::fs::write(dir.path().join("pkg/inner/z.py"), "print(1)\n").unwrap();
    std::fs::write(dir.path().join("a.py"), "x").unwrap();
    std::fs::write(dir.path().join("notes.md"), "x").unwrap();

    let root = dir.path().to_string_lossy().into_owned();
    let entries = sandbox.glob_info("**/*.py", &root).await;
    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["a.py", "pkg/inner/z.py"]);
    assert_eq!(entries[0].size, Some(1));
    assert!(entries[0].modified_at.is_some());
    assert!(!entries[0].is_dir);

    assert!(
        sandbox
            .glob_info("*.py", &path_in(&dir, "missing"))
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn upload_reports_each_file_independently() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    std::fs::create_dir(dir.path().join("taken")).unwrap();

    let results = sandbox
        .upload_files(&[
            ("ok.bin".to_string(), vec![1, 2, 3]),
            ("taken".to_string(), vec![4]),
        ])
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].path, "ok.bin");
    assert_eq!(results[0].error, None);
    assert_eq!(results[1].path, "taken");
    assert_eq!(results[1].error, Some(FileOperationError::IsDirectory));

    let downloads = sandbox.download_files(&["ok.bin".to_string()]).await;
    assert_eq!(downloads[0].content.as_deref(), Some(&[1u8, 2, 3][..]));
}

#[tokio::test]
async fn tools_route_to_the_backend() {
    let Some((dir, sandbox)) = sandbox() else {
        return;
    };
    let path = path_in(&dir, "tool.txt");

    let written = dispatch_tool(
        &sandbox,
        "write_file",
        json!({ "file_path": path, "content": "one\ntwo" }),
    )
    .await
    .unwrap();
    assert_eq!(written["path"], json!(path));

    let read = dispatch_tool(&sandbox, "read_file", json!({ "file_path": path, "offset": 1 }))
        .await
        .unwrap();
    assert_eq!(read, json!("     2\ttwo"));

    let executed = dispatch_tool(&sandbox, "execute", json!({ "command": "echo hi" }))
        .await
        .unwrap();
    assert_eq!(executed["output"], json!("hi\n"));
    assert_eq!(executed["exit_code"], json!(0));

    assert!(dispatch_tool(&sandbox, "rm", json!({})).await.is_err());
}
