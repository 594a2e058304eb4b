//! Tool surface offered to an agent on top of any [`SandboxBackend`].

use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::SandboxBackend;
use crate::format::DEFAULT_READ_LIMIT;

pub const LS_TOOL_NAME: &str = "ls";
pub const READ_FILE_TOOL_NAME: &str = "read_file";
pub const WRITE_FILE_TOOL_NAME: &str = "write_file";
pub const EDIT_FILE_TOOL_NAME: &str = "edit_file";
pub const GLOB_TOOL_NAME: &str = "glob";
pub const GREP_TOOL_NAME: &str = "grep";
pub const EXECUTE_TOOL_NAME: &str = "execute";

/// Faults in how a tool was invoked. Failures of the operation itself are
/// reported inside the returned value.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParams { tool_name: String, message: String },

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn invalid_params<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::InvalidParams {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LsParams {
    /// The absolute path to the directory to list
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    /// The absolute path to the file to read
    pub file_path: String,
    /// The line number to start reading from (0-based)
    #[serde(default)]
    pub offset: Option<u64>,
    /// The maximum number of lines to read (default 2000)
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    /// The absolute path of the new file
    pub file_path: String,
    /// The content to write
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EditFileParams {
    /// The absolute path to the file to edit
    pub file_path: String,
    /// The exact string to find and replace.
    pub old_string: String,
    /// The string to replace `old_string` with.
    pub new_string: String,
    /// Replace every occurrence instead of requiring exactly one
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GlobParams {
    /// The glob pattern to match files against
    pub pattern: String,
    /// The directory to search in (default "/")
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GrepParams {
    /// The literal text to search for
    pub pattern: String,
    /// The file or directory to search in
    #[serde(default)]
    pub path: Option<String>,
    /// Only search files whose name matches this glob (e.g. "*.rs")
    #[serde(default)]
    pub glob: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// The shell command to run inside the sandbox
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

fn tool_schema<P: JsonSchema>(name: &str, description: &str) -> ToolSchema {
    let input_schema = serde_json::to_value(schema_for!(P)).unwrap_or(Value::Null);
    ToolSchema {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Schemas for every tool `dispatch_tool` accepts.
pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        tool_schema::<LsParams>(LS_TOOL_NAME, "List the entries of a directory"),
        tool_schema::<ReadFileParams>(
            READ_FILE_TOOL_NAME,
            "Read a window of a text file with line numbers",
        ),
        tool_schema::<WriteFileParams>(
            WRITE_FILE_TOOL_NAME,
            "Create a new file. Fails if the file already exists",
        ),
        tool_schema::<EditFileParams>(
            EDIT_FILE_TOOL_NAME,
            "Replace an exact string in an existing file",
        ),
        tool_schema::<GlobParams>(GLOB_TOOL_NAME, "Find files matching a glob pattern"),
        tool_schema::<GrepParams>(GREP_TOOL_NAME, "Search files for a literal string"),
        tool_schema::<ExecuteParams>(EXECUTE_TOOL_NAME, "Run a shell command in the sandbox"),
    ]
}

fn parse_params<P: DeserializeOwned>(tool_name: &str, params: Value) -> Result<P, ToolError> {
    serde_json::from_value(params).map_err(|e| ToolError::invalid_params(tool_name, e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Internal(e.to_string()))
}

/// Run the named tool against `backend`.
pub async fn dispatch_tool(
    backend: &dyn SandboxBackend,
    name: &str,
    params: Value,
) -> Result<Value, ToolError> {
    debug!(target: "sandbox.tools", tool = name, "dispatching tool call");

    match name {
        LS_TOOL_NAME => {
            let p: LsParams = parse_params(name, params)?;
            to_json(&backend.ls_info(&p.path).await)
        }
        READ_FILE_TOOL_NAME => {
            let p: ReadFileParams = parse_params(name, params)?;
            let content = backend
                .read(
                    &p.file_path,
                    p.offset.unwrap_or(0),
                    p.limit.unwrap_or(DEFAULT_READ_LIMIT),
                )
                .await;
            Ok(Value::String(content))
        }
        WRITE_FILE_TOOL_NAME => {
            let p: WriteFileParams = parse_params(name, params)?;
            to_json(&backend.write(&p.file_path, &p.content).await)
        }
        EDIT_FILE_TOOL_NAME => {
            let p: EditFileParams = parse_params(name, params)?;
            to_json(
                &backend
                    .edit(&p.file_path, &p.old_string, &p.new_string, p.replace_all)
                    .await,
            )
        }
        GLOB_TOOL_NAME => {
            let p: GlobParams = parse_params(name, params)?;
            let path = p.path.as_deref().unwrap_or("/");
            to_json(&backend.glob_info(&p.pattern, path).await)
        }
        GREP_TOOL_NAME => {
            let p: GrepParams = parse_params(name, params)?;
            match backend
                .grep_raw(&p.pattern, p.path.as_deref(), p.glob.as_deref())
                .await
            {
                Ok(matches) => to_json(&matches),
                Err(message) => Ok(json!({ "error": message })),
            }
        }
        EXECUTE_TOOL_NAME => {
            let p: ExecuteParams = parse_params(name, params)?;
            to_json(&backend.execute(&p.command).await)
        }
        _ => Err(ToolError::UnknownTool(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_cover_every_tool() {
        let names: Vec<String> = tool_schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["ls", "read_file", "write_file", "edit_file", "glob", "grep", "execute"]
        );
    }

    #[test]
    fn edit_schema_requires_strings_but_not_replace_all() {
        let schema = tool_schemas()
            .into_iter()
            .find(|s| s.name == EDIT_FILE_TOOL_NAME)
            .unwrap();
        let required: Vec<&str> = schema.input_schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"file_path"));
        assert!(required.contains(&"old_string"));
        assert!(!required.contains(&"replace_all"));
        assert!(schema.input_schema["properties"]["replace_all"].is_object());
    }

    #[test]
    fn read_params_default_window() {
        let p: ReadFileParams =
            parse_params(READ_FILE_TOOL_NAME, json!({ "file_path": "/a" })).unwrap();
        assert_eq!(p.offset, None);
        assert_eq!(p.limit, None);
    }

    #[test]
    fn malformed_params_are_invalid() {
        let err = parse_params::<WriteFileParams>(WRITE_FILE_TOOL_NAME, json!({ "file_path": 3 }))
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::InvalidParams { ref tool_name, .. } if tool_name == "write_file"
        ));
    }
}
