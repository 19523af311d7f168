use std::fs;
use std::path::{Path, PathBuf};

use agent_provider::is_cancelled;
use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::confirm::require_confirmation;
use super::workspace::Workspace;
use super::{
    parse_args, Capability, CapabilitySchema, ExecutionError, InvocationContext, ParameterKind,
    ParameterSpec,
};

const READ_FILE: &str = "readFile";
const LIST: &str = "list";
const SEARCH_IN_DIRECTORY: &str = "searchInDirectory";
const WRITE_FILE: &str = "writeFile";
const EDIT_FILE: &str = "editFile";

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    path: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    directory: String,
    keyword: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct EditFileArgs {
    path: String,
    new_content: String,
}

/// Reads a UTF-8 text file.
#[derive(Debug, Clone)]
pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    #[must_use]
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

impl Capability for ReadFileTool {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema {
            name: READ_FILE,
            description: "Reads the full UTF-8 contents of a file inside the project.",
            parameters: vec![ParameterSpec::required(
                "path",
                ParameterKind::String,
                "Path of the file to read, relative to the project root",
            )],
            mutating: false,
        }
    }

    fn invoke(&self, args: &Value, _ctx: &InvocationContext<'_>) -> Result<Value, ExecutionError> {
        let args: ReadFileArgs = parse_args(READ_FILE, args)?;
        let resolved = self.workspace.resolve_existing(&args.path)?;
        let content = read_text_file(&resolved, self.workspace.read_max_bytes())?;

        Ok(json!({
            "path": self.workspace.display(&resolved),
            "content": content,
        }))
    }
}

/// Lists directory entries, optionally recursively.
#[derive(Debug, Clone)]
pub struct ListTool {
    workspace: Workspace,
}

impl ListTool {
    #[must_use]
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    fn list_flat(&self, directory: &Path) -> Result<Vec<String>, ExecutionError> {
        let entries = fs::read_dir(directory)
            .map_err(|source| ExecutionError::io("read directory", directory, source))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| ExecutionError::io("read directory", directory, source))?;
            let path = entry.path();
            files.push(self.entry_label(&path, path.is_dir()));
        }
        files.sort();
        Ok(files)
    }

    fn list_recursive(
        &self,
        directory: &Path,
        ctx: &InvocationContext<'_>,
    ) -> Result<Vec<String>, ExecutionError> {
        let mut files = Vec::new();
        for entry in walk(directory) {
            if is_cancelled(&ctx.cancel) {
                return Err(ExecutionError::cancelled("turn was cancelled"));
            }

            let entry = entry.map_err(|error| ExecutionError::Walk {
                path: directory.to_path_buf(),
                message: error.to_string(),
            })?;
            if entry.depth() == 0 {
                continue;
            }

            let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
            files.push(self.entry_label(entry.path(), is_dir));
        }
        Ok(files)
    }

    fn entry_label(&self, path: &Path, is_dir: bool) -> String {
        let label = self.workspace.display(path);
        if is_dir {
            format!("{label}/")
        } else {
            label
        }
    }
}

impl Capability for ListTool {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema {
            name: LIST,
            description: "Lists files and directories under a path. Directories end with '/'. \
                          Set recursive to true to include nested entries.",
            parameters: vec![
                ParameterSpec::required(
                    "path",
                    ParameterKind::String,
                    "Directory to list, relative to the project root",
                ),
                ParameterSpec::optional(
                    "recursive",
                    ParameterKind::Boolean,
                    "List nested entries as well (default: false)",
                ),
            ],
            mutating: false,
        }
    }

    fn invoke(&self, args: &Value, ctx: &InvocationContext<'_>) -> Result<Value, ExecutionError> {
        let args: ListArgs = parse_args(LIST, args)?;
        let directory = self.workspace.resolve_existing(&args.path)?;
        if !directory.is_dir() {
            return Err(ExecutionError::NotADirectory { path: directory });
        }

        let files = if args.recursive {
            self.list_recursive(&directory, ctx)?
        } else {
            self.list_flat(&directory)?
        };
        debug!(path = %directory.display(), entries = files.len(), "listed directory");

        Ok(json!({
            "path": self.workspace.display(&directory),
            "files": files,
        }))
    }
}

/// Finds files whose text contains a keyword.
#[derive(Debug, Clone)]
pub struct SearchInDirectoryTool {
    workspace: Workspace,
}

impl SearchInDirectoryTool {
    #[must_use]
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

impl Capability for SearchInDirectoryTool {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema {
            name: SEARCH_IN_DIRECTORY,
            description: "Recursively searches a directory and returns the files whose \
                          contents contain the keyword.",
            parameters: vec![
                ParameterSpec::required(
                    "directory",
                    ParameterKind::String,
                    "Directory to start searching from",
                ),
                ParameterSpec::required(
                    "keyword",
                    ParameterKind::String,
                    "Text to look for inside files",
                ),
            ],
            mutating: false,
        }
    }

    fn invoke(&self, args: &Value, ctx: &InvocationContext<'_>) -> Result<Value, ExecutionError> {
        let args: SearchArgs = parse_args(SEARCH_IN_DIRECTORY, args)?;
        if args.keyword.is_empty() {
            return Err(ExecutionError::InvalidArguments {
                tool: SEARCH_IN_DIRECTORY,
                message: "keyword must not be empty".to_string(),
            });
        }

        let directory = self.workspace.resolve_existing(&args.directory)?;
        if !directory.is_dir() {
            return Err(ExecutionError::NotADirectory { path: directory });
        }

        let mut files = Vec::new();
        for entry in walk(&directory) {
            if is_cancelled(&ctx.cancel) {
                return Err(ExecutionError::cancelled("turn was cancelled"));
            }

            let entry = entry.map_err(|error| ExecutionError::Walk {
                path: directory.clone(),
                message: error.to_string(),
            })?;
            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }

            // Unreadable and non-UTF-8 files are skipped.
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            if content.contains(&args.keyword) {
                files.push(self.workspace.display(entry.path()));
            }
        }

        Ok(json!({
            "directory": self.workspace.display(&directory),
            "keyword": args.keyword,
            "files": files,
        }))
    }
}

/// Creates a new file; refuses to overwrite.
#[derive(Debug, Clone)]
pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    #[must_use]
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

impl Capability for WriteFileTool {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema {
            name: WRITE_FILE,
            description: "Creates a new file with the given content, creating parent \
                          directories as needed. Fails if the file already exists. \
                          Asks the user for permission first.",
            parameters: vec![
                ParameterSpec::required(
                    "path",
                    ParameterKind::String,
                    "Path of the new file, relative to the project root",
                ),
                ParameterSpec::required(
                    "content",
                    ParameterKind::String,
                    "Content to write",
                ),
            ],
            mutating: true,
        }
    }

    fn invoke(&self, args: &Value, ctx: &InvocationContext<'_>) -> Result<Value, ExecutionError> {
        let args: WriteFileArgs = parse_args(WRITE_FILE, args)?;
        let resolved = self.workspace.resolve_write(&args.path)?;
        if resolved.exists() {
            return Err(ExecutionError::AlreadyExists { path: resolved });
        }

        require_confirmation(
            ctx,
            &format!("Create new file {}?", self.workspace.display(&resolved)),
        )?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ExecutionError::io("create parent directories", parent, source))?;
            let canonical_parent = parent
                .canonicalize()
                .map_err(|source| ExecutionError::io("resolve write parent", parent, source))?;
            self.workspace.ensure_inside(&canonical_parent)?;
        }

        fs::write(&resolved, &args.content)
            .map_err(|source| ExecutionError::io("write file", &resolved, source))?;

        Ok(json!({
            "success": true,
            "path": self.workspace.display(&resolved),
            "bytes": args.content.len(),
        }))
    }
}

/// Replaces the whole content of an existing file.
#[derive(Debug, Clone)]
pub struct EditFileTool {
    workspace: Workspace,
}

impl EditFileTool {
    #[must_use]
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

impl Capability for EditFileTool {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema {
            name: EDIT_FILE,
            description: "Overwrites an existing file with new complete content. Read the \
                          file first and always send the full new content, never a partial \
                          edit. Fails if the file does not exist. Asks the user for \
                          permission first.",
            parameters: vec![
                ParameterSpec::required(
                    "path",
                    ParameterKind::String,
                    "Path of the existing file to overwrite",
                ),
                ParameterSpec::required(
                    "new_content",
                    ParameterKind::String,
                    "Complete new content of the file",
                ),
            ],
            mutating: true,
        }
    }

    fn invoke(&self, args: &Value, ctx: &InvocationContext<'_>) -> Result<Value, ExecutionError> {
        let args: EditFileArgs = parse_args(EDIT_FILE, args)?;
        let resolved: PathBuf = self.workspace.resolve_existing(&args.path)?;
        if resolved.is_dir() {
            return Err(ExecutionError::NotAFile { path: resolved });
        }

        require_confirmation(
            ctx,
            &format!("Overwrite existing file {}?", self.workspace.display(&resolved)),
        )?;

        let content = strip_control_characters(&args.new_content);
        fs::write(&resolved, &content)
            .map_err(|source| ExecutionError::io("write file", &resolved, source))?;

        Ok(json!({
            "success": true,
            "path": self.workspace.display(&resolved),
            "bytes": content.len(),
        }))
    }
}

fn walk(root: &Path) -> ignore::Walk {
    WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .filter_entry(|entry| entry.file_name() != ".git")
        .sort_by_file_name(|left, right| left.cmp(right))
        .build()
}

fn read_text_file(path: &Path, max_bytes: u64) -> Result<String, ExecutionError> {
    if path.is_dir() {
        return Err(ExecutionError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let size = fs::metadata(path)
        .map_err(|source| ExecutionError::io("read metadata of", path, source))?
        .len();
    if size > max_bytes {
        return Err(ExecutionError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: max_bytes,
        });
    }

    let bytes = fs::read(path).map_err(|source| ExecutionError::io("read file", path, source))?;
    String::from_utf8(bytes).map_err(|_| ExecutionError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

/// Drops C0 control characters other than tab, newline and carriage return.
fn strip_control_characters(text: &str) -> String {
    text.chars()
        .filter(|c| u32::from(*c) >= 32 || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_characters_are_stripped_except_whitespace() {
        assert_eq!(
            strip_control_characters("a\u{0}b\tc\r\nd\u{1b}e"),
            "ab\tc\r\nde"
        );
    }
}
