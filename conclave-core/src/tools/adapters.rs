//! JSON tool adapters over the collaborator traits

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    names, DocLocator, FileStore, RepoCheckout, SourceControl, TestExecutor, Tool, ToolResult,
};

fn default_branch() -> String {
    "main".to_string()
}

fn parse<T: DeserializeOwned>(params: Value) -> ToolResult<T> {
    Ok(serde_json::from_value(params)?)
}

fn to_json<T: Serialize>(value: &T) -> ToolResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| super::ToolError::execution(format!("unserializable tool result: {}", e)))
}

/// Parameters of `get_pr_changes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrChangesParams {
    pub repo: String,
    pub pr: u64,
}

/// Parameters of `compare_files`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareParams {
    pub old: String,
    pub new: String,
}

/// Parameters of `list_files`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesParams {
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

/// Parameters of `read_file`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileParams {
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub path: String,
}

/// Parameters of `list_tests`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTestsParams {
    /// Working tree to use instead of the executor's own
    #[serde(default)]
    pub workdir: Option<String>,
}

/// Parameters of `run_tests`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTestsParams {
    pub tests: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
}

/// Parameters of `checkout_pr`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutPrParams {
    pub repo: String,
    pub pr: u64,
}

/// Parameters of `locate_docs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateDocsParams {
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub paths: Vec<String>,
}

/// `get_pr_changes`
pub struct PrChangesTool(pub Arc<dyn SourceControl>);

#[async_trait]
impl Tool for PrChangesTool {
    fn name(&self) -> &str {
        names::GET_PR_CHANGES
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let p: PrChangesParams = parse(params)?;
        to_json(&self.0.pull_request_changes(&p.repo, p.pr).await?)
    }
}

/// `compare_files`
pub struct CompareFilesTool(pub Arc<dyn SourceControl>);

#[async_trait]
impl Tool for CompareFilesTool {
    fn name(&self) -> &str {
        names::COMPARE_FILES
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let p: CompareParams = parse(params)?;
        to_json(&self.0.compare(&p.old, &p.new).await?)
    }
}

/// `list_files`
pub struct ListFilesTool(pub Arc<dyn FileStore>);

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        names::LIST_FILES
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let p: ListFilesParams = parse(params)?;
        to_json(&self.0.list_files(&p.repo, &p.branch).await?)
    }
}

/// `read_file`
pub struct ReadFileTool(pub Arc<dyn FileStore>);

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        names::READ_FILE
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let p: ReadFileParams = parse(params)?;
        let content = self.0.read_file(&p.repo, &p.branch, &p.path).await?;
        Ok(Value::String(content))
    }
}

/// `list_tests`
pub struct ListTestsTool(pub Arc<dyn TestExecutor>);

#[async_trait]
impl Tool for ListTestsTool {
    fn name(&self) -> &str {
        names::LIST_TESTS
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let p: ListTestsParams = if params.is_null() {
            ListTestsParams::default()
        } else {
            parse(params)?
        };
        to_json(&self.0.discover(p.workdir.as_deref().map(Path::new)).await?)
    }
}

/// `run_tests`
pub struct RunTestsTool(pub Arc<dyn TestExecutor>);

#[async_trait]
impl Tool for RunTestsTool {
    fn name(&self) -> &str {
        names::RUN_TESTS
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let p: RunTestsParams = parse(params)?;
        to_json(&self.0.run(&p.tests, p.workdir.as_deref().map(Path::new)).await?)
    }
}

/// `locate_docs`
pub struct LocateDocsTool(pub Arc<dyn DocLocator>);

#[async_trait]
impl Tool for LocateDocsTool {
    fn name(&self) -> &str {
        names::LOCATE_DOCS
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let p: LocateDocsParams = parse(params)?;
        to_json(&self.0.locate(&p.repo, &p.branch, &p.paths).await?)
    }
}

/// `checkout_pr`
pub struct CheckoutPrTool(pub Arc<dyn RepoCheckout>);

#[async_trait]
impl Tool for CheckoutPrTool {
    fn name(&self) -> &str {
        names::CHECKOUT_PR
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let p: CheckoutPrParams = parse(params)?;
        to_json(&self.0.checkout_pr(&p.repo, p.pr).await?)
    }
}

/// Tools backed by a source-control collaborator
pub fn source_control_tools(backend: Arc<dyn SourceControl>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(PrChangesTool(backend.clone())),
        Arc::new(CompareFilesTool(backend)),
    ]
}

/// Tools backed by a file store
pub fn file_store_tools(backend: Arc<dyn FileStore>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListFilesTool(backend.clone())),
        Arc::new(ReadFileTool(backend)),
    ]
}

/// Tools backed by a test executor
pub fn test_tools(backend: Arc<dyn TestExecutor>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListTestsTool(backend.clone())),
        Arc::new(RunTestsTool(backend)),
    ]
}

/// Tools backed by a checkout collaborator
pub fn checkout_tools(backend: Arc<dyn RepoCheckout>) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(CheckoutPrTool(backend))]
}

/// Tools backed by a documentation locator
pub fn doc_tools(backend: Arc<dyn DocLocator>) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(LocateDocsTool(backend))]
}
