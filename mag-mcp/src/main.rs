//! Mag MCP Server - semantic code search over stdio JSON-RPC

use clap::Parser;
use mag_core::prompts::{list_prompts, render_prompt};
use mag_core::{CodebaseTools, Embedder, MagError, OllamaBackend, Workspace};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const RESOURCE_INDEXED: &str = "codebase://indexed";
const RESOURCE_STATS: &str = "codebase://stats";

#[derive(Parser)]
#[command(name = "mag-mcp")]
#[command(about = "MCP server for semantic code search", long_about = None)]
struct Cli {
    /// Path to codebase root
    #[arg(long, default_value = ".")]
    codebase: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let tools = match open_tools(&cli.codebase) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        root = %tools.workspace().root().display(),
        ollama = %tools.workspace().config().ollama.host,
        "starting mag MCP server"
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());
    let server = McpServer::new(tools);

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        if line.trim().is_empty() {
            continue;
        }

        if let Some(resp) = server.handle_request(&line) {
            let _ = writeln!(stdout, "{}", resp);
            let _ = stdout.flush();
        }
    }
    ExitCode::SUCCESS
}

/// stdout is the protocol channel, so logs go to stderr
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn open_tools(root: &std::path::Path) -> mag_core::Result<CodebaseTools> {
    let workspace = Workspace::open_or_init(root)?;
    let store = workspace.open_index()?;
    let backend = Arc::new(OllamaBackend::new(&workspace.config().ollama)?);
    let embedder = Arc::new(Embedder::new(backend.clone(), &workspace.config().indexing));
    Ok(CodebaseTools::new(workspace, store, embedder, backend))
}

type RpcResult = Result<Value, (i32, String)>;

struct McpServer {
    tools: CodebaseTools,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl McpServer {
    fn new(tools: CodebaseTools) -> Self {
        Self { tools }
    }

    fn handle_request(&self, line: &str) -> Option<String> {
        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return Some(
                    json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": { "code": -32700, "message": format!("Parse error: {}", e) }
                    })
                    .to_string(),
                );
            }
        };

        // Notifications get no response
        let id = match req.id.clone() {
            Some(id) if !req.method.starts_with("notifications/") => id,
            _ => return None,
        };

        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(&req.params),
            "resources/list" => self.handle_resources_list(),
            "resources/read" => self.handle_resources_read(&req.params),
            "prompts/list" => self.handle_prompts_list(),
            "prompts/get" => self.handle_prompts_get(&req.params),
            _ => Err((-32601, format!("Method not found: {}", req.method))),
        };

        let response = match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: Some(value),
                error: None,
            },
            Err((code, message)) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(JsonRpcError { code, message }),
            },
        };

        match serde_json::to_string(&response) {
            Ok(s) => Some(s),
            Err(e) => {
                error!(error = %e, "failed to encode response");
                None
            }
        }
    }

    fn handle_initialize(&self) -> RpcResult {
        Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {},
                "resources": {},
                "prompts": {}
            },
            "serverInfo": {
                "name": "mag-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        }))
    }

    fn handle_tools_list(&self) -> RpcResult {
        Ok(json!({
            "tools": [
                {
                    "name": "search_code",
                    "description": "Search for code chunks semantically similar to the query",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": {
                                "type": "string",
                                "description": "Search query string"
                            },
                            "max_results": {
                                "type": "integer",
                                "description": "Maximum number of results to return",
                                "default": self.tools.workspace().config().search.default_results
                            },
                            "filter_type": {
                                "type": "string",
                                "enum": ["class", "method", "interface", "property", "all"],
                                "description": "Filter by code type"
                            }
                        },
                        "required": ["query"]
                    }
                },
                {
                    "name": "get_file",
                    "description": "Retrieve full file contents with optional AST",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "path": {
                                "type": "string",
                                "description": "Relative path to file from codebase root"
                            },
                            "include_ast": {
                                "type": "boolean",
                                "description": "Whether to include AST information",
                                "default": false
                            }
                        },
                        "required": ["path"]
                    }
                },
                {
                    "name": "list_files",
                    "description": "List all indexed files with metadata",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "pattern": {
                                "type": "string",
                                "description": "Optional glob pattern to filter files (e.g., 'src/**/*.cs')"
                            },
                            "filter_type": {
                                "type": "string",
                                "enum": ["class", "interface", "struct", "all"],
                                "description": "Filter by code type"
                            }
                        }
                    }
                },
                {
                    "name": "explain_symbol",
                    "description": "Use RAG to explain a specific symbol in context",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "symbol": {
                                "type": "string",
                                "description": "Symbol to explain (e.g., 'EntityManager.CreateEntity')"
                            },
                            "include_usage": {
                                "type": "boolean",
                                "description": "Whether to include usage examples",
                                "default": true
                            }
                        },
                        "required": ["symbol"]
                    }
                }
            ]
        }))
    }

    fn handle_tools_call(&self, params: &Option<Value>) -> RpcResult {
        let params = params
            .as_ref()
            .ok_or((-32602, "Missing params".to_string()))?;

        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or((-32602, "Missing tool name".to_string()))?;

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let outcome = match name {
            "search_code" => self.tool_search_code(&arguments),
            "get_file" => self.tool_get_file(&arguments),
            "list_files" => self.tool_list_files(&arguments),
            "explain_symbol" => self.tool_explain_symbol(&arguments),
            _ => return Err((-32602, format!("Unknown tool: {}", name))),
        };

        match outcome {
            Ok(value) => text_content(&value),
            Err(e) if is_invalid_params(&e) => Err((-32602, e.to_string())),
            Err(e) => {
                error!(tool = name, error = %e, "tool call failed");
                Ok(json!({
                    "content": [{ "type": "text", "text": format!("Error: {}", e) }],
                    "isError": true
                }))
            }
        }
    }

    fn tool_search_code(&self, args: &Value) -> mag_core::Result<Value> {
        let query = required_str(args, "query")?;
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);
        let filter = args.get("filter_type").and_then(|v| v.as_str());

        let hits = self.tools.search_code(query, max_results, filter)?;
        Ok(serde_json::to_value(hits)?)
    }

    fn tool_get_file(&self, args: &Value) -> mag_core::Result<Value> {
        let path = required_str(args, "path")?;
        let include_ast = args
            .get("include_ast")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(serde_json::to_value(self.tools.get_file(path, include_ast)?)?)
    }

    fn tool_list_files(&self, args: &Value) -> mag_core::Result<Value> {
        let pattern = args.get("pattern").and_then(|v| v.as_str());
        let filter = args
            .get("filter_type")
            .or_else(|| args.get("type_filter"))
            .and_then(|v| v.as_str());

        Ok(serde_json::to_value(self.tools.list_files(pattern, filter)?)?)
    }

    fn tool_explain_symbol(&self, args: &Value) -> mag_core::Result<Value> {
        let symbol = required_str(args, "symbol")?;
        let include_usage = args
            .get("include_usage")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        Ok(serde_json::to_value(
            self.tools.explain_symbol(symbol, include_usage)?,
        )?)
    }

    fn handle_resources_list(&self) -> RpcResult {
        Ok(json!({
            "resources": [
                {
                    "uri": RESOURCE_INDEXED,
                    "name": "Indexed Codebase Summary",
                    "description": "JSON summary of the indexed codebase",
                    "mimeType": "application/json"
                },
                {
                    "uri": RESOURCE_STATS,
                    "name": "Server Statistics",
                    "description": "Real-time server and index statistics",
                    "mimeType": "application/json"
                }
            ]
        }))
    }

    fn handle_resources_read(&self, params: &Option<Value>) -> RpcResult {
        let uri = params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(|v| v.as_str())
            .ok_or((-32602, "Missing 'uri' parameter".to_string()))?;

        let body = match uri {
            RESOURCE_INDEXED => self
                .tools
                .index_summary()
                .and_then(|s| Ok(serde_json::to_value(s)?)),
            RESOURCE_STATS => self
                .tools
                .server_stats()
                .and_then(|s| Ok(serde_json::to_value(s)?)),
            _ => return Err((-32602, format!("Unknown resource: {}", uri))),
        }
        .map_err(|e| (-32000, e.to_string()))?;

        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": pretty(&body)?
            }]
        }))
    }

    fn handle_prompts_list(&self) -> RpcResult {
        Ok(json!({ "prompts": list_prompts() }))
    }

    fn handle_prompts_get(&self, params: &Option<Value>) -> RpcResult {
        let params = params
            .as_ref()
            .ok_or((-32602, "Missing params".to_string()))?;
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or((-32602, "Missing prompt name".to_string()))?;

        let args: HashMap<String, String> = params
            .get("arguments")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let text = render_prompt(name, &args).map_err(|e| (-32602, e.to_string()))?;
        let description = list_prompts()
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.description)
            .unwrap_or_default();

        Ok(json!({
            "description": description,
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": text }
            }]
        }))
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> mag_core::Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| MagError::MissingArgument(key.to_string()))
}

fn is_invalid_params(e: &MagError) -> bool {
    matches!(
        e,
        MagError::MissingArgument(_)
            | MagError::InvalidFilter(_)
            | MagError::GlobPattern(_)
            | MagError::PathOutsideRoot(_)
    )
}

fn pretty(value: &Value) -> Result<String, (i32, String)> {
    serde_json::to_string_pretty(value).map_err(|e| (-32603, e.to_string()))
}

fn text_content(value: &Value) -> RpcResult {
    Ok(json!({
        "content": [{
            "type": "text",
            "text": pretty(value)?
        }]
    }))
}
