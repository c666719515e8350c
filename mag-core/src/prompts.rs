//! Prompt templates offered to hosts

use crate::error::MagError;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: Vec<PromptArgument>,
}

pub fn list_prompts() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate {
            name: "code_review",
            description: "Template for reviewing code changes",
            arguments: vec![
                PromptArgument {
                    name: "file_path",
                    description: "Path to file being reviewed",
                    required: true,
                },
                PromptArgument {
                    name: "change_description",
                    description: "Description of what changed in the code",
                    required: true,
                },
            ],
        },
        PromptTemplate {
            name: "architecture_analysis",
            description: "Template for analyzing system architecture",
            arguments: vec![PromptArgument {
                name: "namespace",
                description: "Namespace to analyze (e.g., 'MyApp.Core')",
                required: true,
            }],
        },
    ]
}

/// Fill in a template by name. Every required argument must be present.
pub fn render_prompt(name: &str, args: &HashMap<String, String>) -> crate::Result<String> {
    let template = list_prompts()
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| MagError::UnknownPrompt(name.to_string()))?;

    for arg in template.arguments.iter().filter(|a| a.required) {
        if args.get(arg.name).map(|v| v.trim().is_empty()).unwrap_or(true) {
            return Err(MagError::MissingArgument(arg.name.to_string()));
        }
    }
    let get = |key: &str| args.get(key).map(String::as_str).unwrap_or_default();

    Ok(match name {
        "code_review" => code_review(get("file_path"), get("change_description")),
        _ => architecture_analysis(get("namespace")),
    })
}

fn code_review(file_path: &str, change_description: &str) -> String {
    format!(
        "Review the following C# code change in {file_path}:

Change: {change_description}

Please use the `search_code` tool to:
1. Find related classes and methods in the codebase
2. Identify potential breaking changes
3. Check for style consistency with existing patterns

Then provide:
- **Architectural concerns**: How does this change fit into the overall design?
- **Performance implications**: Are there any performance considerations?
- **Testing recommendations**: What tests should be added or updated?
- **Related code**: What other parts of the codebase might be affected?

Use the codebase context to provide specific, actionable feedback.
"
    )
}

fn architecture_analysis(namespace: &str) -> String {
    format!(
        "Analyze the architecture of the {namespace} namespace:

Please use the `list_files` and `search_code` tools to:
1. Identify core abstractions and key classes
2. Map dependencies between classes and components
3. Assess design pattern usage and architectural patterns
4. Evaluate separation of concerns and modularity

Then provide:
- **Component diagram** (using mermaid syntax if possible):
  ```mermaid
  graph TD
    A[Component A] --> B[Component B]
  ```

- **Design patterns identified**: List any design patterns in use

- **Architectural assessment**:
  - Strengths of the current architecture
  - Potential improvements or concerns
  - Scalability considerations
  - Maintainability score (1-10) with justification

- **Dependencies**: Key internal and external dependencies

Use the codebase context to provide a comprehensive architectural overview.
"
    )
}
