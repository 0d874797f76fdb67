//! Extract: page content → model → schema-shaped object.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use perceiver_structural::get_accessibility_tree;
use webpilot_core_types::clean_text;

use crate::errors::{AutomationError, Result};
use crate::llm::schema;
use crate::page::Page;

/// Caller-supplied validation hook; the built-in structural validator runs
/// when absent.
pub type SchemaValidator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// What page content to feed the model.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ContentSource {
    #[default]
    Text,
    Dom,
    All,
}

#[derive(Clone)]
pub struct ExtractOptions {
    pub instruction: Option<String>,
    /// JSON-schema document describing the wanted object.
    pub schema: Value,
    pub content: ContentSource,
    pub model_name: Option<String>,
    pub validator: Option<SchemaValidator>,
}

impl ExtractOptions {
    pub fn new(schema: Value) -> Self {
        Self {
            instruction: None,
            schema,
            content: ContentSource::default(),
            model_name: None,
            validator: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_content(mut self, content: ContentSource) -> Self {
        self.content = content;
        self
    }

    pub fn with_validator(mut self, validator: SchemaValidator) -> Self {
        self.validator = Some(validator);
        self
    }
}

#[derive(Clone, Debug)]
pub struct ExtractResult {
    pub data: Value,
    pub metadata: Value,
}

const HTML_SLICE_LIMIT: usize = 5_000;
const TEXT_LIMIT: usize = 8_000;

pub(crate) async fn handle(page: &Page, options: ExtractOptions) -> Result<ExtractResult> {
    info!(
        target: "extract",
        instruction = options.instruction.as_deref().unwrap_or(""),
        "starting extraction"
    );

    page.wait_for_settled_dom(None).await?;

    let url = page.url().await.unwrap_or_default();
    let title = page.title().await.unwrap_or_default();
    let text = page
        .evaluate("document.body ? document.body.innerText : ''")
        .await
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .map(|raw| truncate(&clean_text(&raw), TEXT_LIMIT))
        .unwrap_or_default();
    let html = if matches!(options.content, ContentSource::Dom | ContentSource::All) {
        Some(truncate(&page.content().await.unwrap_or_default(), HTML_SLICE_LIMIT))
    } else {
        None
    };

    // URL-typed fields are rewritten to numeric ids so the model picks from
    // a closed list instead of transcribing long URLs.
    let url_paths = collect_url_fields(&options.schema);
    let (schema_for_llm, url_table) = if url_paths.is_empty() {
        (options.schema.clone(), None)
    } else {
        let mut urls: Vec<String> = match get_accessibility_tree(page, None).await {
            Ok(tree) => tree.id_to_url.values().cloned().collect(),
            Err(err) => {
                debug!(target: "extract", %err, "url discovery failed; keeping url fields");
                Vec::new()
            }
        };
        urls.sort();
        urls.dedup();
        if urls.is_empty() {
            (options.schema.clone(), None)
        } else {
            (rewrite_url_fields(&options.schema), Some(urls))
        }
    };

    let prompt = build_extract_prompt(
        &url,
        &title,
        &text,
        html.as_deref(),
        options.instruction.as_deref(),
        url_table.as_deref(),
    );

    let mut data = page
        .llm()
        .generate_object(&prompt, &schema_for_llm, 0.1)
        .await?;

    if let Some(urls) = &url_table {
        for path in &url_paths {
            restore_urls_at(&mut data, path, urls);
        }
    }

    let validation = match &options.validator {
        Some(validator) => validator(&data),
        None => schema::validate(&options.schema, &data),
    };
    if let Err(reason) = validation {
        return Err(AutomationError::SchemaValidation {
            reason,
            payload: data,
        });
    }

    info!(target: "extract", "extraction completed");
    Ok(ExtractResult {
        data,
        metadata: json!({
            "url": url,
            "title": title,
            "url_fields_rewritten": url_table.is_some(),
        }),
    })
}

fn truncate(raw: &str, limit: usize) -> String {
    if raw.len() <= limit {
        return raw.to_string();
    }
    let mut end = limit;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

fn build_extract_prompt(
    url: &str,
    title: &str,
    text: &str,
    html: Option<&str>,
    instruction: Option<&str>,
    url_table: Option<&[String]>,
) -> String {
    let mut prompt = format!(
        "Extract structured data from the following web page content.\n\n\
         Page URL: {url}\nPage Title: {title}\n\n\
         Page Text Content:\n{text}\n\n"
    );
    if let Some(html) = html {
        prompt.push_str(&format!("HTML Structure (truncated):\n{html}\n\n"));
    }
    if let Some(instruction) = instruction {
        prompt.push_str(&format!("Extraction Instruction: {instruction}\n\n"));
    }
    if let Some(urls) = url_table {
        prompt.push_str("Known link URLs, referenced by 1-based numeric id:\n");
        for (index, url) in urls.iter().enumerate() {
            prompt.push_str(&format!("{}: {url}\n", index + 1));
        }
        prompt.push_str("\nFor url-typed fields, answer with the numeric id.\n\n");
    }
    prompt.push_str(
        "Extract the requested information from the page content. If a field cannot be \
         determined, use null. Return the data as a valid JSON object matching the schema.",
    );
    prompt
}

/// One hop in a schema/data path.
#[derive(Clone, Debug, PartialEq, Eq)]
enum SchemaStep {
    Prop(String),
    Items,
}

/// Paths to every `{ "type": "string", "format": "url" }` field.
fn collect_url_fields(schema: &Value) -> Vec<Vec<SchemaStep>> {
    let mut out = Vec::new();
    walk_schema(schema, &mut Vec::new(), &mut out);
    out
}

fn walk_schema(schema: &Value, prefix: &mut Vec<SchemaStep>, out: &mut Vec<Vec<SchemaStep>>) {
    let kind = schema.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "string" => {
            if schema.get("format").and_then(Value::as_str) == Some("url") {
                out.push(prefix.clone());
            }
        }
        "object" => {
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (key, subschema) in properties {
                    prefix.push(SchemaStep::Prop(key.clone()));
                    walk_schema(subschema, prefix, out);
                    prefix.pop();
                }
            }
        }
        "array" => {
            if let Some(items) = schema.get("items") {
                prefix.push(SchemaStep::Items);
                walk_schema(items, prefix, out);
                prefix.pop();
            }
        }
        _ => {}
    }
}

/// Clone of the schema with url-typed strings replaced by integer ids.
fn rewrite_url_fields(schema: &Value) -> Value {
    let mut rewritten = schema.clone();
    let paths = collect_url_fields(schema);
    for path in paths {
        if let Some(target) = schema_node_mut(&mut rewritten, &path) {
            *target = json!({
                "type": "integer",
                "description": "numeric id of a url from the provided list",
            });
        }
    }
    rewritten
}

fn schema_node_mut<'a>(schema: &'a mut Value, path: &[SchemaStep]) -> Option<&'a mut Value> {
    let mut current = schema;
    for step in path {
        current = match step {
            SchemaStep::Prop(key) => current.get_mut("properties")?.get_mut(key)?,
            SchemaStep::Items => current.get_mut("items")?,
        };
    }
    Some(current)
}

/// Replace 1-based numeric ids with the URLs they name, in place.
fn restore_urls_at(data: &mut Value, path: &[SchemaStep], urls: &[String]) {
    match path.split_first() {
        None => {
            if let Some(id) = data.as_u64() {
                if id >= 1 && (id as usize) <= urls.len() {
                    *data = Value::String(urls[id as usize - 1].clone());
                }
            }
        }
        Some((SchemaStep::Prop(key), rest)) => {
            if let Some(next) = data.get_mut(key) {
                restore_urls_at(next, rest, urls);
            }
        }
        Some((SchemaStep::Items, rest)) => {
            if let Some(items) = data.as_array_mut() {
                for item in items {
                    restore_urls_at(item, rest, urls);
                }
            }
        }
    }
}
