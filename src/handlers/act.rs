//! Act: normalize input, dispatch the chosen method, self-heal on failure.

use std::collections::HashMap;
use std::time::Duration;

use async_recursion::async_recursion;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use action_primitives::{perform_method, ActionError, ExecCtx};
use webpilot_core_types::{clean_selector, ActResult, ActionMethod, ActionType, ObserveResult};

use crate::errors::Result;
use crate::handlers::observe::ObserveOptions;
use crate::page::Page;

/// The three shapes an act call accepts.
#[derive(Clone, Debug)]
pub enum ActInput {
    /// Free-text instruction, e.g. `"click the login button"`.
    Instruction(String),
    /// Structured options with an explicit action.
    Options(ActOptions),
    /// A result from a prior observe call; its method is authoritative.
    Observed(ObserveResult),
}

impl From<&str> for ActInput {
    fn from(instruction: &str) -> Self {
        ActInput::Instruction(instruction.to_string())
    }
}

impl From<String> for ActInput {
    fn from(instruction: String) -> Self {
        ActInput::Instruction(instruction)
    }
}

impl From<ActOptions> for ActInput {
    fn from(options: ActOptions) -> Self {
        ActInput::Options(options)
    }
}

impl From<ObserveResult> for ActInput {
    fn from(result: ObserveResult) -> Self {
        ActInput::Observed(result)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActOptions {
    pub action: Option<ActionType>,
    /// `%key%` placeholders in observed arguments are replaced from here.
    pub variable_values: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub dom_settle_timeout_ms: Option<u64>,
    pub model_name: Option<String>,
}

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).unwrap());
static WITH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)with\s+(.+?)(?:\s+and\b|\s+then\b|$)").unwrap());

/// Normalize any act input into options. Idempotent: feeding the produced
/// options back in returns them unchanged.
///
/// Free text is lightly pattern-matched into an advisory action. For
/// fill-like verbs the FIRST quoted substring becomes the value (documented
/// behavior; pass `variable_values` for anything stricter), falling back to a
/// trailing `with <value>` clause.
pub fn parse_action_input(input: &ActInput) -> ActOptions {
    match input {
        ActInput::Options(options) => options.clone(),
        ActInput::Observed(result) => ActOptions {
            action: result.method.map(|method| method.action_type()),
            ..Default::default()
        },
        ActInput::Instruction(instruction) => guess_from_instruction(instruction),
    }
}

fn guess_from_instruction(instruction: &str) -> ActOptions {
    let lower = instruction.to_lowercase();
    let mut variable_values = HashMap::new();

    let contains_any =
        |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

    let action = if contains_any(&["click", "tap", "press"]) {
        Some(ActionType::Click)
    } else if contains_any(&["type", "fill", "enter", "input"]) {
        if let Some(captures) = QUOTED_RE.captures(instruction) {
            variable_values.insert("value".to_string(), captures[1].to_string());
        } else if let Some(captures) = WITH_RE.captures(instruction) {
            variable_values.insert("value".to_string(), captures[1].trim().to_string());
        }
        Some(ActionType::Fill)
    } else if lower.contains("scroll") {
        Some(ActionType::Scroll)
    } else if contains_any(&["hover", "mouse over"]) {
        Some(ActionType::Hover)
    } else if contains_any(&["wait", "pause"]) {
        Some(ActionType::Wait)
    } else if contains_any(&["navigate", "go to", "visit"]) {
        Some(ActionType::Navigate)
    } else {
        None
    };

    ActOptions {
        action,
        variable_values,
        ..Default::default()
    }
}

pub(crate) async fn handle(page: &Page, input: ActInput) -> Result<ActResult> {
    let options = parse_action_input(&input);

    let label = match &input {
        ActInput::Instruction(instruction) => instruction.clone(),
        ActInput::Observed(result) => result.description.clone(),
        ActInput::Options(opts) => opts
            .action
            .map(|action| action.as_str().to_string())
            .unwrap_or_else(|| "perform action".to_string()),
    };
    info!(target: "act", action = %label, "starting action");

    page.wait_for_settled_dom(options.dom_settle_timeout_ms).await?;

    match input {
        ActInput::Observed(result) => execute_from_observe_result(page, result, &options, 0).await,
        ActInput::Instruction(instruction) => {
            execute_with_observation(page, instruction, &options).await
        }
        ActInput::Options(_) => {
            let verb = options
                .action
                .map(|action| action.as_str().to_string())
                .unwrap_or_else(|| "interact with".to_string());
            let instruction = format!("Find the element to {verb}");
            execute_with_observation(page, instruction, &options).await
        }
    }
}

async fn execute_with_observation(
    page: &Page,
    instruction: String,
    options: &ActOptions,
) -> Result<ActResult> {
    let observations = page
        .observe(ObserveOptions {
            instruction: Some(instruction.clone()),
            from_act: true,
            return_action: true,
            model_name: options.model_name.clone(),
            ..Default::default()
        })
        .await?;

    let Some(observed) = observations.into_iter().next() else {
        return Ok(ActResult::failure(
            options.action.unwrap_or(ActionType::Click),
            format!("element not found for instruction: {instruction}"),
        ));
    };

    execute_from_observe_result(page, observed, options, 0).await
}

fn method_for_action(action: ActionType) -> ActionMethod {
    match action {
        ActionType::Fill => ActionMethod::Fill,
        ActionType::Type => ActionMethod::Type,
        ActionType::Press => ActionMethod::Press,
        ActionType::Hover => ActionMethod::Hover,
        ActionType::Scroll => ActionMethod::ScrollIntoView,
        _ => ActionMethod::Click,
    }
}

fn substitute_variables(arguments: &mut [String], variables: &HashMap<String, String>) {
    for argument in arguments.iter_mut() {
        for (key, value) in variables {
            let placeholder = format!("%{key}%");
            if argument.contains(&placeholder) {
                *argument = argument.replace(&placeholder, value);
            }
        }
    }
}

#[async_recursion]
async fn execute_from_observe_result(
    page: &Page,
    observed: ObserveResult,
    options: &ActOptions,
    retry_count: u32,
) -> Result<ActResult> {
    // `not-supported` is terminal: the model judged the instruction beyond
    // the method set, so retrying cannot help.
    if observed.method == Some(ActionMethod::NotSupported) {
        warn!(target: "act", "observation declared the action not supported");
        return Ok(ActResult::failure(
            options.action.unwrap_or(ActionType::Click),
            "the method 'not-supported' is not executable",
        )
        .with_description(observed.description.clone()));
    }

    let method = observed
        .method
        .unwrap_or_else(|| method_for_action(options.action.unwrap_or(ActionType::Click)));
    let action = method.action_type();

    let mut arguments = observed.arguments.clone();
    substitute_variables(&mut arguments, &options.variable_values);
    if arguments.is_empty() && matches!(method, ActionMethod::Fill | ActionMethod::Type) {
        if let Some(value) = options.variable_values.get("value") {
            arguments.push(value.clone());
        }
    }

    let xpath = clean_selector(&observed.selector);

    info!(
        target: "act",
        method = %method,
        selector = %observed.selector,
        retry_count,
        "performing method"
    );

    let outcome = if xpath.is_empty() {
        Err(ActionError::ElementNotFound(
            "observation returned an empty selector".to_string(),
        ))
    } else {
        let config = page.config();
        let timeout =
            Duration::from_millis(options.timeout_ms.unwrap_or(config.act_timeout_ms));
        let settle = Duration::from_millis(
            options
                .dom_settle_timeout_ms
                .unwrap_or(config.dom_settle_timeout_ms),
        );
        let ctx = ExecCtx::with_timeout(timeout);
        perform_method(page, &ctx, method, &xpath, &arguments, settle).await
    };

    match outcome {
        Ok(()) => {
            // Every successful dispatch gates on a settled DOM before the
            // caller sees success, navigation or not.
            page.wait_for_settled_dom(options.dom_settle_timeout_ms).await?;
            Ok(ActResult::success(action)
                .with_selector(observed.selector.clone())
                .with_description(observed.description.clone())
                .with_metadata(json!({
                    "method": method.as_str(),
                    "arguments": arguments,
                })))
        }
        Err(err) => {
            warn!(
                target: "act",
                error = %err,
                kind = err.kind(),
                retry_count,
                "method execution failed"
            );

            let config = page.config();
            let can_heal = config.self_heal
                && retry_count < config.max_retries
                && !matches!(err, ActionError::Unsupported(_));

            if can_heal {
                attempt_self_heal(page, &observed.description, options, &err, retry_count + 1)
                    .await
            } else {
                let mut result = ActResult::failure(action, err.to_string())
                    .with_selector(observed.selector.clone())
                    .with_description(observed.description.clone());
                if retry_count > 0 {
                    result = result.with_metadata(json!({
                        "self_healing_attempted": true,
                        "retry_count": retry_count,
                    }));
                }
                Ok(result)
            }
        }
    }
}

/// Build an error-informed instruction and re-observe.
#[async_recursion]
async fn attempt_self_heal(
    page: &Page,
    original_instruction: &str,
    options: &ActOptions,
    original_error: &ActionError,
    retry_count: u32,
) -> Result<ActResult> {
    info!(
        target: "act",
        retry_count,
        error = %original_error,
        "attempting self-healing"
    );

    // Backoff grows with the attempt number.
    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
    page.wait_for_settled_dom(options.dom_settle_timeout_ms).await?;

    let error_text = original_error.to_string().to_lowercase();
    let healing_instruction = if error_text.contains("timeout") {
        format!(
            "{original_instruction}. The element might be loading slowly or hidden. \
             Look for alternative ways to perform this action."
        )
    } else if error_text.contains("not found") || error_text.contains("no element") {
        format!(
            "{original_instruction}. The element was not found. Look for similar elements \
             or alternative ways to achieve this action."
        )
    } else if error_text.contains("not clickable") || error_text.contains("intercepted") {
        format!(
            "{original_instruction}. The element might be covered by another element. \
             Try scrolling or look for alternative elements."
        )
    } else {
        format!(
            "{original_instruction}. Previous attempt failed with: {original_error}. \
             Try a different approach."
        )
    };

    let observations = page
        .observe(ObserveOptions {
            instruction: Some(healing_instruction),
            from_act: true,
            return_action: true,
            model_name: options.model_name.clone(),
            ..Default::default()
        })
        .await;

    let fallback_action = options.action.unwrap_or(ActionType::Click);
    match observations {
        Err(err) => Ok(ActResult::failure(
            fallback_action,
            format!("self-healing observation failed: {err}. Original error: {original_error}"),
        )
        .with_metadata(json!({
            "self_healing_attempted": true,
            "retry_count": retry_count,
        }))),
        Ok(results) => match results.into_iter().next() {
            None => Ok(ActResult::failure(
                fallback_action,
                format!("self-healing found no elements. Original error: {original_error}"),
            )
            .with_metadata(json!({
                "self_healing_attempted": true,
                "retry_count": retry_count,
            }))),
            Some(observed) => {
                execute_from_observe_result(page, observed, options, retry_count).await
            }
        },
    }
}
