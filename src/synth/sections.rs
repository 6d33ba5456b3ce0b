//! Section model for generated script programs
//!
//! A script program is assembled from ordered sections and rendered in one
//! pass. Values crossing into the program are rendered as JSON literals, which
//! are also valid Python literals for the types used here.

use crate::synth::helpers;
use crate::synth::RunMode;
use serde_json::Value;

const BODY_INDENT: &str = "    ";

/// Ordered parts of a generated script
#[derive(Debug, Clone)]
pub struct ScriptSections {
    imports: Vec<&'static str>,
    constants: Vec<(&'static str, String)>,
    helpers: Vec<&'static str>,
    body: String,
    epilogue: &'static str,
    handler: &'static str,
}

impl ScriptSections {
    /// Assembles the sections for one run
    ///
    /// # Arguments
    ///
    /// * `mode` - Whether results go to files or to stdout
    /// * `spider_id` - Spider being run
    /// * `execution_id` - Execution identifier
    /// * `config` - Spider config exposed through `get_config()`
    /// * `body` - User code, placed inside the guarded block
    pub fn new(mode: RunMode, spider_id: i64, execution_id: &str, config: &Value, body: &str) -> Self {
        let config_text = config.to_string();
        let constants = vec![
            ("SPIDER_ID", spider_id.to_string()),
            ("EXECUTION_ID", Value::String(execution_id.to_string()).to_string()),
            ("SPIDER_CONFIG_JSON", Value::String(config_text).to_string()),
        ];

        let (logger, saver, epilogue, handler) = match mode {
            RunMode::Files => (
                helpers::LOG_TO_STDOUT,
                helpers::SAVE_TO_FILES,
                helpers::FILES_EPILOGUE,
                helpers::FILES_HANDLER,
            ),
            RunMode::Direct => (
                helpers::LOG_TO_STDERR,
                helpers::SAVE_TO_BUFFER,
                helpers::DIRECT_EPILOGUE,
                helpers::DIRECT_HANDLER,
            ),
        };

        Self {
            imports: helpers::IMPORTS.to_vec(),
            constants,
            helpers: vec![helpers::ENVIRONMENT, logger, saver],
            body: body.to_string(),
            epilogue,
            handler,
        }
    }

    /// Renders the program text
    pub fn render(&self) -> String {
        let mut out = String::new();

        for import in &self.imports {
            out.push_str(import);
            out.push('\n');
        }
        out.push('\n');

        for (name, literal) in &self.constants {
            out.push_str(name);
            out.push_str(" = ");
            out.push_str(literal);
            out.push('\n');
        }

        for helper in &self.helpers {
            out.push_str("\n\n");
            out.push_str(helper);
        }

        out.push_str("\n\ntry:\n");
        out.push_str(BODY_INDENT);
        out.push_str("log_message('INFO', 'Spider execution started')\n");
        out.push_str(&indent_body(&self.body));
        out.push_str(BODY_INDENT);
        out.push_str("pass\n");
        out.push_str(self.epilogue);
        out.push_str(self.handler);
        out
    }
}

/// Indents every non-blank line of the user body into the guarded block
fn indent_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 64);
    for line in body.lines() {
        if !line.trim().is_empty() {
            out.push_str(BODY_INDENT);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}
