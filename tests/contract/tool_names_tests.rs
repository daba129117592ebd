//! Contract tests pinning tool names and their published input schemas.

use serde_json::{json, Value};

use tool_bridge::config::TimeoutConfig;
use tool_bridge::tools::{self, ToolRegistry};

fn schema(name: &str) -> Value {
    ToolRegistry::builtin(&TimeoutConfig::default())
        .get(name)
        .unwrap_or_else(|| panic!("{name} must be registered"))
        .input_schema
        .clone()
}

fn required(schema: &Value) -> Vec<&str> {
    schema["required"]
        .as_array()
        .map(|fields| fields.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

#[test]
fn tool_name_constants_are_stable() {
    assert_eq!(tools::READ_FILE, "read_file");
    assert_eq!(tools::EDIT_FILE, "edit_file");
    assert_eq!(tools::LIST_DIR, "list_dir");
    assert_eq!(tools::SEARCH_FILES, "search_files");
    assert_eq!(tools::GREP, "grep");
    assert_eq!(tools::BASH, "bash");
    assert_eq!(tools::BATCH, "batch");
    assert_eq!(tools::EXPLORE, "explore");
}

#[test]
fn explore_tools_exclude_mutation() {
    assert_eq!(
        tools::EXPLORE_TOOLS,
        ["read_file", "list_dir", "search_files", "grep", "batch"]
    );
}

/// Every schema is a closed object.
#[test]
fn schemas_are_closed_objects() {
    for descriptor in ToolRegistry::builtin(&TimeoutConfig::default()).descriptors() {
        let schema = &descriptor.input_schema;
        assert_eq!(schema["type"], json!("object"), "{}", descriptor.name);
        assert_eq!(
            schema["additionalProperties"],
            json!(false),
            "{}",
            descriptor.name
        );
    }
}

#[test]
fn required_fields_per_tool() {
    assert_eq!(required(&schema("read_file")), vec!["path"]);
    assert_eq!(
        required(&schema("edit_file")),
        vec!["path", "old_string", "new_string"]
    );
    assert!(required(&schema("list_dir")).is_empty());
    assert_eq!(required(&schema("search_files")), vec!["pattern"]);
    assert_eq!(required(&schema("grep")), vec!["pattern"]);
    assert_eq!(required(&schema("bash")), vec!["command"]);
    assert_eq!(required(&schema("batch")), vec!["calls"]);
    assert_eq!(required(&schema("explore")), vec!["task"]);
}

#[test]
fn bash_timeout_is_bounded() {
    let timeout = &schema("bash")["properties"]["timeout"];
    assert_eq!(timeout["minimum"], json!(1));
    assert_eq!(timeout["maximum"], json!(1800));
}
