mod support;

use fulcrum_core::schema::{self, Schema};

#[test]
fn vm_property_schema_fixture_is_structurally_valid() {
    let schema: Schema = support::load_fixture("vm_property_schema.yaml").unwrap();
    let errors = schema::validate_structure(&schema);
    assert!(errors.is_empty(), "unexpected structural errors: {errors:?}");
}

#[test]
fn pool_property_schema_fixture_is_structurally_valid() {
    let schema: Schema = support::load_fixture("pool_property_schema.yaml").unwrap();
    let errors = schema::validate_structure(&schema);
    assert!(errors.is_empty(), "unexpected structural errors: {errors:?}");
}

#[test]
fn vm_lifecycle_schema_fixture_parses_with_camel_case_keys() {
    let lifecycle: fulcrum_core::lifecycle::LifecycleSchema =
        support::load_fixture("vm_lifecycle_schema.yaml").unwrap();
    assert_eq!(lifecycle.initial_state, "New");
    assert_eq!(lifecycle.terminal_states, vec!["Deleted".to_string()]);
    let create = lifecycle.actions.get("create").unwrap();
    let error_transition = create
        .transitions
        .iter()
        .find(|t| t.on_error_regexp.as_deref() == Some("quota.*exceeded"))
        .unwrap();
    assert_eq!(error_transition.to, "Failed");
}

#[test]
fn pool_lifecycle_schema_fixture_parses_and_has_no_terminal_states() {
    let lifecycle: fulcrum_core::lifecycle::LifecycleSchema =
        support::load_fixture("pool_lifecycle_schema.yaml").unwrap();
    assert_eq!(lifecycle.initial_state, "New");
    assert!(lifecycle.terminal_states.is_empty());
    assert!(lifecycle.is_terminal("Deleted") == false);
    let create = lifecycle.actions.get("create").unwrap();
    assert_eq!(create.transitions[0].to, "Started");
}
