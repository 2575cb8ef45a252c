use keel_core::module::{ComponentId, ModuleId, ModuleVersionId};

#[test]
fn module_id_parse_valid() {
    let id = ModuleId::parse("org.example:my-lib").unwrap();
    assert_eq!(id.group, "org.example");
    assert_eq!(id.name, "my-lib");
}

#[test]
fn module_id_parse_rejects_wrong_arity() {
    assert!(ModuleId::parse("org.example").is_none());
    assert!(ModuleId::parse("org.example:lib:1.0").is_none());
    assert!(ModuleId::parse("").is_none());
}

#[test]
fn module_id_display_roundtrip() {
    let s = "org.example:my-lib";
    assert_eq!(ModuleId::parse(s).unwrap().to_string(), s);
}

#[test]
fn module_version_id_parse_and_project() {
    let id = ModuleVersionId::parse("org.example:my-lib:1.2.3").unwrap();
    assert_eq!(id.version, "1.2.3");
    assert_eq!(id.module_id(), ModuleId::new("org.example", "my-lib"));
}

#[test]
fn module_version_id_parse_rejects_two_parts() {
    assert!(ModuleVersionId::parse("org.example:my-lib").is_none());
}

#[test]
fn component_id_from_version_id() {
    let mvi = ModuleVersionId::new("org.example", "my-lib", "1.0");
    let id = ComponentId::from(&mvi);
    assert_eq!(id.as_str(), "org.example:my-lib:1.0");
}
