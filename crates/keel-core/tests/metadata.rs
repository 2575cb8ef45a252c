use keel_core::dependency::DependencySpec;
use keel_core::metadata::{Capability, ComponentMetadata, ConfigurationMetadata};
use keel_core::module::{ModuleId, ModuleVersionId};
use keel_core::selector::VersionConstraint;

fn mvi(s: &str) -> ModuleVersionId {
    ModuleVersionId::parse(s).unwrap()
}

#[test]
fn new_component_has_default_configuration() {
    let component = ComponentMetadata::new(mvi("org.example:lib:1.0"));
    assert_eq!(component.configurations.len(), 1);
    assert_eq!(component.configurations[0].name, "default");
}

#[test]
fn with_dependency_appends_to_default_configuration() {
    let dep = DependencySpec::new(
        ModuleId::new("org.example", "other"),
        VersionConstraint::require("2.0"),
    );
    let component = ComponentMetadata::new(mvi("org.example:lib:1.0")).with_dependency(dep);
    assert_eq!(component.configurations[0].dependencies.len(), 1);
}

#[test]
fn named_configuration_lookup() {
    let component = ComponentMetadata::new(mvi("org.example:lib:1.0"))
        .with_configuration(ConfigurationMetadata::new("runtime"));
    let (index, configuration) = component.configuration("runtime").unwrap();
    assert_eq!(index, 1);
    assert_eq!(configuration.name, "runtime");
    assert!(component.configuration("missing").is_none());
}

#[test]
fn capability_display() {
    let capability = Capability::new("org.example", "json-impl", "1.0");
    assert_eq!(capability.to_string(), "org.example:json-impl:1.0");
}

#[test]
fn optional_dependency_flag() {
    let dep = DependencySpec::new(
        ModuleId::new("org.example", "other"),
        VersionConstraint::require("2.0"),
    )
    .optional();
    assert!(dep.optional);
    assert!(dep.configuration.is_none());
}
