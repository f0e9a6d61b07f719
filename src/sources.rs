use crate::traits::ConnectorRegistry;

/// Print the registered connectors and what they support.
pub fn list_connectors(registry: &ConnectorRegistry) {
    println!(
        "{:<12} {:<12} {:<10} {:<16} {:<10} RESUMING",
        "CONNECTOR", "NAME", "VERSION", "CATEGORIES", "ARCHIVING"
    );

    for info in registry.describe() {
        println!(
            "{:<12} {:<12} {:<10} {:<16} {:<10} {}",
            info.key,
            info.name,
            info.version,
            info.categories.join(","),
            info.has_archiving,
            info.has_resuming
        );
        println!("  {}", info.description);
    }
}
