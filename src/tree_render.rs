//! ASCII tree rendering for namespaces and their components.

use crate::models::{ComponentView, LiveFeatures, NamespaceView};

const NO_LIVE_FEATURES: &str = "locally created";

/// Text shown next to a component, e.g. `debug, dev`.
pub fn component_status(live: &LiveFeatures) -> String {
    if live.is_empty() {
        NO_LIVE_FEATURES.to_string()
    } else {
        live.badges().join(", ")
    }
}

/// Render namespaces as ASCII art with component status.
///
/// Example output:
/// ```text
/// team-a
/// ├── api (debug, dev)
/// └── web (locally created)
/// ```
pub fn render_tree(namespaces: &[NamespaceView]) -> String {
    let mut output = String::new();
    for namespace in namespaces {
        output.push_str(&namespace.name);
        output.push('\n');
        for (i, component) in namespace.components.iter().enumerate() {
            let is_last = i == namespace.components.len() - 1;
            render_component(&mut output, component, is_last);
        }
    }
    output
}

fn render_component(output: &mut String, view: &ComponentView, is_last: bool) {
    let branch = if is_last { "└── " } else { "├── " };
    output.push_str(branch);
    output.push_str(view.component.name());
    output.push_str(" (");
    output.push_str(&view.status);
    output.push_str(")\n");
}
