use std::fs;
use std::path::Path;

use anyhow::Error;
use serde_json::json;

use crate::component::ComponentRegistry;

/// The entry point invoked by `main.rs` for `Commands::Schema`: write one
/// JSON-Schema file per registered component into `out_dir`, so editor builds
/// can bundle the forms without a live backend.
pub fn write_schemas(registry: &ComponentRegistry, out_dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(out_dir)?;
    for descriptor in registry.list() {
        let doc = json!({
            "$schema": "https://json-schema.org/draft/2019-09/schema",
            "title": descriptor.name,
            "category": descriptor.kind,
            "type": "object",
            "properties": descriptor.init_param_schemas(),
            "inputs": descriptor.inputs,
            "outputs": descriptor.outputs,
        });
        let filename = format!("component-{}.schema.json", descriptor.name);
        fs::write(out_dir.join(filename), serde_json::to_string_pretty(&doc)?)?;
    }
    Ok(())
}
