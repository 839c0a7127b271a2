//! The meta-prompt sent to the generative model.
//!
//! The template is fixed; only the user prompt and the specified
//! parameters vary, so identical inputs always produce identical text.

use std::fmt::Write;

use artisan_core::parameters::GenerationParameters;
use artisan_core::scripting::executor::EXPORT_PLACEHOLDER;

use crate::response::SCRIPT_FIELD;

/// Render the full instruction text for one job.
pub fn build_meta_prompt(prompt: &str, parameters: &GenerationParameters) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str(
        "You are an expert Blender Python script generator. Your only job is to write a \
         Python script that Blender can run from its command line to build a 3D model \
         matching the user's request.\n\n",
    );

    let _ = writeln!(out, "**User Prompt:** '{}'", prompt.trim());

    let mut specified = parameters.specified().peekable();
    if specified.peek().is_some() {
        out.push_str("\n**Model Parameters:**\n");
        for (name, value) in specified {
            let _ = writeln!(out, "- {}: {value}", label(name));
        }
    }

    let _ = write!(
        out,
        "\n**Constraints & Requirements:**\n\
         - Output exactly one raw JSON object and nothing else. No explanations, no markdown, no ```json fences.\n\
         - The JSON object must contain a single key: \"{SCRIPT_FIELD}\".\n\
         - The value of \"{SCRIPT_FIELD}\" must be a string holding the complete, executable Blender Python script.\n\
         - The script must be self-contained and use only the standard Blender Python API (bpy).\n\
         - Do not clear and rebuild the default scene. Add new objects for the model and export only those objects.\n\
         - Keep a low-poly aesthetic unless the parameters above ask for something else.\n\
         - The script MUST export the final model as a GLB file. Use the placeholder '{EXPORT_PLACEHOLDER}' as the file path; \
         the application replaces it before execution.\n\
         \x20 Example export line: `bpy.ops.export_scene.gltf(filepath='{EXPORT_PLACEHOLDER}', export_format='GLB', use_selection=True)`\n\
         \n\
         **Example of a valid JSON output:**\n\
         {{\n\
         \x20 \"{SCRIPT_FIELD}\": \"import bpy\\n\\n# Create model\\n...\\n\\n# Export model\\nbpy.ops.export_scene.gltf(filepath='{EXPORT_PLACEHOLDER}', export_format='GLB', use_selection=True)\"\n\
         }}\n\
         \n\
         Now generate the JSON output for the user prompt above.\n"
    );

    out
}

/// Human-readable label for a parameter name.
fn label(name: &str) -> String {
    let mut label = name.replace('_', " ");
    if let Some(first) = label.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    label
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
