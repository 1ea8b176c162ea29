use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../hwstage.template.toml");

    let template = r#"# HWSTAGE Configuration Template
# Copy this file to 'hwstage.toml' and adjust for your platform.

# Hardware device render node used when a stage does not name one explicitly
device = "/dev/dri/renderD128"
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
