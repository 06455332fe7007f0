use std::{env, error::Error, fs, path::Path};

// Shared between the compute shader's workgroup layout and the dispatch math.
const EMIT_WORKGROUP_SIZE: u32 = 64;

// All shaders reside in the 'src/shaders' directory
fn generate_shaders(output_path: &str) -> std::result::Result<(), Box<dyn Error>> {
    let tera = tera::Tera::new("src/shaders/*.wgsl")?;
    println!("cargo:rerun-if-changed=src/shaders/");
    let mut context = tera::Context::new();
    context.insert("workgroup_size", &EMIT_WORKGROUP_SIZE);
    fs::create_dir_all(format!("{}/shaders/", output_path))?;
    for file in fs::read_dir("src/shaders")? {
        let path = file?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("wgsl") {
            continue;
        }
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        let result = tera.render(file_name, &context)?;
        fs::write(format!("{}/shaders/{}", output_path, file_name), result)?;
        println!("cargo:rerun-if-changed=src/shaders/{}", file_name);
    }
    Ok(())
}

fn generate_constants(output_path: &str) -> std::io::Result<()> {
    fs::write(
        Path::new(output_path).join("workgroup.rs"),
        format!(
            "pub const EMIT_WORKGROUP_SIZE: u32 = {};\n",
            EMIT_WORKGROUP_SIZE
        ),
    )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    let output_path = match env::var("OUT_DIR") {
        Ok(path) => path,
        Err(err) => panic!("OUT_DIR is not set: {}", err),
    };
    if let Err(err) = generate_shaders(&output_path) {
        // panic here for a nicer error message, otherwise it will
        // be flattened to one line for some reason
        panic!("Unable to generate shaders\n{}", err);
    }
    if let Err(err) = generate_constants(&output_path) {
        panic!("Unable to write shader constants\n{}", err);
    }
}
