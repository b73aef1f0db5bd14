// Build script: compile GLSL shaders to SPIR-V and generate the embedded asset table

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// (source, embedded name)
const SHADERS: &[(&str, &str)] = &[
    ("shaders/tri.vert", "shaders/tri-vert.spv"),
    ("shaders/tri.frag", "shaders/tri-frag.spv"),
    ("shaders/tex.vert", "shaders/tex-vert.spv"),
    ("shaders/tex.frag", "shaders/tex-frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");
    println!("cargo:rerun-if-changed=assets/");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo"));
    fs::create_dir_all(out_dir.join("shaders")).expect("create shader output dir");

    let mut entries: Vec<(String, PathBuf)> = Vec::new();

    for &(source, name) in SHADERS {
        let compiled = out_dir.join(name);
        // A checked-in .spv next to the sources is used when glslc is unavailable
        let prebuilt = manifest_dir.join(name);

        if compile_shader(&manifest_dir.join(source), &compiled) {
            entries.push((name.to_string(), compiled));
        } else if prebuilt.exists() {
            println!("cargo:warning=using prebuilt {}", name);
            entries.push((name.to_string(), prebuilt));
        } else {
            println!("cargo:warning=shader {} is not embedded; the sample using it will fail to start", name);
        }
    }

    let assets_dir = manifest_dir.join("assets");
    collect_assets(&assets_dir, &assets_dir, &mut entries);

    let mut table = String::from("pub(crate) static EMBEDDED: &[(&str, &[u8])] = &[\n");
    for (name, path) in &entries {
        let path = path.to_string_lossy();
        writeln!(table, "    ({:?}, include_bytes!({:?})),", name, path).unwrap();
    }
    table.push_str("];\n");

    fs::write(out_dir.join("assets.rs"), table).expect("write asset table");
}

fn compile_shader(input: &Path, output: &Path) -> bool {
    // Check if glslc is available (part of Vulkan SDK)
    let result = Command::new("glslc")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => true,
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), compile manually: glslc {} -o {}",
                e, input.display(), output.display());
            false
        }
    }
}

fn collect_assets(root: &Path, dir: &Path, entries: &mut Vec<(String, PathBuf)>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };

    let mut paths: Vec<PathBuf> = read_dir.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            collect_assets(root, &path, entries);
        } else if let Ok(relative) = path.strip_prefix(root) {
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            entries.push((name, path));
        }
    }
}
