// build.rs
// Build script for Vulkan shader compilation

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_STAGES: [&str; 3] = ["vert", "frag", "comp"];

/// Compile every shader stage file in `shader_dir` to `<file name>.spv` in `target_dir`
fn compile_shaders(shader_dir: &Path, target_dir: &Path, glslc: &str) -> usize {
    let shader_files = match std::fs::read_dir(shader_dir) {
        Ok(files) => files,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return 0;
        }
    };

    let mut compiled_count = 0;
    for entry in shader_files {
        let path = match entry {
            Ok(e) => e.path(),
            Err(e) => {
                eprintln!("warning: Error reading shader directory entry: {}", e);
                continue;
            }
        };

        let is_stage = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| SHADER_STAGES.contains(&ext));
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !is_stage {
            continue;
        }

        // gradient.comp -> gradient.comp.spv, the name the shader library looks up
        let out_file = target_dir.join(format!("{file_name}.spv"));

        let needs_compile = match (
            std::fs::metadata(&path).and_then(|m| m.modified()),
            std::fs::metadata(&out_file).and_then(|m| m.modified()),
        ) {
            (Ok(src), Ok(dst)) => src > dst,
            _ => true,
        };
        if !needs_compile {
            eprintln!("info: Shader {file_name} is up to date");
            continue;
        }

        let status = Command::new(glslc)
            .arg("--target-env=vulkan1.3")
            .arg("-I")
            .arg(shader_dir)
            .arg(&path)
            .arg("-o")
            .arg(&out_file)
            .status();

        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {file_name}");
                compiled_count += 1;
            }
            Ok(s) => {
                eprintln!("error: glslc failed for {:?} with exit code: {}", path, s.code().unwrap_or(-1));
                panic!("Shader compilation failed");
            }
            Err(e) => {
                eprintln!("error: Failed to run glslc for {:?}: {}", path, e);
                panic!("Failed to execute shader compiler");
            }
        }
    }
    compiled_count
}

fn main() {
    // Tell cargo to rerun this build script if any shader files change
    println!("cargo:rerun-if-changed=../../resources/shaders");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let vulkan_sdk = match env::var("VULKAN_SDK") {
        Ok(sdk) => sdk,
        Err(_) => {
            eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
            eprintln!("hint: Install Vulkan SDK and set VULKAN_SDK environment variable");
            return;
        }
    };

    let glslc = if cfg!(target_os = "windows") {
        format!("{}\\Bin\\glslc.exe", vulkan_sdk)
    } else {
        format!("{}/bin/glslc", vulkan_sdk)
    };

    if !Path::new(&glslc).exists() {
        eprintln!("error: glslc not found at: {}", glslc);
        eprintln!("hint: Ensure Vulkan SDK is properly installed");
        panic!("Shader compiler not found");
    }

    let shader_dir = PathBuf::from("../../resources/shaders");
    let target_dir = PathBuf::from("../../target/shaders");

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create target directory: {}", e);
        return;
    }

    let compiled_count = compile_shaders(&shader_dir, &target_dir, &glslc);
    if compiled_count > 0 {
        eprintln!("info: Successfully compiled {} shader(s)", compiled_count);
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
