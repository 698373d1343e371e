use shaderc::{CompileOptions, Compiler, OptimizationLevel, ShaderKind};
use std::{error::Error, fs, path::PathBuf};

const SHADERS: &[(&str, ShaderKind)] = &[
    ("sprite.vert", ShaderKind::Vertex),
    ("sprite.frag", ShaderKind::Fragment),
];

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=shaders");

    let compiler = Compiler::new()?;
    let mut options = CompileOptions::new()?;
    if std::env::var("PROFILE").as_deref() == Ok("release") {
        options.set_optimization_level(OptimizationLevel::Performance);
    } else {
        options.set_optimization_level(OptimizationLevel::Zero);
        options.set_generate_debug_info();
    }

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    for (name, kind) in SHADERS {
        let path = PathBuf::from("shaders").join(name);
        println!("cargo:rerun-if-changed={}", path.display());

        let source = fs::read_to_string(&path)?;
        let artifact = compiler.compile_into_spirv(&source, *kind, name, "main", Some(&options))?;
        if artifact.get_num_warnings() > 0 {
            println!("cargo:warning={}: {}", name, artifact.get_warning_messages());
        }
        fs::write(out_dir.join(format!("{name}.spv")), artifact.as_binary_u8())?;
    }

    Ok(())
}
